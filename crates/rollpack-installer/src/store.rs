use std::fs;
use std::path::PathBuf;

use anyhow::Context;
use rollpack_core::{validate_package_name, validate_version};
use tracing::{debug, info, warn};

use crate::fetch::fetch_payload;
use crate::fs_utils::remove_dir_if_exists;
use crate::layout::{StoreLayout, EXPERIMENT_LINK, STABLE_LINK};
use crate::links::{link_target_for, read_link_version, swap_link, PackageLinks};
use crate::StoreError;

/// Versioned package tree with atomically swapped `stable`/`experiment`
/// links. Single writer: callers serialise mutations per package.
#[derive(Debug, Clone)]
pub struct PackageStore {
    layout: StoreLayout,
}

impl PackageStore {
    pub fn new(layout: StoreLayout) -> Self {
        Self { layout }
    }

    pub fn layout(&self) -> &StoreLayout {
        &self.layout
    }

    /// Installs `version` into its own directory. An existing directory for
    /// the same version is reused as-is; nothing is ever rewritten in place.
    /// No link is touched.
    pub fn install(
        &self,
        package: &str,
        version: &str,
        url: &str,
        sha256: Option<&str>,
    ) -> Result<PathBuf, StoreError> {
        check_names(package, version)?;
        let dst = self.layout.version_dir(package, version);
        if dst.is_dir() {
            debug!(package, version, "version already installed, reusing directory");
            return Ok(dst);
        }

        let package_root = self.layout.package_root(package);
        self.layout
            .ensure_package_root(package)
            .map_err(|err| StoreError::disk(&package_root, err))?;

        let staging = self.layout.staging_dir(package, version);
        let scratch = staging.join("scratch");
        let payload = staging.join("payload");
        fs::create_dir_all(&scratch)
            .with_context(|| format!("failed to create {}", scratch.display()))
            .map_err(|err| StoreError::disk(&staging, err))?;

        info!(package, version, url, "fetching package version");
        if let Err(err) = fetch_payload(url, sha256, &scratch, &payload) {
            let _ = remove_dir_if_exists(&staging);
            return Err(StoreError::Fetch {
                package: package.to_string(),
                version: version.to_string(),
                url: url.to_string(),
                detail: format!("{err:#}"),
            });
        }

        let renamed = fs::rename(&payload, &dst).with_context(|| {
            format!(
                "failed to move {} into {}",
                payload.display(),
                dst.display()
            )
        });
        let _ = remove_dir_if_exists(&staging);
        renamed.map_err(|err| StoreError::disk(&dst, err))?;

        info!(package, version, path = %dst.display(), "installed package version");
        Ok(dst)
    }

    pub fn point_stable(&self, package: &str, version: &str) -> Result<(), StoreError> {
        self.point(package, STABLE_LINK, version)
    }

    pub fn point_experiment(&self, package: &str, version: &str) -> Result<(), StoreError> {
        self.point(package, EXPERIMENT_LINK, version)
    }

    /// Re-points `experiment` at whatever `stable` currently targets.
    pub fn clear_experiment(&self, package: &str) -> Result<(), StoreError> {
        let stable = self.read_stable(package)?;
        self.point(package, EXPERIMENT_LINK, &stable)
    }

    pub fn read_links(&self, package: &str) -> Result<Option<PackageLinks>, StoreError> {
        let stable_link = self.layout.stable_link(package);
        let Some(stable) =
            read_link_version(&stable_link).map_err(|err| StoreError::disk(&stable_link, err))?
        else {
            return Ok(None);
        };

        let experiment_link = self.layout.experiment_link(package);
        let experiment = read_link_version(&experiment_link)
            .map_err(|err| StoreError::disk(&experiment_link, err))?
            .unwrap_or_else(|| stable.clone());
        Ok(Some(PackageLinks { stable, experiment }))
    }

    /// Installed version directories, sorted. Links and scratch entries are
    /// skipped.
    pub fn versions(&self, package: &str) -> Result<Vec<String>, StoreError> {
        let root = self.layout.package_root(package);
        if !root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(&root)
            .with_context(|| format!("failed to read {}", root.display()))
            .map_err(|err| StoreError::disk(&root, err))?;
        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry
                .context("failed to read package directory entry")
                .map_err(|err| StoreError::disk(&root, err))?;
            let Ok(file_type) = entry.file_type() else {
                continue;
            };
            if !file_type.is_dir() {
                continue;
            }
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if StoreLayout::is_scratch_entry(&name) {
                continue;
            }
            versions.push(name);
        }
        versions.sort();
        Ok(versions)
    }

    /// Packages that have completed at least one install.
    pub fn installed_packages(&self) -> Result<Vec<String>, StoreError> {
        let root = self.layout.root();
        if !root.exists() {
            return Ok(Vec::new());
        }

        let entries = fs::read_dir(root)
            .with_context(|| format!("failed to read {}", root.display()))
            .map_err(|err| StoreError::disk(root, err))?;
        let mut packages = Vec::new();
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if validate_package_name(&name).is_err() {
                continue;
            }
            if fs::symlink_metadata(self.layout.stable_link(&name)).is_ok() {
                packages.push(name);
            }
        }
        packages.sort();
        Ok(packages)
    }

    /// Removes version directories neither link references, plus scratch
    /// leftovers from interrupted installs. Returns the removed versions.
    pub fn garbage_collect(&self, package: &str) -> Result<Vec<String>, StoreError> {
        let links = self
            .read_links(package)?
            .ok_or_else(|| StoreError::NotInstalled(package.to_string()))?;

        let mut removed = Vec::new();
        for version in self.versions(package)? {
            if version == links.stable || version == links.experiment {
                continue;
            }
            let dir = self.layout.version_dir(package, &version);
            remove_dir_if_exists(&dir).map_err(|err| StoreError::disk(&dir, err))?;
            removed.push(version);
        }

        self.remove_scratch_entries(package);
        if !removed.is_empty() {
            info!(package, removed = ?removed, "garbage collected package versions");
        }
        Ok(removed)
    }

    pub fn remove_version(&self, package: &str, version: &str) -> Result<(), StoreError> {
        check_names(package, version)?;
        if let Some(links) = self.read_links(package)? {
            if links.stable == version || links.experiment == version {
                return Err(StoreError::ReferencedVersion {
                    package: package.to_string(),
                    version: version.to_string(),
                });
            }
        }

        let dir = self.layout.version_dir(package, version);
        remove_dir_if_exists(&dir).map_err(|err| StoreError::disk(&dir, err))?;
        debug!(package, version, "removed package version");
        Ok(())
    }

    pub fn remove_package(&self, package: &str) -> Result<(), StoreError> {
        validate_package_name(package).map_err(|err| StoreError::InvalidName(err.to_string()))?;
        let root = self.layout.package_root(package);
        remove_dir_if_exists(&root).map_err(|err| StoreError::disk(&root, err))?;
        info!(package, "removed package tree");
        Ok(())
    }

    fn point(&self, package: &str, link_name: &str, version: &str) -> Result<(), StoreError> {
        check_names(package, version)?;
        let dir = self.layout.version_dir(package, version);
        if !dir.is_dir() {
            return Err(StoreError::MissingVersion {
                package: package.to_string(),
                version: version.to_string(),
            });
        }

        let link = self.layout.package_root(package).join(link_name);
        let tmp = self.layout.link_tmp_path(package, link_name);
        swap_link(&link, &tmp, &link_target_for(version))
            .map_err(|err| StoreError::disk(&link, err))?;
        debug!(package, version, link = link_name, "repointed package link");
        Ok(())
    }

    fn read_stable(&self, package: &str) -> Result<String, StoreError> {
        let link = self.layout.stable_link(package);
        read_link_version(&link)
            .map_err(|err| StoreError::disk(&link, err))?
            .ok_or_else(|| StoreError::NotInstalled(package.to_string()))
    }

    fn remove_scratch_entries(&self, package: &str) {
        let root = self.layout.package_root(package);
        let Ok(entries) = fs::read_dir(&root) else {
            return;
        };
        for entry in entries.flatten() {
            let Some(name) = entry.file_name().to_str().map(str::to_string) else {
                continue;
            };
            if !StoreLayout::is_scratch_entry(&name) {
                continue;
            }
            let path = entry.path();
            let result = match entry.file_type() {
                Ok(file_type) if file_type.is_dir() => remove_dir_if_exists(&path),
                _ => fs::remove_file(&path)
                    .with_context(|| format!("failed to remove {}", path.display())),
            };
            if let Err(err) = result {
                warn!(package, path = %path.display(), error = %err, "failed to remove scratch entry");
            }
        }
    }
}

fn check_names(package: &str, version: &str) -> Result<(), StoreError> {
    validate_package_name(package).map_err(|err| StoreError::InvalidName(err.to_string()))?;
    validate_version(version).map_err(|err| StoreError::InvalidName(err.to_string()))
}

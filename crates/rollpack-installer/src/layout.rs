use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};

use crate::fs_utils::unique_suffix;

pub const STABLE_LINK: &str = "stable";
pub const EXPERIMENT_LINK: &str = "experiment";

const STAGING_PREFIX: &str = ".staging-";
const LINK_TMP_PREFIX: &str = ".link-";

/// `<root>/<package>/<version>/` directories plus the `stable` and
/// `experiment` links of each package.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreLayout {
    root: PathBuf,
}

impl StoreLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn package_root(&self, package: &str) -> PathBuf {
        self.root.join(package)
    }

    pub fn version_dir(&self, package: &str, version: &str) -> PathBuf {
        self.package_root(package).join(version)
    }

    pub fn stable_link(&self, package: &str) -> PathBuf {
        self.package_root(package).join(STABLE_LINK)
    }

    pub fn experiment_link(&self, package: &str) -> PathBuf {
        self.package_root(package).join(EXPERIMENT_LINK)
    }

    /// A fresh, never-reused staging directory next to the version dirs so
    /// the final rename stays on one filesystem.
    pub fn staging_dir(&self, package: &str, version: &str) -> PathBuf {
        self.package_root(package).join(format!(
            "{STAGING_PREFIX}{version}-{}-{}",
            std::process::id(),
            unique_suffix()
        ))
    }

    pub fn link_tmp_path(&self, package: &str, link_name: &str) -> PathBuf {
        self.package_root(package).join(format!(
            "{LINK_TMP_PREFIX}{link_name}-{}-{}",
            std::process::id(),
            unique_suffix()
        ))
    }

    pub(crate) fn is_scratch_entry(name: &str) -> bool {
        name.starts_with(STAGING_PREFIX) || name.starts_with(LINK_TMP_PREFIX)
    }

    pub fn ensure_package_root(&self, package: &str) -> Result<PathBuf> {
        let dir = self.package_root(package);
        fs::create_dir_all(&dir).with_context(|| format!("failed to create {}", dir.display()))?;
        Ok(dir)
    }
}

pub fn default_install_root() -> PathBuf {
    PathBuf::from("/opt/rollpack/packages")
}

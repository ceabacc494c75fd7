use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context, Result};

use crate::fs_utils::remove_file_if_exists;

/// Versions the two package links resolve to, read once from disk.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageLinks {
    pub stable: String,
    pub experiment: String,
}

impl PackageLinks {
    pub fn has_experiment(&self) -> bool {
        self.experiment != self.stable
    }
}

/// Replaces `link` so that it points at `target` without a window where the
/// link is missing: the new link is created at `tmp` and renamed over `link`.
pub(crate) fn swap_link(link: &Path, tmp: &Path, target: &Path) -> Result<()> {
    remove_file_if_exists(tmp)
        .with_context(|| format!("failed to clear stale link {}", tmp.display()))?;
    std::os::unix::fs::symlink(target, tmp).with_context(|| {
        format!(
            "failed to create symlink {} -> {}",
            tmp.display(),
            target.display()
        )
    })?;
    if let Err(err) = fs::rename(tmp, link) {
        let _ = fs::remove_file(tmp);
        return Err(err).with_context(|| format!("failed to replace link {}", link.display()));
    }
    Ok(())
}

/// The version name a package link points at, or `None` when the link does
/// not exist.
pub(crate) fn read_link_version(link: &Path) -> Result<Option<String>> {
    let target = match fs::read_link(link) {
        Ok(target) => target,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
        Err(err) => {
            return Err(err).with_context(|| format!("failed to read link {}", link.display()))
        }
    };

    let version = target
        .file_name()
        .and_then(|value| value.to_str())
        .ok_or_else(|| anyhow!("link {} has an unusable target", link.display()))?;
    Ok(Some(version.to_string()))
}

pub(crate) fn link_target_for(version: &str) -> PathBuf {
    PathBuf::from(version)
}

use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to fetch {package}@{version} from {url}: {detail}")]
    Fetch {
        package: String,
        version: String,
        url: String,
        detail: String,
    },

    #[error("filesystem operation failed on {}: {detail}", path.display())]
    Disk { path: PathBuf, detail: String },

    #[error("version {version} of '{package}' is not installed")]
    MissingVersion { package: String, version: String },

    #[error("version {version} of '{package}' is referenced by a link and cannot be removed")]
    ReferencedVersion { package: String, version: String },

    #[error("package '{0}' has no stable version installed")]
    NotInstalled(String),

    #[error("{0}")]
    InvalidName(String),
}

impl StoreError {
    pub(crate) fn disk(path: impl Into<PathBuf>, err: anyhow::Error) -> Self {
        Self::Disk {
            path: path.into(),
            detail: format!("{err:#}"),
        }
    }
}

use std::fmt;
use std::time::Duration;

use rollpack_core::PackageState;
use rollpack_installer::StoreError;
use rollpack_supervisor::{SupervisorError, UnitState};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvalidVersionReason {
    UnknownPackage,
    NotInCatalog,
    /// Starting an experiment at the installed stable version.
    SameAsStable,
    Malformed,
}

impl fmt::Display for InvalidVersionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::UnknownPackage => "package is not in the catalog",
            Self::NotInCatalog => "version is not in the catalog",
            Self::SameAsStable => "version is already the stable version",
            Self::Malformed => "version is malformed",
        })
    }
}

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("invalid version {version} for '{package}': {reason}")]
    InvalidVersion {
        package: String,
        version: String,
        reason: InvalidVersionReason,
    },

    #[error("{0}")]
    Fetch(String),

    #[error("{0}")]
    Disk(String),

    #[error("unit '{unit}' did not reach running within {timeout:?}")]
    UnitTimeout { unit: String, timeout: Duration },

    #[error("unit '{unit}' entered state {state}")]
    UnitFailed { unit: String, state: UnitState },

    #[error("package '{0}' has no active experiment")]
    NoActiveExperiment(String),

    #[error("experiment for '{package}' is {state}, not running")]
    ExperimentNotRunning {
        package: String,
        state: PackageState,
    },

    #[error("package '{0}' has an active experiment")]
    ExperimentActive(String),

    #[error("package '{0}' is not installed")]
    NotInstalled(String),

    #[error("package '{package}' requires '{requirement}', which is not ready: {detail}")]
    DependencyNotReady {
        package: String,
        requirement: String,
        detail: String,
    },

    #[error(transparent)]
    Supervisor(#[from] SupervisorError),

    #[error("invalid catalog: {0}")]
    Catalog(String),

    #[error("invalid configuration: {0}")]
    Config(String),
}

impl OrchestratorError {
    pub fn is_no_op(&self) -> bool {
        matches!(
            self,
            Self::InvalidVersion {
                reason: InvalidVersionReason::SameAsStable,
                ..
            }
        )
    }

    pub(crate) fn invalid_version(
        package: &str,
        version: &str,
        reason: InvalidVersionReason,
    ) -> Self {
        Self::InvalidVersion {
            package: package.to_string(),
            version: version.to_string(),
            reason,
        }
    }
}

impl From<StoreError> for OrchestratorError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Fetch { .. } => Self::Fetch(err.to_string()),
            StoreError::NotInstalled(package) => Self::NotInstalled(package),
            StoreError::Disk { .. }
            | StoreError::MissingVersion { .. }
            | StoreError::ReferencedVersion { .. }
            | StoreError::InvalidName(_) => Self::Disk(err.to_string()),
        }
    }
}

use std::collections::BTreeMap;
use std::time::Duration;

use rollpack_core::UnitSet;
use serde::{Deserialize, Serialize};

use crate::OrchestratorError;

/// Upper bound for the job and readiness timeouts.
pub const MAX_TIMEOUT: Duration = Duration::from_secs(30 * 24 * 60 * 60);

/// What happens to version directories no link references any more once a
/// stop, failure or promotion completes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetentionPolicy {
    /// Keep them for a fast retry; `gc` removes them explicitly.
    #[default]
    Retain,
    Purge,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageConfig {
    pub units: UnitSet,
    /// Packages whose stable core unit must be running before an
    /// experiment of this package starts.
    pub requires: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Bound on an experiment reaching running. Independent from the units'
    /// own stop timeouts.
    pub job_timeout: Duration,
    pub poll_interval: Duration,
    pub readiness_timeout: Duration,
    pub retention: RetentionPolicy,
    pub packages: BTreeMap<String, PackageConfig>,
    /// Hex Ed25519 key; when set, catalogs must carry a valid signature.
    pub catalog_public_key: Option<String>,
    /// Background watcher threads; tests drive `poll_experiment` by hand.
    pub spawn_watchers: bool,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            job_timeout: Duration::from_secs(30 * 60),
            poll_interval: Duration::from_secs(1),
            readiness_timeout: Duration::from_secs(30),
            retention: RetentionPolicy::Retain,
            packages: BTreeMap::new(),
            catalog_public_key: None,
            spawn_watchers: true,
        }
    }
}

impl OrchestratorConfig {
    pub fn validate(&self) -> Result<(), OrchestratorError> {
        if self.job_timeout > MAX_TIMEOUT {
            return Err(OrchestratorError::Config(format!(
                "job timeout {:?} exceeds the maximum of {MAX_TIMEOUT:?}",
                self.job_timeout
            )));
        }
        if self.readiness_timeout > MAX_TIMEOUT {
            return Err(OrchestratorError::Config(format!(
                "readiness timeout {:?} exceeds the maximum of {MAX_TIMEOUT:?}",
                self.readiness_timeout
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(OrchestratorError::Config(
                "poll interval must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }

    pub fn units_for(&self, package: &str) -> UnitSet {
        self.packages
            .get(package)
            .map(|config| config.units.clone())
            .unwrap_or_else(|| UnitSet::single(package))
    }

    pub fn requirements_for(&self, package: &str) -> &[String] {
        self.packages
            .get(package)
            .map(|config| config.requires.as_slice())
            .unwrap_or_default()
    }
}

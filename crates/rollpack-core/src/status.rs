use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackageState {
    Stable,
    ExperimentStarting,
    ExperimentRunning,
    ExperimentFailed,
    Promoting,
    StoppingExperiment,
}

impl PackageState {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Stable => "stable",
            Self::ExperimentStarting => "experiment_starting",
            Self::ExperimentRunning => "experiment_running",
            Self::ExperimentFailed => "experiment_failed",
            Self::Promoting => "promoting",
            Self::StoppingExperiment => "stopping_experiment",
        }
    }

    pub fn has_experiment(self) -> bool {
        !matches!(self, Self::Stable)
    }
}

impl fmt::Display for PackageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageStatus {
    #[serde(rename = "State")]
    pub state: PackageState,
    #[serde(rename = "Stable")]
    pub stable: String,
    /// Empty when no experiment is active.
    #[serde(rename = "Experiment")]
    pub experiment: String,
    #[serde(
        rename = "LastError",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusSnapshot {
    pub version: String,
    #[serde(default)]
    pub packages: BTreeMap<String, PackageStatus>,
}

impl StatusSnapshot {
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            packages: BTreeMap::new(),
        }
    }

    pub fn package(&self, name: &str) -> Option<&PackageStatus> {
        self.packages.get(name)
    }
}

use std::collections::BTreeSet;
use std::time::{Instant, SystemTime, UNIX_EPOCH};

use rollpack_core::{PackageState, PackageStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExperimentSession {
    pub package: String,
    pub version: String,
    pub started_at_unix: u64,
    pub deadline: Instant,
    /// Experiment units seen outside the stopped states since the start.
    pub(crate) active_units: BTreeSet<String>,
}

impl ExperimentSession {
    pub(crate) fn new(package: &str, version: &str, deadline: Instant) -> Self {
        Self {
            package: package.to_string(),
            version: version.to_string(),
            started_at_unix: current_unix_timestamp(),
            deadline,
            active_units: BTreeSet::new(),
        }
    }
}

/// Authoritative in-memory state of one package. The links on disk are the
/// persisted form and are only read back at startup.
#[derive(Debug)]
pub(crate) struct PackageSlot {
    pub(crate) name: String,
    pub(crate) stable: Option<String>,
    pub(crate) state: PackageState,
    pub(crate) session: Option<ExperimentSession>,
    /// Bumped whenever the experiment a watcher was spawned for ends.
    pub(crate) generation: u64,
    pub(crate) last_error: Option<String>,
}

impl PackageSlot {
    pub(crate) fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            stable: None,
            state: PackageState::Stable,
            session: None,
            generation: 0,
            last_error: None,
        }
    }

    pub(crate) fn experiment_version(&self) -> Option<&str> {
        self.session.as_ref().map(|session| session.version.as_str())
    }

    pub(crate) fn to_status(&self) -> Option<PackageStatus> {
        let stable = self.stable.clone()?;
        Some(PackageStatus {
            state: self.state,
            stable,
            experiment: self.experiment_version().unwrap_or_default().to_string(),
            last_error: self.last_error.clone(),
        })
    }
}

fn current_unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

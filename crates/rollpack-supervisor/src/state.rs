use std::fmt;

/// Lifecycle of a supervised unit: loaded → activating → running →
/// deactivating → dead/failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum UnitState {
    Loaded,
    Activating,
    Running,
    Deactivating,
    Dead,
    Failed,
    Unknown,
}

impl UnitState {
    /// Maps a systemd `ActiveState` value.
    pub fn from_active_state(value: &str) -> Self {
        match value.trim() {
            "active" | "reloading" | "refreshing" => Self::Running,
            "activating" => Self::Activating,
            "deactivating" => Self::Deactivating,
            "inactive" | "maintenance" => Self::Dead,
            "failed" => Self::Failed,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Loaded => "loaded",
            Self::Activating => "activating",
            Self::Running => "running",
            Self::Deactivating => "deactivating",
            Self::Dead => "dead",
            Self::Failed => "failed",
            Self::Unknown => "unknown",
        }
    }

    /// The unit is not running and is not about to.
    pub fn is_stopped(self) -> bool {
        matches!(self, Self::Loaded | Self::Dead | Self::Failed)
    }
}

impl fmt::Display for UnitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of a bounded wait. `TimedOut` means "still getting there",
/// `Failed` means the unit settled somewhere it will not leave on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Reached,
    TimedOut,
    Failed(UnitState),
}

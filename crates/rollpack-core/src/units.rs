use serde::{Deserialize, Serialize};

pub const EXPERIMENT_UNIT_SUFFIX: &str = "-exp";

/// Supervised units belonging to a package.
///
/// `dependents` are listed least-critical-first. They are stopped before the
/// core unit and started after it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnitSet {
    pub core: String,
    #[serde(default)]
    pub dependents: Vec<String>,
}

impl UnitSet {
    pub fn single(core: impl Into<String>) -> Self {
        Self {
            core: core.into(),
            dependents: Vec::new(),
        }
    }

    /// The same set, renamed to the units that run the experiment version.
    pub fn experiment(&self) -> Self {
        Self {
            core: experiment_unit_name(&self.core),
            dependents: self
                .dependents
                .iter()
                .map(|unit| experiment_unit_name(unit))
                .collect(),
        }
    }

    /// Stop order: dependents (reverse declaration order) then core.
    pub fn stop_order(&self) -> Vec<&str> {
        let mut order: Vec<&str> = self.dependents.iter().rev().map(String::as_str).collect();
        order.push(self.core.as_str());
        order
    }

    /// Start order: core then dependents.
    pub fn start_order(&self) -> Vec<&str> {
        let mut order = vec![self.core.as_str()];
        order.extend(self.dependents.iter().map(String::as_str));
        order
    }
}

pub fn experiment_unit_name(unit: &str) -> String {
    match unit.strip_suffix(".service") {
        Some(stem) => format!("{stem}{EXPERIMENT_UNIT_SUFFIX}.service"),
        None => format!("{unit}{EXPERIMENT_UNIT_SUFFIX}"),
    }
}

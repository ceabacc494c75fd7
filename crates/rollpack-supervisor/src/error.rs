use thiserror::Error;

#[derive(Debug, Error)]
pub enum SupervisorError {
    #[error("supervisor command for unit '{unit}' failed: {detail}")]
    Command { unit: String, detail: String },

    #[error("unit '{0}' is not known to the supervisor")]
    UnknownUnit(String),
}

impl SupervisorError {
    pub(crate) fn command(unit: &str, err: anyhow::Error) -> Self {
        Self::Command {
            unit: unit.to_string(),
            detail: format!("{err:#}"),
        }
    }
}

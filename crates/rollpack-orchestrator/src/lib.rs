mod config;
mod error;
mod orchestrator;
mod session;
mod transitions;
mod watcher;

pub use config::{OrchestratorConfig, PackageConfig, RetentionPolicy, MAX_TIMEOUT};
pub use error::{InvalidVersionReason, OrchestratorError};
pub use orchestrator::{Orchestrator, ORCHESTRATOR_VERSION};
pub use session::ExperimentSession;

#[cfg(test)]
mod tests;

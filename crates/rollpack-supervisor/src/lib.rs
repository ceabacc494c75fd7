mod error;
mod memory;
mod state;
mod supervisor;
mod systemd;

pub use error::SupervisorError;
pub use memory::{MemorySupervisor, StartBehavior, UnitEvent};
pub use state::{UnitState, WaitOutcome};
pub use supervisor::{ServiceSupervisor, DEFAULT_STOP_TIMEOUT};
pub use systemd::{parse_timespan, ProcessRunner, SystemctlOutput, SystemctlRunner, SystemdSupervisor};

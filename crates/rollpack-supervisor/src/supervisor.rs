use std::thread;
use std::time::{Duration, Instant};

use crate::{SupervisorError, UnitState, WaitOutcome};

pub const DEFAULT_STOP_TIMEOUT: Duration = Duration::from_secs(90);

/// OS service supervisor capability. The orchestrator depends only on this
/// trait; each init system gets its own implementation.
pub trait ServiceSupervisor: Send + Sync {
    /// Requests a start without waiting for the unit to become ready. The
    /// unit may still report `Dead` while its start job is queued.
    fn start_unit(&self, name: &str) -> Result<(), SupervisorError>;

    /// Stops the unit and returns once it left the running state. Signal
    /// escalation follows the unit's own stop timeout.
    fn stop_unit(&self, name: &str) -> Result<(), SupervisorError>;

    fn unit_state(&self, name: &str) -> Result<UnitState, SupervisorError>;

    /// The unit's configured graceful stop bound. `None` when the unit is
    /// configured to wait for its process indefinitely.
    fn stop_timeout(&self, _name: &str) -> Result<Option<Duration>, SupervisorError> {
        Ok(Some(DEFAULT_STOP_TIMEOUT))
    }

    fn poll_interval(&self) -> Duration {
        Duration::from_millis(250)
    }

    fn wait_for_state(
        &self,
        name: &str,
        target: UnitState,
        timeout: Duration,
    ) -> Result<WaitOutcome, SupervisorError> {
        // Out of range means unbounded.
        let deadline = Instant::now().checked_add(timeout);
        loop {
            let state = self.unit_state(name)?;
            if state == target {
                return Ok(WaitOutcome::Reached);
            }
            if state == UnitState::Failed {
                return Ok(WaitOutcome::Failed(state));
            }

            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => return Ok(WaitOutcome::TimedOut),
                Some(deadline) => self.poll_interval().min(deadline - now),
                None => self.poll_interval(),
            };
            thread::sleep(pause);
        }
    }
}

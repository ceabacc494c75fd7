use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use crate::{ServiceSupervisor, SupervisorError, UnitState, DEFAULT_STOP_TIMEOUT};

/// What a unit does when it is started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartBehavior {
    Run,
    /// Stays `Activating` until `activate` is called.
    Hang,
    Fail,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UnitEvent {
    Start(String),
    Stop(String),
    /// Escalation after a unit ignored its graceful stop.
    Kill(String),
}

impl UnitEvent {
    pub fn unit(&self) -> &str {
        match self {
            Self::Start(unit) | Self::Stop(unit) | Self::Kill(unit) => unit,
        }
    }
}

#[derive(Debug, Clone)]
struct MemoryUnit {
    state: UnitState,
    start_behavior: StartBehavior,
    ignores_stop: bool,
    stop_timeout: Option<Duration>,
    broken: bool,
}

impl Default for MemoryUnit {
    fn default() -> Self {
        Self {
            state: UnitState::Loaded,
            start_behavior: StartBehavior::Run,
            ignores_stop: false,
            stop_timeout: Some(DEFAULT_STOP_TIMEOUT),
            broken: false,
        }
    }
}

#[derive(Debug, Default)]
struct MemoryState {
    units: HashMap<String, MemoryUnit>,
    events: Vec<UnitEvent>,
}

/// In-process supervisor for local harnesses and tests. Units spring into
/// existence on first use and every start/stop/kill is recorded in order.
#[derive(Debug)]
pub struct MemorySupervisor {
    inner: Mutex<MemoryState>,
    poll_interval: Duration,
}

impl Default for MemorySupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySupervisor {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(MemoryState::default()),
            poll_interval: Duration::from_millis(2),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn with_unit<T>(&self, name: &str, f: impl FnOnce(&mut MemoryUnit) -> T) -> T {
        let mut state = self.lock();
        f(state.units.entry(name.to_string()).or_default())
    }

    pub fn set_start_behavior(&self, name: &str, behavior: StartBehavior) {
        self.with_unit(name, |unit| unit.start_behavior = behavior);
    }

    pub fn set_ignores_stop(&self, name: &str, ignores_stop: bool) {
        self.with_unit(name, |unit| unit.ignores_stop = ignores_stop);
    }

    pub fn set_stop_timeout(&self, name: &str, timeout: Option<Duration>) {
        self.with_unit(name, |unit| unit.stop_timeout = timeout);
    }

    /// Makes every supervisor call for `name` fail.
    pub fn set_broken(&self, name: &str, broken: bool) {
        self.with_unit(name, |unit| unit.broken = broken);
    }

    /// Forces a unit into `state` without recording an event.
    pub fn set_state(&self, name: &str, state: UnitState) {
        self.with_unit(name, |unit| unit.state = state);
    }

    /// A hanging unit finishes starting.
    pub fn activate(&self, name: &str) {
        self.with_unit(name, |unit| {
            if unit.state == UnitState::Activating {
                unit.state = UnitState::Running;
            }
        });
    }

    /// The unit's main process exits on its own.
    pub fn crash(&self, name: &str, exit_code: i32) {
        self.with_unit(name, |unit| {
            unit.state = if exit_code == 0 {
                UnitState::Dead
            } else {
                UnitState::Failed
            };
        });
    }

    pub fn events(&self) -> Vec<UnitEvent> {
        self.lock().events.clone()
    }

    pub fn take_events(&self) -> Vec<UnitEvent> {
        std::mem::take(&mut self.lock().events)
    }

    pub fn running_units(&self) -> Vec<String> {
        let mut running = self
            .lock()
            .units
            .iter()
            .filter(|(_, unit)| !unit.state.is_stopped())
            .map(|(name, _)| name.clone())
            .collect::<Vec<_>>();
        running.sort();
        running
    }
}

impl ServiceSupervisor for MemorySupervisor {
    fn start_unit(&self, name: &str) -> Result<(), SupervisorError> {
        let mut state = self.lock();
        let unit = state.units.entry(name.to_string()).or_default();
        if unit.broken {
            return Err(SupervisorError::Command {
                unit: name.to_string(),
                detail: "unit is broken".to_string(),
            });
        }
        unit.state = match unit.start_behavior {
            StartBehavior::Run => UnitState::Running,
            StartBehavior::Hang => UnitState::Activating,
            StartBehavior::Fail => UnitState::Failed,
        };
        debug!(unit = name, state = %unit.state, "memory supervisor start");
        state.events.push(UnitEvent::Start(name.to_string()));
        Ok(())
    }

    fn stop_unit(&self, name: &str) -> Result<(), SupervisorError> {
        let mut state = self.lock();
        let unit = state.units.entry(name.to_string()).or_default();
        if unit.broken {
            return Err(SupervisorError::Command {
                unit: name.to_string(),
                detail: "unit is broken".to_string(),
            });
        }
        let escalate = unit.ignores_stop && !unit.state.is_stopped();
        unit.state = UnitState::Dead;
        debug!(unit = name, escalate, "memory supervisor stop");
        state.events.push(UnitEvent::Stop(name.to_string()));
        if escalate {
            state.events.push(UnitEvent::Kill(name.to_string()));
        }
        Ok(())
    }

    fn unit_state(&self, name: &str) -> Result<UnitState, SupervisorError> {
        self.with_unit(name, |unit| {
            if unit.broken {
                return Err(SupervisorError::Command {
                    unit: name.to_string(),
                    detail: "unit is broken".to_string(),
                });
            }
            Ok(unit.state)
        })
    }

    fn stop_timeout(&self, name: &str) -> Result<Option<Duration>, SupervisorError> {
        Ok(self.with_unit(name, |unit| unit.stop_timeout))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

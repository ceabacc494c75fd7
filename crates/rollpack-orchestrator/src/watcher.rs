use std::thread;
use std::time::Instant;

use rollpack_core::PackageState;
use rollpack_supervisor::UnitState;
use tracing::{debug, error, info, warn};

use crate::orchestrator::lock;
use crate::session::PackageSlot;
use crate::{Orchestrator, OrchestratorError};

impl Orchestrator {
    /// One watcher tick for `package`: promotes a starting experiment to
    /// running once all of its units run, and rolls back on a crashed core
    /// unit or an expired job deadline. A unit whose state cannot be read
    /// counts as not running. Returns the state afterwards.
    pub fn poll_experiment(&self, package: &str) -> PackageState {
        let slot = self.slot(package);
        let mut slot = lock(&slot);
        self.poll_slot(&mut slot);
        slot.state
    }

    fn poll_slot(&self, slot: &mut PackageSlot) {
        let starting = match slot.state {
            PackageState::ExperimentStarting => true,
            PackageState::ExperimentRunning => false,
            _ => return,
        };
        let Some(deadline) = slot.session.as_ref().map(|session| session.deadline) else {
            return;
        };

        let units = self.units_for(&slot.name).experiment();
        let mut all_running = true;
        for unit in units.start_order() {
            let state = match self.inner.supervisor.unit_state(unit) {
                Ok(state) => state,
                Err(err) => {
                    warn!(unit, error = %err, "failed to read unit state");
                    all_running = false;
                    continue;
                }
            };
            let seen_active = slot.session.as_mut().is_some_and(|session| {
                if !state.is_stopped() {
                    session.active_units.insert(unit.to_string());
                }
                session.active_units.contains(unit)
            });
            let is_core = unit == units.core;
            // A start job still queued behind its ordering dependencies
            // reports the unit dead; that only counts once it was up.
            let exited = state == UnitState::Dead && (seen_active || !starting);
            let crashed = state == UnitState::Failed || (is_core && exited);
            // Once running, only the core unit decides the experiment's fate.
            if crashed && (is_core || starting) {
                let err = OrchestratorError::UnitFailed {
                    unit: unit.to_string(),
                    state,
                };
                self.fail_experiment(slot, err);
                return;
            }
            all_running &= state == UnitState::Running;
        }

        if !starting {
            return;
        }
        if all_running {
            slot.state = PackageState::ExperimentRunning;
            self.publish(slot);
            info!(
                package = %slot.name,
                version = slot.experiment_version().unwrap_or_default(),
                "experiment running"
            );
        } else if Instant::now() >= deadline {
            let err = OrchestratorError::UnitTimeout {
                unit: units.core.clone(),
                timeout: self.inner.config.job_timeout,
            };
            self.fail_experiment(slot, err);
        }
    }

    pub(crate) fn spawn_watcher(&self, package: &str, generation: u64) {
        if !self.inner.config.spawn_watchers {
            return;
        }
        let orchestrator = self.clone();
        let name = package.to_string();
        let spawned = thread::Builder::new()
            .name(format!("watch-{package}"))
            .spawn(move || orchestrator.watch(&name, generation));
        if let Err(err) = spawned {
            error!(package, error = %err, "failed to spawn experiment watcher");
        }
    }

    fn watch(&self, package: &str, generation: u64) {
        debug!(package, generation, "experiment watcher started");
        loop {
            thread::sleep(self.inner.config.poll_interval);
            let slot = self.slot(package);
            let mut slot = lock(&slot);
            let watching = matches!(
                slot.state,
                PackageState::ExperimentStarting | PackageState::ExperimentRunning
            );
            if slot.generation != generation || !watching {
                debug!(package, generation, "experiment watcher exiting");
                return;
            }
            self.poll_slot(&mut slot);
        }
    }
}

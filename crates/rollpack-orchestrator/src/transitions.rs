use rollpack_core::{validate_package_name, validate_version, CatalogEntry, PackageState};
use rollpack_supervisor::{UnitState, WaitOutcome};
use tracing::{debug, error, info, warn};

use crate::orchestrator::lock;
use crate::session::{ExperimentSession, PackageSlot};
use crate::{InvalidVersionReason, Orchestrator, OrchestratorError, RetentionPolicy};

impl Orchestrator {
    /// Installs `version` and hands the package's units over to it.
    ///
    /// Stable units are stopped (dependents first) before the experiment
    /// core starts, so the two never run side by side. Starting while another
    /// experiment is active replaces it. Returns once the units were asked to
    /// start; the watcher tracks them to running or rolls back.
    pub fn start_experiment(&self, package: &str, version: &str) -> Result<(), OrchestratorError> {
        check_request(package, version)?;
        // Checked before any unit is touched; refreshed once the units launch.
        let deadline = self.job_deadline()?;
        let slot = self.slot(package);
        let mut slot = lock(&slot);

        let stable = slot
            .stable
            .clone()
            .ok_or_else(|| OrchestratorError::NotInstalled(package.to_string()))?;
        if version == stable {
            return Err(OrchestratorError::invalid_version(
                package,
                version,
                InvalidVersionReason::SameAsStable,
            ));
        }
        let entry = self.resolve_entry(package, version)?;
        self.wait_for_requirements(package)?;
        self.inner
            .store
            .install(package, version, &entry.url, entry.sha256.as_deref())?;

        let units = self.units_for(package);
        let experiment_units = units.experiment();
        if slot.state.has_experiment() {
            info!(
                package,
                previous = slot.experiment_version().unwrap_or_default(),
                version,
                "replacing active experiment"
            );
            self.stop_units(&experiment_units)?;
            if slot.state == PackageState::ExperimentFailed {
                // A failed rollback may have left stable units up.
                self.stop_units(&units)?;
            }
        } else if let Err(err) = self.stop_units(&units) {
            if let Some(restart) = self.start_units_best_effort(&units) {
                error!(package, error = %restart, "failed to restart stable units");
            }
            return Err(err.into());
        }

        let replaced = slot.session.take();
        slot.state = PackageState::ExperimentStarting;
        slot.generation += 1;
        slot.last_error = None;
        let deadline = self.job_deadline().unwrap_or(deadline);
        let session = ExperimentSession::new(package, version, deadline);
        let started_at = session.started_at_unix;
        slot.session = Some(session);

        let launched = self
            .inner
            .store
            .point_experiment(package, version)
            .map_err(OrchestratorError::from)
            .and_then(|()| {
                self.start_units(&experiment_units)
                    .map_err(OrchestratorError::from)
            });
        if let Err(err) = launched {
            return Err(self.fail_experiment(&mut slot, err));
        }

        if replaced.is_some() && self.inner.config.retention == RetentionPolicy::Purge {
            self.collect_garbage(&slot);
        }
        self.publish(&slot);
        info!(package, version, stable = %stable, started_at, "experiment started");
        self.spawn_watcher(package, slot.generation);
        Ok(())
    }

    /// Tears the experiment down and brings stable back. Without an active
    /// experiment this does nothing.
    pub fn stop_experiment(&self, package: &str) -> Result<(), OrchestratorError> {
        check_package(package)?;
        let slot = self.slot(package);
        let mut slot = lock(&slot);
        if slot.stable.is_none() {
            return Err(OrchestratorError::NotInstalled(package.to_string()));
        }
        if !slot.state.has_experiment() {
            debug!(package, "no active experiment to stop");
            return Ok(());
        }

        let version = slot.experiment_version().unwrap_or_default().to_string();
        let unwound = self.unwind(&mut slot);
        if unwound.is_ok() {
            slot.last_error = None;
        }
        self.publish(&slot);
        unwound?;
        info!(package, version = %version, "experiment stopped");
        Ok(())
    }

    /// Makes the running experiment the new stable version.
    pub fn promote_experiment(&self, package: &str) -> Result<(), OrchestratorError> {
        check_package(package)?;
        let slot = self.slot(package);
        let mut slot = lock(&slot);
        if slot.stable.is_none() {
            return Err(OrchestratorError::NotInstalled(package.to_string()));
        }
        match slot.state {
            PackageState::ExperimentRunning => {}
            PackageState::Stable => {
                return Err(OrchestratorError::NoActiveExperiment(package.to_string()))
            }
            state => {
                return Err(OrchestratorError::ExperimentNotRunning {
                    package: package.to_string(),
                    state,
                })
            }
        }
        let Some(version) = slot.experiment_version().map(str::to_string) else {
            return Err(OrchestratorError::NoActiveExperiment(package.to_string()));
        };

        let units = self.units_for(package);
        slot.state = PackageState::Promoting;
        slot.generation += 1;

        if let Err(err) = self.stop_units(&units.experiment()) {
            return Err(self.fail_experiment(&mut slot, err.into()));
        }
        if let Err(err) = self.inner.store.point_stable(package, &version) {
            return Err(self.fail_experiment(&mut slot, err.into()));
        }

        let previous = slot.stable.replace(version.clone());
        slot.session = None;
        slot.state = PackageState::Stable;
        let mut failure: Option<OrchestratorError> = None;
        if let Err(err) = self.inner.store.clear_experiment(package) {
            warn!(package, error = %err, "failed to clear experiment link");
            failure = Some(err.into());
        }
        if let Some(err) = self.start_units_best_effort(&units) {
            failure.get_or_insert(err.into());
        }
        if let Some(err) = failure {
            slot.last_error = Some(err.to_string());
            self.publish(&slot);
            return Err(err);
        }

        slot.last_error = None;
        if self.inner.config.retention == RetentionPolicy::Purge {
            self.collect_garbage(&slot);
        }
        self.publish(&slot);
        info!(
            package,
            version = %version,
            previous = previous.as_deref().unwrap_or_default(),
            "experiment promoted"
        );
        Ok(())
    }

    /// Installs `version` straight as stable. Refused while an experiment is
    /// active.
    pub fn install_package(&self, package: &str, version: &str) -> Result<(), OrchestratorError> {
        check_request(package, version)?;
        let slot = self.slot(package);
        let mut slot = lock(&slot);
        if slot.state.has_experiment() {
            return Err(OrchestratorError::ExperimentActive(package.to_string()));
        }
        if slot.stable.as_deref() == Some(version) {
            debug!(package, version, "version is already stable");
            return Ok(());
        }

        let entry = self.resolve_entry(package, version)?;
        self.inner
            .store
            .install(package, version, &entry.url, entry.sha256.as_deref())?;

        let units = self.units_for(package);
        let had_stable = slot.stable.is_some();
        if had_stable {
            if let Err(err) = self.stop_units(&units) {
                if let Some(restart) = self.start_units_best_effort(&units) {
                    error!(package, error = %restart, "failed to restart stable units");
                }
                return Err(err.into());
            }
        }
        let pointed = self
            .inner
            .store
            .point_stable(package, version)
            .and_then(|()| self.inner.store.clear_experiment(package));
        if let Err(err) = pointed {
            if had_stable {
                if let Some(restart) = self.start_units_best_effort(&units) {
                    error!(package, error = %restart, "failed to restart stable units");
                }
            }
            return Err(err.into());
        }

        let previous = slot.stable.replace(version.to_string());
        slot.state = PackageState::Stable;
        slot.session = None;
        slot.last_error = None;
        if let Err(err) = self.start_units(&units) {
            slot.last_error = Some(err.to_string());
            self.publish(&slot);
            return Err(err.into());
        }
        if self.inner.config.retention == RetentionPolicy::Purge {
            self.collect_garbage(&slot);
        }
        self.publish(&slot);
        info!(
            package,
            version,
            previous = previous.as_deref().unwrap_or_default(),
            "package installed"
        );
        Ok(())
    }

    /// Stops every unit of the package and deletes all of its versions.
    pub fn remove_package(&self, package: &str) -> Result<(), OrchestratorError> {
        check_package(package)?;
        let slot = self.slot(package);
        let mut slot = lock(&slot);
        if slot.stable.is_none() {
            return Err(OrchestratorError::NotInstalled(package.to_string()));
        }

        slot.generation += 1;
        let units = self.units_for(package);
        let mut failure = None;
        if slot.state.has_experiment() {
            failure = self.stop_units_best_effort(&units.experiment());
        }
        if let Some(err) = self.stop_units_best_effort(&units) {
            failure.get_or_insert(err);
        }
        if let Some(err) = failure {
            slot.last_error = Some(err.to_string());
            self.publish(&slot);
            return Err(err.into());
        }

        self.inner.store.remove_package(package)?;
        slot.stable = None;
        slot.session = None;
        slot.state = PackageState::Stable;
        slot.last_error = None;
        self.publish(&slot);
        info!(package, "package removed");
        Ok(())
    }

    /// Deletes installed versions no link references. Refused while an
    /// experiment is active.
    pub fn garbage_collect(&self, package: &str) -> Result<Vec<String>, OrchestratorError> {
        check_package(package)?;
        let slot = self.slot(package);
        let slot = lock(&slot);
        if slot.stable.is_none() {
            return Err(OrchestratorError::NotInstalled(package.to_string()));
        }
        if slot.state.has_experiment() {
            return Err(OrchestratorError::ExperimentActive(package.to_string()));
        }
        let removed = self.inner.store.garbage_collect(package)?;
        info!(package, removed = removed.len(), "garbage collected");
        Ok(removed)
    }

    /// Records `err`, then rolls back to stable. A failing rollback is logged
    /// and leaves the package in `ExperimentFailed`; `err` is handed back
    /// either way.
    pub(crate) fn fail_experiment(
        &self,
        slot: &mut PackageSlot,
        err: OrchestratorError,
    ) -> OrchestratorError {
        let started_at = slot.session.as_ref().map(|session| session.started_at_unix);
        warn!(
            package = %slot.name,
            started_at = ?started_at,
            error = %err,
            "experiment failed, rolling back"
        );
        slot.state = PackageState::ExperimentFailed;

        match self.unwind(slot) {
            Ok(()) => slot.last_error = Some(err.to_string()),
            Err(unwind_err) => {
                error!(package = %slot.name, error = %unwind_err, "rollback to stable failed");
                slot.last_error = Some(format!("{err}; rollback failed: {unwind_err}"));
            }
        }
        self.publish(slot);
        err
    }

    /// Experiment units down (dependents first), experiment link cleared,
    /// stable units started. Every step runs even when an earlier one fails.
    /// The caller publishes the outcome.
    fn unwind(&self, slot: &mut PackageSlot) -> Result<(), OrchestratorError> {
        let package = slot.name.clone();
        let units = self.units_for(&package);
        slot.state = PackageState::StoppingExperiment;
        slot.generation += 1;

        let mut failure: Option<OrchestratorError> = self
            .stop_units_best_effort(&units.experiment())
            .map(Into::into);
        if let Err(err) = self.inner.store.clear_experiment(&package) {
            warn!(package = %package, error = %err, "failed to clear experiment link");
            failure.get_or_insert(err.into());
        }
        if let Some(err) = self.start_units_best_effort(&units) {
            failure.get_or_insert(err.into());
        }

        if let Some(err) = failure {
            slot.state = PackageState::ExperimentFailed;
            slot.last_error = Some(err.to_string());
            return Err(err);
        }

        slot.state = PackageState::Stable;
        slot.session = None;
        if self.inner.config.retention == RetentionPolicy::Purge {
            self.collect_garbage(slot);
        }
        Ok(())
    }

    fn collect_garbage(&self, slot: &PackageSlot) {
        match self.inner.store.garbage_collect(&slot.name) {
            Ok(removed) if !removed.is_empty() => {
                info!(package = %slot.name, removed = ?removed, "purged unreferenced versions");
            }
            Ok(_) => {}
            Err(err) => warn!(package = %slot.name, error = %err, "failed to purge versions"),
        }
    }

    fn resolve_entry(&self, package: &str, version: &str) -> Result<CatalogEntry, OrchestratorError> {
        let catalog = self.catalog();
        if let Some(entry) = catalog.lookup(package, version) {
            return Ok(entry.clone());
        }
        let reason = if catalog.versions(package).is_empty() {
            InvalidVersionReason::UnknownPackage
        } else {
            InvalidVersionReason::NotInCatalog
        };
        Err(OrchestratorError::invalid_version(package, version, reason))
    }

    /// Blocks until the stable core unit of every required package runs.
    fn wait_for_requirements(&self, package: &str) -> Result<(), OrchestratorError> {
        let timeout = self.inner.config.readiness_timeout;
        for requirement in self.inner.config.requirements_for(package) {
            let core = self.units_for(requirement).core;
            let detail = match self
                .inner
                .supervisor
                .wait_for_state(&core, UnitState::Running, timeout)
            {
                Ok(WaitOutcome::Reached) => {
                    debug!(package, requirement = %requirement, "requirement ready");
                    continue;
                }
                Ok(WaitOutcome::TimedOut) => {
                    format!("unit '{core}' did not reach running within {timeout:?}")
                }
                Ok(WaitOutcome::Failed(state)) => format!("unit '{core}' is {state}"),
                Err(err) => err.to_string(),
            };
            return Err(OrchestratorError::DependencyNotReady {
                package: package.to_string(),
                requirement: requirement.clone(),
                detail,
            });
        }
        Ok(())
    }
}

fn check_package(package: &str) -> Result<(), OrchestratorError> {
    validate_package_name(package).map_err(|_| OrchestratorError::NotInstalled(package.to_string()))
}

fn check_request(package: &str, version: &str) -> Result<(), OrchestratorError> {
    if validate_package_name(package).is_err() {
        return Err(OrchestratorError::invalid_version(
            package,
            version,
            InvalidVersionReason::UnknownPackage,
        ));
    }
    validate_version(version).map_err(|_| {
        OrchestratorError::invalid_version(package, version, InvalidVersionReason::Malformed)
    })
}

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Instant;

use rollpack_core::{Catalog, PackageState, StatusSnapshot, UnitSet};
use rollpack_installer::PackageStore;
use rollpack_security::{parse_public_key_hex, verify_catalog_signature, CatalogKey};
use rollpack_supervisor::{ServiceSupervisor, SupervisorError, UnitState};
use tracing::{debug, info, warn};

use crate::session::{ExperimentSession, PackageSlot};
use crate::{OrchestratorConfig, OrchestratorError};

pub const ORCHESTRATOR_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Drives the stable/experiment lifecycle of every installed package.
///
/// Cheap to clone; clones share state. Operations on the same package are
/// serialized by a per-package lock, operations on different packages run
/// concurrently. Status reads never wait on a package lock.
#[derive(Clone)]
pub struct Orchestrator {
    pub(crate) inner: Arc<Inner>,
}

pub(crate) struct Inner {
    pub(crate) store: PackageStore,
    pub(crate) supervisor: Arc<dyn ServiceSupervisor>,
    pub(crate) config: OrchestratorConfig,
    catalog_key: Option<CatalogKey>,
    catalog: RwLock<Arc<Catalog>>,
    slots: Mutex<HashMap<String, Arc<Mutex<PackageSlot>>>>,
    status: RwLock<StatusSnapshot>,
}

impl Orchestrator {
    /// Builds the orchestrator and reconciles in-memory state with the links
    /// on disk. An experiment whose core unit is still running resumes; any
    /// other leftover experiment is unwound to stable.
    pub fn open(
        store: PackageStore,
        supervisor: Arc<dyn ServiceSupervisor>,
        config: OrchestratorConfig,
    ) -> Result<Self, OrchestratorError> {
        config.validate()?;
        let catalog_key = config
            .catalog_public_key
            .as_deref()
            .map(parse_public_key_hex)
            .transpose()
            .map_err(|err| OrchestratorError::Catalog(format!("{err:#}")))?;

        let orchestrator = Self {
            inner: Arc::new(Inner {
                store,
                supervisor,
                config,
                catalog_key,
                catalog: RwLock::new(Arc::new(Catalog::default())),
                slots: Mutex::new(HashMap::new()),
                status: RwLock::new(StatusSnapshot::new(ORCHESTRATOR_VERSION)),
            }),
        };
        orchestrator.reconcile()?;
        Ok(orchestrator)
    }

    fn reconcile(&self) -> Result<(), OrchestratorError> {
        for package in self.inner.store.installed_packages()? {
            let Some(links) = self.inner.store.read_links(&package)? else {
                continue;
            };
            let slot = self.slot(&package);
            let mut slot = lock(&slot);
            slot.stable = Some(links.stable.clone());

            if !links.has_experiment() {
                self.publish(&slot);
                continue;
            }
            let version = links.experiment;

            info!(package = %package, version = %version, "found experiment at startup");
            slot.session = Some(ExperimentSession::new(
                &package,
                &version,
                self.job_deadline()?,
            ));

            let core = self.units_for(&package).experiment().core;
            match self.inner.supervisor.unit_state(&core) {
                Ok(UnitState::Running) => {
                    slot.state = PackageState::ExperimentRunning;
                    slot.generation += 1;
                    self.publish(&slot);
                    self.spawn_watcher(&package, slot.generation);
                }
                Ok(state) => {
                    let err = OrchestratorError::UnitFailed { unit: core, state };
                    self.fail_experiment(&mut slot, err);
                }
                Err(err) => {
                    self.fail_experiment(&mut slot, err.into());
                }
            }
        }
        Ok(())
    }

    /// Current status. A copy, so callers never observe a half-applied
    /// transition.
    pub fn status(&self) -> StatusSnapshot {
        self.inner
            .status
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn catalog(&self) -> Arc<Catalog> {
        self.inner
            .catalog
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Replaces the catalog wholesale. Operations already running keep the
    /// catalog they started with.
    pub fn set_catalog(&self, raw: &str, signature: Option<&str>) -> Result<(), OrchestratorError> {
        if let Some(key) = &self.inner.catalog_key {
            let signature = signature.ok_or_else(|| {
                OrchestratorError::Catalog("catalog signature is required".to_string())
            })?;
            let valid = verify_catalog_signature(raw.as_bytes(), key, signature)
                .map_err(|err| OrchestratorError::Catalog(format!("{err:#}")))?;
            if !valid {
                return Err(OrchestratorError::Catalog(
                    "catalog signature verification failed".to_string(),
                ));
            }
        }

        let catalog = Catalog::from_json_str(raw)
            .map_err(|err| OrchestratorError::Catalog(format!("{err:#}")))?;
        let packages = catalog.packages().count();
        *self
            .inner
            .catalog
            .write()
            .unwrap_or_else(PoisonError::into_inner) = Arc::new(catalog);
        info!(packages, "catalog replaced");
        Ok(())
    }

    pub fn store(&self) -> &PackageStore {
        &self.inner.store
    }

    pub(crate) fn slot(&self, package: &str) -> Arc<Mutex<PackageSlot>> {
        let mut slots = self
            .inner
            .slots
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        slots
            .entry(package.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(PackageSlot::new(package))))
            .clone()
    }

    /// When an experiment started now must be running by.
    pub(crate) fn job_deadline(&self) -> Result<Instant, OrchestratorError> {
        let timeout = self.inner.config.job_timeout;
        Instant::now().checked_add(timeout).ok_or_else(|| {
            OrchestratorError::Config(format!("job timeout {timeout:?} is out of range"))
        })
    }

    pub(crate) fn units_for(&self, package: &str) -> UnitSet {
        self.inner.config.units_for(package)
    }

    /// Copies the slot into the shared snapshot. Called with the slot lock
    /// held so snapshots follow transition order.
    pub(crate) fn publish(&self, slot: &PackageSlot) {
        let mut status = self
            .inner
            .status
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        match slot.to_status() {
            Some(package_status) => {
                status.packages.insert(slot.name.clone(), package_status);
            }
            None => {
                status.packages.remove(&slot.name);
            }
        }
        debug!(package = %slot.name, state = %slot.state, "status published");
    }

    pub(crate) fn stop_units(&self, units: &UnitSet) -> Result<(), SupervisorError> {
        for unit in units.stop_order() {
            self.inner.supervisor.stop_unit(unit)?;
            info!(unit, "unit stopped");
        }
        Ok(())
    }

    pub(crate) fn start_units(&self, units: &UnitSet) -> Result<(), SupervisorError> {
        for unit in units.start_order() {
            self.inner.supervisor.start_unit(unit)?;
            info!(unit, "unit start requested");
        }
        Ok(())
    }

    /// Stops every unit even when some fail, returning the first failure.
    pub(crate) fn stop_units_best_effort(&self, units: &UnitSet) -> Option<SupervisorError> {
        let mut first = None;
        for unit in units.stop_order() {
            match self.inner.supervisor.stop_unit(unit) {
                Ok(()) => info!(unit, "unit stopped"),
                Err(err) => {
                    warn!(unit, error = %err, "failed to stop unit");
                    first.get_or_insert(err);
                }
            }
        }
        first
    }

    pub(crate) fn start_units_best_effort(&self, units: &UnitSet) -> Option<SupervisorError> {
        let mut first = None;
        for unit in units.start_order() {
            match self.inner.supervisor.start_unit(unit) {
                Ok(()) => info!(unit, "unit start requested"),
                Err(err) => {
                    warn!(unit, error = %err, "failed to start unit");
                    first.get_or_insert(err);
                }
            }
        }
        first
    }
}

pub(crate) fn lock(slot: &Mutex<PackageSlot>) -> MutexGuard<'_, PackageSlot> {
    slot.lock().unwrap_or_else(PoisonError::into_inner)
}

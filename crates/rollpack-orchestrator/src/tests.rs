use super::*;

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use ed25519_dalek::{Signer, SigningKey};
use rollpack_core::{PackageState, UnitSet};
use rollpack_installer::{PackageStore, StoreLayout};
use rollpack_supervisor::{MemorySupervisor, StartBehavior, UnitEvent, UnitState};
use serde_json::json;

static TEST_COUNTER: AtomicU64 = AtomicU64::new(0);

fn test_root() -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("system time")
        .as_nanos();
    let seq = TEST_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("rollpack-orchestrator-tests-{nanos}-{seq}"))
}

fn write_source_dir(root: &Path, version: &str) -> PathBuf {
    let dir = root.join("sources").join(format!("agent-{version}"));
    fs::create_dir_all(dir.join("bin")).expect("must create source dir");
    fs::write(dir.join("bin").join("agent"), version).expect("must write source file");
    dir
}

fn catalog_json(root: &Path, versions: &[&str]) -> String {
    let mut entries: Vec<serde_json::Value> = versions
        .iter()
        .map(|version| {
            json!({
                "package": "agent",
                "version": version,
                "url": write_source_dir(root, version).display().to_string(),
            })
        })
        .collect();
    entries.push(json!({
        "package": "agent",
        "version": "4.0",
        "url": root.join("sources").join("missing").display().to_string(),
    }));
    json!({ "packages": entries }).to_string()
}

fn agent_units() -> UnitSet {
    UnitSet {
        core: "agent".to_string(),
        dependents: vec!["agent-trace".to_string(), "agent-process".to_string()],
    }
}

fn test_config() -> OrchestratorConfig {
    let mut packages = BTreeMap::new();
    packages.insert(
        "agent".to_string(),
        PackageConfig {
            units: agent_units(),
            requires: Vec::new(),
        },
    );
    OrchestratorConfig {
        job_timeout: Duration::from_secs(60),
        poll_interval: Duration::from_millis(5),
        readiness_timeout: Duration::from_millis(20),
        packages,
        spawn_watchers: false,
        ..OrchestratorConfig::default()
    }
}

struct Harness {
    orchestrator: Orchestrator,
    supervisor: Arc<MemorySupervisor>,
    root: PathBuf,
}

impl Harness {
    fn open(root: PathBuf, supervisor: Arc<MemorySupervisor>, config: OrchestratorConfig) -> Self {
        let store = PackageStore::new(StoreLayout::new(root.join("packages")));
        let orchestrator =
            Orchestrator::open(store, supervisor.clone(), config).expect("must open orchestrator");
        Self {
            orchestrator,
            supervisor,
            root,
        }
    }

    /// agent@1.0 installed as stable, catalog with 1.0, 2.0 and 3.0, event
    /// log cleared.
    fn with_config(config: OrchestratorConfig) -> Self {
        let root = test_root();
        let harness = Self::open(root, Arc::new(MemorySupervisor::new()), config);
        harness
            .orchestrator
            .set_catalog(&catalog_json(&harness.root, &["1.0", "2.0", "3.0"]), None)
            .expect("must set catalog");
        harness
            .orchestrator
            .install_package("agent", "1.0")
            .expect("must install stable");
        harness.supervisor.take_events();
        harness
    }

    fn new() -> Self {
        Self::with_config(test_config())
    }

    fn links(&self) -> (String, String) {
        let links = self
            .orchestrator
            .store()
            .read_links("agent")
            .expect("must read links")
            .expect("agent must be installed");
        (links.stable, links.experiment)
    }

    fn version_dir(&self, version: &str) -> PathBuf {
        self.root.join("packages").join("agent").join(version)
    }

    fn cleanup(self) {
        let _ = fs::remove_dir_all(&self.root);
    }
}

fn stop(unit: &str) -> UnitEvent {
    UnitEvent::Stop(unit.to_string())
}

fn start(unit: &str) -> UnitEvent {
    UnitEvent::Start(unit.to_string())
}

/// Events must match group by group; order inside a group is free.
fn assert_event_groups(events: &[UnitEvent], groups: &[Vec<UnitEvent>]) {
    let expected_len: usize = groups.iter().map(Vec::len).sum();
    assert_eq!(events.len(), expected_len, "unexpected events: {events:?}");

    let mut offset = 0;
    for group in groups {
        let mut actual: Vec<String> = events[offset..offset + group.len()]
            .iter()
            .map(|event| format!("{event:?}"))
            .collect();
        let mut wanted: Vec<String> = group.iter().map(|event| format!("{event:?}")).collect();
        actual.sort();
        wanted.sort();
        assert_eq!(actual, wanted, "event group mismatch in {events:?}");
        offset += group.len();
    }
}

fn stop_stable_then_start_experiment() -> Vec<Vec<UnitEvent>> {
    vec![
        vec![stop("agent-trace"), stop("agent-process")],
        vec![stop("agent")],
        vec![start("agent-exp")],
        vec![start("agent-trace-exp"), start("agent-process-exp")],
    ]
}

fn stop_experiment_then_start_stable() -> Vec<Vec<UnitEvent>> {
    vec![
        vec![stop("agent-trace-exp"), stop("agent-process-exp")],
        vec![stop("agent-exp")],
        vec![start("agent")],
        vec![start("agent-trace"), start("agent-process")],
    ]
}

#[test]
fn install_starts_stable_units_core_first() {
    let root = test_root();
    let harness = Harness::open(root, Arc::new(MemorySupervisor::new()), test_config());
    harness
        .orchestrator
        .set_catalog(&catalog_json(&harness.root, &["1.0"]), None)
        .expect("must set catalog");
    harness
        .orchestrator
        .install_package("agent", "1.0")
        .expect("must install");

    assert_event_groups(
        &harness.supervisor.events(),
        &[
            vec![start("agent")],
            vec![start("agent-trace"), start("agent-process")],
        ],
    );
    assert_eq!(harness.links(), ("1.0".to_string(), "1.0".to_string()));

    let status = harness.orchestrator.status();
    assert_eq!(status.version, ORCHESTRATOR_VERSION);
    let agent = status.package("agent").expect("agent status");
    assert_eq!(agent.state, PackageState::Stable);
    assert_eq!(agent.stable, "1.0");
    assert_eq!(agent.experiment, "");

    harness
        .orchestrator
        .install_package("agent", "1.0")
        .expect("reinstalling stable is a no-op");
    assert_eq!(harness.supervisor.events().len(), 3);

    harness.cleanup();
}

#[test]
fn start_then_promote_follows_unit_ordering() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    assert_event_groups(
        &harness.supervisor.take_events(),
        &stop_stable_then_start_experiment(),
    );
    assert_eq!(harness.links(), ("1.0".to_string(), "2.0".to_string()));
    assert_eq!(
        orchestrator.status().package("agent").expect("status").state,
        PackageState::ExperimentStarting
    );

    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentRunning
    );
    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.stable, "1.0");
    assert_eq!(agent.experiment, "2.0");

    orchestrator
        .promote_experiment("agent")
        .expect("must promote");
    assert_event_groups(
        &harness.supervisor.take_events(),
        &stop_experiment_then_start_stable(),
    );
    assert_eq!(harness.links(), ("2.0".to_string(), "2.0".to_string()));

    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.state, PackageState::Stable);
    assert_eq!(agent.stable, "2.0");
    assert_eq!(agent.experiment, "");
    assert!(harness.version_dir("1.0").is_dir());

    harness.cleanup();
}

#[test]
fn start_at_stable_version_is_rejected_without_unit_activity() {
    let harness = Harness::new();

    let err = harness
        .orchestrator
        .start_experiment("agent", "1.0")
        .expect_err("stable version must be rejected");
    assert!(err.is_no_op());
    assert!(matches!(
        err,
        OrchestratorError::InvalidVersion {
            reason: InvalidVersionReason::SameAsStable,
            ..
        }
    ));
    assert!(harness.supervisor.events().is_empty());

    harness.cleanup();
}

#[test]
fn start_with_unknown_version_is_rejected() {
    let harness = Harness::new();

    let err = harness
        .orchestrator
        .start_experiment("agent", "9.9")
        .expect_err("unknown version must be rejected");
    assert!(matches!(
        err,
        OrchestratorError::InvalidVersion {
            reason: InvalidVersionReason::NotInCatalog,
            ..
        }
    ));
    assert!(!err.is_no_op());

    let err = harness
        .orchestrator
        .start_experiment("ghost", "1.0")
        .expect_err("uninstalled package must be rejected");
    assert!(matches!(err, OrchestratorError::NotInstalled(_)));
    assert!(harness.supervisor.events().is_empty());

    harness.cleanup();
}

#[test]
fn fetch_failure_leaves_stable_untouched() {
    let harness = Harness::new();
    let before = harness.orchestrator.status();

    let err = harness
        .orchestrator
        .start_experiment("agent", "4.0")
        .expect_err("missing source must fail");
    assert!(matches!(err, OrchestratorError::Fetch(_)));
    assert!(harness.supervisor.events().is_empty());
    assert_eq!(harness.orchestrator.status(), before);
    assert_eq!(harness.links(), ("1.0".to_string(), "1.0".to_string()));

    harness.cleanup();
}

#[test]
fn start_then_stop_round_trips_to_stable() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    harness.supervisor.take_events();
    orchestrator.stop_experiment("agent").expect("must stop");

    assert_event_groups(
        &harness.supervisor.take_events(),
        &stop_experiment_then_start_stable(),
    );
    assert_eq!(harness.links(), ("1.0".to_string(), "1.0".to_string()));
    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.state, PackageState::Stable);
    assert_eq!(agent.stable, "1.0");
    assert_eq!(agent.experiment, "");
    assert_eq!(agent.last_error, None);

    // Retained for a fast retry until collected.
    assert!(harness.version_dir("2.0").is_dir());
    assert_eq!(
        orchestrator.garbage_collect("agent").expect("must gc"),
        vec!["2.0".to_string()]
    );
    assert!(!harness.version_dir("2.0").exists());

    harness.cleanup();
}

#[test]
fn stop_without_experiment_is_a_no_op() {
    let harness = Harness::new();

    let before = harness.orchestrator.status();
    harness
        .orchestrator
        .stop_experiment("agent")
        .expect("stop without experiment succeeds");
    assert_eq!(harness.orchestrator.status(), before);
    assert!(harness.supervisor.events().is_empty());

    harness.cleanup();
}

#[test]
fn second_start_supersedes_first() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;
    harness
        .supervisor
        .set_start_behavior("agent-exp", StartBehavior::Hang);

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start first experiment");
    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentStarting
    );
    harness.supervisor.take_events();

    orchestrator
        .start_experiment("agent", "3.0")
        .expect("must start second experiment");
    assert_event_groups(
        &harness.supervisor.take_events(),
        &[
            vec![stop("agent-trace-exp"), stop("agent-process-exp")],
            vec![stop("agent-exp")],
            vec![start("agent-exp")],
            vec![start("agent-trace-exp"), start("agent-process-exp")],
        ],
    );

    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.stable, "1.0");
    assert_eq!(agent.experiment, "3.0");
    assert_eq!(harness.links(), ("1.0".to_string(), "3.0".to_string()));

    let running = harness.supervisor.running_units();
    assert!(!running.contains(&"agent".to_string()));
    assert!(running.contains(&"agent-exp".to_string()));

    harness.cleanup();
}

#[test]
fn core_crash_unwinds_to_stable() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentRunning
    );
    harness.supervisor.take_events();

    harness.supervisor.crash("agent-exp", 1);
    assert_eq!(orchestrator.poll_experiment("agent"), PackageState::Stable);

    assert_event_groups(
        &harness.supervisor.take_events(),
        &stop_experiment_then_start_stable(),
    );
    assert_eq!(harness.links(), ("1.0".to_string(), "1.0".to_string()));
    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.stable, "1.0");
    assert_eq!(agent.experiment, "");
    let last_error = agent.last_error.as_deref().expect("failure recorded");
    assert!(last_error.contains("agent-exp"));
    assert!(last_error.contains("failed"));

    harness.cleanup();
}

#[test]
fn dependent_crash_while_running_is_tolerated() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    orchestrator.poll_experiment("agent");
    harness.supervisor.crash("agent-trace-exp", 1);

    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentRunning
    );

    harness.cleanup();
}

#[test]
fn job_timeout_unwinds_and_reports_unit_timeout() {
    let harness = Harness::with_config(OrchestratorConfig {
        job_timeout: Duration::ZERO,
        ..test_config()
    });
    let orchestrator = &harness.orchestrator;
    harness
        .supervisor
        .set_start_behavior("agent-exp", StartBehavior::Hang);

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    harness.supervisor.take_events();
    assert_eq!(orchestrator.poll_experiment("agent"), PackageState::Stable);

    assert_event_groups(
        &harness.supervisor.take_events(),
        &stop_experiment_then_start_stable(),
    );
    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.experiment, "");
    assert!(agent
        .last_error
        .as_deref()
        .expect("timeout recorded")
        .contains("did not reach running"));

    harness.cleanup();
}

#[test]
fn job_timeout_fires_while_unit_state_is_unreadable() {
    let harness = Harness::with_config(OrchestratorConfig {
        job_timeout: Duration::ZERO,
        ..test_config()
    });
    let orchestrator = &harness.orchestrator;
    harness
        .supervisor
        .set_start_behavior("agent-exp", StartBehavior::Hang);

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    harness.supervisor.set_broken("agent-process-exp", true);

    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentFailed
    );
    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.state, PackageState::ExperimentFailed);
    let last_error = agent.last_error.as_deref().expect("timeout recorded");
    assert!(last_error.contains("unit 'agent-exp' did not reach running"));
    assert!(last_error.contains("rollback failed"));

    harness.supervisor.set_broken("agent-process-exp", false);
    orchestrator
        .stop_experiment("agent")
        .expect("retried stop must succeed");
    assert_eq!(
        orchestrator.status().package("agent").expect("status").state,
        PackageState::Stable
    );

    harness.cleanup();
}

#[test]
fn queued_core_start_waits_for_the_job_timeout() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    // systemd reports a unit whose start job is still queued as inactive.
    harness.supervisor.set_state("agent-exp", UnitState::Dead);
    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentStarting
    );
    assert_eq!(orchestrator.poll_experiment("agent"), PackageState::ExperimentStarting);

    harness.supervisor.set_state("agent-exp", UnitState::Running);
    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentRunning
    );

    harness.supervisor.crash("agent-exp", 0);
    assert_eq!(orchestrator.poll_experiment("agent"), PackageState::Stable);

    harness.cleanup();
}

#[test]
fn core_exit_after_activating_fails_a_starting_experiment() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;
    harness
        .supervisor
        .set_start_behavior("agent-exp", StartBehavior::Hang);

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentStarting
    );
    harness.supervisor.crash("agent-exp", 0);

    assert_eq!(orchestrator.poll_experiment("agent"), PackageState::Stable);
    let status = orchestrator.status();
    let last_error = status
        .package("agent")
        .expect("status")
        .last_error
        .clone()
        .expect("failure recorded");
    assert!(last_error.contains("unit 'agent-exp' entered state dead"));

    harness.cleanup();
}

#[test]
fn open_rejects_out_of_range_timeouts() {
    let root = test_root();
    let open = |config: OrchestratorConfig| {
        let store = PackageStore::new(StoreLayout::new(root.join("packages")));
        Orchestrator::open(store, Arc::new(MemorySupervisor::new()), config)
    };

    let err = open(OrchestratorConfig {
        job_timeout: Duration::from_secs(i64::MAX as u64),
        ..test_config()
    })
    .err()
    .expect("oversized job timeout must be rejected");
    assert!(matches!(err, OrchestratorError::Config(_)));

    assert!(matches!(
        open(OrchestratorConfig {
            readiness_timeout: MAX_TIMEOUT + Duration::from_secs(1),
            ..test_config()
        }),
        Err(OrchestratorError::Config(_))
    ));
    assert!(matches!(
        open(OrchestratorConfig {
            poll_interval: Duration::ZERO,
            ..test_config()
        }),
        Err(OrchestratorError::Config(_))
    ));
    assert!(open(OrchestratorConfig {
        job_timeout: MAX_TIMEOUT,
        ..test_config()
    })
    .is_ok());

    let _ = fs::remove_dir_all(&root);
}

#[test]
fn failed_rollback_stays_failed_until_stop_retries() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    orchestrator.poll_experiment("agent");
    harness.supervisor.set_broken("agent-trace-exp", true);
    harness.supervisor.crash("agent-exp", 1);

    assert_eq!(
        orchestrator.poll_experiment("agent"),
        PackageState::ExperimentFailed
    );
    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.state, PackageState::ExperimentFailed);
    assert!(agent
        .last_error
        .as_deref()
        .expect("error recorded")
        .contains("rollback failed"));

    harness.supervisor.set_broken("agent-trace-exp", false);
    orchestrator
        .stop_experiment("agent")
        .expect("retried stop must succeed");
    let status = orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.state, PackageState::Stable);
    assert_eq!(agent.experiment, "");

    harness.cleanup();
}

#[test]
fn promote_requires_running_experiment() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    let err = orchestrator
        .promote_experiment("agent")
        .expect_err("nothing to promote");
    assert!(matches!(err, OrchestratorError::NoActiveExperiment(_)));

    harness
        .supervisor
        .set_start_behavior("agent-exp", StartBehavior::Hang);
    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    let err = orchestrator
        .promote_experiment("agent")
        .expect_err("starting experiment cannot be promoted");
    assert!(matches!(
        err,
        OrchestratorError::ExperimentNotRunning {
            state: PackageState::ExperimentStarting,
            ..
        }
    ));
    assert_eq!(harness.links(), ("1.0".to_string(), "2.0".to_string()));

    harness.cleanup();
}

#[test]
fn install_and_gc_are_refused_during_experiment() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    assert!(matches!(
        orchestrator.install_package("agent", "3.0"),
        Err(OrchestratorError::ExperimentActive(_))
    ));
    assert!(matches!(
        orchestrator.garbage_collect("agent"),
        Err(OrchestratorError::ExperimentActive(_))
    ));

    harness.cleanup();
}

#[test]
fn purge_retention_removes_abandoned_versions() {
    let harness = Harness::with_config(OrchestratorConfig {
        retention: RetentionPolicy::Purge,
        ..test_config()
    });
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    orchestrator.stop_experiment("agent").expect("must stop");
    assert!(!harness.version_dir("2.0").exists());
    assert!(harness.version_dir("1.0").is_dir());

    orchestrator
        .start_experiment("agent", "3.0")
        .expect("must start experiment");
    orchestrator.poll_experiment("agent");
    orchestrator.promote_experiment("agent").expect("must promote");
    assert!(!harness.version_dir("1.0").exists());
    assert!(harness.version_dir("3.0").is_dir());

    harness.cleanup();
}

#[test]
fn open_resumes_running_experiment() {
    let harness = Harness::new();
    harness
        .orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    harness.supervisor.take_events();

    let reopened = Harness::open(
        harness.root.clone(),
        harness.supervisor.clone(),
        test_config(),
    );
    let status = reopened.orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.state, PackageState::ExperimentRunning);
    assert_eq!(agent.stable, "1.0");
    assert_eq!(agent.experiment, "2.0");
    assert!(harness.supervisor.events().is_empty());

    reopened
        .orchestrator
        .promote_experiment("agent")
        .expect("resumed experiment can be promoted");
    assert_eq!(reopened.links(), ("2.0".to_string(), "2.0".to_string()));

    harness.cleanup();
}

#[test]
fn open_unwinds_dead_experiment() {
    let harness = Harness::new();
    harness
        .orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    harness.supervisor.crash("agent-exp", 0);
    harness.supervisor.take_events();

    let reopened = Harness::open(
        harness.root.clone(),
        harness.supervisor.clone(),
        test_config(),
    );
    let status = reopened.orchestrator.status();
    let agent = status.package("agent").expect("status");
    assert_eq!(agent.state, PackageState::Stable);
    assert_eq!(agent.experiment, "");
    assert_event_groups(
        &harness.supervisor.take_events(),
        &stop_experiment_then_start_stable(),
    );
    assert_eq!(reopened.links(), ("1.0".to_string(), "1.0".to_string()));

    harness.cleanup();
}

#[test]
fn required_packages_must_be_running_before_start() {
    let mut config = test_config();
    if let Some(agent) = config.packages.get_mut("agent") {
        agent.requires = vec!["installer".to_string()];
    }
    let harness = Harness::with_config(config);
    let orchestrator = &harness.orchestrator;

    let err = orchestrator
        .start_experiment("agent", "2.0")
        .expect_err("installer is not running");
    assert!(matches!(
        err,
        OrchestratorError::DependencyNotReady { ref requirement, .. } if requirement == "installer"
    ));
    assert!(harness.supervisor.events().is_empty());

    harness.supervisor.set_state("installer", UnitState::Running);
    orchestrator
        .start_experiment("agent", "2.0")
        .expect("installer is ready");

    harness.cleanup();
}

#[test]
fn remove_package_stops_units_and_forgets_package() {
    let harness = Harness::new();
    let orchestrator = &harness.orchestrator;

    orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    harness.supervisor.take_events();
    orchestrator.remove_package("agent").expect("must remove");

    assert_event_groups(
        &harness.supervisor.take_events(),
        &[
            vec![stop("agent-trace-exp"), stop("agent-process-exp")],
            vec![stop("agent-exp")],
            vec![stop("agent-trace"), stop("agent-process")],
            vec![stop("agent")],
        ],
    );
    assert!(orchestrator.status().package("agent").is_none());
    assert!(!harness.root.join("packages").join("agent").exists());
    assert!(matches!(
        orchestrator.remove_package("agent"),
        Err(OrchestratorError::NotInstalled(_))
    ));

    harness.cleanup();
}

#[test]
fn signed_catalogs_are_verified() {
    let signing_key = SigningKey::from_bytes(&[7u8; 32]);
    let root = test_root();
    let harness = Harness::open(
        root,
        Arc::new(MemorySupervisor::new()),
        OrchestratorConfig {
            catalog_public_key: Some(hex::encode(signing_key.verifying_key().to_bytes())),
            ..test_config()
        },
    );
    let raw = catalog_json(&harness.root, &["1.0"]);
    let signature = hex::encode(signing_key.sign(raw.as_bytes()).to_bytes());

    assert!(matches!(
        harness.orchestrator.set_catalog(&raw, None),
        Err(OrchestratorError::Catalog(_))
    ));
    let tampered = raw.replace("1.0", "1.1");
    assert!(matches!(
        harness.orchestrator.set_catalog(&tampered, Some(&signature)),
        Err(OrchestratorError::Catalog(_))
    ));
    assert_eq!(harness.orchestrator.catalog().packages().count(), 0);

    harness
        .orchestrator
        .set_catalog(&raw, Some(&signature))
        .expect("valid signature");
    assert_eq!(harness.orchestrator.catalog().versions("agent"), vec!["1.0", "4.0"]);

    harness.cleanup();
}

#[test]
fn malformed_catalog_keeps_previous_catalog() {
    let harness = Harness::new();

    let err = harness
        .orchestrator
        .set_catalog("{\"packages\": [{\"package\": \"agent\"}]}", None)
        .expect_err("incomplete entry must be rejected");
    assert!(matches!(err, OrchestratorError::Catalog(_)));
    assert_eq!(
        harness.orchestrator.catalog().versions("agent"),
        vec!["1.0", "2.0", "3.0", "4.0"]
    );

    harness.cleanup();
}

#[test]
fn status_is_readable_while_package_lock_is_held() {
    let harness = Harness::new();

    let slot = harness.orchestrator.slot("agent");
    let guard = crate::orchestrator::lock(&slot);
    let status = harness.orchestrator.status();
    assert_eq!(status.package("agent").expect("status").stable, "1.0");
    drop(guard);

    harness.cleanup();
}

#[test]
fn watcher_thread_marks_experiment_running() {
    let harness = Harness::with_config(OrchestratorConfig {
        spawn_watchers: true,
        ..test_config()
    });
    harness
        .supervisor
        .set_start_behavior("agent-exp", StartBehavior::Hang);
    harness
        .orchestrator
        .start_experiment("agent", "2.0")
        .expect("must start experiment");
    harness.supervisor.activate("agent-exp");

    let deadline = Instant::now() + Duration::from_secs(5);
    let state = loop {
        let state = harness
            .orchestrator
            .status()
            .package("agent")
            .expect("status")
            .state;
        if state == PackageState::ExperimentRunning || Instant::now() >= deadline {
            break state;
        }
        std::thread::sleep(Duration::from_millis(5));
    };
    assert_eq!(state, PackageState::ExperimentRunning);

    harness
        .orchestrator
        .stop_experiment("agent")
        .expect("must stop");
    harness.cleanup();
}

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use rollpack_core::ControlRequest;
use rollpack_installer::{PackageStore, StoreLayout};
use rollpack_orchestrator::Orchestrator;
use rollpack_supervisor::{MemorySupervisor, ServiceSupervisor, SystemdSupervisor};
use tracing::info;

use crate::client::ControlClient;
use crate::completion::write_completions_script;
use crate::config::{DaemonConfig, DEFAULT_CONFIG_PATH, DEFAULT_SOCKET_PATH};
use crate::render::{current_output_style, print_status};
use crate::server::ControlServer;
use crate::{Cli, Commands, DaemonCommands, SupervisorKind};

pub(crate) fn run_cli(cli: Cli) -> Result<()> {
    match cli.command {
        Commands::Completions { shell } => {
            let mut stdout = std::io::stdout();
            write_completions_script(shell, &mut stdout)?;
        }
        Commands::Daemon(command) => run_daemon_command(cli.socket, command)?,
    }

    Ok(())
}

fn run_daemon(
    config_path: Option<PathBuf>,
    socket_override: Option<PathBuf>,
    supervisor: SupervisorKind,
) -> Result<()> {
    let config_path = config_path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let mut config = DaemonConfig::load(&config_path)?;
    if let Some(socket) = socket_override {
        config.socket = socket;
    }

    let supervisor: Arc<dyn ServiceSupervisor> = match supervisor {
        SupervisorKind::Systemd => Arc::new(SystemdSupervisor::new()),
        SupervisorKind::Memory => Arc::new(MemorySupervisor::new()),
    };
    let store = PackageStore::new(StoreLayout::new(config.root.clone()));
    let orchestrator = Orchestrator::open(store, supervisor, config.orchestrator_config())
        .context("failed to start orchestrator")?;
    if let Some(catalog_path) = &config.catalog {
        load_initial_catalog(&orchestrator, catalog_path)?;
    }

    let server = ControlServer::bind(&config.socket, orchestrator)?;
    info!(
        root = %config.root.display(),
        socket = %server.path().display(),
        "rollpack daemon started"
    );
    server.serve()
}

/// Reads `<catalog>` and, when present, its detached signature
/// `<catalog>.sig`.
pub(crate) fn load_initial_catalog(orchestrator: &Orchestrator, path: &Path) -> Result<()> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed reading catalog: {}", path.display()))?;
    let signature_path = PathBuf::from(format!("{}.sig", path.display()));
    let signature = if signature_path.exists() {
        Some(
            fs::read_to_string(&signature_path).with_context(|| {
                format!("failed reading catalog signature: {}", signature_path.display())
            })?,
        )
    } else {
        None
    };

    orchestrator
        .set_catalog(&raw, signature.as_deref().map(str::trim))
        .with_context(|| format!("failed loading catalog: {}", path.display()))
}

fn run_daemon_command(socket: Option<PathBuf>, command: DaemonCommands) -> Result<()> {
    let style = current_output_style();
    let client = ControlClient::new(
        socket
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH)),
    );
    match command {
        DaemonCommands::Run { config, supervisor } => run_daemon(config, socket, supervisor)?,
        DaemonCommands::StartExperiment {
            package,
            version,
            wait,
            wait_timeout_secs,
        } => {
            client.send(&ControlRequest::StartExperiment {
                package: package.clone(),
                version: version.clone(),
            })?;
            print_status(
                style,
                "ok",
                &format!("started experiment {package} {version}"),
            );
            if wait {
                client.wait_for_experiment(
                    &package,
                    &version,
                    Duration::from_secs(wait_timeout_secs),
                    style,
                )?;
            }
        }
        DaemonCommands::StopExperiment { package } => {
            client.send(&ControlRequest::StopExperiment {
                package: package.clone(),
            })?;
            print_status(style, "ok", &format!("stopped experiment for {package}"));
        }
        DaemonCommands::PromoteExperiment { package } => {
            client.send(&ControlRequest::PromoteExperiment {
                package: package.clone(),
            })?;
            print_status(style, "ok", &format!("promoted experiment for {package}"));
        }
        DaemonCommands::SetCatalog { catalog, signature } => {
            let catalog = read_catalog_argument(&catalog)?;
            client.send(&ControlRequest::SetCatalog { catalog, signature })?;
            print_status(style, "ok", "catalog updated");
        }
        DaemonCommands::Status => {
            let status = client.status()?;
            let rendered =
                serde_json::to_string_pretty(&status).context("failed to encode status")?;
            println!("{rendered}");
        }
        DaemonCommands::Install { package, version } => {
            client.send(&ControlRequest::Install {
                package: package.clone(),
                version: version.clone(),
            })?;
            print_status(style, "ok", &format!("installed {package} {version}"));
        }
        DaemonCommands::Remove { package } => {
            client.send(&ControlRequest::Remove {
                package: package.clone(),
            })?;
            print_status(style, "ok", &format!("removed {package}"));
        }
        DaemonCommands::Gc { package } => {
            let result = client.send(&ControlRequest::Gc {
                package: package.clone(),
            })?;
            let removed = removed_versions(result.as_ref());
            if removed.is_empty() {
                print_status(style, "..", &format!("{package}: nothing to collect"));
            } else {
                print_status(
                    style,
                    "ok",
                    &format!("{package}: removed {}", removed.join(", ")),
                );
            }
        }
    }
    Ok(())
}

pub(crate) fn read_catalog_argument(argument: &str) -> Result<String> {
    match argument.strip_prefix('@') {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading catalog file: {path}")),
        None => Ok(argument.to_string()),
    }
}

pub(crate) fn removed_versions(result: Option<&serde_json::Value>) -> Vec<String> {
    result
        .and_then(|value| value.get("removed"))
        .and_then(serde_json::Value::as_array)
        .map(|versions| {
            versions
                .iter()
                .filter_map(|version| version.as_str().map(str::to_string))
                .collect()
        })
        .unwrap_or_default()
}

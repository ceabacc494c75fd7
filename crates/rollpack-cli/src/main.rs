mod client;
mod completion;
mod config;
mod dispatch;
mod render;
mod server;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use crate::completion::CliCompletionShell;

const MAX_WAIT_TIMEOUT_SECS: u64 = rollpack_orchestrator::MAX_TIMEOUT.as_secs();

#[derive(Parser, Debug)]
#[command(name = "rollpack", version)]
#[command(about = "Stable/experiment upgrades for supervised packages", long_about = None)]
struct Cli {
    /// Daemon control socket. Overrides the config file for `daemon run`.
    #[arg(long, global = true)]
    socket: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(subcommand)]
    Daemon(DaemonCommands),
    Completions {
        #[arg(value_enum)]
        shell: CliCompletionShell,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonCommands {
    /// Run the orchestrator and serve the control socket.
    Run {
        #[arg(long)]
        config: Option<PathBuf>,
        #[arg(long, value_enum, default_value_t = SupervisorKind::Systemd)]
        supervisor: SupervisorKind,
    },
    StartExperiment {
        package: String,
        version: String,
        /// Block until the experiment runs or is rolled back.
        #[arg(long)]
        wait: bool,
        #[arg(
            long,
            default_value_t = 1800,
            value_parser = clap::value_parser!(u64).range(1..=MAX_WAIT_TIMEOUT_SECS)
        )]
        wait_timeout_secs: u64,
    },
    StopExperiment {
        package: String,
    },
    PromoteExperiment {
        package: String,
    },
    /// Replace the catalog. `@path` reads the payload from a file.
    SetCatalog {
        catalog: String,
        #[arg(long)]
        signature: Option<String>,
    },
    Status,
    /// Install a version as stable (first install or re-point).
    Install {
        package: String,
        version: String,
    },
    Remove {
        package: String,
    },
    /// Delete installed versions no link references.
    Gc {
        package: String,
    },
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum SupervisorKind {
    Systemd,
    /// In-process units, for local harnesses.
    Memory,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(default_log_level(&cli.command));
    dispatch::run_cli(cli)
}

fn default_log_level(command: &Commands) -> &'static str {
    match command {
        Commands::Daemon(DaemonCommands::Run { .. }) => "info",
        _ => "warn",
    }
}

/// `ROLLPACK_LOG` wins over `RUST_LOG`; both fall back to `default_level`.
/// Logs go to stderr so `status` output stays machine readable.
fn init_tracing(default_level: &str) {
    let filter = std::env::var("ROLLPACK_LOG")
        .ok()
        .and_then(|directives| EnvFilter::try_new(directives).ok())
        .or_else(|| EnvFilter::try_from_default_env().ok())
        .unwrap_or_else(|| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

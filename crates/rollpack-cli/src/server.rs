use std::fs;
use std::io::{BufRead, BufReader, Write};
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::thread;

use anyhow::{anyhow, Context, Result};
use rollpack_core::{ControlRequest, ControlResponse};
use rollpack_orchestrator::{Orchestrator, OrchestratorError};
use serde_json::{json, Value};
use tracing::{debug, info, warn};

/// Host-local control channel: one JSON request line in, one JSON response
/// line out, then the connection closes.
pub(crate) struct ControlServer {
    listener: UnixListener,
    orchestrator: Orchestrator,
    path: PathBuf,
}

impl ControlServer {
    pub(crate) fn bind(path: &Path, orchestrator: Orchestrator) -> Result<Self> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create socket directory: {}", parent.display())
            })?;
        }
        remove_stale_socket(path)?;

        let listener = UnixListener::bind(path)
            .with_context(|| format!("failed to bind control socket: {}", path.display()))?;
        fs::set_permissions(path, fs::Permissions::from_mode(0o600)).with_context(|| {
            format!("failed to restrict control socket: {}", path.display())
        })?;

        Ok(Self {
            listener,
            orchestrator,
            path: path.to_path_buf(),
        })
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// Accepts connections forever, one thread per connection. Requests for
    /// the same package queue on the orchestrator's package lock.
    pub(crate) fn serve(&self) -> Result<()> {
        info!(socket = %self.path.display(), "control socket listening");
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(err) => {
                    warn!(error = %err, "failed to accept control connection");
                    continue;
                }
            };
            let orchestrator = self.orchestrator.clone();
            let spawned = thread::Builder::new()
                .name("control-conn".to_string())
                .spawn(move || {
                    if let Err(err) = handle_connection(&orchestrator, stream) {
                        warn!(error = %format!("{err:#}"), "control connection failed");
                    }
                });
            if let Err(err) = spawned {
                warn!(error = %err, "failed to spawn control connection thread");
            }
        }
        Ok(())
    }
}

impl Drop for ControlServer {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

fn remove_stale_socket(path: &Path) -> Result<()> {
    let Ok(metadata) = fs::symlink_metadata(path) else {
        return Ok(());
    };
    if !metadata.file_type().is_socket() {
        return Err(anyhow!(
            "refusing to replace non-socket file at {}",
            path.display()
        ));
    }
    if UnixStream::connect(path).is_ok() {
        return Err(anyhow!(
            "another daemon is already listening on {}",
            path.display()
        ));
    }
    fs::remove_file(path)
        .with_context(|| format!("failed to remove stale socket: {}", path.display()))
}

fn handle_connection(orchestrator: &Orchestrator, stream: UnixStream) -> Result<()> {
    let mut reader = BufReader::new(
        stream
            .try_clone()
            .context("failed to clone control connection")?,
    );
    let mut line = String::new();
    reader
        .read_line(&mut line)
        .context("failed to read control request")?;

    let response = match serde_json::from_str::<ControlRequest>(line.trim()) {
        Ok(request) => execute(orchestrator, request),
        Err(err) => ControlResponse::failure(format!("invalid request: {err}")),
    };

    let mut payload =
        serde_json::to_string(&response).context("failed to encode control response")?;
    payload.push('\n');
    let mut stream = stream;
    stream
        .write_all(payload.as_bytes())
        .context("failed to write control response")?;
    stream.flush().context("failed to flush control response")
}

pub(crate) fn execute(orchestrator: &Orchestrator, request: ControlRequest) -> ControlResponse {
    let command = request.name();
    debug!(command, "control request");

    let outcome: Result<Option<Value>, OrchestratorError> = match request {
        ControlRequest::StartExperiment { package, version } => orchestrator
            .start_experiment(&package, &version)
            .map(|()| None),
        ControlRequest::StopExperiment { package } => {
            orchestrator.stop_experiment(&package).map(|()| None)
        }
        ControlRequest::PromoteExperiment { package } => {
            orchestrator.promote_experiment(&package).map(|()| None)
        }
        ControlRequest::SetCatalog { catalog, signature } => orchestrator
            .set_catalog(&catalog, signature.as_deref())
            .map(|()| None),
        ControlRequest::Install { package, version } => orchestrator
            .install_package(&package, &version)
            .map(|()| None),
        ControlRequest::Remove { package } => orchestrator.remove_package(&package).map(|()| None),
        ControlRequest::Gc { package } => orchestrator
            .garbage_collect(&package)
            .map(|removed| Some(json!({ "removed": removed }))),
        ControlRequest::Status => {
            return match serde_json::to_value(orchestrator.status()) {
                Ok(status) => ControlResponse::success(Some(status)),
                Err(err) => ControlResponse::failure(format!("failed to encode status: {err}")),
            };
        }
    };

    match outcome {
        Ok(result) => ControlResponse::success(result),
        Err(err) => {
            warn!(command, error = %err, "control request failed");
            ControlResponse::failure(err.to_string())
        }
    }
}

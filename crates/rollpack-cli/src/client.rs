use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use rollpack_core::{ControlRequest, ControlResponse, PackageState, StatusSnapshot};

use crate::render::{OutputStyle, WaitProgress};

pub(crate) struct ControlClient {
    socket: PathBuf,
}

impl ControlClient {
    pub(crate) fn new(socket: impl Into<PathBuf>) -> Self {
        Self {
            socket: socket.into(),
        }
    }

    /// Sends one request and returns the daemon's `result`. A daemon-side
    /// failure becomes an error carrying the daemon's message.
    pub(crate) fn send(&self, request: &ControlRequest) -> Result<Option<serde_json::Value>> {
        let mut stream = UnixStream::connect(&self.socket).with_context(|| {
            format!(
                "failed to connect to rollpack daemon at {}",
                self.socket.display()
            )
        })?;

        let mut payload =
            serde_json::to_string(request).context("failed to encode control request")?;
        payload.push('\n');
        stream
            .write_all(payload.as_bytes())
            .context("failed to send control request")?;

        let mut line = String::new();
        BufReader::new(stream)
            .read_line(&mut line)
            .context("failed to read control response")?;
        if line.trim().is_empty() {
            return Err(anyhow!("daemon closed the connection without a response"));
        }

        let response: ControlResponse =
            serde_json::from_str(line.trim()).context("failed to decode control response")?;
        if response.ok {
            Ok(response.result)
        } else {
            Err(anyhow!(response
                .error
                .unwrap_or_else(|| format!("{} failed", request.name()))))
        }
    }

    pub(crate) fn status(&self) -> Result<StatusSnapshot> {
        let result = self
            .send(&ControlRequest::Status)?
            .ok_or_else(|| anyhow!("daemon returned an empty status"))?;
        serde_json::from_value(result).context("failed to decode status payload")
    }

    /// Polls status until the experiment runs. Fails as soon as it was rolled
    /// back or replaced.
    pub(crate) fn wait_for_experiment(
        &self,
        package: &str,
        version: &str,
        timeout: Duration,
        style: OutputStyle,
    ) -> Result<()> {
        let deadline = Instant::now()
            .checked_add(timeout)
            .ok_or_else(|| anyhow!("wait timeout {timeout:?} is out of range"))?;
        let progress = WaitProgress::start(style, &format!("{package} {version}"));
        loop {
            let status = match self.status() {
                Ok(status) => status,
                Err(err) => {
                    progress.finish_abandon();
                    return Err(err);
                }
            };
            let Some(current) = status.package(package) else {
                progress.finish_abandon();
                return Err(anyhow!("package '{package}' is no longer installed"));
            };

            if current.experiment != version {
                progress.finish_abandon();
                let reason = current
                    .last_error
                    .clone()
                    .unwrap_or_else(|| "experiment was stopped or replaced".to_string());
                return Err(anyhow!(
                    "experiment {version} for '{package}' is no longer active: {reason}"
                ));
            }
            if current.state == PackageState::ExperimentRunning {
                progress.finish_success();
                return Ok(());
            }
            if Instant::now() >= deadline {
                progress.finish_abandon();
                return Err(anyhow!(
                    "timed out after {}s waiting for experiment {version} of '{package}' (state: {})",
                    timeout.as_secs(),
                    current.state
                ));
            }

            progress.set_state(current.state);
            thread::sleep(Duration::from_millis(500));
        }
    }
}

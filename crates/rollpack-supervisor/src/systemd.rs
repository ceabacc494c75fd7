use std::process::Command;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{anyhow, Context, Result};
use tracing::{debug, warn};

use crate::{ServiceSupervisor, SupervisorError, UnitState, DEFAULT_STOP_TIMEOUT};

/// Slack added on top of a unit's own stop timeout before the adapter sends
/// SIGKILL itself.
const STOP_MARGIN: Duration = Duration::from_secs(5);
const KILL_WAIT: Duration = Duration::from_secs(10);
/// How long `start_unit` waits for systemd to pick up the queued start job.
const START_SETTLE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SystemctlOutput {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
}

pub trait SystemctlRunner: Send + Sync {
    fn run(&self, args: &[&str]) -> Result<SystemctlOutput>;
}

#[derive(Debug, Clone, Default)]
pub struct ProcessRunner;

impl SystemctlRunner for ProcessRunner {
    fn run(&self, args: &[&str]) -> Result<SystemctlOutput> {
        let output = Command::new("systemctl")
            .args(args)
            .output()
            .with_context(|| format!("systemctl {}: command failed to start", args.join(" ")))?;
        Ok(SystemctlOutput {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        })
    }
}

pub struct SystemdSupervisor {
    runner: Box<dyn SystemctlRunner>,
    poll_interval: Duration,
    start_settle: Duration,
    stop_margin: Duration,
    kill_wait: Duration,
}

impl SystemdSupervisor {
    pub fn new() -> Self {
        Self::with_runner(Box::new(ProcessRunner))
    }

    pub fn with_runner(runner: Box<dyn SystemctlRunner>) -> Self {
        Self {
            runner,
            poll_interval: Duration::from_millis(250),
            start_settle: START_SETTLE,
            stop_margin: STOP_MARGIN,
            kill_wait: KILL_WAIT,
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_start_settle(mut self, start_settle: Duration) -> Self {
        self.start_settle = start_settle;
        self
    }

    pub fn with_escalation(mut self, stop_margin: Duration, kill_wait: Duration) -> Self {
        self.stop_margin = stop_margin;
        self.kill_wait = kill_wait;
        self
    }

    fn systemctl(&self, unit: &str, args: &[&str]) -> Result<String, SupervisorError> {
        let output = self
            .runner
            .run(args)
            .map_err(|err| SupervisorError::command(unit, err))?;
        if !output.success {
            return Err(SupervisorError::command(
                unit,
                anyhow!(
                    "systemctl {} failed: stdout='{}' stderr='{}'",
                    args.join(" "),
                    output.stdout.trim(),
                    output.stderr.trim()
                ),
            ));
        }
        Ok(output.stdout)
    }

    fn show(&self, unit: &str, properties: &str) -> Result<Vec<(String, String)>, SupervisorError> {
        let property_arg = format!("--property={properties}");
        let stdout = self.systemctl(unit, &["show", &property_arg, unit])?;
        Ok(stdout
            .lines()
            .filter_map(|line| line.split_once('='))
            .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
            .collect())
    }

    /// `None` waits as long as the unit takes.
    fn wait_until_stopped(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<bool, SupervisorError> {
        let deadline = timeout.and_then(|timeout| Instant::now().checked_add(timeout));
        loop {
            if self.unit_state(name)?.is_stopped() {
                return Ok(true);
            }
            let now = Instant::now();
            let pause = match deadline {
                Some(deadline) if now >= deadline => return Ok(false),
                Some(deadline) => self.poll_interval.min(deadline - now),
                None => self.poll_interval,
            };
            thread::sleep(pause);
        }
    }
}

impl Default for SystemdSupervisor {
    fn default() -> Self {
        Self::new()
    }
}

impl ServiceSupervisor for SystemdSupervisor {
    fn start_unit(&self, name: &str) -> Result<(), SupervisorError> {
        debug!(unit = name, "systemctl start");
        self.systemctl(name, &["start", "--no-block", name])?;

        let deadline = Instant::now()
            .checked_add(self.start_settle)
            .unwrap_or_else(Instant::now);
        while Instant::now() < deadline {
            if !self.unit_state(name)?.is_stopped() {
                break;
            }
            thread::sleep(self.poll_interval);
        }
        Ok(())
    }

    fn stop_unit(&self, name: &str) -> Result<(), SupervisorError> {
        let stop_timeout = self.stop_timeout(name)?;
        debug!(unit = name, timeout = ?stop_timeout, "systemctl stop");
        self.systemctl(name, &["stop", "--no-block", name])?;
        let Some(stop_timeout) = stop_timeout else {
            // TimeoutStopUSec=infinity: the unit never escalates, so neither do we.
            self.wait_until_stopped(name, None)?;
            return Ok(());
        };
        let bound = stop_timeout.saturating_add(self.stop_margin);
        if self.wait_until_stopped(name, Some(bound))? {
            return Ok(());
        }

        warn!(unit = name, timeout = ?stop_timeout, "unit did not stop in time, sending SIGKILL");
        self.systemctl(name, &["kill", "--signal=SIGKILL", name])?;
        if self.wait_until_stopped(name, Some(self.kill_wait))? {
            return Ok(());
        }
        Err(SupervisorError::Command {
            unit: name.to_string(),
            detail: "unit still running after SIGKILL".to_string(),
        })
    }

    fn unit_state(&self, name: &str) -> Result<UnitState, SupervisorError> {
        let properties = self.show(name, "LoadState,ActiveState")?;
        let lookup = |key: &str| {
            properties
                .iter()
                .find(|(k, _)| k == key)
                .map(|(_, v)| v.as_str())
        };

        if lookup("LoadState") == Some("not-found") {
            return Err(SupervisorError::UnknownUnit(name.to_string()));
        }
        Ok(lookup("ActiveState")
            .map(UnitState::from_active_state)
            .unwrap_or(UnitState::Unknown))
    }

    fn stop_timeout(&self, name: &str) -> Result<Option<Duration>, SupervisorError> {
        let properties = self.show(name, "TimeoutStopUSec")?;
        let Some((_, raw)) = properties.iter().find(|(k, _)| k == "TimeoutStopUSec") else {
            return Ok(Some(DEFAULT_STOP_TIMEOUT));
        };
        if raw.trim() == "infinity" {
            return Ok(None);
        }
        Ok(Some(parse_timespan(raw).unwrap_or(DEFAULT_STOP_TIMEOUT)))
    }

    fn poll_interval(&self) -> Duration {
        self.poll_interval
    }
}

/// Parses systemd's human timespan format (`1min 30s`, `90s`, `500ms`).
/// `infinity` and values beyond `Duration`'s range yield `None`.
pub fn parse_timespan(raw: &str) -> Option<Duration> {
    let raw = raw.trim();
    if raw.is_empty() || raw == "infinity" {
        return None;
    }

    let mut total = Duration::ZERO;
    for token in raw.split_whitespace() {
        let split = token
            .find(|ch: char| !ch.is_ascii_digit() && ch != '.')
            .unwrap_or(token.len());
        let (number, unit) = token.split_at(split);
        let value: f64 = number.parse().ok()?;
        let seconds = match unit {
            "us" | "usec" => value / 1_000_000.0,
            "ms" | "msec" => value / 1_000.0,
            "" | "s" | "sec" => value,
            "m" | "min" => value * 60.0,
            "h" | "hr" => value * 3_600.0,
            "d" => value * 86_400.0,
            _ => return None,
        };
        total = total.checked_add(Duration::try_from_secs_f64(seconds).ok()?)?;
    }
    Some(total)
}

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rollpack_core::{validate_package_name, UnitSet};
use rollpack_installer::default_install_root;
use rollpack_orchestrator::{OrchestratorConfig, PackageConfig, RetentionPolicy, MAX_TIMEOUT};
use serde::Deserialize;

pub(crate) const DEFAULT_CONFIG_PATH: &str = "/etc/rollpack/rollpack.toml";
pub(crate) const DEFAULT_SOCKET_PATH: &str = "/var/run/rollpack/installer.sock";

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct DaemonConfig {
    #[serde(default = "default_install_root")]
    pub(crate) root: PathBuf,
    #[serde(default = "default_socket_path")]
    pub(crate) socket: PathBuf,
    /// Catalog loaded at startup, before the socket accepts requests.
    #[serde(default)]
    pub(crate) catalog: Option<PathBuf>,
    #[serde(default)]
    pub(crate) catalog_public_key: Option<String>,
    #[serde(default = "default_job_timeout_secs")]
    pub(crate) job_timeout_secs: u64,
    #[serde(default = "default_poll_interval_ms")]
    pub(crate) poll_interval_ms: u64,
    #[serde(default = "default_readiness_timeout_secs")]
    pub(crate) readiness_timeout_secs: u64,
    #[serde(default)]
    pub(crate) retention: RetentionPolicy,
    #[serde(default)]
    pub(crate) packages: BTreeMap<String, PackageSection>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct PackageSection {
    /// Defaults to the package name.
    #[serde(default)]
    pub(crate) core: Option<String>,
    #[serde(default)]
    pub(crate) dependents: Vec<String>,
    #[serde(default)]
    pub(crate) requires: Vec<String>,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            root: default_install_root(),
            socket: default_socket_path(),
            catalog: None,
            catalog_public_key: None,
            job_timeout_secs: default_job_timeout_secs(),
            poll_interval_ms: default_poll_interval_ms(),
            readiness_timeout_secs: default_readiness_timeout_secs(),
            retention: RetentionPolicy::default(),
            packages: BTreeMap::new(),
        }
    }
}

impl DaemonConfig {
    /// A missing file yields the defaults.
    pub(crate) fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed reading daemon config: {}", path.display()))?;
        Self::parse(&content)
            .with_context(|| format!("failed parsing daemon config: {}", path.display()))
    }

    pub(crate) fn parse(content: &str) -> Result<Self> {
        let config: Self = toml::from_str(content).context("invalid daemon config")?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            return Err(anyhow!("poll_interval_ms must be greater than zero"));
        }
        let max_secs = MAX_TIMEOUT.as_secs();
        for (key, value) in [
            ("job_timeout_secs", self.job_timeout_secs),
            ("readiness_timeout_secs", self.readiness_timeout_secs),
        ] {
            if value > max_secs {
                return Err(anyhow!("{key} must be at most {max_secs}, got {value}"));
            }
        }
        for (name, section) in &self.packages {
            validate_package_name(name)
                .with_context(|| format!("invalid [packages.{name}] section"))?;
            for requirement in &section.requires {
                validate_package_name(requirement).with_context(|| {
                    format!("invalid requirement '{requirement}' for package '{name}'")
                })?;
                if requirement == name {
                    return Err(anyhow!("package '{name}' cannot require itself"));
                }
            }
        }
        Ok(())
    }

    pub(crate) fn orchestrator_config(&self) -> OrchestratorConfig {
        let packages = self
            .packages
            .iter()
            .map(|(name, section)| {
                let units = UnitSet {
                    core: section.core.clone().unwrap_or_else(|| name.clone()),
                    dependents: section.dependents.clone(),
                };
                let config = PackageConfig {
                    units,
                    requires: section.requires.clone(),
                };
                (name.clone(), config)
            })
            .collect();

        OrchestratorConfig {
            job_timeout: Duration::from_secs(self.job_timeout_secs),
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
            retention: self.retention,
            packages,
            catalog_public_key: self.catalog_public_key.clone(),
            spawn_watchers: true,
        }
    }
}

fn default_socket_path() -> PathBuf {
    PathBuf::from(DEFAULT_SOCKET_PATH)
}

fn default_job_timeout_secs() -> u64 {
    30 * 60
}

fn default_poll_interval_ms() -> u64 {
    1_000
}

fn default_readiness_timeout_secs() -> u64 {
    30
}

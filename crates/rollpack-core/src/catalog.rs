use std::collections::BTreeMap;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::{validate_package_name, validate_version};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogEntry {
    pub package: String,
    pub version: String,
    pub url: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
}

/// Wire shape of a catalog: `{"packages": [{"package", "version", "url"}, ...]}`.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CatalogPayload {
    #[serde(default)]
    pub packages: Vec<CatalogEntry>,
}

/// Installable (package, version, source) tuples known to the orchestrator.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Catalog {
    entries: BTreeMap<String, BTreeMap<String, CatalogEntry>>,
}

impl Catalog {
    pub fn from_json_str(input: &str) -> Result<Self> {
        let payload: CatalogPayload =
            serde_json::from_str(input).context("failed to parse catalog payload")?;
        Self::from_payload(payload)
    }

    pub fn from_payload(payload: CatalogPayload) -> Result<Self> {
        let mut entries: BTreeMap<String, BTreeMap<String, CatalogEntry>> = BTreeMap::new();
        for entry in payload.packages {
            validate_package_name(&entry.package)?;
            validate_version(&entry.version)
                .with_context(|| format!("invalid catalog entry for '{}'", entry.package))?;
            if entry.url.trim().is_empty() {
                anyhow::bail!(
                    "catalog entry '{}@{}' has an empty url",
                    entry.package,
                    entry.version
                );
            }

            let versions = entries.entry(entry.package.clone()).or_default();
            if versions.contains_key(&entry.version) {
                anyhow::bail!(
                    "duplicate catalog entry '{}@{}'",
                    entry.package,
                    entry.version
                );
            }
            versions.insert(entry.version.clone(), entry);
        }

        Ok(Self { entries })
    }

    pub fn lookup(&self, package: &str, version: &str) -> Option<&CatalogEntry> {
        self.entries.get(package)?.get(version)
    }

    pub fn versions(&self, package: &str) -> Vec<&str> {
        self.entries
            .get(package)
            .map(|versions| versions.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn packages(&self) -> impl Iterator<Item = &str> {
        self.entries.keys().map(String::as_str)
    }
}

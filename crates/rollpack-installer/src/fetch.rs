use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use rollpack_security::verify_sha256_file;
use tracing::debug;

use crate::fs_utils::{copy_dir_recursive, dir_is_empty};

const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum ArtifactSource {
    Http(String),
    Local(PathBuf),
}

impl ArtifactSource {
    pub(crate) fn parse(url: &str) -> Result<Self> {
        let trimmed = url.trim();
        let lower = trimmed.to_ascii_lowercase();
        if lower.starts_with("http://") || lower.starts_with("https://") {
            return Ok(Self::Http(trimmed.to_string()));
        }
        if let Some(path) = trimmed.strip_prefix("file://") {
            return Ok(Self::Local(PathBuf::from(path)));
        }
        if lower.contains("://") {
            return Err(anyhow!("unsupported artifact url scheme: {trimmed}"));
        }
        Ok(Self::Local(PathBuf::from(trimmed)))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ArchiveKind {
    Tar,
    TarGz,
}

impl ArchiveKind {
    pub(crate) fn infer(name: &str) -> Option<Self> {
        let without_query = name.split(['?', '#']).next().unwrap_or(name);
        let lower = without_query.to_ascii_lowercase();
        if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            return Some(Self::TarGz);
        }
        if lower.ends_with(".tar") {
            return Some(Self::Tar);
        }
        None
    }
}

/// Materialises the artifact at `url` as a populated `payload_dir`.
/// `scratch_dir` holds downloads and is discarded by the caller.
pub(crate) fn fetch_payload(
    url: &str,
    sha256: Option<&str>,
    scratch_dir: &Path,
    payload_dir: &Path,
) -> Result<()> {
    let source = ArtifactSource::parse(url)?;
    let (artifact_path, name_hint) = match source {
        ArtifactSource::Http(url) => {
            let kind = ArchiveKind::infer(&url)
                .ok_or_else(|| anyhow!("unsupported artifact format for {url}"))?;
            let file_name = match kind {
                ArchiveKind::Tar => "artifact.tar",
                ArchiveKind::TarGz => "artifact.tar.gz",
            };
            let path = scratch_dir.join(file_name);
            download_artifact(&url, &path)?;
            (path, file_name.to_string())
        }
        ArtifactSource::Local(path) => {
            if path.is_dir() {
                if sha256.is_some() {
                    return Err(anyhow!(
                        "sha256 pinning requires an archive source, got directory {}",
                        path.display()
                    ));
                }
                copy_dir_recursive(&path, payload_dir)?;
                return ensure_populated(payload_dir);
            }
            if !path.is_file() {
                return Err(anyhow!("artifact source does not exist: {}", path.display()));
            }
            let name = path
                .file_name()
                .and_then(|value| value.to_str())
                .unwrap_or_default()
                .to_string();
            (path, name)
        }
    };

    if let Some(expected) = sha256 {
        if !verify_sha256_file(&artifact_path, expected)? {
            return Err(anyhow!(
                "sha256 mismatch for {}: expected {expected}",
                artifact_path.display()
            ));
        }
    }

    let kind = ArchiveKind::infer(&name_hint)
        .ok_or_else(|| anyhow!("unsupported artifact format: {name_hint}"))?;
    fs::create_dir_all(payload_dir)
        .with_context(|| format!("failed to create {}", payload_dir.display()))?;
    extract_archive(&artifact_path, payload_dir, kind)?;
    ensure_populated(payload_dir)
}

fn ensure_populated(payload_dir: &Path) -> Result<()> {
    if dir_is_empty(payload_dir)? {
        return Err(anyhow!(
            "artifact produced no files in {}",
            payload_dir.display()
        ));
    }
    Ok(())
}

fn download_artifact(url: &str, out_path: &Path) -> Result<()> {
    debug!(url, path = %out_path.display(), "downloading artifact");
    let client = reqwest::blocking::Client::builder()
        .timeout(DOWNLOAD_TIMEOUT)
        .build()
        .context("failed to build http client")?;
    let mut response = client
        .get(url)
        .send()
        .with_context(|| format!("request to {url} failed"))?
        .error_for_status()
        .with_context(|| format!("download of {url} was rejected"))?;

    let part_path = out_path.with_extension("part");
    let mut file = fs::File::create(&part_path)
        .with_context(|| format!("failed to create {}", part_path.display()))?;
    io::copy(&mut response, &mut file)
        .with_context(|| format!("failed to stream {url} to {}", part_path.display()))?;
    file.flush()
        .with_context(|| format!("failed to flush {}", part_path.display()))?;
    fs::rename(&part_path, out_path).with_context(|| {
        format!(
            "failed to move downloaded artifact into place: {}",
            out_path.display()
        )
    })?;
    Ok(())
}

fn extract_archive(archive_path: &Path, dst: &Path, kind: ArchiveKind) -> Result<()> {
    let mut command = Command::new("tar");
    match kind {
        ArchiveKind::Tar => command.arg("-xf"),
        ArchiveKind::TarGz => command.arg("-xzf"),
    };
    command.arg(archive_path).arg("-C").arg(dst);
    run_command(&mut command, "failed to extract tar archive")
}

fn run_command(command: &mut Command, context_message: &str) -> Result<()> {
    let output = command
        .output()
        .with_context(|| format!("{context_message}: command failed to start"))?;
    if output.status.success() {
        return Ok(());
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let stdout = String::from_utf8_lossy(&output.stdout);
    Err(anyhow!(
        "{context_message}: status={} stdout='{}' stderr='{}'",
        output.status,
        stdout.trim(),
        stderr.trim()
    ))
}

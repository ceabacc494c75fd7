use anyhow::Result;

pub fn validate_package_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > 64 {
        anyhow::bail!("invalid package name: must be 1-64 characters");
    }

    let mut chars = name.chars();
    let Some(first) = chars.next() else {
        anyhow::bail!("invalid package name: must not be empty");
    };
    if !first.is_ascii_lowercase() && !first.is_ascii_digit() {
        anyhow::bail!("invalid package name '{name}': must start with a lowercase letter or digit");
    }
    if chars.any(|ch| !(ch.is_ascii_lowercase() || ch.is_ascii_digit() || ch == '-' || ch == '_')) {
        anyhow::bail!(
            "invalid package name '{name}': only lowercase letters, digits, '-' and '_' are allowed"
        );
    }

    Ok(())
}

/// Versions are opaque, but they name a directory next to the `stable` and
/// `experiment` links, so they must be a single safe path component.
pub fn validate_version(version: &str) -> Result<()> {
    if version.is_empty() || version.len() > 128 {
        anyhow::bail!("invalid version: must be 1-128 characters");
    }
    if matches!(version, "." | ".." | "stable" | "experiment") || version.starts_with('.') {
        anyhow::bail!("invalid version '{version}': reserved name");
    }
    if version
        .chars()
        .any(|ch| !(ch.is_ascii_alphanumeric() || matches!(ch, '.' | '-' | '_' | '+' | '~')))
    {
        anyhow::bail!("invalid version '{version}': contains unsupported character(s)");
    }

    Ok(())
}

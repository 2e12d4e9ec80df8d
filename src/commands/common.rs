//! Common helper functions shared across commands.

use std::env;
use std::io::Read;
use std::path::{
    Path,
    PathBuf,
};

use anyhow::{
    Context,
    Result,
};
use serde::Serialize;
use serde::de::DeserializeOwned;

/// Changes into a directory and changes back when dropped, on success and
/// error paths alike.
#[derive(Debug)]
pub struct WorkingDirGuard {
    previous: PathBuf,
}

impl WorkingDirGuard {
    /// Change into `dir` unless it already is the current directory.
    ///
    /// Returns `None` when no change was needed.
    #[allow(clippy::disallowed_methods)] // CLI tool needs direct cwd access
    pub fn enter(dir: &Path) -> Result<Option<Self>> {
        let previous = env::current_dir().context("Failed to read current directory")?;
        let target = dir
            .canonicalize()
            .with_context(|| format!("Repository root {} does not exist", dir.display()))?;

        if previous.canonicalize().ok().as_deref() == Some(target.as_path()) {
            return Ok(None);
        }

        env::set_current_dir(&target)
            .with_context(|| format!("Failed to change into {}", target.display()))?;
        Ok(Some(Self { previous }))
    }
}

impl Drop for WorkingDirGuard {
    #[allow(clippy::disallowed_methods)] // CLI tool needs direct cwd access
    fn drop(&mut self) {
        let _ = env::set_current_dir(&self.previous);
    }
}

/// Read and deserialize a JSON document; `-` reads stdin.
pub fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = if path == Path::new("-") {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read stdin")?;
        buf
    } else {
        std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read {}", path.display()))?
    };

    serde_json::from_str(&content).with_context(|| format!("Failed to parse {}", path.display()))
}

/// Serialize `value` as pretty JSON and overwrite `path`, creating its parent
/// directory if needed.
pub fn write_json<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let mut json = serde_json::to_string_pretty(value)
        .with_context(|| format!("Failed to serialize {}", path.display()))?;
    json.push('\n');
    if let Some(parent) = path.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    std::fs::write(path, json).with_context(|| format!("Failed to write {}", path.display()))
}

/// Parse a numeric version triple (e.g., "1.2.3" or "v1.2.3").
///
/// Anything after the patch number (a pre-release or a fourth component) is
/// ignored.
pub fn parse_version(version_str: &str) -> Result<(u32, u32, u32)> {
    let trimmed = version_str.trim();
    let trimmed = trimmed
        .strip_prefix('v')
        .or_else(|| trimmed.strip_prefix('V'))
        .unwrap_or(trimmed);

    let parts: Vec<&str> = trimmed.split('.').collect();
    if parts.len() < 3 {
        anyhow::bail!(
            "Version must have at least 3 parts (major.minor.patch), got: {}",
            version_str
        );
    }

    let major = parts[0]
        .parse::<u32>()
        .with_context(|| format!("Invalid major version: {}", parts[0]))?;
    let minor = parts[1]
        .parse::<u32>()
        .with_context(|| format!("Invalid minor version: {}", parts[1]))?;
    let patch_part = parts[2].split(['-', '+']).next().unwrap_or(parts[2]);
    let patch = patch_part
        .parse::<u32>()
        .with_context(|| format!("Invalid patch version: {}", parts[2]))?;

    Ok((major, minor, patch))
}

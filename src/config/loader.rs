// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use crate::config::model::{ConfigFile, Overrides, RawConfigFile};
use crate::errors::{ProgressiveError, Result};

/// Load an experiment file and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path).map_err(|e| {
        ProgressiveError::config(format!("cannot read experiment file {path:?}: {e}"))
    })?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load, apply command-line overrides and validate.
///
/// This is the recommended entry point for the rest of the application:
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` default functions).
/// - Resolves relative paths against the file's directory.
/// - Applies `overrides`.
/// - Validates into a [`ConfigFile`].
pub fn load_and_validate(path: impl AsRef<Path>, overrides: &Overrides) -> Result<ConfigFile> {
    let path = path.as_ref();
    let mut raw = load_from_path(path)?;
    raw.resolve_paths(&config_root_dir(path));
    raw.apply_overrides(overrides);
    ConfigFile::try_from(raw)
}

/// Directory relative paths in `config_path` are resolved against.
///
/// A bare file name (parent = "") resolves against the current directory.
pub fn config_root_dir(config_path: &Path) -> PathBuf {
    match config_path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
    }
}

/// Default experiment file: `Progressive.toml` in the current directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Progressive.toml")
}

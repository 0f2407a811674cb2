//! Config file discovery, loading, and the environment override.

use crate::{ConfigError, VocabConfig};
use std::env;
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit vocabulary file.
pub const VOCAB_ENV: &str = "TOKSCORE_VOCAB";

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were found, in precedence order. The last one is
    /// the document actually loaded; empty means the bundled default.
    pub files: Vec<PathBuf>,
    /// Environment variables that influenced loading
    pub env_overrides: Vec<String>,
}

impl ConfigSources {
    /// The file the effective config was read from, if any.
    pub fn effective_file(&self) -> Option<&Path> {
        self.files.last().map(PathBuf::as_path)
    }
}

/// Discover config files in standard locations.
///
/// Returns paths in precedence order (user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with an explicit override path.
///
/// If `explicit` is provided and exists, it replaces the local file.
pub fn discover_config_files_with_override(explicit: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("tokscore/vocab.toml");
        if user.exists() {
            files.push(user);
        }
    }

    if let Some(path) = explicit {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("tokscore.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// Read `TOKSCORE_VOCAB`, recording it in `sources` when set.
pub(crate) fn env_override(sources: &mut ConfigSources) -> Option<PathBuf> {
    let value = env::var(VOCAB_ENV).ok().filter(|v| !v.is_empty())?;
    sources.env_overrides.push(VOCAB_ENV.to_string());
    Some(expand_path(&value))
}

/// Load config from a TOML file.
pub fn load_from_file(path: &Path) -> Result<VocabConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    parse_toml(&contents, path)
}

/// Parse and validate config from a TOML string.
pub(crate) fn parse_toml(contents: &str, path: &Path) -> Result<VocabConfig, ConfigError> {
    let config: VocabConfig =
        toml::from_str(contents).map_err(|e: toml::de::Error| ConfigError::Parse {
            path: path.to_path_buf(),
            message: e.message().to_string(),
        })?;

    config.validate()?;
    Ok(config)
}

/// Expand a leading `~/` to the home directory.
pub fn expand_path(path: &str) -> PathBuf {
    match path.strip_prefix("~/") {
        Some(rest) => directories::BaseDirs::new()
            .map(|d| d.home_dir().join(rest))
            .unwrap_or_else(|| PathBuf::from(path)),
        None => PathBuf::from(path),
    }
}

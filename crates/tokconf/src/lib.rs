//! Vocabulary configuration for the tokscore MIDI codec.
//!
//! The vocabulary document is the contract between the process that
//! tokenizes MIDI and the process that turns tokens back into MIDI. Both
//! sides must load the same document.
//!
//! # Usage
//!
//! ```rust,no_run
//! use tokconf::VocabConfig;
//!
//! let config = VocabConfig::load().expect("Failed to load vocabulary config");
//! println!("time resolution: {} ms", config.time.resolution_ms);
//! ```
//!
//! # Config File Locations
//!
//! The last file found wins as a whole; documents are never merged field
//! by field. An explicit path replaces the local file.
//!
//! 1. Bundled `config/vocab.toml` (compiled in)
//! 2. `~/.config/tokscore/vocab.toml` (user)
//! 3. `./tokscore.toml` (local)
//! 4. Path given explicitly, or in `TOKSCORE_VOCAB`
//!
//! An explicit path or `TOKSCORE_VOCAB` naming a missing file fails with
//! [`ConfigError::NotFound`].
//!
//! # Example Config
//!
//! ```toml
//! version = 1
//! name = "piano-only"
//!
//! [time]
//! resolution_ms = 10
//! max_shift_ms = 5000
//!
//! [velocity]
//! min = 1
//! max = 127
//! buckets = 13
//!
//! [pitch]
//! min = 21
//! max = 108
//!
//! [instrument]
//! channels = 1
//! programs = [0]
//! ```

pub mod loader;
pub mod sections;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};
pub use sections::{
    DecodeConfig, DecodePolicy, InstrumentConfig, OverlapPolicy, PitchConfig, TempoConfig,
    TimeConfig, VelocityConfig,
};

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Schema version this crate understands.
pub const SCHEMA_VERSION: u32 = 1;

/// The vocabulary document shipped with the crate.
pub const BUNDLED_VOCAB: &str = include_str!("../config/vocab.toml");

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse {
        path: PathBuf,
        message: String,
    },

    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: String,
    },

    #[error("Config file {path} does not exist")]
    NotFound { path: PathBuf },

    #[error(
        "Unsupported vocabulary schema version {0} (expected {expected})",
        expected = SCHEMA_VERSION
    )]
    UnsupportedVersion(u32),

    #[error("Failed to serialize config: {0}")]
    Serialize(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

/// Complete vocabulary configuration document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VocabConfig {
    /// Schema version of the document itself.
    pub version: u32,

    /// Human-readable identifier, folded into the vocabulary fingerprint.
    #[serde(default = "VocabConfig::default_name")]
    pub name: String,

    pub time: TimeConfig,
    pub velocity: VelocityConfig,
    pub pitch: PitchConfig,

    #[serde(default)]
    pub instrument: InstrumentConfig,

    #[serde(default)]
    pub tempo: TempoConfig,

    #[serde(default)]
    pub decode: DecodeConfig,
}

impl VocabConfig {
    fn default_name() -> String {
        "unnamed".to_string()
    }

    /// The compiled-in default vocabulary.
    pub fn bundled() -> Result<Self, ConfigError> {
        loader::parse_toml(BUNDLED_VOCAB, Path::new("<bundled>"))
    }

    /// Parse and validate a document held in memory.
    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        loader::parse_toml(contents, Path::new("<inline>"))
    }

    /// Load and validate a document from disk.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        loader::load_from_file(path)
    }

    /// Load configuration from the standard locations.
    ///
    /// Falls back to the bundled document when no file is found.
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration, preferring `config_path` over every other location.
    ///
    /// A path that does not exist is an error, never a fallback.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and report where it came from.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from an optional path and report where it came from.
    pub fn load_with_sources_from(
        config_path: Option<&Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let override_path = loader::env_override(&mut sources);
        let explicit = config_path.map(Path::to_path_buf).or(override_path);
        if let Some(path) = explicit.as_deref() {
            if !path.is_file() {
                return Err(ConfigError::NotFound {
                    path: path.to_path_buf(),
                });
            }
        }

        let files = discover_config_files_with_override(explicit.as_deref());
        let config = match files.last() {
            Some(path) => loader::load_from_file(path)?,
            None => Self::bundled()?,
        };
        sources.files = files;

        Ok((config, sources))
    }

    /// Check every range constraint of the schema.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SCHEMA_VERSION {
            return Err(ConfigError::UnsupportedVersion(self.version));
        }
        self.time.validate()?;
        self.velocity.validate()?;
        self.pitch.validate()?;
        self.instrument.validate()?;
        self.tempo.validate()?;
        Ok(())
    }

    /// Serialize back to a TOML document.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        let body =
            toml::to_string_pretty(self).map_err(|e| ConfigError::Serialize(e.to_string()))?;
        Ok(format!("# tokscore vocabulary ({})\n\n{body}", self.name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loader::VOCAB_ENV;
    use serial_test::serial;
    use std::env;
    use std::io::Write;

    #[test]
    fn test_bundled_config() {
        let config = VocabConfig::bundled().unwrap();
        assert_eq!(config.version, SCHEMA_VERSION);
        assert_eq!(config.time.resolution_ms, 10);
        assert_eq!(config.time.max_shift_ms, 5000);
        assert_eq!(config.instrument.programs.len(), 128);
        assert_eq!(config.decode.policy, DecodePolicy::Strict);
        assert_eq!(config.decode.overlap, OverlapPolicy::EarliestFirst);
    }

    #[test]
    fn test_to_toml_round_trip() {
        let config = VocabConfig::bundled().unwrap();
        let toml = config.to_toml().unwrap();
        assert!(toml.contains("[time]"));
        assert!(toml.contains("[velocity]"));
        let reparsed = VocabConfig::from_toml_str(&toml).unwrap();
        assert_eq!(reparsed, config);
    }

    #[test]
    fn test_unsupported_version() {
        let mut config = VocabConfig::bundled().unwrap();
        config.version = 2;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnsupportedVersion(2))
        ));
    }

    #[test]
    fn test_unsupported_version_message() {
        assert_eq!(
            ConfigError::UnsupportedVersion(2).to_string(),
            "Unsupported vocabulary schema version 2 (expected 1)"
        );
    }

    #[test]
    #[serial]
    fn test_missing_explicit_path_is_an_error() {
        env::remove_var(VOCAB_ENV);
        let missing = Path::new("/nonexistent/typo-vocab.toml");
        let err = VocabConfig::load_from(Some(missing)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { ref path } if path == missing));

        let err = VocabConfig::load_with_sources_from(Some(missing)).unwrap_err();
        assert!(matches!(err, ConfigError::NotFound { .. }));
    }

    #[test]
    #[serial]
    fn test_env_override_loads_named_file() {
        let mut config = VocabConfig::bundled().unwrap();
        config.name = "from-env".to_string();
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(config.to_toml().unwrap().as_bytes()).unwrap();

        env::set_var(VOCAB_ENV, file.path());
        let result = VocabConfig::load_with_sources();
        env::remove_var(VOCAB_ENV);

        let (loaded, sources) = result.unwrap();
        assert_eq!(loaded.name, "from-env");
        assert_eq!(sources.env_overrides, vec![VOCAB_ENV.to_string()]);
        assert_eq!(sources.effective_file(), Some(file.path()));
    }

    #[test]
    #[serial]
    fn test_env_override_missing_file_is_an_error() {
        env::set_var(VOCAB_ENV, "/nonexistent/tokscore/typo-vocab.toml");
        let result = VocabConfig::load();
        env::remove_var(VOCAB_ENV);

        match result {
            Err(ConfigError::NotFound { path }) => {
                assert_eq!(path, PathBuf::from("/nonexistent/tokscore/typo-vocab.toml"));
            }
            other => panic!("expected NotFound, got {other:?}"),
        }
    }

    #[test]
    #[serial]
    fn test_explicit_path_beats_env_override() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(BUNDLED_VOCAB.as_bytes()).unwrap();

        env::set_var(VOCAB_ENV, "/nonexistent/tokscore/typo-vocab.toml");
        let result = VocabConfig::load_from(Some(file.path()));
        env::remove_var(VOCAB_ENV);

        assert_eq!(result.unwrap(), VocabConfig::bundled().unwrap());
    }

    #[test]
    #[serial]
    fn test_load_discovers_standard_locations() {
        env::remove_var(VOCAB_ENV);
        let (config, sources) = VocabConfig::load_with_sources().unwrap();
        assert!(sources.env_overrides.is_empty());
        match sources.effective_file() {
            Some(path) => assert_eq!(config, VocabConfig::load_from_file(path).unwrap()),
            None => assert_eq!(config, VocabConfig::bundled().unwrap()),
        }
    }
}

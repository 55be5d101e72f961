//! Configuration file loading for feedwatch.
//!
//! The config is TOML, located through an ordered list of candidate paths
//! (first existing path wins). Credential rules are declared as an ordered
//! `[[credential]]` array of tables; the resolver's last-match-wins rule
//! depends on that declaration order surviving the load, which a `Vec`
//! guarantees.

use crate::creds::CredentialRule;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use thiserror::Error;

// ============================================================================
// Error Types
// ============================================================================

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Could not find a configuration file (searched: {0})")]
    NotFound(String),

    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid TOML in config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Config file too large: {0}")]
    TooLarge(String),
}

// ============================================================================
// Configuration Structs
// ============================================================================

/// Top-level application configuration.
///
/// All fields use `#[serde(default)]` so any subset of keys can be
/// specified. Missing keys fall back to `Default::default()`.
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Seconds between poll cycles. 0 disables scheduling.
    pub interval_seconds: u64,

    /// Default start date for `watch` without an explicit `--date`.
    /// Parsed lazily by the watch command.
    pub start_date: String,

    /// Database location. Defaults to `feedwatch.db` next to the config file.
    pub database_path: Option<PathBuf>,

    /// Ordered credential rules; later rules override earlier ones.
    #[serde(rename = "credential")]
    pub credentials: Vec<CredentialRule>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            interval_seconds: 300,
            start_date: "2017-01-01".to_string(),
            database_path: None,
            credentials: Vec::new(),
        }
    }
}

impl Config {
    /// Maximum config file size (1 MB).
    const MAX_FILE_SIZE: u64 = 1_048_576;

    /// Ordered candidate paths for the configuration file.
    ///
    /// `FEEDWATCH_CONFIG_DIR` takes precedence, then the user config dir,
    /// a dotfile in the home directory, and finally the system location.
    pub fn candidate_paths() -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Ok(dir) = std::env::var("FEEDWATCH_CONFIG_DIR") {
            paths.push(PathBuf::from(dir).join("config.toml"));
        }
        if let Ok(home) = std::env::var("HOME") {
            let home = PathBuf::from(home);
            paths.push(home.join(".config").join("feedwatch").join("config.toml"));
            paths.push(home.join(".feedwatch.toml"));
        }
        paths.push(PathBuf::from("/etc/feedwatch/config.toml"));
        paths
    }

    /// Locate and load the configuration file: first existing candidate wins.
    ///
    /// A missing file is a configuration error here, unlike a missing key —
    /// running without credentials configured should be a deliberate act
    /// (an empty file), not an accident.
    pub fn discover() -> Result<(Self, PathBuf), ConfigError> {
        let candidates = Self::candidate_paths();
        let Some(path) = candidates.iter().find(|p| p.exists()) else {
            let searched = candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(ConfigError::NotFound(searched));
        };
        let config = Self::load(path)?;
        Ok((config, path.clone()))
    }

    /// Load configuration from a TOML file at an explicit path.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let meta = std::fs::metadata(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                ConfigError::NotFound(path.display().to_string())
            } else {
                ConfigError::Io(e)
            }
        })?;
        if meta.len() > Self::MAX_FILE_SIZE {
            return Err(ConfigError::TooLarge(format!(
                "Config file is {} bytes (max {} bytes)",
                meta.len(),
                Self::MAX_FILE_SIZE
            )));
        }

        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        tracing::info!(
            path = %path.display(),
            credential_rules = config.credentials.len(),
            "Loaded configuration"
        );
        Ok(config)
    }
}

//! Configuration loading
//!
//! Every value is resolved in priority order:
//! 1. Command-line argument (clap also folds in its `env` fallbacks)
//! 2. Environment variable
//! 3. TOML config file
//! 4. Compiled default
//!
//! A missing or malformed TOML file is never fatal: a warning is logged and
//! the compiled defaults apply.

use crate::time::millis_to_duration;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{info, warn};

/// Environment variable naming the database file
pub const DATABASE_ENV: &str = "TUNETREES_DATABASE";

/// Environment variable naming the HTTP bind address
pub const BIND_ENV: &str = "TUNETREES_BIND";

/// On-disk TOML configuration; every key is optional
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    pub database_path: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub log_level: Option<String>,
    pub default_delinquency_window_days: Option<i64>,
    pub session_state_debounce_ms: Option<u64>,
    pub scroll_restore_grace_ms: Option<u64>,
    pub request_timeout_ms: Option<u64>,
    pub refill_batch_size: Option<u32>,
}

impl TomlConfig {
    /// Parse TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML: {}", e)))
    }

    /// Load a config file, returning defaults if the file is absent or invalid
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            info!("No config file at {}, using defaults", path.display());
            return Self::default();
        }

        match std::fs::read_to_string(path) {
            Ok(content) => match Self::from_toml_str(&content) {
                Ok(config) => config,
                Err(e) => {
                    warn!("Ignoring config file {}: {}", path.display(), e);
                    Self::default()
                }
            },
            Err(e) => {
                warn!("Could not read config file {}: {}", path.display(), e);
                Self::default()
            }
        }
    }
}

/// Compiled-in fallbacks
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub log_level: String,
    pub default_delinquency_window_days: i64,
    pub session_state_debounce_ms: u64,
    pub scroll_restore_grace_ms: u64,
    pub request_timeout_ms: u64,
    pub refill_batch_size: u32,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        Self {
            database_path: default_data_dir().join("tunetrees.db"),
            bind_addr: "127.0.0.1:5780".to_string(),
            log_level: "info".to_string(),
            default_delinquency_window_days: 21,
            session_state_debounce_ms: 250,
            scroll_restore_grace_ms: 500,
            request_timeout_ms: 10_000,
            refill_batch_size: 5,
        }
    }
}

/// Values supplied on the command line (already merged with clap `env` fallbacks)
#[derive(Debug, Clone, Default)]
pub struct CliOverrides {
    pub database_path: Option<PathBuf>,
    pub bind_addr: Option<String>,
    pub config_file: Option<PathBuf>,
}

/// Fully resolved configuration used by the practice service
#[derive(Debug, Clone, PartialEq)]
pub struct PracticeConfig {
    pub database_path: PathBuf,
    pub bind_addr: String,
    pub log_level: String,
    /// Used when a user has no delinquency-window preference
    pub default_delinquency_window_days: i64,
    /// Coalescing window for view-state writes
    pub session_state_debounce: Duration,
    /// Scroll saves are ignored for this long after a programmatic restore
    pub scroll_restore_grace: Duration,
    /// Bound applied to every backend call
    pub request_timeout: Duration,
    pub refill_batch_size: u32,
}

impl Default for PracticeConfig {
    fn default() -> Self {
        Self::from_parts(TomlConfig::default(), CompiledDefaults::for_current_platform())
    }
}

impl PracticeConfig {
    fn from_parts(toml: TomlConfig, defaults: CompiledDefaults) -> Self {
        let window = match toml.default_delinquency_window_days {
            Some(days) if days >= 0 => days,
            Some(days) => {
                warn!("Negative default_delinquency_window_days ({}) ignored", days);
                defaults.default_delinquency_window_days
            }
            None => defaults.default_delinquency_window_days,
        };

        Self {
            database_path: toml.database_path.unwrap_or(defaults.database_path),
            bind_addr: toml.bind_addr.unwrap_or(defaults.bind_addr),
            log_level: toml.log_level.unwrap_or(defaults.log_level),
            default_delinquency_window_days: window,
            session_state_debounce: millis_to_duration(
                toml.session_state_debounce_ms
                    .unwrap_or(defaults.session_state_debounce_ms),
            ),
            scroll_restore_grace: millis_to_duration(
                toml.scroll_restore_grace_ms
                    .unwrap_or(defaults.scroll_restore_grace_ms),
            ),
            request_timeout: millis_to_duration(
                toml.request_timeout_ms.unwrap_or(defaults.request_timeout_ms),
            ),
            refill_batch_size: toml.refill_batch_size.unwrap_or(defaults.refill_batch_size),
        }
    }
}

/// Resolves a [`PracticeConfig`] from all configuration sources
pub struct ConfigResolver {
    cli: CliOverrides,
}

impl ConfigResolver {
    pub fn new(cli: CliOverrides) -> Self {
        Self { cli }
    }

    /// Resolve the configuration
    pub fn resolve(&self) -> PracticeConfig {
        let toml = match self.config_file_path() {
            Some(path) => TomlConfig::load_or_default(&path),
            None => TomlConfig::default(),
        };
        let mut config = PracticeConfig::from_parts(toml, CompiledDefaults::for_current_platform());

        // Priority 2: environment
        if let Ok(path) = std::env::var(DATABASE_ENV) {
            config.database_path = PathBuf::from(path);
        }
        if let Ok(addr) = std::env::var(BIND_ENV) {
            config.bind_addr = addr;
        }

        // Priority 1: command line
        if let Some(path) = &self.cli.database_path {
            config.database_path = path.clone();
        }
        if let Some(addr) = &self.cli.bind_addr {
            config.bind_addr = addr.clone();
        }

        config
    }

    fn config_file_path(&self) -> Option<PathBuf> {
        if let Some(path) = &self.cli.config_file {
            return Some(path.clone());
        }
        dirs::config_dir().map(|d| d.join("tunetrees").join("config.toml"))
    }
}

/// Get OS-dependent default data folder
fn default_data_dir() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("tunetrees"))
        .unwrap_or_else(|| PathBuf::from("./tunetrees_data"))
}

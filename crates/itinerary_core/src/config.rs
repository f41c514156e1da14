//! Core runtime configuration.
//!
//! # Responsibility
//! - Describe tunables for storage bootstrap, ordinal maintenance and logging.
//! - Load configuration from JSON with every field defaulted.
//!
//! # Invariants
//! - `reorder_offset` and `sentinel_offset` are strictly positive.
//! - `max_plan_attempts` is at least 1.

use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::path::Path;

/// Default temporary shift applied before a batch reorder rewrites ordinals.
pub const DEFAULT_REORDER_OFFSET: i64 = 1_000_000;
/// Default distance above the live range used to park a relocating entity.
pub const DEFAULT_SENTINEL_OFFSET: i64 = 1_000_000;

/// Errors raised while loading or validating configuration.
#[derive(Debug)]
pub enum ConfigError {
    Io(std::io::Error),
    Parse(serde_json::Error),
    Invalid(String),
}

impl Display for ConfigError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(err) => write!(f, "failed to read config: {err}"),
            Self::Parse(err) => write!(f, "failed to parse config: {err}"),
            Self::Invalid(message) => write!(f, "invalid config: {message}"),
        }
    }
}

impl Error for ConfigError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Io(err) => Some(err),
            Self::Parse(err) => Some(err),
            Self::Invalid(_) => None,
        }
    }
}

impl From<std::io::Error> for ConfigError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<serde_json::Error> for ConfigError {
    fn from(value: serde_json::Error) -> Self {
        Self::Parse(value)
    }
}

/// Top-level configuration document.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    pub db: DbConfig,
    pub positions: PositionConfig,
    pub logging: LoggingConfig,
}

/// SQLite connection settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    /// How long a connection waits on a locked database before `SQLITE_BUSY`.
    pub busy_timeout_ms: u64,
    /// Enables `PRAGMA foreign_keys`; cascading deletes depend on it.
    pub foreign_keys: bool,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self {
            busy_timeout_ms: 5_000,
            foreign_keys: true,
        }
    }
}

/// Ordinal maintenance settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PositionConfig {
    /// Added to every ordinal of the affected groups before a batch rewrite.
    pub reorder_offset: i64,
    /// Added to the group size to park an entity during a single move.
    pub sentinel_offset: i64,
    /// Upper bound on waiting for in-process group locks.
    pub lock_timeout_ms: u64,
    /// How many times a batch plan is recomputed after concurrent drift.
    pub max_plan_attempts: u32,
    /// Re-checks density of every touched group before commit.
    pub verify_density: bool,
}

impl Default for PositionConfig {
    fn default() -> Self {
        Self {
            reorder_offset: DEFAULT_REORDER_OFFSET,
            sentinel_offset: DEFAULT_SENTINEL_OFFSET,
            lock_timeout_ms: 5_000,
            max_plan_attempts: 3,
            verify_density: true,
        }
    }
}

/// Logging settings consumed by [`crate::logging::init_logging`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// `trace|debug|info|warn|error`; `None` uses the build-mode default.
    pub level: Option<String>,
    /// Absolute directory for rolling log files; `None` disables file logging.
    pub log_dir: Option<String>,
}

impl CoreConfig {
    /// Parses and validates a JSON configuration document.
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: CoreConfig = serde_json::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads and validates a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks cross-field constraints not expressible through serde.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.positions.validate()
    }
}

impl PositionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.reorder_offset <= 0 {
            return Err(ConfigError::Invalid(format!(
                "positions.reorder_offset must be positive, got {}",
                self.reorder_offset
            )));
        }
        if self.sentinel_offset <= 0 {
            return Err(ConfigError::Invalid(format!(
                "positions.sentinel_offset must be positive, got {}",
                self.sentinel_offset
            )));
        }
        if self.max_plan_attempts == 0 {
            return Err(ConfigError::Invalid(
                "positions.max_plan_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

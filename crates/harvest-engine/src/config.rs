//! # Engine Configuration
//!
//! Retry and stock settings for the reservation engine.
//!
//! ## Configuration Sources
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Configuration Priority                               │
//! │                                                                         │
//! │  1. Environment Variables (highest priority)                           │
//! │     HARVEST_RETRY_MAX_ATTEMPTS=5                                       │
//! │     HARVEST_STOCK_DEFAULT_MAX_SELLABLE=500                             │
//! │                                                                         │
//! │  2. TOML Config File                                                   │
//! │     ~/.config/harvest/harvest.toml (Linux)                             │
//! │     ~/Library/Application Support/org.harvest.harvest/harvest.toml     │
//! │                                                                         │
//! │  3. Default Values (lowest priority)                                   │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Configuration File Format
//! ```toml
//! # harvest.toml
//! [retry]
//! max_attempts = 3
//! initial_backoff_ms = 20
//! max_backoff_ms = 500
//!
//! [compensation]
//! max_attempts = 8
//! initial_backoff_ms = 50
//! max_backoff_ms = 2000
//!
//! [stock]
//! default_max_sellable = 500
//! ```

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{EngineError, EngineResult};
use crate::retry::RetryPolicy;

// =============================================================================
// Retry Settings
// =============================================================================

/// Bounded exponential backoff settings.
///
/// ## Two Policies
/// ```text
/// ┌─────────────────────────────────────────────────────────────────────────┐
/// │  [retry]          reserve, release, order append, reads                 │
/// │                   few attempts, short waits: the buyer is waiting       │
/// │                                                                         │
/// │  [compensation]   rollback releases after a failed placement           │
/// │                   more attempts, longer waits: giving up leaks stock   │
/// └─────────────────────────────────────────────────────────────────────────┘
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_ms: u64,

    #[serde(default = "default_max_backoff")]
    pub max_backoff_ms: u64,
}

fn default_max_attempts() -> u32 {
    3
}
fn default_initial_backoff() -> u64 {
    20
}
fn default_max_backoff() -> u64 {
    500
}

impl Default for RetrySettings {
    fn default() -> Self {
        RetrySettings {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_initial_backoff(),
            max_backoff_ms: default_max_backoff(),
        }
    }
}

impl RetrySettings {
    /// Defaults for the compensation policy.
    pub fn compensation() -> Self {
        RetrySettings {
            max_attempts: 8,
            initial_backoff_ms: 50,
            max_backoff_ms: 2_000,
        }
    }

    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            self.max_attempts,
            Duration::from_millis(self.initial_backoff_ms),
            Duration::from_millis(self.max_backoff_ms),
        )
    }

    fn validate(&self, section: &str) -> EngineResult<()> {
        if self.max_attempts == 0 {
            return Err(EngineError::InvalidConfig(format!(
                "[{}] max_attempts must be greater than 0",
                section
            )));
        }
        if self.initial_backoff_ms > self.max_backoff_ms {
            return Err(EngineError::InvalidConfig(format!(
                "[{}] initial_backoff_ms must not exceed max_backoff_ms",
                section
            )));
        }
        Ok(())
    }
}

fn default_compensation() -> RetrySettings {
    RetrySettings::compensation()
}

// =============================================================================
// Stock Settings
// =============================================================================

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSettings {
    /// Ceiling applied to newly listed products that do not bring their own.
    /// `None` leaves releases and restocks unbounded.
    #[serde(default)]
    pub default_max_sellable: Option<i64>,
}

// =============================================================================
// Main Engine Configuration
// =============================================================================

/// Complete engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default = "default_compensation")]
    pub compensation: RetrySettings,

    #[serde(default)]
    pub stock: StockSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            retry: RetrySettings::default(),
            compensation: RetrySettings::compensation(),
            stock: StockSettings::default(),
        }
    }
}

impl EngineConfig {
    /// Loads configuration from file, environment, and defaults.
    ///
    /// ## Load Order (later overrides earlier)
    /// 1. Default values
    /// 2. Config file (harvest.toml)
    /// 3. Environment variables
    pub fn load(config_path: Option<PathBuf>) -> EngineResult<Self> {
        let mut config = Self::default();

        if let Some(path) = config_path.or_else(Self::default_config_path) {
            if path.exists() {
                info!(?path, "Loading engine config from file");
                let contents = std::fs::read_to_string(&path)?;
                config = toml::from_str(&contents)?;
            } else {
                debug!(?path, "Config file not found, using defaults");
            }
        }

        config.apply_env_overrides();
        config.validate()?;

        Ok(config)
    }

    /// Loads config or returns default if load fails.
    pub fn load_or_default(config_path: Option<PathBuf>) -> Self {
        Self::load(config_path).unwrap_or_else(|e| {
            warn!("Failed to load engine config: {}. Using defaults.", e);
            Self::default()
        })
    }

    /// Parses a TOML document, then validates it. No environment lookups.
    pub fn from_toml_str(contents: &str) -> EngineResult<Self> {
        let config: EngineConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> EngineResult<()> {
        self.retry.validate("retry")?;
        self.compensation.validate("compensation")?;

        if self.compensation.max_attempts < self.retry.max_attempts {
            return Err(EngineError::InvalidConfig(
                "[compensation] max_attempts must be at least [retry] max_attempts".into(),
            ));
        }

        if let Some(cap) = self.stock.default_max_sellable {
            if cap < 0 {
                return Err(EngineError::InvalidConfig(
                    "[stock] default_max_sellable must not be negative".into(),
                ));
            }
        }

        Ok(())
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Applies `HARVEST_*` overrides read through `lookup`.
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let sections = [
            ("RETRY", &mut self.retry),
            ("COMPENSATION", &mut self.compensation),
        ];
        for (prefix, settings) in sections {
            if let Some(v) = parse_var(&lookup, &format!("HARVEST_{}_MAX_ATTEMPTS", prefix)) {
                settings.max_attempts = v;
            }
            if let Some(v) = parse_var(&lookup, &format!("HARVEST_{}_INITIAL_BACKOFF_MS", prefix)) {
                settings.initial_backoff_ms = v;
            }
            if let Some(v) = parse_var(&lookup, &format!("HARVEST_{}_MAX_BACKOFF_MS", prefix)) {
                settings.max_backoff_ms = v;
            }
        }

        if let Some(cap) = parse_var::<i64>(&lookup, "HARVEST_STOCK_DEFAULT_MAX_SELLABLE") {
            debug!(cap, "Overriding default max sellable from environment");
            self.stock.default_max_sellable = Some(cap);
        }
    }

    /// Returns the default config file path.
    fn default_config_path() -> Option<PathBuf> {
        directories::ProjectDirs::from("org", "harvest", "harvest")
            .map(|dirs| dirs.config_dir().join("harvest.toml"))
    }
}

fn parse_var<T: std::str::FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => {
            debug!(key, "Overriding engine config from environment");
            Some(value)
        }
        Err(_) => {
            warn!(key, value = %raw, "Ignoring unparsable environment override");
            None
        }
    }
}

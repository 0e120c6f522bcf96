// ============================================================================
// SECTION 9: CONFIGURATION SYSTEM
// ============================================================================
// TOML file merged with `INDOM_`-prefixed environment overrides
// (`INDOM_CACHE__DIR=/tmp/pmda`), validated after extraction.
// ============================================================================

use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CACHE_DIR, MAX_INSTANCE};
use crate::error::{ConfigError, ConfigResult};

/// Prefix for environment overrides
pub const ENV_PREFIX: &str = "INDOM_";

/// Log formats understood by `init_logging`
pub const LOG_FORMATS: [&str; 3] = ["pretty", "compact", "json"];

// ----------------------------------------------------------------------------
// 9.1 Main Configuration Structure
// ----------------------------------------------------------------------------

/// Root configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndomConfig {
    /// Cache storage settings
    #[serde(default)]
    pub cache: CacheSettings,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl IndomConfig {
    /// Load configuration from file with environment overrides
    pub fn load<P: AsRef<Path>>(path: P) -> ConfigResult<Self> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::FileNotFound {
                path: path.to_path_buf(),
            });
        }

        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Toml::file(path))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Defaults with environment overrides, for running without a file
    pub fn from_env() -> ConfigResult<Self> {
        Self::extract(
            Figment::from(Serialized::defaults(Self::default()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Load from string (for testing)
    pub fn from_str(toml_str: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(toml_str).map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    fn extract(figment: Figment) -> ConfigResult<Self> {
        let config: Self = figment.extract().map_err(|e| ConfigError::ParseError {
            message: e.to_string(),
        })?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> ConfigResult<()> {
        if self.cache.dir.as_os_str().is_empty() {
            return Err(ConfigError::invalid_value("cache.dir", "Cache directory cannot be empty"));
        }

        if !(1..=MAX_INSTANCE).contains(&self.cache.max_instance) {
            return Err(ConfigError::invalid_value(
                "cache.max_instance",
                format!("Max instance must be between 1 and {}", MAX_INSTANCE),
            ));
        }

        if !LOG_FORMATS.contains(&self.logging.format.as_str()) {
            return Err(ConfigError::invalid_value(
                "logging.format",
                format!(
                    "Unknown log format '{}', expected one of {}",
                    self.logging.format,
                    LOG_FORMATS.join(", ")
                ),
            ));
        }

        Ok(())
    }

    /// Create a default config file
    pub fn generate_default_config() -> String {
        let config = Self::default();
        toml::to_string_pretty(&config).unwrap_or_default()
    }
}

// ----------------------------------------------------------------------------
// 9.2 Cache Settings
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheSettings {
    /// Directory holding one persisted file per instance domain
    #[serde(default = "default_cache_dir")]
    pub dir: PathBuf,

    /// Identifier bound for newly created tables
    #[serde(default = "default_max_instance")]
    pub max_instance: u32,

    /// Age after which saved but unseen instances are purged
    #[serde(default = "default_purge_max_age")]
    pub purge_max_age_secs: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
            max_instance: default_max_instance(),
            purge_max_age_secs: default_purge_max_age(),
        }
    }
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from(DEFAULT_CACHE_DIR)
}

fn default_max_instance() -> u32 {
    MAX_INSTANCE
}

fn default_purge_max_age() -> u64 {
    7 * 24 * 60 * 60 // one week
}

// ----------------------------------------------------------------------------
// 9.3 Logging Configuration
// ----------------------------------------------------------------------------

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format (json, pretty, compact)
    #[serde(default = "default_log_format")]
    pub format: String,

    /// Enable ANSI colors
    #[serde(default = "default_true")]
    pub colors: bool,

    /// Include source location
    #[serde(default)]
    pub source_location: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
            colors: true,
            source_location: false,
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}

fn default_log_format() -> String {
    "pretty".into()
}

fn default_true() -> bool {
    true
}

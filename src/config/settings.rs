//! TOML-based configuration for the query engine.
//!
//! Supports a config file with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! default_dialect = "postgres"
//!
//! [gap_filling]
//! enabled = true
//! default_granularity = "day"
//!
//! [cache]
//! default_ttl_seconds = 300
//!
//! [limits]
//! max_funnel_depth = 10
//! max_retention_periods = 52
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::model::types::Granularity;
use crate::sql::{Dialect, SqlDialect};

/// Error type for engine configuration loading.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root engine configuration.
///
/// Controls behavior that is orthogonal to any single query: which SQL
/// dialect to target by default, whether gap-filling and percentile
/// approximations are available, and the bounds placed on specialized
/// query types.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Default SQL dialect used when a query does not specify one.
    #[serde(with = "dialect_serde")]
    pub default_dialect: Dialect,

    /// Whether adapters may use percentile subqueries for funnel/retention
    /// time metrics. Disabled for dialects or deployments where the extra
    /// subquery cost is unacceptable.
    pub percentile_adapter_enabled: bool,

    /// Gap-filling behavior for time-series results.
    pub gap_filling: GapFillingSettings,

    /// Result cache behavior.
    pub cache: CacheSettings,

    /// Limits on specialized query shapes.
    pub limits: LimitSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_dialect: Dialect::DuckDb,
            percentile_adapter_enabled: true,
            gap_filling: GapFillingSettings::default(),
            cache: CacheSettings::default(),
            limits: LimitSettings::default(),
        }
    }
}

/// Gap-filling configuration for time-series results.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GapFillingSettings {
    /// Whether to fill missing periods in time-series results with zero rows.
    pub enabled: bool,

    /// Granularity to assume when a query's time dimension has none declared.
    pub default_granularity: Granularity,
}

impl Default for GapFillingSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            default_granularity: Granularity::Day,
        }
    }
}

/// Result cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheSettings {
    /// Default time-to-live for cached results, in seconds.
    pub default_ttl_seconds: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 300,
        }
    }
}

/// Bounds placed on specialized query types.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitSettings {
    /// Maximum number of steps a funnel query may declare.
    pub max_funnel_depth: usize,

    /// Maximum number of periods a retention query may span.
    pub max_retention_periods: u32,
}

impl Default for LimitSettings {
    fn default() -> Self {
        Self {
            max_funnel_depth: 10,
            max_retention_periods: 52,
        }
    }
}

impl LimitSettings {
    /// Validate a requested retention period count against the configured bound.
    pub fn validate_retention_periods(&self, periods: u32) -> Result<(), SettingsError> {
        if periods == 0 || periods > self.max_retention_periods {
            return Err(SettingsError::InvalidConfig(format!(
                "retention periods must be between 1 and {}, got {}",
                self.max_retention_periods, periods
            )));
        }
        Ok(())
    }
}

mod dialect_serde {
    use crate::sql::{Dialect, SqlDialect};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(dialect: &Dialect, s: S) -> Result<S::Ok, S::Error> {
        dialect.name().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Dialect, D::Error> {
        let name = String::deserialize(d)?;
        Dialect::parse(&name).map_err(serde::de::Error::custom)
    }
}

impl EngineConfig {
    /// Load configuration from a TOML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        let expanded = expand_env_vars(&content)?;
        let config: EngineConfig = toml::from_str(&expanded)?;
        Ok(config)
    }

    /// Load configuration from the default locations.
    ///
    /// Searches in order:
    /// 1. The file named by the `CUBEPLAN_CONFIG` environment variable.
    /// 2. `./cubeplan.toml` in the current working directory.
    /// 3. A compiled-in default.
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("CUBEPLAN_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("cubeplan.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        Ok(EngineConfig::default())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c == '$' {
            if chars.peek() == Some(&'{') {
                chars.next(); // consume '{'
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch == '}' {
                        chars.next(); // consume '}'
                        break;
                    }
                    var_name.push(chars.next().unwrap());
                }
                let value = env::var(&var_name)
                    .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                result.push_str(&value);
            } else {
                let mut var_name = String::new();
                while let Some(&ch) = chars.peek() {
                    if ch.is_alphanumeric() || ch == '_' {
                        var_name.push(chars.next().unwrap());
                    } else {
                        break;
                    }
                }
                if var_name.is_empty() {
                    result.push('$');
                } else {
                    let value = env::var(&var_name)
                        .map_err(|_| SettingsError::MissingEnvVar(var_name.clone()))?;
                    result.push_str(&value);
                }
            }
        } else {
            result.push(c);
        }
    }

    Ok(result)
}

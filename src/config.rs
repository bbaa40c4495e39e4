//! Configuration management for Floodgate.
//!
//! Configuration is layered: built-in defaults, then an optional YAML file,
//! then `FLOODGATE__SECTION__KEY` environment variables.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;
use tracing::warn;

use crate::error::{FloodgateError, Result};
use crate::ratelimit::{PolicyRule, PolicySet};

/// Main configuration for the Floodgate service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FloodgateConfig {
    /// Limiter engine configuration
    #[serde(default)]
    pub limiter: LimiterConfig,

    /// Named policies, overlaying the built-in presets
    #[serde(default)]
    pub policies: BTreeMap<String, PolicyRule>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What the limiter answers when its store fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailureMode {
    /// Let the request through unthrottled
    Open,
    /// Deny the request
    #[default]
    Closed,
}

/// Limiter engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimiterConfig {
    /// Period of the background cleanup sweep in milliseconds
    #[serde(default = "default_cleanup_interval")]
    pub cleanup_interval_ms: u64,

    /// Identifiers idle for longer than this are evicted by the sweep
    #[serde(default = "default_retention_horizon")]
    pub retention_horizon_ms: u64,

    /// Decision returned when the store fails
    #[serde(default)]
    pub failure_mode: FailureMode,
}

impl Default for LimiterConfig {
    fn default() -> Self {
        Self {
            cleanup_interval_ms: default_cleanup_interval(),
            retention_horizon_ms: default_retention_horizon(),
            failure_mode: FailureMode::default(),
        }
    }
}

fn default_cleanup_interval() -> u64 {
    5 * 60 * 1000
}

fn default_retention_horizon() -> u64 {
    60 * 60 * 1000
}

impl LimiterConfig {
    /// Sweep period.
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_millis(self.cleanup_interval_ms)
    }

    /// Idle time after which an unblocked identifier is evicted.
    pub fn retention_horizon(&self) -> Duration {
        Duration::from_millis(self.retention_horizon_ms)
    }

    /// Reject zero durations.
    pub fn validate(&self) -> Result<()> {
        if self.cleanup_interval_ms == 0 {
            return Err(FloodgateError::Config(
                "cleanup_interval_ms must be positive".to_string(),
            ));
        }
        if self.retention_horizon_ms == 0 {
            return Err(FloodgateError::Config(
                "retention_horizon_ms must be positive".to_string(),
            ));
        }
        Ok(())
    }

    /// Warn when a policy window reaches the retention horizon.
    ///
    /// Returns `true` if the horizon covers every window.
    pub fn check_policies(&self, policies: &PolicySet) -> bool {
        let horizon = self.retention_horizon();
        if policies.max_window().map_or(true, |window| window < horizon) {
            return true;
        }
        let mut covered = true;
        for (name, policy) in policies.iter() {
            if policy.window() >= horizon {
                warn!(
                    policy = name,
                    window_ms = policy.window_ms(),
                    retention_horizon_ms = self.retention_horizon_ms,
                    "Policy window is not shorter than the retention horizon; idle identifiers may be evicted mid-window"
                );
                covered = false;
            }
        }
        covered
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

impl FloodgateConfig {
    /// Load configuration from an optional file plus `FLOODGATE__*` env vars.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path));
        }
        let config: FloodgateConfig = builder
            .add_source(
                config::Environment::with_prefix("FLOODGATE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: FloodgateConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the limiter knobs and every configured policy.
    pub fn validate(&self) -> Result<()> {
        self.limiter.validate()?;
        self.policy_set().map(|_| ())
    }

    /// The presets overlaid with the configured policies.
    pub fn policy_set(&self) -> Result<PolicySet> {
        PolicySet::from_rules(self.policies.clone())
    }
}

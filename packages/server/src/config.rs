//! Presence configuration.
//!
//! Every tunable (grace periods, thresholds, windows) lives in one explicit
//! struct handed to the use cases at construction. Values can be loaded from a
//! TOML file; missing keys fall back to the defaults below.
//!
//! ```toml
//! default_grace_period_secs = 180
//! disconnection_threshold = 5
//! critical_context_types = ["debate"]
//!
//! [grace_periods]
//! room = 300
//! debate = 120
//! ```

use std::{collections::BTreeMap, path::Path, time::Duration};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::ContextType;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PresenceConfig {
    /// Grace period in seconds, keyed by context type name
    pub grace_periods: BTreeMap<String, u64>,
    /// Grace period for context types missing from `grace_periods`
    pub default_grace_period_secs: u64,
    /// Disconnections within the analysis window that count as abnormal
    pub disconnection_threshold: usize,
    pub analysis_window_secs: u64,
    /// Reconnections faster than this are "rapid"
    pub rapid_reconnection_secs: u64,
    pub rapid_reconnection_min_count: usize,
    /// An outage of `factor * grace period` or longer is "prolonged"
    pub prolonged_disconnection_factor: u32,
    /// A reconnection younger than this is still considered in flight
    pub reconnection_recency_secs: u64,
    pub stats_cache_ttl_secs: u64,
    /// Context types whose failures trigger an out-of-band alert
    pub critical_context_types: Vec<String>,
    pub alert_timeout_ms: u64,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        let mut grace_periods = BTreeMap::new();
        grace_periods.insert("room".to_string(), 300);
        grace_periods.insert("debate".to_string(), 120);

        Self {
            grace_periods,
            default_grace_period_secs: 180,
            disconnection_threshold: 5,
            analysis_window_secs: 3600,
            rapid_reconnection_secs: 30,
            rapid_reconnection_min_count: 3,
            prolonged_disconnection_factor: 2,
            reconnection_recency_secs: 60,
            stats_cache_ttl_secs: 60,
            critical_context_types: vec!["debate".to_string()],
            alert_timeout_ms: 3000,
        }
    }
}

impl PresenceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
        let config: PresenceConfig = toml::from_str(source)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML config file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&source)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.default_grace_period_secs == 0 {
            return Err(ConfigError::Invalid(
                "default_grace_period_secs must be positive".to_string(),
            ));
        }
        if let Some((kind, _)) = self.grace_periods.iter().find(|(_, secs)| **secs == 0) {
            return Err(ConfigError::Invalid(format!(
                "grace period for '{}' must be positive",
                kind
            )));
        }
        if self.disconnection_threshold == 0 || self.rapid_reconnection_min_count == 0 {
            return Err(ConfigError::Invalid(
                "detection thresholds must be positive".to_string(),
            ));
        }
        if self.analysis_window_secs == 0 {
            return Err(ConfigError::Invalid(
                "analysis_window_secs must be positive".to_string(),
            ));
        }
        if self.prolonged_disconnection_factor == 0 {
            return Err(ConfigError::Invalid(
                "prolonged_disconnection_factor must be positive".to_string(),
            ));
        }
        Ok(())
    }

    pub fn grace_period(&self, kind: &ContextType) -> Duration {
        let secs = self
            .grace_periods
            .get(kind.as_str())
            .copied()
            .unwrap_or(self.default_grace_period_secs);
        Duration::from_secs(secs)
    }

    pub fn is_critical(&self, kind: &ContextType) -> bool {
        self.critical_context_types
            .iter()
            .any(|critical| critical == kind.as_str())
    }

    pub fn analysis_window(&self) -> Duration {
        Duration::from_secs(self.analysis_window_secs)
    }

    pub fn alert_timeout(&self) -> Duration {
        Duration::from_millis(self.alert_timeout_ms)
    }
}

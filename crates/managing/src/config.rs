//! Managing service configuration (TOML-serializable).

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::ratelimit::RateLimitPolicy;

/// Number of recent scores averaged into the representative score.
pub const DEFAULT_HISTORY_LEN: usize = 10;

/// Default quota per miner per window.
pub const DEFAULT_RATE_LIMIT_CAPACITY: u64 = 256;

/// Default rate limit window, one epoch.
pub const DEFAULT_RATE_LIMIT_WINDOW_SECS: u64 = 600;

/// Minimum stake for a node to receive a share of the request budget.
pub const DEFAULT_MIN_STAKE: u64 = 1_000;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Top-level configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ManagingConfig {
    /// Scores kept per miner.
    pub history_len: usize,

    /// Reject operations on miners that were never registered instead of creating them.
    pub require_registration: bool,

    /// Shared rate limit defaults.
    pub rate_limit: RateLimitConfig,

    /// Stake-proportional capacity allocation.
    pub allocation: AllocationConfig,

    /// Durable store.
    pub store: StoreConfig,
}

impl Default for ManagingConfig {
    fn default() -> Self {
        Self {
            history_len: DEFAULT_HISTORY_LEN,
            require_registration: false,
            rate_limit: RateLimitConfig::default(),
            allocation: AllocationConfig::default(),
            store: StoreConfig::default(),
        }
    }
}

impl ManagingConfig {
    /// Load and validate a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.history_len == 0 {
            return Err(ConfigError::Invalid("history_len must be at least 1".into()));
        }
        if self.rate_limit.window_secs == 0 {
            return Err(ConfigError::Invalid(
                "rate_limit.window_secs must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// Rate limit defaults applied to miners without their own policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub capacity: u64,
    pub window_secs: u64,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_RATE_LIMIT_CAPACITY,
            window_secs: DEFAULT_RATE_LIMIT_WINDOW_SECS,
        }
    }
}

impl RateLimitConfig {
    pub fn policy(&self) -> RateLimitPolicy {
        RateLimitPolicy::new(self.capacity, Duration::from_secs(self.window_secs))
    }
}

/// Inputs for [`crate::allocation::stake_weighted_capacities`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AllocationConfig {
    pub min_stake: u64,
    pub total_requests: u64,
}

impl Default for AllocationConfig {
    fn default() -> Self {
        Self {
            min_stake: DEFAULT_MIN_STAKE,
            total_requests: DEFAULT_RATE_LIMIT_CAPACITY,
        }
    }
}

/// Durable store location. No path means an in-memory store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn test_defaults_roundtrip_through_toml() {
        let config = ManagingConfig::default();
        let text = config.to_toml_string().unwrap();
        assert_eq!(ManagingConfig::from_toml_str(&text).unwrap(), config);
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = ManagingConfig::from_toml_str(
            r#"
            history_len = 4

            [rate_limit]
            capacity = 32
            "#,
        )
        .unwrap();

        assert_eq!(config.history_len, 4);
        assert_eq!(config.rate_limit.capacity, 32);
        assert_eq!(config.rate_limit.window_secs, DEFAULT_RATE_LIMIT_WINDOW_SECS);
        assert_eq!(config.allocation, AllocationConfig::default());
        assert_eq!(config.store.path, None);
        assert_eq!(
            config.rate_limit.policy(),
            RateLimitPolicy::new(32, Duration::from_secs(600))
        );
    }

    #[test]
    fn test_validation() {
        assert_matches!(
            ManagingConfig::from_toml_str("history_len = 0"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            ManagingConfig::from_toml_str("[rate_limit]\nwindow_secs = 0"),
            Err(ConfigError::Invalid(_))
        );
        assert_matches!(
            ManagingConfig::from_toml_str("history_len = \"ten\""),
            Err(ConfigError::Parse(_))
        );
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert_matches!(
            ManagingConfig::load(dir.path().join("missing.toml")),
            Err(ConfigError::Io { .. })
        );
    }
}

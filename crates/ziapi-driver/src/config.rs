//! Connection configuration
//!
//! Loadable from TOML; every field has a default, so a config file only needs
//! the keys it changes:
//!
//! ```toml
//! queue_capacity = 4096
//! overflow_policy = "drop_newest"
//! request_timeout_ms = 2000
//! ```

use crate::queue::OverflowPolicy;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Connection tuning knobs
///
/// # Example
///
/// ```rust
/// use ziapi_driver::{ConnectionConfig, OverflowPolicy};
///
/// let config = ConnectionConfig {
///     queue_capacity: 64,
///     overflow_policy: OverflowPolicy::DropNewest,
///     ..ConnectionConfig::default()
/// };
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionConfig {
    /// Event queue capacity, fixed for the lifetime of the connection
    pub queue_capacity: usize,
    pub overflow_policy: OverflowPolicy,
    /// Wait bound of synchronous requests
    pub request_timeout_ms: u64,
    /// IO thread receive timeout; bounds shutdown latency
    pub receive_timeout_ms: u64,
    pub handshake_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    /// How long `close()` waits for the IO thread
    pub join_timeout_ms: u64,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            queue_capacity: 1024,
            overflow_policy: OverflowPolicy::DropOldest,
            request_timeout_ms: 5000,
            receive_timeout_ms: 10,
            handshake_timeout_ms: 5000,
            connect_timeout_ms: 3000,
            join_timeout_ms: 2000,
        }
    }
}

impl ConnectionConfig {
    pub fn from_toml_str(s: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        Self::from_toml_str(&std::fs::read_to_string(path)?)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.queue_capacity == 0 {
            return Err(ConfigError::Invalid("queue_capacity must be > 0".into()));
        }
        if self.receive_timeout_ms == 0 {
            return Err(ConfigError::Invalid("receive_timeout_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn handshake_timeout(&self) -> Duration {
        Duration::from_millis(self.handshake_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_toml_uses_defaults() {
        let config = ConnectionConfig::from_toml_str(
            "queue_capacity = 16\noverflow_policy = \"drop_newest\"\n",
        )
        .unwrap();
        assert_eq!(config.queue_capacity, 16);
        assert_eq!(config.overflow_policy, OverflowPolicy::DropNewest);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
    }

    #[test]
    fn test_invalid_values() {
        assert!(matches!(
            ConnectionConfig::from_toml_str("queue_capacity = 0"),
            Err(ConfigError::Invalid(_))
        ));
        assert!(matches!(
            ConnectionConfig::from_toml_str("queue_capacity = \"many\""),
            Err(ConfigError::Parse(_))
        ));
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connection.toml");
        let config = ConnectionConfig {
            request_timeout_ms: 250,
            ..ConnectionConfig::default()
        };
        std::fs::write(&path, config.to_toml_string().unwrap()).unwrap();
        assert_eq!(ConnectionConfig::load(&path).unwrap(), config);
    }
}

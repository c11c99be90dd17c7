//! Socket hub configuration.
//!
//! Configuration is a plain value object. [`Config::default`] yields the
//! documented defaults; [`Config::from_env`] overlays environment variables.
//! Durations are given in milliseconds.

use std::collections::HashMap;
use std::env;
use std::time::Duration;
use thiserror::Error;

/// Default write wait (bound on a single transport write).
pub const DEFAULT_WRITE_WAIT: Duration = Duration::from_secs(10);

/// Default pong wait (peer read deadline the heartbeat keeps alive).
pub const DEFAULT_PONG_WAIT: Duration = Duration::from_secs(60);

/// Default heartbeat interval. Must stay below the pong wait.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(54);

/// Default maximum inbound message size in bytes.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 512;

/// Default per-session mailbox capacity.
pub const DEFAULT_MAILBOX_CAPACITY: usize = 256;

/// Default bind address for the demo server.
pub const DEFAULT_BIND_ADDRESS: &str = "0.0.0.0:8080";

/// Socket hub configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    /// Bound on every transport write, heartbeats included (default: 10s).
    pub write_wait: Duration,

    /// How long a peer may stay silent before its read deadline expires
    /// (default: 60s). Advisory; read deadlines belong to the transport.
    pub pong_wait: Duration,

    /// Interval between heartbeat pings (default: 54s).
    pub heartbeat_interval: Duration,

    /// Maximum inbound message size in bytes (default: 512). Advisory;
    /// enforced by the transport (see [`crate::ws::upgrade`]).
    pub max_message_size: usize,

    /// Per-session mailbox capacity (default: 256).
    pub mailbox_capacity: usize,

    /// Bind address for the demo server (default: "0.0.0.0:8080").
    pub bind_address: String,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            write_wait: DEFAULT_WRITE_WAIT,
            pong_wait: DEFAULT_PONG_WAIT,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            mailbox_capacity: DEFAULT_MAILBOX_CAPACITY,
            bind_address: DEFAULT_BIND_ADDRESS.to_string(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let write_wait = parse_millis(vars, "HUB_WRITE_WAIT_MS")?.unwrap_or(defaults.write_wait);
        let pong_wait = parse_millis(vars, "HUB_PONG_WAIT_MS")?.unwrap_or(defaults.pong_wait);
        let heartbeat_interval = parse_millis(vars, "HUB_HEARTBEAT_INTERVAL_MS")?
            .unwrap_or(defaults.heartbeat_interval);

        let max_message_size =
            parse_number(vars, "HUB_MAX_MESSAGE_SIZE")?.unwrap_or(defaults.max_message_size);
        let mailbox_capacity =
            parse_number(vars, "HUB_MAILBOX_CAPACITY")?.unwrap_or(defaults.mailbox_capacity);

        let bind_address = vars
            .get("HUB_BIND_ADDRESS")
            .cloned()
            .unwrap_or(defaults.bind_address);

        let config = Config {
            write_wait,
            pong_wait,
            heartbeat_interval,
            max_message_size,
            mailbox_capacity,
            bind_address,
        };
        config.validate()?;
        Ok(config)
    }

    /// Check the invariants the actors rely on.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.mailbox_capacity == 0 {
            return Err(ConfigError::InvalidValue(
                "mailbox capacity must be at least 1".to_string(),
            ));
        }
        if self.write_wait.is_zero() {
            return Err(ConfigError::InvalidValue(
                "write wait must be non-zero".to_string(),
            ));
        }
        if self.heartbeat_interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "heartbeat interval must be non-zero".to_string(),
            ));
        }
        // The peer's read deadline is refreshed by our pings.
        if self.heartbeat_interval >= self.pong_wait {
            return Err(ConfigError::InvalidValue(format!(
                "heartbeat interval ({:?}) must be shorter than pong wait ({:?})",
                self.heartbeat_interval, self.pong_wait
            )));
        }
        Ok(())
    }
}

fn parse_millis(
    vars: &HashMap<String, String>,
    key: &str,
) -> Result<Option<Duration>, ConfigError> {
    Ok(parse_number::<u64>(vars, key)?.map(Duration::from_millis))
}

fn parse_number<T: std::str::FromStr>(
    vars: &HashMap<String, String>,
    key: &str,
) -> Result<Option<T>, ConfigError> {
    match vars.get(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue(format!("{key}={raw}"))),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();

        assert_eq!(config.write_wait, Duration::from_secs(10));
        assert_eq!(config.pong_wait, Duration::from_secs(60));
        assert_eq!(config.heartbeat_interval, Duration::from_secs(54));
        assert_eq!(config.max_message_size, 512);
        assert_eq!(config.mailbox_capacity, 256);
        assert_eq!(config.bind_address, DEFAULT_BIND_ADDRESS);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_from_vars_empty_uses_defaults() {
        let config = Config::from_vars(&HashMap::new()).expect("Config should load successfully");
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_from_vars_custom_values() {
        let vars = HashMap::from([
            ("HUB_WRITE_WAIT_MS".to_string(), "250".to_string()),
            ("HUB_PONG_WAIT_MS".to_string(), "2000".to_string()),
            ("HUB_HEARTBEAT_INTERVAL_MS".to_string(), "1500".to_string()),
            ("HUB_MAX_MESSAGE_SIZE".to_string(), "4096".to_string()),
            ("HUB_MAILBOX_CAPACITY".to_string(), "8".to_string()),
            ("HUB_BIND_ADDRESS".to_string(), "127.0.0.1:9000".to_string()),
        ]);

        let config = Config::from_vars(&vars).expect("Config should load successfully");

        assert_eq!(config.write_wait, Duration::from_millis(250));
        assert_eq!(config.pong_wait, Duration::from_millis(2000));
        assert_eq!(config.heartbeat_interval, Duration::from_millis(1500));
        assert_eq!(config.max_message_size, 4096);
        assert_eq!(config.mailbox_capacity, 8);
        assert_eq!(config.bind_address, "127.0.0.1:9000");
    }

    #[test]
    fn test_from_vars_rejects_garbage() {
        let vars = HashMap::from([("HUB_MAILBOX_CAPACITY".to_string(), "lots".to_string())]);

        let result = Config::from_vars(&vars);
        assert!(
            matches!(result, Err(ConfigError::InvalidValue(v)) if v == "HUB_MAILBOX_CAPACITY=lots")
        );
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let config = Config {
            mailbox_capacity: 0,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_heartbeat_rejected() {
        let config = Config {
            heartbeat_interval: Duration::ZERO,
            ..Config::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_heartbeat_must_undercut_pong_wait() {
        let config = Config {
            heartbeat_interval: Duration::from_secs(60),
            pong_wait: Duration::from_secs(60),
            ..Config::default()
        };
        assert!(config.validate().is_err());

        let vars = HashMap::from([("HUB_HEARTBEAT_INTERVAL_MS".to_string(), "90000".to_string())]);
        assert!(Config::from_vars(&vars).is_err());
    }
}

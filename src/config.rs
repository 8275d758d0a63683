//! Configuration loading and persistence.
//!
//! Handles reading and writing the hubwatch configuration file and the
//! `HUBWATCH_*` environment overrides. All knobs have defaults matching
//! [`crate::constants`]; a missing config file is not an error.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use std::{fs, path::PathBuf};

use crate::constants::{
    ACK_TIMEOUT, CONTROL_PING_INTERVAL, EVENT_LOG_CAPACITY, INITIAL_RECONNECT_DELAY,
    MAX_RECONNECT_DELAY,
};
use crate::protocol::{CONTROL_PATH, EVENTS_PATH};
use crate::ws;

/// Configuration for the hubwatch CLI.
#[derive(Serialize, Deserialize, Clone, Debug)]
#[serde(default)]
pub struct Config {
    /// Base URL of the relay server. `https://` bases produce `wss://`
    /// WebSocket connections, `http://` produces `ws://`.
    pub server_url: String,
    /// Maximum events retained in the client-side log.
    pub event_capacity: usize,
    /// Delay in milliseconds before the first reconnect attempt.
    pub initial_backoff_ms: u64,
    /// Ceiling in milliseconds for the exponential reconnect backoff.
    pub max_backoff_ms: u64,
    /// How long in milliseconds a publish waits for its ack.
    pub ack_timeout_ms: u64,
    /// Seconds between keepalive pings on the control channel.
    pub ping_interval_secs: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: "http://127.0.0.1:8080".to_string(),
            event_capacity: EVENT_LOG_CAPACITY,
            initial_backoff_ms: u64::try_from(INITIAL_RECONNECT_DELAY.as_millis()).unwrap_or(1000),
            max_backoff_ms: u64::try_from(MAX_RECONNECT_DELAY.as_millis()).unwrap_or(30_000),
            ack_timeout_ms: u64::try_from(ACK_TIMEOUT.as_millis()).unwrap_or(10_000),
            ping_interval_secs: CONTROL_PING_INTERVAL.as_secs(),
        }
    }
}

impl Config {
    /// Returns the configuration directory path, creating it if necessary.
    ///
    /// `HUBWATCH_CONFIG_DIR` overrides the platform config directory
    /// (useful for tests and containers).
    pub fn config_dir() -> Result<PathBuf> {
        let dir = if let Ok(dir) = std::env::var("HUBWATCH_CONFIG_DIR") {
            PathBuf::from(dir)
        } else {
            dirs::config_dir()
                .context("Could not determine config directory")?
                .join("hubwatch")
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Loads configuration from file, with environment variable overrides.
    ///
    /// A missing or unreadable file yields the defaults.
    pub fn load() -> Result<Self> {
        let mut config = Self::load_from_file().unwrap_or_default();
        config.apply_env_overrides();
        Ok(config)
    }

    fn load_from_file() -> Result<Self> {
        let config_path = Self::config_dir()?.join("config.json");
        if config_path.exists() {
            let content = fs::read_to_string(&config_path)?;
            Ok(serde_json::from_str(&content)?)
        } else {
            anyhow::bail!("Config file not found")
        }
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(server_url) = std::env::var("HUBWATCH_SERVER_URL") {
            self.server_url = server_url;
        }

        if let Ok(capacity) = std::env::var("HUBWATCH_EVENT_CAPACITY") {
            if let Ok(capacity) = capacity.parse::<usize>() {
                self.event_capacity = capacity;
            }
        }

        if let Ok(ms) = std::env::var("HUBWATCH_INITIAL_BACKOFF_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.initial_backoff_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("HUBWATCH_MAX_BACKOFF_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.max_backoff_ms = ms;
            }
        }

        if let Ok(ms) = std::env::var("HUBWATCH_ACK_TIMEOUT_MS") {
            if let Ok(ms) = ms.parse::<u64>() {
                self.ack_timeout_ms = ms;
            }
        }

        if let Ok(secs) = std::env::var("HUBWATCH_PING_INTERVAL_SECS") {
            if let Ok(secs) = secs.parse::<u64>() {
                self.ping_interval_secs = secs;
            }
        }
    }

    /// Persists the current configuration to disk.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_dir()?.join("config.json");
        fs::write(&config_path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// WebSocket URL of the event stream endpoint.
    #[must_use]
    pub fn events_url(&self) -> String {
        ws::ws_url(&self.server_url, EVENTS_PATH)
    }

    /// WebSocket URL of the control endpoint.
    #[must_use]
    pub fn control_url(&self) -> String {
        ws::ws_url(&self.server_url, CONTROL_PATH)
    }

    /// HTTP URL of the relay's health endpoint.
    #[must_use]
    pub fn health_url(&self) -> String {
        format!("{}/healthz", self.server_url.trim_end_matches('/'))
    }

    /// First reconnect delay as a [`Duration`].
    #[must_use]
    pub fn initial_backoff(&self) -> Duration {
        Duration::from_millis(self.initial_backoff_ms)
    }

    /// Backoff ceiling as a [`Duration`].
    #[must_use]
    pub fn max_backoff(&self) -> Duration {
        Duration::from_millis(self.max_backoff_ms)
    }

    /// Publish ack timeout as a [`Duration`].
    #[must_use]
    pub fn ack_timeout(&self) -> Duration {
        Duration::from_millis(self.ack_timeout_ms)
    }

    /// Control keepalive interval as a [`Duration`].
    #[must_use]
    pub fn ping_interval(&self) -> Duration {
        Duration::from_secs(self.ping_interval_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_url, "http://127.0.0.1:8080");
        assert_eq!(config.event_capacity, 1000);
        assert_eq!(config.initial_backoff_ms, 1000);
        assert_eq!(config.max_backoff_ms, 30_000);
        assert_eq!(config.ack_timeout_ms, 10_000);
        assert_eq!(config.ping_interval_secs, 15);
    }

    #[test]
    fn test_endpoint_urls() {
        let config = Config {
            server_url: "https://hub.example.com".to_string(),
            ..Config::default()
        };
        assert_eq!(config.events_url(), "wss://hub.example.com/ws/events");
        assert_eq!(config.control_url(), "wss://hub.example.com/ws/control");
        assert_eq!(config.health_url(), "https://hub.example.com/healthz");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        // Old config files with missing knobs still load.
        let config: Config =
            serde_json::from_str(r#"{"server_url":"http://other:9000"}"#).unwrap();
        assert_eq!(config.server_url, "http://other:9000");
        assert_eq!(config.event_capacity, 1000);
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        std::env::set_var("HUBWATCH_CONFIG_DIR", dir.path());

        let config = Config {
            server_url: "http://relay:1234".to_string(),
            event_capacity: 50,
            ..Config::default()
        };
        config.save().unwrap();

        let loaded = Config::load().unwrap();
        assert_eq!(loaded.server_url, "http://relay:1234");
        assert_eq!(loaded.event_capacity, 50);

        std::env::remove_var("HUBWATCH_CONFIG_DIR");
    }
}

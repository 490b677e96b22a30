//! Session configuration supplied by the hosting page.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default relay endpoint.
pub const DEFAULT_SERVER_URL: &str = "ws://localhost:3030/ws";

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid config JSON: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("{0} must not be empty")]
    Empty(&'static str),
}

/// Reconnection policy: bounded attempts with a fixed delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectPolicy {
    pub max_attempts: u32,
    pub delay_ms: u64,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            delay_ms: 1000,
        }
    }
}

impl ReconnectPolicy {
    pub fn delay(&self) -> Duration {
        Duration::from_millis(self.delay_ms)
    }
}

/// Everything a session needs from its host.
///
/// Only `room_id` and `display_name` are required; both are opaque.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub room_id: String,
    pub display_name: String,
    #[serde(default = "default_server_url")]
    pub server_url: String,
    #[serde(default)]
    pub reconnect: ReconnectPolicy,
    /// Minimum spacing between retained pen samples.
    #[serde(default = "default_sample_interval_ms")]
    pub sample_interval_ms: u64,
}

fn default_server_url() -> String {
    DEFAULT_SERVER_URL.to_string()
}

fn default_sample_interval_ms() -> u64 {
    16
}

impl SessionConfig {
    /// Config with defaults for everything but the room and name.
    pub fn new(room_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            room_id: room_id.into(),
            display_name: display_name.into(),
            server_url: default_server_url(),
            reconnect: ReconnectPolicy::default(),
            sample_interval_ms: default_sample_interval_ms(),
        }
    }

    /// Set the relay URL.
    pub fn with_server_url(mut self, url: impl Into<String>) -> Self {
        self.server_url = url.into();
        self
    }

    /// Set the reconnection policy.
    pub fn with_reconnect(mut self, reconnect: ReconnectPolicy) -> Self {
        self.reconnect = reconnect;
        self
    }

    /// Parse and validate a JSON config blob.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configs the relay could not route.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.room_id.is_empty() {
            return Err(ConfigError::Empty("room_id"));
        }
        if self.server_url.is_empty() {
            return Err(ConfigError::Empty("server_url"));
        }
        Ok(())
    }

    pub fn sample_interval(&self) -> Duration {
        Duration::from_millis(self.sample_interval_ms)
    }
}

//! # World Configuration
//!
//! Polling cadence and limits, loaded once at startup.
//!
//! ```toml
//! poll_interval_ms = 10
//! server_poll_batch = 16
//! client_poll_batch = 1
//! event_queue_capacity = 1024
//! malformed_message_limit = 8
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use zonesync_shared::{CLIENT_POLL_BATCH, POLL_INTERVAL_MS, SERVER_POLL_BATCH};

use crate::error::{WorldError, WorldResult};

/// Runtime knobs for a [`World`](crate::world::World).
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorldConfig {
    /// Sleep between loop iterations, in milliseconds.
    pub poll_interval_ms: u64,
    /// Messages pulled from the server poll group per receive call.
    pub server_poll_batch: usize,
    /// Messages pulled from the client connection per receive call.
    pub client_poll_batch: usize,
    /// Application events buffered before new ones are dropped.
    pub event_queue_capacity: usize,
    /// Undecodable messages tolerated per connection before it is closed.
    pub malformed_message_limit: u32,
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: POLL_INTERVAL_MS,
            server_poll_batch: SERVER_POLL_BATCH,
            client_poll_batch: CLIENT_POLL_BATCH,
            event_queue_capacity: 1024,
            malformed_message_limit: 8,
        }
    }
}

impl WorldConfig {
    /// Parses and validates a TOML config. Missing keys take their defaults.
    pub fn from_toml_str(text: &str) -> WorldResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| WorldError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a TOML config file.
    pub fn from_toml_file(path: impl AsRef<Path>) -> WorldResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| WorldError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    /// Rejects values the loops cannot run with.
    pub fn validate(&self) -> WorldResult<()> {
        if self.server_poll_batch == 0 || self.client_poll_batch == 0 {
            return Err(WorldError::Config("poll batches must be at least 1".into()));
        }
        if self.event_queue_capacity == 0 {
            return Err(WorldError::Config("event_queue_capacity must be at least 1".into()));
        }
        if self.malformed_message_limit == 0 {
            return Err(WorldError::Config("malformed_message_limit must be at least 1".into()));
        }
        Ok(())
    }

    /// Loop sleep as a duration.
    #[inline]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_protocol_constants() {
        let config = WorldConfig::default();
        assert_eq!(config.poll_interval(), Duration::from_millis(10));
        assert_eq!(config.server_poll_batch, 16);
        assert_eq!(config.client_poll_batch, 1);
    }

    #[test]
    fn test_partial_toml_keeps_defaults() {
        let config = WorldConfig::from_toml_str("poll_interval_ms = 2").unwrap();
        assert_eq!(config.poll_interval_ms, 2);
        assert_eq!(config.server_poll_batch, 16);
        assert_eq!(config.malformed_message_limit, 8);
    }

    #[test]
    fn test_zero_batch_rejected() {
        assert!(matches!(
            WorldConfig::from_toml_str("server_poll_batch = 0"),
            Err(WorldError::Config(_))
        ));
    }

    #[test]
    fn test_wrong_type_rejected() {
        assert!(WorldConfig::from_toml_str("poll_interval_ms = \"fast\"").is_err());
    }
}

//! Client configuration.

use std::time::Duration;

use serde::Deserialize;

use crate::error::{ClientError, ClientResult};

/// Configuration for a client connection.
///
/// Timeouts are in milliseconds; a missing or `0` timeout means none.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Server address, e.g. "127.0.0.1:6379".
    pub addr: String,
    /// TCP read timeout for replies.
    pub read_timeout_ms: Option<u64>,
    /// TCP write timeout.
    pub write_timeout_ms: Option<u64>,
    /// TCP connect timeout.
    pub connect_timeout_ms: Option<u64>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        ClientConfig {
            addr: "127.0.0.1:6379".to_string(),
            read_timeout_ms: None,
            write_timeout_ms: None,
            connect_timeout_ms: None,
        }
    }
}

impl ClientConfig {
    /// Parses a JSON document; absent fields keep their defaults.
    pub fn from_json(text: &str) -> ClientResult<Self> {
        serde_json::from_str(text).map_err(|err| ClientError::Config(err.to_string()))
    }

    pub fn read_timeout(&self) -> Option<Duration> {
        millis(self.read_timeout_ms)
    }

    pub fn write_timeout(&self) -> Option<Duration> {
        millis(self.write_timeout_ms)
    }

    pub fn connect_timeout(&self) -> Option<Duration> {
        millis(self.connect_timeout_ms)
    }
}

fn millis(value: Option<u64>) -> Option<Duration> {
    value.filter(|ms| *ms > 0).map(Duration::from_millis)
}

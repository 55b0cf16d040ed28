//! Settings types.
//!
//! Every struct uses camelCase keys and `#[serde(default)]`, so a partial
//! settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings object.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SluiceSettings {
    /// Server address and reconnection policy.
    pub connection: ConnectionSettings,
    /// Per-stream delivery settings.
    pub stream: StreamSettings,
    /// Logging settings.
    pub logging: LoggingSettings,
}

impl SluiceSettings {
    /// Reject values the session cannot run with.
    pub fn validate(&self) -> Result<()> {
        let conn = &self.connection;
        if conn.scheme != "ws" && conn.scheme != "wss" {
            return Err(SettingsError::InvalidValue(format!(
                "connection.scheme must be \"ws\" or \"wss\", got {:?}",
                conn.scheme
            )));
        }
        if conn.host.is_empty() {
            return Err(SettingsError::InvalidValue(
                "connection.host must not be empty".into(),
            ));
        }
        if conn.port == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.port must be non-zero".into(),
            ));
        }
        if conn.handshake_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "connection.handshakeTimeoutMs must be non-zero".into(),
            ));
        }
        if self.stream.event_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "stream.eventBuffer must be non-zero".into(),
            ));
        }
        Ok(())
    }
}

/// Where to connect and how to recover from unclean closes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ConnectionSettings {
    /// `ws` or `wss`.
    pub scheme: String,
    /// Server host.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// WebSocket endpoint path.
    pub path: String,
    /// Consecutive reconnect attempts before giving up.
    pub max_reconnect_attempts: u32,
    /// Delay before each reconnect attempt.
    pub reconnect_interval_ms: u64,
    /// Upper bound on one connect handshake.
    pub handshake_timeout_ms: u64,
}

impl Default for ConnectionSettings {
    fn default() -> Self {
        Self {
            scheme: "ws".to_string(),
            host: "localhost".to_string(),
            port: 8080,
            path: "/ws".to_string(),
            max_reconnect_attempts: 5,
            reconnect_interval_ms: 3000,
            handshake_timeout_ms: 5000,
        }
    }
}

impl ConnectionSettings {
    /// Full WebSocket URL, e.g. `ws://localhost:8080/ws`.
    #[must_use]
    pub fn url(&self) -> String {
        let path = if self.path.starts_with('/') || self.path.is_empty() {
            self.path.clone()
        } else {
            format!("/{}", self.path)
        };
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, path)
    }
}

/// Per-stream delivery settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct StreamSettings {
    /// Capacity of each `QueryStream` event channel. A stream whose channel
    /// overflows is dropped and ends as abandoned.
    pub event_buffer: usize,
}

impl Default for StreamSettings {
    fn default() -> Self {
        Self { event_buffer: 256 }
    }
}

/// Logging settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default `tracing` filter when `RUST_LOG` is unset.
    pub level: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "warn".to_string(),
        }
    }
}

//! Settings types with compiled defaults.

use std::collections::BTreeMap;

use rollcall_core::identity::DEFAULT_IDENTITIES;
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Smallest outbound queue that holds the greeting and the first roster.
pub const MIN_SEND_QUEUE: usize = 2;

/// Root settings object.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RollcallSettings {
    /// Network and connection settings.
    pub server: ServerSettings,
    /// Identity pool.
    pub identities: IdentitySettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl RollcallSettings {
    /// Reject combinations the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        let s = &self.server;
        if s.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if s.max_send_queue < MIN_SEND_QUEUE {
            return Err(SettingsError::InvalidValue(format!(
                "server.maxSendQueue must be at least {MIN_SEND_QUEUE}"
            )));
        }
        if s.heartbeat_interval_secs == 0 {
            return Err(SettingsError::InvalidValue(
                "server.heartbeatIntervalSecs must be at least 1".into(),
            ));
        }
        if s.heartbeat_timeout_secs < s.heartbeat_interval_secs {
            return Err(SettingsError::InvalidValue(format!(
                "server.heartbeatTimeoutSecs ({}) is shorter than heartbeatIntervalSecs ({})",
                s.heartbeat_timeout_secs, s.heartbeat_interval_secs
            )));
        }
        if s.max_message_size < 1024 {
            return Err(SettingsError::InvalidValue(
                "server.maxMessageSize must be at least 1024 bytes".into(),
            ));
        }
        Ok(())
    }
}

/// What happens when a peer id that is already online connects again.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DuplicatePeerPolicy {
    /// Notify and close the existing connection, then install the new one.
    #[default]
    Replace,
    /// Refuse the new connection; the existing session stays.
    Reject,
}

impl std::str::FromStr for DuplicatePeerPolicy {
    type Err = SettingsError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "replace" => Ok(Self::Replace),
            "reject" => Ok(Self::Reject),
            other => Err(SettingsError::InvalidValue(format!(
                "unknown duplicate peer policy '{other}' (expected replace or reject)"
            ))),
        }
    }
}

/// Server network and connection settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port (`0` picks a free port).
    pub port: u16,
    /// Maximum concurrent WebSocket connections.
    pub max_connections: usize,
    /// Outbound frames buffered per connection before it counts as failed.
    pub max_send_queue: usize,
    /// Seconds between server Ping frames.
    pub heartbeat_interval_secs: u64,
    /// Seconds without any inbound frame before a connection is dropped.
    pub heartbeat_timeout_secs: u64,
    /// Max inbound WebSocket message size in bytes.
    pub max_message_size: usize,
    /// Reconnect collision handling.
    pub duplicate_peer_policy: DuplicatePeerPolicy,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8001,
            max_connections: 1_000,
            max_send_queue: 256,
            heartbeat_interval_secs: 30,
            heartbeat_timeout_secs: 90,
            max_message_size: 1024 * 1024,
            duplicate_peer_policy: DuplicatePeerPolicy::Replace,
        }
    }
}

/// Identity pool labels.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct IdentitySettings {
    /// Candidate labels in pool order.
    pub labels: Vec<String>,
}

impl Default for IdentitySettings {
    fn default() -> Self {
        Self {
            labels: DEFAULT_IDENTITIES.iter().map(ToString::to_string).collect(),
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default level (`trace`..`error`). `RUST_LOG` wins when set.
    pub level: String,
    /// Emit JSON lines instead of human-readable output.
    pub json: bool,
    /// Per-module overrides, e.g. `{"rollcall_server": "debug"}`.
    pub module_levels: BTreeMap<String, String>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            module_levels: BTreeMap::new(),
        }
    }
}

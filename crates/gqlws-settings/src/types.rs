//! Settings type definitions.
//!
//! Field names are camelCase on disk. Every section is `#[serde(default)]`,
//! so a settings file only needs the keys it changes.

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SettingsError};

/// Root settings for the gateway.
///
/// ```json
/// {
///   "server": { "port": 8080 },
///   "websocket": { "initTimeoutMs": 10000 }
/// }
/// ```
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct GatewaySettings {
    /// HTTP listener.
    pub server: ServerSettings,
    /// Per-connection protocol tuning.
    pub websocket: WebSocketSettings,
    /// Log output.
    pub logging: LoggingSettings,
}

impl GatewaySettings {
    /// Reject values the server cannot run with.
    pub fn validate(&self) -> Result<()> {
        if !self.server.path.starts_with('/') {
            return Err(SettingsError::InvalidValue(format!(
                "server.path must start with '/', got {:?}",
                self.server.path
            )));
        }
        if self.server.max_connections == 0 {
            return Err(SettingsError::InvalidValue(
                "server.maxConnections must be at least 1".into(),
            ));
        }
        if self.websocket.init_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.initTimeoutMs must be at least 1".into(),
            ));
        }
        if self.websocket.close_timeout_ms == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.closeTimeoutMs must be at least 1".into(),
            ));
        }
        if self.websocket.outbound_buffer == 0 {
            return Err(SettingsError::InvalidValue(
                "websocket.outboundBuffer must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

/// HTTP listener settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
    /// Route serving the WebSocket upgrade.
    pub path: String,
    /// Upgrades beyond this many live connections get 503.
    pub max_connections: usize,
    /// How long shutdown waits for connections to close.
    pub shutdown_timeout_ms: u64,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 4000,
            path: "/graphql".to_string(),
            max_connections: 1024,
            shutdown_timeout_ms: 5_000,
        }
    }
}

/// Per-connection protocol settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct WebSocketSettings {
    /// Time allowed between upgrade and `connection_init`.
    pub init_timeout_ms: u64,
    /// Server `ping` interval once initialized. 0 disables keep-alive.
    pub keep_alive_ms: u64,
    /// Outbound messages queued per connection before it is closed.
    pub outbound_buffer: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// Time a closing connection may spend flushing queued messages.
    pub close_timeout_ms: u64,
}

impl Default for WebSocketSettings {
    fn default() -> Self {
        Self {
            init_timeout_ms: 60_000,
            keep_alive_ms: 0,
            outbound_buffer: 256,
            max_message_size: 1024 * 1024,
            close_timeout_ms: 5_000,
        }
    }
}

/// Log output settings.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default filter when `RUST_LOG` is unset.
    pub level: String,
    /// One JSON object per line instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

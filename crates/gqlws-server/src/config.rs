//! Server configuration.

use std::time::Duration;

use gqlws_settings::GatewaySettings;

/// Configuration for the gateway server.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host to bind (default `"127.0.0.1"`).
    pub host: String,
    /// Port to bind (default `0` for auto-assign).
    pub port: u16,
    /// Route serving the WebSocket upgrade.
    pub path: String,
    /// Upgrades beyond this many live connections get 503.
    pub max_connections: usize,
    /// Largest inbound frame accepted, in bytes.
    pub max_message_size: usize,
    /// How long shutdown waits for connections to close.
    pub shutdown_timeout: Duration,
    /// Per-connection protocol settings.
    pub connection: ConnectionConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".into(),
            port: 0,
            path: "/graphql".into(),
            max_connections: 1024,
            max_message_size: 1024 * 1024,
            shutdown_timeout: Duration::from_secs(5),
            connection: ConnectionConfig::default(),
        }
    }
}

impl ServerConfig {
    /// Derive a server config from loaded settings.
    pub fn from_settings(settings: &GatewaySettings) -> Self {
        let ws = &settings.websocket;
        Self {
            host: settings.server.host.clone(),
            port: settings.server.port,
            path: settings.server.path.clone(),
            max_connections: settings.server.max_connections,
            max_message_size: ws.max_message_size,
            shutdown_timeout: Duration::from_millis(settings.server.shutdown_timeout_ms),
            connection: ConnectionConfig {
                init_timeout: Duration::from_millis(ws.init_timeout_ms),
                keep_alive: (ws.keep_alive_ms > 0).then(|| Duration::from_millis(ws.keep_alive_ms)),
                outbound_buffer: ws.outbound_buffer,
                close_timeout: Duration::from_millis(ws.close_timeout_ms),
            },
        }
    }

    /// `host:port` string for binding.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Per-connection protocol settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Time allowed between upgrade and `connection_init`.
    pub init_timeout: Duration,
    /// Server `ping` interval once initialized (`None` disables it).
    pub keep_alive: Option<Duration>,
    /// Outbound messages queued before the connection is closed with 1013.
    pub outbound_buffer: usize,
    /// How long a closing connection may spend flushing queued messages.
    pub close_timeout: Duration,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            init_timeout: Duration::from_secs(60),
            keep_alive: None,
            outbound_buffer: 256,
            close_timeout: Duration::from_secs(5),
        }
    }
}

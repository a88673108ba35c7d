//! # gqlws-server
//!
//! Axum WebSocket server speaking `graphql-transport-ws`.
//!
//! - Per-connection protocol state machine with handshake timeout
//! - Operation registry, cancellation and ordered result delivery
//! - HTTP endpoints: WebSocket upgrade, health check, Prometheus metrics
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod config;
pub mod errors;
pub mod health;
pub mod metrics;
pub mod server;
pub mod shutdown;
pub mod tracker;
pub mod websocket;

pub use config::{ConnectionConfig, ServerConfig};
pub use errors::ServerError;
pub use server::{GatewayServer, ServerHandle};
pub use shutdown::{DrainReport, ShutdownCoordinator};
pub use tracker::ConnectionTracker;
pub use websocket::connection::{ConnectionOutcome, ConnectionSession, Phase, SessionServices};
pub use websocket::transport::{
    ChannelClient, FrameSink, InboundFrame, InboundStream, OutboundFrame, TransportError,
    channel_transport,
};

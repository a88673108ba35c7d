//! Server error types.

use std::net::SocketAddr;

use thiserror::Error;

/// Failures starting or running the HTTP listener.
#[derive(Debug, Error)]
pub enum ServerError {
    /// The configured host/port could not be parsed.
    #[error("invalid listen address {addr:?}: {source}")]
    Address {
        /// The `host:port` string.
        addr: String,
        /// Parse failure.
        #[source]
        source: std::net::AddrParseError,
    },

    /// Binding the listener failed.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Requested address.
        addr: SocketAddr,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Other I/O failure on the listener.
    #[error("server I/O error: {0}")]
    Io(#[from] std::io::Error),
}

//! Error taxonomy shared by the gateway crates.
//!
//! - [`CloseReason`]: connection-fatal conditions, each with a WebSocket close
//!   code and reason string
//! - [`ExecutionError`]: operation-scoped failures, reported to the client as
//!   an `error` message and never fatal to the connection

use thiserror::Error;

use crate::protocol::GraphQlError;

// ── Close code constants ────────────────────────────────────────────

/// Server is going away (shutdown).
pub const GOING_AWAY: u16 = 1001;
/// Server cannot keep up with this client.
pub const TRY_AGAIN_LATER: u16 = 1013;
/// Envelope or operation message is malformed.
pub const INVALID_MESSAGE: u16 = 4400;
/// Message received before the handshake.
pub const UNAUTHORIZED: u16 = 4401;
/// Handshake not completed in time.
pub const INIT_TIMEOUT: u16 = 4408;
/// Operation id already in use.
pub const SUBSCRIBER_EXISTS: u16 = 4409;
/// Repeated `connection_init`.
pub const TOO_MANY_INIT_REQUESTS: u16 = 4429;

/// A connection-fatal condition. `Display` yields the close reason.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum CloseReason {
    /// Undecodable envelope, malformed operation message, or a server-only
    /// message type sent by the client.
    #[error("Invalid message")]
    InvalidMessage,

    /// Anything other than `connection_init` before the handshake.
    #[error("Unauthorized")]
    Unauthorized,

    /// No `connection_init` within the configured timeout.
    #[error("Connection initialisation timeout")]
    InitTimeout,

    /// `subscribe` reusing the id of a live operation.
    #[error("Subscriber for {0} already exists")]
    SubscriberExists(String),

    /// Second `connection_init` on an initialized connection.
    #[error("Too many initialisation requests")]
    TooManyInitRequests,

    /// The server is shutting down.
    #[error("Server shutting down")]
    GoingAway,

    /// The client did not drain its outbound buffer fast enough.
    #[error("Outbound buffer overflow")]
    OutboundOverflow,
}

impl CloseReason {
    /// WebSocket close code.
    pub fn code(&self) -> u16 {
        match self {
            Self::InvalidMessage => INVALID_MESSAGE,
            Self::Unauthorized => UNAUTHORIZED,
            Self::InitTimeout => INIT_TIMEOUT,
            Self::SubscriberExists(_) => SUBSCRIBER_EXISTS,
            Self::TooManyInitRequests => TOO_MANY_INIT_REQUESTS,
            Self::GoingAway => GOING_AWAY,
            Self::OutboundOverflow => TRY_AGAIN_LATER,
        }
    }

    /// Close reason text sent with the close frame.
    pub fn reason(&self) -> String {
        self.to_string()
    }
}

/// Failure of a single operation.
#[derive(Clone, Debug, Error)]
pub enum ExecutionError {
    /// The engine rejected the request (parse or validation failure, unknown
    /// operation, bad variables).
    #[error("{}", join_messages(.0))]
    Request(Vec<GraphQlError>),

    /// The result source failed while producing elements.
    #[error("{message}")]
    Upstream {
        /// Description of the failure.
        message: String,
    },

    /// Unexpected failure inside the engine (including panics).
    #[error("internal error: {message}")]
    Internal {
        /// Description of the failure.
        message: String,
    },
}

impl ExecutionError {
    /// A request error with a single message.
    pub fn request(message: impl Into<String>) -> Self {
        Self::Request(vec![GraphQlError::new(message)])
    }

    /// An upstream (result source) error.
    pub fn upstream(message: impl Into<String>) -> Self {
        Self::Upstream {
            message: message.into(),
        }
    }

    /// An internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Errors to put in the `error` message payload.
    pub fn to_graphql_errors(&self) -> Vec<GraphQlError> {
        match self {
            Self::Request(errors) if !errors.is_empty() => errors.clone(),
            Self::Request(_) => vec![GraphQlError::new("Invalid request")],
            Self::Upstream { message } => vec![GraphQlError::new(message.clone())],
            Self::Internal { .. } => vec![GraphQlError::new(self.to_string())],
        }
    }
}

fn join_messages(errors: &[GraphQlError]) -> String {
    errors
        .iter()
        .map(|e| e.message.as_str())
        .collect::<Vec<_>>()
        .join("; ")
}

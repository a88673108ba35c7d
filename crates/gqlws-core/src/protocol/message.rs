//! Wire message types for the `graphql-transport-ws` sub-protocol.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Sub-protocol name advertised during the WebSocket upgrade.
pub const SUBPROTOCOL: &str = "graphql-transport-ws";

/// Opaque JSON object carried by connection-scoped messages.
pub type Payload = Map<String, Value>;

/// The `type` field of a protocol message.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    /// Client → server handshake request.
    ConnectionInit,
    /// Server → client handshake acknowledgement.
    ConnectionAck,
    /// Keep-alive probe (either direction).
    Ping,
    /// Keep-alive reply (either direction).
    Pong,
    /// Client → server operation request.
    Subscribe,
    /// Server → client operation result.
    Next,
    /// Server → client terminal operation failure.
    Error,
    /// Operation end (client cancel or server completion).
    Complete,
}

impl MessageType {
    /// All message types, in wire-documentation order.
    pub const ALL: [Self; 8] = [
        Self::ConnectionInit,
        Self::ConnectionAck,
        Self::Ping,
        Self::Pong,
        Self::Subscribe,
        Self::Next,
        Self::Error,
        Self::Complete,
    ];

    /// Wire name of this type.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ConnectionInit => "connection_init",
            Self::ConnectionAck => "connection_ack",
            Self::Ping => "ping",
            Self::Pong => "pong",
            Self::Subscribe => "subscribe",
            Self::Next => "next",
            Self::Error => "error",
            Self::Complete => "complete",
        }
    }

    /// Parse a wire name. Matching is exact (case-sensitive).
    pub fn from_wire(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.as_str() == name)
    }

    /// Whether messages of this type must carry an `id`.
    pub fn is_operation_scoped(self) -> bool {
        matches!(
            self,
            Self::Subscribe | Self::Next | Self::Error | Self::Complete
        )
    }

    /// Whether a client is allowed to send this type.
    pub fn is_client_message(self) -> bool {
        matches!(
            self,
            Self::ConnectionInit | Self::Ping | Self::Pong | Self::Subscribe | Self::Complete
        )
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a `subscribe` message: one GraphQL request.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribePayload {
    /// GraphQL document.
    pub query: String,
    /// Operation to run when the document holds several.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Variable values.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variables: Option<Map<String, Value>>,
    /// Protocol extensions (persisted queries, tracing flags, ...).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl SubscribePayload {
    /// A payload with only a query document.
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            operation_name: None,
            variables: None,
            extensions: None,
        }
    }
}

/// Source location of a GraphQL error.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Location {
    /// 1-based line.
    pub line: u32,
    /// 1-based column.
    pub column: u32,
}

/// A GraphQL error as it appears in `errors` lists.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct GraphQlError {
    /// Human-readable description.
    pub message: String,
    /// Locations in the request document.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locations: Vec<Location>,
    /// Response path of the failing field.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<Vec<Value>>,
    /// Engine-specific extra data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl GraphQlError {
    /// An error with just a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            locations: Vec::new(),
            path: None,
            extensions: None,
        }
    }

    /// Attach an extension entry.
    #[must_use]
    pub fn with_extension(mut self, key: impl Into<String>, value: Value) -> Self {
        let _ = self
            .extensions
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }
}

/// One element of an operation's result sequence (`next` payload).
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    /// Result data.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    /// Field errors produced alongside (or instead of) data.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<GraphQlError>,
    /// Response extensions.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extensions: Option<Map<String, Value>>,
}

impl ExecutionResult {
    /// A result carrying only data.
    pub fn data(data: Value) -> Self {
        Self {
            data: Some(data),
            ..Self::default()
        }
    }

    /// A result carrying only field errors.
    pub fn errors(errors: Vec<GraphQlError>) -> Self {
        Self {
            errors,
            ..Self::default()
        }
    }
}

/// A decoded protocol message. One variant per wire `type`.
#[derive(Clone, Debug, PartialEq)]
pub enum ProtocolMessage {
    /// `connection_init`
    ConnectionInit {
        /// Connection parameters, opaque to the gateway core.
        payload: Option<Payload>,
    },
    /// `connection_ack`
    ConnectionAck {
        /// Optional server parameters.
        payload: Option<Payload>,
    },
    /// `ping`
    Ping {
        /// Optional probe data.
        payload: Option<Payload>,
    },
    /// `pong`
    Pong {
        /// Optional reply data.
        payload: Option<Payload>,
    },
    /// `subscribe`
    Subscribe {
        /// Client-chosen operation id.
        id: String,
        /// The GraphQL request.
        payload: SubscribePayload,
    },
    /// `next`
    Next {
        /// Operation id.
        id: String,
        /// One result element.
        payload: ExecutionResult,
    },
    /// `error`
    Error {
        /// Operation id.
        id: String,
        /// Errors that terminated the operation.
        payload: Vec<GraphQlError>,
    },
    /// `complete`
    Complete {
        /// Operation id.
        id: String,
    },
}

impl ProtocolMessage {
    /// `connection_ack` without payload.
    pub fn connection_ack() -> Self {
        Self::ConnectionAck { payload: None }
    }

    /// `connection_init` without payload.
    pub fn connection_init() -> Self {
        Self::ConnectionInit { payload: None }
    }

    /// `ping` without payload.
    pub fn ping() -> Self {
        Self::Ping { payload: None }
    }

    /// `pong` echoing the given payload.
    pub fn pong(payload: Option<Payload>) -> Self {
        Self::Pong { payload }
    }

    /// `subscribe` for the given request.
    pub fn subscribe(id: impl Into<String>, payload: SubscribePayload) -> Self {
        Self::Subscribe {
            id: id.into(),
            payload,
        }
    }

    /// `next` carrying one result.
    pub fn next(id: impl Into<String>, payload: ExecutionResult) -> Self {
        Self::Next {
            id: id.into(),
            payload,
        }
    }

    /// `error` terminating an operation.
    pub fn error(id: impl Into<String>, payload: Vec<GraphQlError>) -> Self {
        Self::Error {
            id: id.into(),
            payload,
        }
    }

    /// `complete` for an operation.
    pub fn complete(id: impl Into<String>) -> Self {
        Self::Complete { id: id.into() }
    }

    /// The wire type of this message.
    pub fn message_type(&self) -> MessageType {
        match self {
            Self::ConnectionInit { .. } => MessageType::ConnectionInit,
            Self::ConnectionAck { .. } => MessageType::ConnectionAck,
            Self::Ping { .. } => MessageType::Ping,
            Self::Pong { .. } => MessageType::Pong,
            Self::Subscribe { .. } => MessageType::Subscribe,
            Self::Next { .. } => MessageType::Next,
            Self::Error { .. } => MessageType::Error,
            Self::Complete { .. } => MessageType::Complete,
        }
    }

    /// Operation id, for operation-scoped messages.
    pub fn id(&self) -> Option<&str> {
        match self {
            Self::Subscribe { id, .. }
            | Self::Next { id, .. }
            | Self::Error { id, .. }
            | Self::Complete { id } => Some(id),
            Self::ConnectionInit { .. }
            | Self::ConnectionAck { .. }
            | Self::Ping { .. }
            | Self::Pong { .. } => None,
        }
    }
}

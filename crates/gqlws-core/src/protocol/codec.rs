//! JSON codec between text frames and [`ProtocolMessage`].
//!
//! Decoding runs in two stages: the envelope (`{type, id, payload}`) is
//! validated first, then the payload is decoded for the concrete type. The
//! resulting [`DecodeError`] keeps the two failure classes apart so callers
//! can tell garbage frames from well-formed but invalid operations.

use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;

use super::message::{
    ExecutionResult, GraphQlError, MessageType, Payload, ProtocolMessage, SubscribePayload,
};

/// Why an inbound frame could not be turned into a [`ProtocolMessage`].
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Binary frame that is not UTF-8.
    #[error("frame is not valid UTF-8")]
    NotUtf8,

    /// Not JSON, or JSON that is not an object.
    #[error("malformed message: {0}")]
    Malformed(String),

    /// Object without a `type` field.
    #[error("message has no type")]
    MissingType,

    /// `type` is not one of the protocol's message types.
    #[error("unknown message type: {0}")]
    UnknownType(String),

    /// Operation-scoped message without an `id`.
    #[error("{message_type} message requires an id")]
    MissingId {
        /// Type of the offending message.
        message_type: MessageType,
    },

    /// Operation-scoped message whose `id` is not a string.
    #[error("{message_type} message id must be a string")]
    InvalidId {
        /// Type of the offending message.
        message_type: MessageType,
    },

    /// Payload missing or not of the shape the type requires.
    #[error("invalid {message_type} payload: {reason}")]
    InvalidPayload {
        /// Type of the offending message.
        message_type: MessageType,
        /// Decoder diagnostic.
        reason: String,
    },
}

impl DecodeError {
    /// `true` when the envelope itself is unusable (no message type could be
    /// established); `false` for well-typed messages with a bad id or payload.
    pub fn is_envelope_error(&self) -> bool {
        matches!(
            self,
            Self::NotUtf8 | Self::Malformed(_) | Self::MissingType | Self::UnknownType(_)
        )
    }

    /// The message type, when decoding got far enough to know it.
    pub fn message_type(&self) -> Option<MessageType> {
        match self {
            Self::MissingId { message_type }
            | Self::InvalidId { message_type }
            | Self::InvalidPayload { message_type, .. } => Some(*message_type),
            Self::NotUtf8 | Self::Malformed(_) | Self::MissingType | Self::UnknownType(_) => None,
        }
    }
}

/// Failure to serialize an outbound message.
#[derive(Debug, Error)]
#[error("failed to encode {message_type} message: {source}")]
pub struct EncodeError {
    /// Type of the message being encoded.
    pub message_type: MessageType,
    /// Underlying serializer error.
    #[source]
    pub source: serde_json::Error,
}

/// Decode a binary frame holding UTF-8 JSON.
pub fn decode_bytes(bytes: &[u8]) -> Result<ProtocolMessage, DecodeError> {
    let text = std::str::from_utf8(bytes).map_err(|_| DecodeError::NotUtf8)?;
    decode(text)
}

/// Decode a text frame.
pub fn decode(text: &str) -> Result<ProtocolMessage, DecodeError> {
    let value: Value =
        serde_json::from_str(text).map_err(|e| DecodeError::Malformed(e.to_string()))?;
    let Value::Object(mut envelope) = value else {
        return Err(DecodeError::Malformed("expected a JSON object".into()));
    };

    let message_type = match envelope.remove("type") {
        None | Some(Value::Null) => return Err(DecodeError::MissingType),
        Some(Value::String(name)) => {
            MessageType::from_wire(&name).ok_or(DecodeError::UnknownType(name))?
        }
        Some(other) => return Err(DecodeError::UnknownType(other.to_string())),
    };

    let payload = match envelope.remove("payload") {
        None | Some(Value::Null) => None,
        Some(v) => Some(v),
    };

    match message_type {
        MessageType::ConnectionInit => Ok(ProtocolMessage::ConnectionInit {
            payload: object_payload(message_type, payload)?,
        }),
        MessageType::ConnectionAck => Ok(ProtocolMessage::ConnectionAck {
            payload: object_payload(message_type, payload)?,
        }),
        MessageType::Ping => Ok(ProtocolMessage::Ping {
            payload: object_payload(message_type, payload)?,
        }),
        MessageType::Pong => Ok(ProtocolMessage::Pong {
            payload: object_payload(message_type, payload)?,
        }),
        MessageType::Subscribe => Ok(ProtocolMessage::Subscribe {
            id: required_id(message_type, &mut envelope)?,
            payload: typed_payload::<SubscribePayload>(message_type, payload)?,
        }),
        MessageType::Next => Ok(ProtocolMessage::Next {
            id: required_id(message_type, &mut envelope)?,
            payload: typed_payload::<ExecutionResult>(message_type, payload)?,
        }),
        MessageType::Error => Ok(ProtocolMessage::Error {
            id: required_id(message_type, &mut envelope)?,
            payload: typed_payload::<Vec<GraphQlError>>(message_type, payload)?,
        }),
        MessageType::Complete => Ok(ProtocolMessage::Complete {
            id: required_id(message_type, &mut envelope)?,
        }),
    }
}

fn required_id(
    message_type: MessageType,
    envelope: &mut Map<String, Value>,
) -> Result<String, DecodeError> {
    match envelope.remove("id") {
        None | Some(Value::Null) => Err(DecodeError::MissingId { message_type }),
        Some(Value::String(id)) => Ok(id),
        Some(_) => Err(DecodeError::InvalidId { message_type }),
    }
}

fn object_payload(
    message_type: MessageType,
    payload: Option<Value>,
) -> Result<Option<Payload>, DecodeError> {
    match payload {
        None => Ok(None),
        Some(Value::Object(map)) => Ok(Some(map)),
        Some(_) => Err(DecodeError::InvalidPayload {
            message_type,
            reason: "expected a JSON object".into(),
        }),
    }
}

fn typed_payload<T: serde::de::DeserializeOwned>(
    message_type: MessageType,
    payload: Option<Value>,
) -> Result<T, DecodeError> {
    let Some(value) = payload else {
        return Err(DecodeError::InvalidPayload {
            message_type,
            reason: "missing payload".into(),
        });
    };
    serde_json::from_value(value).map_err(|e| DecodeError::InvalidPayload {
        message_type,
        reason: e.to_string(),
    })
}

#[derive(Serialize)]
#[serde(untagged)]
enum PayloadRef<'a> {
    Object(&'a Payload),
    Subscribe(&'a SubscribePayload),
    Result(&'a ExecutionResult),
    Errors(&'a [GraphQlError]),
}

#[derive(Serialize)]
struct Envelope<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    id: Option<&'a str>,
    #[serde(rename = "type")]
    message_type: MessageType,
    #[serde(skip_serializing_if = "Option::is_none")]
    payload: Option<PayloadRef<'a>>,
}

/// Encode a message as a JSON text frame.
pub fn encode(message: &ProtocolMessage) -> Result<String, EncodeError> {
    let payload = match message {
        ProtocolMessage::ConnectionInit { payload }
        | ProtocolMessage::ConnectionAck { payload }
        | ProtocolMessage::Ping { payload }
        | ProtocolMessage::Pong { payload } => payload.as_ref().map(PayloadRef::Object),
        ProtocolMessage::Subscribe { payload, .. } => Some(PayloadRef::Subscribe(payload)),
        ProtocolMessage::Next { payload, .. } => Some(PayloadRef::Result(payload)),
        ProtocolMessage::Error { payload, .. } => Some(PayloadRef::Errors(payload)),
        ProtocolMessage::Complete { .. } => None,
    };
    let envelope = Envelope {
        id: message.id(),
        message_type: message.message_type(),
        payload,
    };
    serde_json::to_string(&envelope).map_err(|source| EncodeError {
        message_type: message.message_type(),
        source,
    })
}

//! `graphql-transport-ws` wire protocol.
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `message` | [`ProtocolMessage`] sum type and its payload types |
//! | `codec` | `decode`/`encode` between text frames and messages |

pub mod codec;
pub mod message;

pub use codec::{DecodeError, EncodeError, decode, decode_bytes, encode};
pub use message::{
    ExecutionResult, GraphQlError, Location, MessageType, Payload, ProtocolMessage,
    SubscribePayload, SUBPROTOCOL,
};

//! # gqlws-core
//!
//! Protocol building blocks for the `graphql-transport-ws` gateway.
//!
//! - [`protocol`]: wire message types and the JSON codec
//! - [`errors`]: close reasons and operation-scoped execution errors
//! - [`context`]: per-connection context and the interceptor pipeline
//! - [`execution`]: the execution-engine seam and the adapter that normalizes
//!   engine output into a cancellable result stream
//! - [`logging`]: `tracing` subscriber bootstrap

#![deny(unsafe_code)]

pub mod context;
pub mod errors;
pub mod execution;
pub mod logging;
pub mod protocol;

pub use context::{
    ConnectionContext, ContextInterceptor, InitPayloadAttributes, InterceptorChain,
    StaticAttributes,
};
pub use errors::{CloseReason, ExecutionError};
pub use execution::{ExecutionAdapter, ExecutionEngine, ExecutionRequest, ResultStream};
pub use protocol::{
    DecodeError, EncodeError, ExecutionResult, GraphQlError, MessageType, Payload,
    ProtocolMessage, SubscribePayload, SUBPROTOCOL, decode, decode_bytes, encode,
};

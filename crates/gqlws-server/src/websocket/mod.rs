//! `graphql-transport-ws` connection handling.
//!
//! - [`transport`]: inbound frame stream and outbound [`FrameSink`](transport::FrameSink)
//! - [`sink`]: bounded outbound queue and writer task
//! - [`registry`]: live operations of one connection
//! - [`operation`]: per-operation producer task
//! - [`connection`]: the per-connection state machine

pub mod connection;
pub mod operation;
pub mod registry;
pub mod sink;
pub mod transport;

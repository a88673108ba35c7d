//! Producer task of a single operation.
//!
//! Pulls the adapter's result stream and turns it into `next` messages, then
//! exactly one terminal `complete` or `error` unless the operation was
//! cancelled first. Dropping the stream on cancellation is what stops the
//! engine.

use std::sync::Arc;

use futures::StreamExt;
use gqlws_core::{ProtocolMessage, ResultStream};
use metrics::{counter, gauge};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::{OperationRegistry, Registration};
use super::sink::OutboundSink;
use crate::metrics::{
    OPERATIONS_ACTIVE, OPERATIONS_CANCELLED_TOTAL, OPERATIONS_COMPLETED_TOTAL,
    OPERATIONS_FAILED_TOTAL,
};

/// How an operation ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OperationEnd {
    /// Results exhausted; `complete` sent.
    Completed,
    /// Execution failed; `error` sent.
    Failed,
    /// Cancelled by the client or by teardown; nothing more sent.
    Cancelled,
    /// The outbound queue refused a message; the connection is closing.
    SinkFailed,
}

/// Spawn the producer for a registered operation.
pub fn spawn_operation(
    id: String,
    registration: Registration,
    results: ResultStream,
    registry: Arc<OperationRegistry>,
    sink: OutboundSink,
) -> JoinHandle<OperationEnd> {
    tokio::spawn(async move {
        gauge!(OPERATIONS_ACTIVE).increment(1.0);
        let end = run_operation(&id, &registration, results, &registry, &sink).await;
        gauge!(OPERATIONS_ACTIVE).decrement(1.0);
        match end {
            OperationEnd::Completed => counter!(OPERATIONS_COMPLETED_TOTAL).increment(1),
            OperationEnd::Failed => counter!(OPERATIONS_FAILED_TOTAL).increment(1),
            OperationEnd::Cancelled | OperationEnd::SinkFailed => {
                counter!(OPERATIONS_CANCELLED_TOTAL).increment(1);
            }
        }
        debug!(operation_id = %id, ?end, "operation finished");
        end
    })
}

async fn run_operation(
    id: &str,
    registration: &Registration,
    mut results: ResultStream,
    registry: &OperationRegistry,
    sink: &OutboundSink,
) -> OperationEnd {
    let seq = registration.seq;
    loop {
        let item = tokio::select! {
            biased;
            () = registration.token.cancelled() => return OperationEnd::Cancelled,
            item = results.next() => item,
        };

        match item {
            Some(Ok(result)) => {
                let message = ProtocolMessage::next(id, result);
                match registry.emit(id, seq, || sink.send(&message)) {
                    None => return OperationEnd::Cancelled,
                    Some(Err(e)) => {
                        debug!(operation_id = %id, error = %e, "next not enqueued");
                        return OperationEnd::SinkFailed;
                    }
                    Some(Ok(())) => {}
                }
            }
            Some(Err(error)) => {
                warn!(operation_id = %id, error = %error, "operation failed");
                let message = ProtocolMessage::error(id, error.to_graphql_errors());
                let sent = registry.finish(id, seq, || sink.send(&message));
                return terminal(sent, OperationEnd::Failed);
            }
            None => {
                let message = ProtocolMessage::complete(id);
                let sent = registry.finish(id, seq, || sink.send(&message));
                return terminal(sent, OperationEnd::Completed);
            }
        }
    }
}

fn terminal<E>(sent: Option<Result<(), E>>, end: OperationEnd) -> OperationEnd {
    match sent {
        None => OperationEnd::Cancelled,
        Some(Err(_)) => OperationEnd::SinkFailed,
        Some(Ok(())) => end,
    }
}

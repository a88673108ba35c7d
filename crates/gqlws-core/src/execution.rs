//! Execution-engine seam.
//!
//! The gateway never interprets GraphQL itself. An [`ExecutionEngine`] turns a
//! request into a stream of results; [`ExecutionAdapter`] wraps the engine so
//! that the connection layer only ever sees one shape of output: a stream
//! that yields zero or more results and at most one trailing error.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::stream::BoxStream;
use futures::{FutureExt, StreamExt};
use serde_json::{Map, Value};
use tracing::warn;

use crate::context::ConnectionContext;
use crate::errors::ExecutionError;
use crate::protocol::{ExecutionResult, SubscribePayload};

/// Result sequence of one operation.
pub type ResultStream = BoxStream<'static, Result<ExecutionResult, ExecutionError>>;

/// One GraphQL request, detached from the wire message that carried it.
#[derive(Clone, Debug, PartialEq)]
pub struct ExecutionRequest {
    /// Client-chosen operation id.
    pub operation_id: String,
    /// GraphQL document.
    pub query: String,
    /// Selected operation, if any.
    pub operation_name: Option<String>,
    /// Variable values (empty when the client sent none).
    pub variables: Map<String, Value>,
    /// Request extensions (empty when the client sent none).
    pub extensions: Map<String, Value>,
}

impl ExecutionRequest {
    /// Build a request from a `subscribe` payload.
    pub fn from_subscribe(operation_id: impl Into<String>, payload: SubscribePayload) -> Self {
        Self {
            operation_id: operation_id.into(),
            query: payload.query,
            operation_name: payload.operation_name,
            variables: payload.variables.unwrap_or_default(),
            extensions: payload.extensions.unwrap_or_default(),
        }
    }
}

/// Something that can execute GraphQL requests.
///
/// Queries and mutations yield exactly one element; subscriptions yield any
/// number. Dropping the returned stream cancels the execution.
#[async_trait]
pub trait ExecutionEngine: Send + Sync {
    /// Start executing `request` on behalf of the connection described by
    /// `context`.
    async fn execute(
        &self,
        request: ExecutionRequest,
        context: &ConnectionContext,
    ) -> Result<ResultStream, ExecutionError>;
}

/// Normalizes engine output.
///
/// - an `Err` from `execute` becomes a one-element stream carrying the error
/// - a panic in `execute` or while polling the stream becomes
///   [`ExecutionError::Internal`]
/// - the stream ends after its first error
#[derive(Clone)]
pub struct ExecutionAdapter {
    engine: Arc<dyn ExecutionEngine>,
}

impl ExecutionAdapter {
    /// Wrap an engine.
    pub fn new(engine: Arc<dyn ExecutionEngine>) -> Self {
        Self { engine }
    }

    /// The wrapped engine.
    pub fn engine(&self) -> &Arc<dyn ExecutionEngine> {
        &self.engine
    }

    /// Execute `request` and return its normalized result sequence.
    ///
    /// Nothing runs until the returned stream is first polled.
    pub fn execute(
        &self,
        request: ExecutionRequest,
        context: Arc<ConnectionContext>,
    ) -> ResultStream {
        let engine = Arc::clone(&self.engine);
        let stream = async_stream::stream! {
            let operation_id = request.operation_id.clone();
            let started = AssertUnwindSafe(engine.execute(request, &context))
                .catch_unwind()
                .await;
            let mut results = match started {
                Ok(Ok(results)) => results,
                Ok(Err(error)) => {
                    yield Err(error);
                    return;
                }
                Err(panic) => {
                    warn!(operation_id = %operation_id, "engine panicked while starting execution");
                    yield Err(ExecutionError::internal(panic_message(panic.as_ref())));
                    return;
                }
            };

            loop {
                match AssertUnwindSafe(results.next()).catch_unwind().await {
                    Ok(Some(Ok(result))) => yield Ok(result),
                    Ok(Some(Err(error))) => {
                        yield Err(error);
                        return;
                    }
                    Ok(None) => return,
                    Err(panic) => {
                        warn!(operation_id = %operation_id, "result stream panicked");
                        yield Err(ExecutionError::internal(panic_message(panic.as_ref())));
                        return;
                    }
                }
            }
        };
        stream.boxed()
    }
}

impl std::fmt::Debug for ExecutionAdapter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutionAdapter").finish_non_exhaustive()
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        (*message).to_owned()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "execution panicked".to_owned()
    }
}

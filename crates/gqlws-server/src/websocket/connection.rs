//! Connection state machine.
//!
//! One task per connection owns the phase, the handshake timer and the
//! operation registry's lifecycle. Its `select!` loop funnels, in priority
//! order: outbound overflow, inbound frames, the init deadline (only while
//! uninitialized), server shutdown and the keep-alive tick. Because the init
//! deadline is polled by the same task that processes `connection_init`, an
//! init handled before the deadline can never be followed by a 4408.

use std::fmt;
use std::sync::Arc;

use futures::StreamExt;
use gqlws_core::{
    CloseReason, ConnectionContext, DecodeError, ExecutionAdapter, ExecutionRequest,
    InterceptorChain, MessageType, Payload, ProtocolMessage, SubscribePayload, decode,
    decode_bytes,
};
use metrics::{counter, gauge};
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use super::operation::spawn_operation;
use super::registry::{OperationRegistry, RegistryError};
use super::sink::{OutboundSink, WriterHandle, outbound_channel, spawn_writer};
use super::transport::{FrameSink, InboundFrame, InboundStream, TransportError};
use crate::config::ConnectionConfig;
use crate::metrics::{
    OPERATIONS_STARTED_TOTAL, WS_CLOSES_TOTAL, WS_CONNECTIONS_ACTIVE, WS_CONNECTIONS_TOTAL,
};

/// What every connection needs to execute operations.
#[derive(Clone)]
pub struct SessionServices {
    /// Normalizing wrapper around the execution engine.
    pub adapter: ExecutionAdapter,
    /// Decorates the connection context after the handshake.
    pub interceptors: InterceptorChain,
}

impl SessionServices {
    /// Services with an empty interceptor chain.
    pub fn new(adapter: ExecutionAdapter) -> Self {
        Self {
            adapter,
            interceptors: InterceptorChain::new(),
        }
    }

    /// Replace the interceptor chain.
    #[must_use]
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.interceptors = interceptors;
        self
    }
}

impl fmt::Debug for SessionServices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SessionServices")
            .field("interceptors", &self.interceptors)
            .finish_non_exhaustive()
    }
}

/// Handshake phase of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Phase {
    /// Waiting for `connection_init`.
    Uninitialized,
    /// `connection_ack` sent; operations allowed.
    Initialized,
    /// Closing or closed; no further input is processed.
    Closed,
}

/// How a connection ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ConnectionOutcome {
    /// The server closed the socket with this reason.
    ServerClosed(CloseReason),
    /// The peer closed the socket or went away.
    PeerClosed,
    /// The transport failed.
    TransportFailed(TransportError),
}

enum Step {
    Continue,
    Close(CloseReason),
    End(ConnectionOutcome),
}

/// State of one connection. Consumed by [`run`](Self::run).
pub struct ConnectionSession {
    connection_id: String,
    phase: Phase,
    registry: Arc<OperationRegistry>,
    services: Arc<SessionServices>,
    config: ConnectionConfig,
    shutdown: CancellationToken,
    context: Option<Arc<ConnectionContext>>,
}

impl ConnectionSession {
    /// A fresh, uninitialized session.
    pub fn new(
        connection_id: impl Into<String>,
        registry: Arc<OperationRegistry>,
        services: Arc<SessionServices>,
        config: ConnectionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            connection_id: connection_id.into(),
            phase: Phase::Uninitialized,
            registry,
            services,
            config,
            shutdown,
            context: None,
        }
    }

    /// Drive the connection until it closes.
    ///
    /// Every live operation is cancelled before this returns.
    #[instrument(skip_all, fields(connection_id = %self.connection_id))]
    pub async fn run<S: FrameSink>(
        mut self,
        mut inbound: InboundStream,
        sink: S,
    ) -> ConnectionOutcome {
        let (outbound, queue) = outbound_channel(self.config.outbound_buffer);
        let writer = spawn_writer(sink, queue);

        info!("connection opened");
        counter!(WS_CONNECTIONS_TOTAL).increment(1);
        gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);

        let init_deadline = tokio::time::sleep_until(Instant::now() + self.config.init_timeout);
        tokio::pin!(init_deadline);
        let mut keep_alive = self.config.keep_alive.map(|period| {
            let mut interval = tokio::time::interval_at(Instant::now() + period, period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            interval
        });

        let outcome = loop {
            let step = tokio::select! {
                biased;
                () = outbound.overflowed() => Step::Close(CloseReason::OutboundOverflow),
                frame = inbound.next() => self.on_frame(frame, &outbound),
                () = &mut init_deadline, if self.phase == Phase::Uninitialized => {
                    Step::Close(CloseReason::InitTimeout)
                }
                () = self.shutdown.cancelled() => Step::Close(CloseReason::GoingAway),
                () = tick(&mut keep_alive), if self.phase == Phase::Initialized => {
                    let _ = outbound.send(&ProtocolMessage::ping());
                    Step::Continue
                }
            };

            match step {
                Step::Continue => {}
                Step::Close(reason) => {
                    self.close(writer, &reason).await;
                    break ConnectionOutcome::ServerClosed(reason);
                }
                Step::End(outcome) => {
                    self.teardown();
                    writer.abort();
                    break outcome;
                }
            }
        };

        gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
        info!(?outcome, "connection closed");
        outcome
    }

    fn on_frame(
        &mut self,
        frame: Option<Result<InboundFrame, TransportError>>,
        outbound: &OutboundSink,
    ) -> Step {
        let decoded = match frame {
            Some(Ok(InboundFrame::Text(text))) => decode(&text),
            Some(Ok(InboundFrame::Binary(bytes))) => decode_bytes(&bytes),
            Some(Ok(InboundFrame::Close)) | None => {
                return Step::End(ConnectionOutcome::PeerClosed);
            }
            Some(Err(error)) => {
                warn!(error = %error, "transport error");
                return Step::End(ConnectionOutcome::TransportFailed(error));
            }
        };

        match decoded {
            Ok(message) => self.on_message(message, outbound),
            Err(error) => Step::Close(self.rejection(&error)),
        }
    }

    /// Close reason for a frame that failed to decode.
    fn rejection(&self, error: &DecodeError) -> CloseReason {
        if error.is_envelope_error() {
            warn!(error = %error, "undecodable envelope");
            return CloseReason::InvalidMessage;
        }
        warn!(error = %error, message_type = ?error.message_type(), "invalid operation message");
        match (self.phase, error.message_type()) {
            (Phase::Uninitialized, Some(t)) if t != MessageType::ConnectionInit => {
                CloseReason::Unauthorized
            }
            _ => CloseReason::InvalidMessage,
        }
    }

    fn on_message(&mut self, message: ProtocolMessage, outbound: &OutboundSink) -> Step {
        debug!(message_type = %message.message_type(), "message received");
        match (self.phase, message) {
            (Phase::Uninitialized, ProtocolMessage::ConnectionInit { payload }) => {
                self.initialize(payload, outbound);
                Step::Continue
            }
            (Phase::Uninitialized, message) => {
                warn!(message_type = %message.message_type(), "message before connection_init");
                Step::Close(CloseReason::Unauthorized)
            }

            (Phase::Initialized, ProtocolMessage::ConnectionInit { .. }) => {
                Step::Close(CloseReason::TooManyInitRequests)
            }
            (Phase::Initialized, ProtocolMessage::Subscribe { id, payload }) => {
                self.subscribe(id, payload, outbound)
            }
            (Phase::Initialized, ProtocolMessage::Complete { id }) => {
                self.complete(&id);
                Step::Continue
            }
            (Phase::Initialized, ProtocolMessage::Ping { payload }) => {
                let _ = outbound.send(&ProtocolMessage::pong(payload));
                Step::Continue
            }
            (Phase::Initialized, ProtocolMessage::Pong { .. }) => Step::Continue,
            (
                Phase::Initialized,
                message @ (ProtocolMessage::ConnectionAck { .. }
                | ProtocolMessage::Next { .. }
                | ProtocolMessage::Error { .. }),
            ) => {
                warn!(message_type = %message.message_type(), "server-only message from client");
                Step::Close(CloseReason::InvalidMessage)
            }

            (Phase::Closed, _) => Step::Continue,
        }
    }

    fn initialize(&mut self, payload: Option<Payload>, outbound: &OutboundSink) {
        let context =
            ConnectionContext::new(self.connection_id.clone()).with_init_payload(payload);
        let context = self.services.interceptors.apply(context);
        self.context = Some(Arc::new(context));
        self.phase = Phase::Initialized;
        info!("connection initialized");
        let _ = outbound.send(&ProtocolMessage::connection_ack());
    }

    fn subscribe(
        &mut self,
        id: String,
        payload: SubscribePayload,
        outbound: &OutboundSink,
    ) -> Step {
        let registration = match self.registry.register(&id) {
            Ok(registration) => registration,
            Err(RegistryError::AlreadyExists(id)) => {
                return Step::Close(CloseReason::SubscriberExists(id));
            }
            Err(RegistryError::Closed) => return Step::Continue,
        };
        let Some(context) = self.context.clone() else {
            return Step::Close(CloseReason::Unauthorized);
        };

        debug!(operation_id = %id, seq = registration.seq, "operation started");
        counter!(OPERATIONS_STARTED_TOTAL).increment(1);
        let request = ExecutionRequest::from_subscribe(id.clone(), payload);
        let results = self.services.adapter.execute(request, context);
        let _ = spawn_operation(
            id,
            registration,
            results,
            Arc::clone(&self.registry),
            outbound.clone(),
        );
        Step::Continue
    }

    fn complete(&self, id: &str) {
        match self.registry.remove(id) {
            Some(handle) => {
                handle.cancel();
                debug!(operation_id = %id, "operation cancelled by client");
            }
            None => debug!(operation_id = %id, "complete for unknown operation ignored"),
        }
    }

    fn teardown(&mut self) {
        self.phase = Phase::Closed;
        // Each producer counts its own cancellation on exit.
        let cancelled = self.registry.cancel_all();
        if cancelled > 0 {
            debug!(cancelled, "live operations cancelled");
        }
    }

    async fn close(&mut self, writer: WriterHandle, reason: &CloseReason) {
        self.teardown();
        let code = reason.code();
        warn!(code, reason = %reason, "closing connection");
        counter!(WS_CLOSES_TOTAL, "code" => code.to_string()).increment(1);
        writer
            .close(code, reason.reason(), self.config.close_timeout)
            .await;
    }
}

/// Next keep-alive tick; never resolves when keep-alive is disabled.
async fn tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            let _ = interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::transport::{ChannelClient, OutboundFrame, channel_transport};
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use futures::stream;
    use gqlws_core::{
        ExecutionEngine, ExecutionError, ExecutionResult, InitPayloadAttributes, ResultStream,
        StaticAttributes,
    };
    use metrics_exporter_prometheus::PrometheusBuilder;
    use serde_json::{Value, json};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use tokio::task::JoinHandle;

    const INIT_TIMEOUT: Duration = Duration::from_secs(3);

    // ── test engine ─────────────────────────────────────────────────

    /// Reports the operation id when an `endless` stream is dropped.
    struct DropSignal {
        id: String,
        tx: mpsc::UnboundedSender<String>,
    }

    impl Drop for DropSignal {
        fn drop(&mut self) {
            let _ = self.tx.send(self.id.clone());
        }
    }

    struct TestEngine {
        calls: AtomicUsize,
        dropped: mpsc::UnboundedSender<String>,
    }

    #[async_trait]
    impl ExecutionEngine for TestEngine {
        async fn execute(
            &self,
            request: ExecutionRequest,
            context: &ConnectionContext,
        ) -> Result<ResultStream, ExecutionError> {
            let _ = self.calls.fetch_add(1, Ordering::SeqCst);
            match request.query.as_str() {
                "single" => Ok(stream::iter([Ok(ExecutionResult::data(
                    json!({"hello": "world"}),
                ))])
                .boxed()),
                "three" => Ok(stream::iter(
                    (1..=3).map(|i| Ok(ExecutionResult::data(json!({"count": i})))),
                )
                .boxed()),
                "flood" => Ok(stream::iter(
                    (0..1000).map(|i| Ok(ExecutionResult::data(json!({"n": i})))),
                )
                .boxed()),
                "whoami" => {
                    let name = context.attribute("name").cloned().unwrap_or(Value::Null);
                    Ok(stream::iter([Ok(ExecutionResult::data(json!({"name": name})))]).boxed())
                }
                "endless" => {
                    let signal = DropSignal {
                        id: request.operation_id.clone(),
                        tx: self.dropped.clone(),
                    };
                    Ok(async_stream::stream! {
                        let _signal = signal;
                        yield Ok::<_, ExecutionError>(ExecutionResult::data(json!({"tick": 0})));
                        futures::future::pending::<()>().await;
                    }
                    .boxed())
                }
                other => Err(ExecutionError::request(format!(
                    "Cannot query field \"{other}\""
                ))),
            }
        }
    }

    // ── harness ─────────────────────────────────────────────────────

    struct Harness {
        client: ChannelClient,
        engine: Arc<TestEngine>,
        registry: Arc<OperationRegistry>,
        dropped: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
        task: JoinHandle<ConnectionOutcome>,
    }

    fn config() -> ConnectionConfig {
        ConnectionConfig {
            init_timeout: INIT_TIMEOUT,
            keep_alive: None,
            outbound_buffer: 64,
            close_timeout: Duration::from_secs(1),
        }
    }

    fn start() -> Harness {
        start_with(config(), InterceptorChain::new())
    }

    fn start_with(config: ConnectionConfig, interceptors: InterceptorChain) -> Harness {
        let (tx, dropped) = mpsc::unbounded_channel();
        let engine = Arc::new(TestEngine {
            calls: AtomicUsize::new(0),
            dropped: tx,
        });
        let services = SessionServices::new(ExecutionAdapter::new(engine.clone()))
            .with_interceptors(interceptors);
        let registry = Arc::new(OperationRegistry::new());
        let shutdown = CancellationToken::new();
        let (sink, inbound, client) = channel_transport();
        let session = ConnectionSession::new(
            "conn-1",
            Arc::clone(&registry),
            Arc::new(services),
            config,
            shutdown.clone(),
        );
        let task = tokio::spawn(session.run(inbound, sink));
        Harness {
            client,
            engine,
            registry,
            dropped,
            shutdown,
            task,
        }
    }

    impl Harness {
        fn send(&self, message: Value) {
            assert!(self.client.send_text(message.to_string()));
        }

        fn subscribe(&self, id: &str, query: &str) {
            self.send(json!({"id": id, "type": "subscribe", "payload": {"query": query}}));
        }

        async fn recv(&mut self) -> OutboundFrame {
            tokio::time::timeout(Duration::from_secs(60), self.client.recv())
                .await
                .expect("timed out waiting for a frame")
                .expect("server side gone")
        }

        async fn recv_message(&mut self) -> ProtocolMessage {
            match self.recv().await {
                OutboundFrame::Text(text) => decode(&text).unwrap(),
                other => panic!("expected a text frame, got {other:?}"),
            }
        }

        async fn init(&mut self) {
            self.send(json!({"type": "connection_init"}));
            assert_eq!(self.recv_message().await, ProtocolMessage::connection_ack());
        }

        /// Skip text frames until the close frame arrives.
        async fn closed_with(&mut self) -> (u16, String) {
            loop {
                if let OutboundFrame::Close { code, reason } = self.recv().await {
                    return (code, reason);
                }
            }
        }

        async fn outcome(self) -> ConnectionOutcome {
            self.task.await.unwrap()
        }

        fn calls(&self) -> usize {
            self.engine.calls.load(Ordering::SeqCst)
        }
    }

    fn data(value: Value) -> ExecutionResult {
        ExecutionResult::data(value)
    }

    // ── handshake ───────────────────────────────────────────────────

    #[tokio::test]
    async fn subscribe_before_init_is_unauthorized() {
        let mut h = start();
        h.subscribe("1", "single");

        assert_eq!(h.closed_with().await, (4401, "Unauthorized".into()));
        assert_eq!(h.calls(), 0);
        assert_eq!(
            h.outcome().await,
            ConnectionOutcome::ServerClosed(CloseReason::Unauthorized)
        );
    }

    #[tokio::test]
    async fn ping_before_init_is_unauthorized() {
        let mut h = start();
        h.send(json!({"type": "ping"}));
        assert_eq!(h.closed_with().await.0, 4401);
    }

    #[tokio::test]
    async fn malformed_subscribe_before_init_is_unauthorized() {
        let mut h = start();
        h.send(json!({"type": "subscribe", "payload": {"query": "single"}}));
        assert_eq!(h.closed_with().await.0, 4401);
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn exactly_one_ack() {
        let mut h = start();
        h.init().await;
        h.send(json!({"type": "ping"}));
        assert_eq!(h.recv_message().await, ProtocolMessage::pong(None));
        assert!(h.client.try_recv().is_none());
    }

    #[tokio::test]
    async fn init_accepts_binary_frames() {
        let mut h = start();
        let init = br#"{"type":"connection_init","payload":{"token":"t"}}"#.to_vec();
        assert!(h.client.send_frame(InboundFrame::Binary(init)));
        assert_eq!(h.recv_message().await, ProtocolMessage::connection_ack());
    }

    #[tokio::test]
    async fn init_with_non_object_payload_is_invalid() {
        let mut h = start();
        h.send(json!({"type": "connection_init", "payload": [1, 2]}));
        assert_eq!(h.closed_with().await, (4400, "Invalid message".into()));
    }

    #[tokio::test]
    async fn second_init_closes_with_4429() {
        let mut h = start();
        h.init().await;
        h.send(json!({"type": "connection_init"}));
        assert_eq!(
            h.closed_with().await,
            (4429, "Too many initialisation requests".into())
        );
    }

    #[tokio::test]
    async fn second_init_with_live_operation_cancels_it() {
        let mut h = start();
        h.init().await;
        h.subscribe("1", "endless");
        assert_eq!(h.recv_message().await, ProtocolMessage::next("1", data(json!({"tick": 0}))));

        h.send(json!({"type": "connection_init"}));
        assert_eq!(h.closed_with().await.0, 4429);
        assert_eq!(h.dropped.recv().await.as_deref(), Some("1"));
        assert!(h.registry.is_closed());
    }

    // ── init timeout ────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn init_timeout_closes_with_4408() {
        let mut h = start();
        tokio::time::sleep(INIT_TIMEOUT - Duration::from_millis(1)).await;
        assert!(h.client.try_recv().is_none());

        assert_eq!(
            h.closed_with().await,
            (4408, "Connection initialisation timeout".into())
        );
        assert_eq!(
            h.outcome().await,
            ConnectionOutcome::ServerClosed(CloseReason::InitTimeout)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn init_just_before_deadline_keeps_connection() {
        let mut h = start();
        tokio::time::sleep(INIT_TIMEOUT - Duration::from_millis(1)).await;
        h.init().await;

        tokio::time::sleep(INIT_TIMEOUT * 10).await;
        assert!(h.client.try_recv().is_none());
        assert!(!h.task.is_finished());
    }

    // ── operations ──────────────────────────────────────────────────

    #[tokio::test]
    async fn single_result_query() {
        let mut h = start();
        h.init().await;
        h.subscribe("1", "single");

        assert_eq!(
            h.recv_message().await,
            ProtocolMessage::next("1", data(json!({"hello": "world"})))
        );
        assert_eq!(h.recv_message().await, ProtocolMessage::complete("1"));
        assert_eq!(h.calls(), 1);
    }

    #[tokio::test]
    async fn three_element_subscription_in_order() {
        let mut h = start();
        h.init().await;
        h.subscribe("5", "three");

        for i in 1..=3 {
            assert_eq!(
                h.recv_message().await,
                ProtocolMessage::next("5", data(json!({"count": i})))
            );
        }
        assert_eq!(h.recv_message().await, ProtocolMessage::complete("5"));
    }

    #[tokio::test]
    async fn duplicate_live_id_closes_with_4409() {
        let mut h = start();
        h.init().await;
        h.subscribe("a", "endless");
        let _ = h.recv_message().await;

        h.subscribe("a", "single");
        assert_eq!(
            h.closed_with().await,
            (4409, "Subscriber for a already exists".into())
        );
        assert_eq!(h.calls(), 1);
        assert_eq!(h.dropped.recv().await.as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn id_reusable_after_complete() {
        let mut h = start();
        h.init().await;
        for _ in 0..2 {
            h.subscribe("1", "single");
            assert_matches!(h.recv_message().await, ProtocolMessage::Next { .. });
            assert_eq!(h.recv_message().await, ProtocolMessage::complete("1"));
        }
        assert_eq!(h.calls(), 2);
    }

    #[tokio::test]
    async fn id_reusable_after_client_complete() {
        let mut h = start();
        h.init().await;
        h.subscribe("1", "endless");
        let _ = h.recv_message().await;
        h.send(json!({"id": "1", "type": "complete"}));
        assert_eq!(h.dropped.recv().await.as_deref(), Some("1"));

        h.subscribe("1", "single");
        assert_matches!(h.recv_message().await, ProtocolMessage::Next { id, .. } if id == "1");
        assert_eq!(h.recv_message().await, ProtocolMessage::complete("1"));
    }

    #[tokio::test]
    async fn subscribe_without_id_is_invalid() {
        let mut h = start();
        h.init().await;
        h.send(json!({"type": "subscribe", "payload": {"query": "single"}}));
        assert_eq!(h.closed_with().await, (4400, "Invalid message".into()));
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn subscribe_with_undecodable_payload_is_invalid() {
        let mut h = start();
        h.init().await;
        h.send(json!({"id": "1", "type": "subscribe", "payload": "single"}));
        assert_eq!(h.closed_with().await.0, 4400);
        assert_eq!(h.calls(), 0);
    }

    #[tokio::test]
    async fn engine_error_is_scoped_to_operation() {
        let mut h = start();
        h.init().await;
        h.subscribe("7", "nope");

        let ProtocolMessage::Error { id, payload } = h.recv_message().await else {
            panic!("expected an error message");
        };
        assert_eq!(id, "7");
        assert_eq!(payload[0].message, "Cannot query field \"nope\"");

        h.send(json!({"type": "ping"}));
        assert_eq!(h.recv_message().await, ProtocolMessage::pong(None));
        assert!(!h.task.is_finished());
    }

    #[tokio::test]
    async fn complete_cancels_only_that_operation() {
        let mut h = start();
        h.init().await;
        h.subscribe("a", "endless");
        h.subscribe("b", "endless");
        let _ = h.recv_message().await;
        let _ = h.recv_message().await;

        h.send(json!({"id": "a", "type": "complete"}));
        assert_eq!(h.dropped.recv().await.as_deref(), Some("a"));
        assert!(!h.registry.contains("a"));
        assert!(h.registry.contains("b"));
        assert!(h.dropped.try_recv().is_err());
    }

    #[tokio::test]
    async fn complete_for_unknown_id_is_ignored() {
        let mut h = start();
        h.init().await;
        h.send(json!({"id": "zzz", "type": "complete"}));
        h.send(json!({"type": "ping"}));
        assert_eq!(h.recv_message().await, ProtocolMessage::pong(None));
    }

    // ── other messages ──────────────────────────────────────────────

    #[tokio::test]
    async fn ping_echoes_payload() {
        let mut h = start();
        h.init().await;
        h.send(json!({"type": "ping", "payload": {"k": 1}}));
        let ProtocolMessage::Pong { payload } = h.recv_message().await else {
            panic!("expected pong");
        };
        assert_eq!(Value::Object(payload.unwrap()), json!({"k": 1}));
    }

    #[tokio::test]
    async fn pong_is_ignored() {
        let mut h = start();
        h.init().await;
        h.send(json!({"type": "pong"}));
        h.send(json!({"type": "ping"}));
        assert_eq!(h.recv_message().await, ProtocolMessage::pong(None));
    }

    #[tokio::test]
    async fn missing_type_after_init_is_invalid() {
        let mut h = start();
        h.init().await;
        h.send(json!({"id": "1"}));
        assert_eq!(h.closed_with().await.0, 4400);
    }

    #[tokio::test]
    async fn non_json_is_invalid_before_init() {
        let mut h = start();
        assert!(h.client.send_text("not json"));
        assert_eq!(h.closed_with().await.0, 4400);
    }

    #[tokio::test]
    async fn server_only_types_are_invalid() {
        for message in [
            json!({"type": "connection_ack"}),
            json!({"id": "1", "type": "next", "payload": {}}),
            json!({"id": "1", "type": "error", "payload": []}),
        ] {
            let mut h = start();
            h.init().await;
            h.send(message);
            assert_eq!(h.closed_with().await.0, 4400);
        }
    }

    // ── interceptors ────────────────────────────────────────────────

    #[tokio::test]
    async fn context_passes_through_interceptors() {
        let chain = || {
            InterceptorChain::new()
                .with(StaticAttributes::new().with("name", json!("James")))
                .with(InitPayloadAttributes)
        };

        let mut h = start_with(config(), chain());
        h.init().await;
        h.subscribe("1", "whoami");
        assert_eq!(
            h.recv_message().await,
            ProtocolMessage::next("1", data(json!({"name": "James"})))
        );

        let mut h = start_with(config(), chain());
        h.send(json!({"type": "connection_init", "payload": {"name": "Ada"}}));
        let _ = h.recv_message().await;
        h.subscribe("1", "whoami");
        assert_eq!(
            h.recv_message().await,
            ProtocolMessage::next("1", data(json!({"name": "Ada"})))
        );
    }

    // ── teardown ────────────────────────────────────────────────────

    #[tokio::test]
    async fn disconnect_cancels_every_operation() {
        let mut h = start();
        h.init().await;
        for id in ["a", "b", "c"] {
            h.subscribe(id, "endless");
        }
        for _ in 0..3 {
            let _ = h.recv_message().await;
        }

        h.client.disconnect();
        let mut dropped = Vec::new();
        for _ in 0..3 {
            dropped.push(h.dropped.recv().await.unwrap());
        }
        dropped.sort();
        assert_eq!(dropped, ["a", "b", "c"]);
        assert!(h.registry.is_closed());
        assert_eq!(h.outcome().await, ConnectionOutcome::PeerClosed);
    }

    #[tokio::test]
    async fn disconnect_counts_each_cancelled_operation_once() {
        let recorder = PrometheusBuilder::new().build_recorder();
        let metrics = recorder.handle();
        let _guard = metrics::set_default_local_recorder(&recorder);

        let mut h = start();
        h.init().await;
        h.subscribe("1", "endless");
        let _ = h.recv_message().await;

        h.client.disconnect();
        assert_eq!(h.dropped.recv().await.as_deref(), Some("1"));
        assert_eq!(h.outcome().await, ConnectionOutcome::PeerClosed);
        tokio::task::yield_now().await;

        let rendered = metrics.render();
        let has = |line: &str| rendered.lines().any(|l| l == line);
        assert!(has("operations_started_total 1"), "{rendered}");
        assert!(has("operations_cancelled_total 1"), "{rendered}");
    }

    #[tokio::test]
    async fn close_frame_from_peer_ends_session() {
        let h = start();
        assert!(h.client.send_frame(InboundFrame::Close));
        assert_eq!(h.outcome().await, ConnectionOutcome::PeerClosed);
    }

    #[tokio::test]
    async fn transport_error_ends_session() {
        let h = start();
        let error = TransportError::WebSocket("connection reset".into());
        assert!(h.client.fail(error.clone()));
        assert_eq!(h.outcome().await, ConnectionOutcome::TransportFailed(error));
    }

    #[tokio::test]
    async fn shutdown_closes_with_1001() {
        let mut h = start();
        h.init().await;
        h.subscribe("1", "endless");
        let _ = h.recv_message().await;

        h.shutdown.cancel();
        assert_eq!(h.closed_with().await, (1001, "Server shutting down".into()));
        assert_eq!(h.dropped.recv().await.as_deref(), Some("1"));
        assert_eq!(
            h.outcome().await,
            ConnectionOutcome::ServerClosed(CloseReason::GoingAway)
        );
    }

    #[tokio::test]
    async fn outbound_overflow_closes_with_1013() {
        let mut h = start_with(
            ConnectionConfig {
                outbound_buffer: 4,
                ..config()
            },
            InterceptorChain::new(),
        );
        h.init().await;
        h.subscribe("1", "flood");

        assert_eq!(h.closed_with().await, (1013, "Outbound buffer overflow".into()));
        assert_eq!(
            h.outcome().await,
            ConnectionOutcome::ServerClosed(CloseReason::OutboundOverflow)
        );
    }

    // ── keep-alive ──────────────────────────────────────────────────

    #[tokio::test(start_paused = true)]
    async fn keep_alive_pings_once_initialized() {
        let mut h = start_with(
            ConnectionConfig {
                keep_alive: Some(Duration::from_secs(10)),
                ..config()
            },
            InterceptorChain::new(),
        );
        h.init().await;
        assert_eq!(h.recv_message().await, ProtocolMessage::ping());
        assert_eq!(h.recv_message().await, ProtocolMessage::ping());
    }

    #[tokio::test(start_paused = true)]
    async fn keep_alive_waits_for_init() {
        let mut h = start_with(
            ConnectionConfig {
                keep_alive: Some(Duration::from_millis(500)),
                ..config()
            },
            InterceptorChain::new(),
        );
        assert_eq!(h.recv().await, OutboundFrame::Close {
            code: 4408,
            reason: "Connection initialisation timeout".into(),
        });
    }
}

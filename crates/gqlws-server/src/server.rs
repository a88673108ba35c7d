//! `GatewayServer`: axum HTTP + WebSocket server.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use axum::Router;
use axum::extract::State;
use axum::extract::ws::WebSocketUpgrade;
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::get;
use gqlws_core::{ExecutionAdapter, ExecutionEngine, InterceptorChain, SUBPROTOCOL};
use metrics_exporter_prometheus::PrometheusHandle;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::{ConnectionConfig, ServerConfig};
use crate::errors::ServerError;
use crate::health::{self, HealthResponse};
use crate::shutdown::{DrainReport, ShutdownCoordinator};
use crate::tracker::ConnectionTracker;
use crate::websocket::connection::{ConnectionSession, SessionServices};
use crate::websocket::registry::OperationRegistry;
use crate::websocket::transport::split_socket;

/// Shared state accessible from axum handlers.
#[derive(Clone)]
struct AppState {
    services: Arc<SessionServices>,
    tracker: Arc<ConnectionTracker>,
    shutdown: CancellationToken,
    connection: ConnectionConfig,
    max_message_size: usize,
    start_time: Instant,
    metrics: Option<PrometheusHandle>,
}

/// The gateway server.
pub struct GatewayServer {
    config: ServerConfig,
    services: SessionServices,
    tracker: Arc<ConnectionTracker>,
    shutdown: Arc<ShutdownCoordinator>,
    metrics: Option<PrometheusHandle>,
    start_time: Instant,
}

/// A running listener.
#[derive(Debug)]
pub struct ServerHandle {
    addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }
}

impl GatewayServer {
    /// Create a server executing operations on `engine`.
    pub fn new(config: ServerConfig, engine: Arc<dyn ExecutionEngine>) -> Self {
        let tracker = Arc::new(ConnectionTracker::new(config.max_connections));
        Self {
            config,
            services: SessionServices::new(ExecutionAdapter::new(engine)),
            tracker,
            shutdown: Arc::new(ShutdownCoordinator::new()),
            metrics: None,
            start_time: Instant::now(),
        }
    }

    /// Decorate every connection context with `interceptors`.
    #[must_use]
    pub fn with_interceptors(mut self, interceptors: InterceptorChain) -> Self {
        self.services = self.services.with_interceptors(interceptors);
        self
    }

    /// Serve `/metrics` from this Prometheus handle.
    #[must_use]
    pub fn with_metrics(mut self, handle: PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }

    /// Build the axum router with all routes.
    pub fn router(&self) -> Router {
        let state = AppState {
            services: Arc::new(self.services.clone()),
            tracker: Arc::clone(&self.tracker),
            shutdown: self.shutdown.token(),
            connection: self.config.connection.clone(),
            max_message_size: self.config.max_message_size,
            start_time: self.start_time,
            metrics: self.metrics.clone(),
        };

        Router::new()
            .route(&self.config.path, get(ws_handler))
            .route("/health", get(health_handler))
            .route("/metrics", get(metrics_handler))
            .with_state(state)
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
    }

    /// Bind the configured address and start serving in the background.
    pub async fn listen(&self) -> Result<ServerHandle, ServerError> {
        let bind = self.config.bind_address();
        let addr: SocketAddr = bind
            .parse()
            .map_err(|source| ServerError::Address { addr: bind, source })?;
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|source| ServerError::Bind { addr, source })?;
        let local_addr = listener.local_addr()?;

        let router = self.router();
        let token = self.shutdown.token();
        let task = tokio::spawn(async move {
            let served = axum::serve(listener, router)
                .with_graceful_shutdown(async move { token.cancelled().await })
                .await;
            if let Err(e) = served {
                error!(error = %e, "server error");
            }
        });

        info!(addr = %local_addr, path = %self.config.path, "gateway listening");
        Ok(ServerHandle {
            addr: local_addr,
            task,
        })
    }

    /// Stop accepting, close every connection with 1001 and wait up to
    /// `shutdown_timeout` for them.
    pub async fn stop(&self, handle: ServerHandle) -> DrainReport {
        self.shutdown
            .drain(&self.tracker, handle.task, self.config.shutdown_timeout)
            .await
    }

    /// Get the server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get the connection tracker.
    pub fn tracker(&self) -> &Arc<ConnectionTracker> {
        &self.tracker
    }

    /// Get the shutdown coordinator.
    pub fn shutdown(&self) -> &Arc<ShutdownCoordinator> {
        &self.shutdown
    }
}

/// GET {path}: upgrade to a `graphql-transport-ws` connection.
async fn ws_handler(
    State(state): State<AppState>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.shutdown.is_cancelled() {
        return (StatusCode::SERVICE_UNAVAILABLE, "server shutting down").into_response();
    }
    let Some(mut slot) = state.tracker.try_reserve() else {
        warn!(max = state.tracker.max(), "connection limit reached, rejecting upgrade");
        return (StatusCode::SERVICE_UNAVAILABLE, "too many connections").into_response();
    };
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    ws.protocols([SUBPROTOCOL])
        .max_message_size(state.max_message_size)
        .on_upgrade(move |socket| async move {
            let connection_id = Uuid::now_v7().to_string();
            let registry = Arc::new(OperationRegistry::new());
            slot.bind(connection_id.clone(), Arc::clone(&registry));

            let (sink, inbound) = split_socket(socket);
            let session = ConnectionSession::new(
                connection_id,
                registry,
                state.services,
                state.connection,
                state.shutdown,
            );
            let _ = session.run(inbound, sink).await;
            drop(slot);
        })
}

/// GET /health
async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    let resp = health::health_check(
        state.start_time,
        state.tracker.count(),
        state.tracker.active_operations(),
    );
    Json(resp)
}

/// GET /metrics
async fn metrics_handler(State(state): State<AppState>) -> Response {
    match &state.metrics {
        Some(handle) => handle.render().into_response(),
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

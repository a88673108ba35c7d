//! End-to-end tests against a real listener.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt, stream};
use gqlws_core::{
    ConnectionContext, ExecutionEngine, ExecutionError, ExecutionRequest, ExecutionResult,
    ResultStream, SUBPROTOCOL,
};
use gqlws_server::{GatewayServer, ServerConfig, ServerHandle};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

const TIMEOUT: Duration = Duration::from_secs(5);

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

struct CountingEngine;

#[async_trait]
impl ExecutionEngine for CountingEngine {
    async fn execute(
        &self,
        request: ExecutionRequest,
        _context: &ConnectionContext,
    ) -> Result<ResultStream, ExecutionError> {
        match request.query.as_str() {
            "{ hello }" => {
                Ok(stream::iter([Ok(ExecutionResult::data(json!({"hello": "world"})))]).boxed())
            }
            "subscription { count }" => Ok(stream::iter(
                (1..=3).map(|i| Ok(ExecutionResult::data(json!({"count": i})))),
            )
            .boxed()),
            "subscription { forever }" => Ok(stream::pending().boxed()),
            _ => Err(ExecutionError::request("unknown operation")),
        }
    }
}

async fn boot_server(config: ServerConfig) -> (GatewayServer, ServerHandle) {
    let server = GatewayServer::new(config, Arc::new(CountingEngine));
    let handle = server.listen().await.unwrap();
    (server, handle)
}

async fn connect(handle: &ServerHandle) -> Client {
    let url = format!("ws://{}/graphql", handle.local_addr());
    let mut request = url.into_client_request().unwrap();
    let _ = request
        .headers_mut()
        .insert("Sec-WebSocket-Protocol", HeaderValue::from_static(SUBPROTOCOL));
    let (socket, response) = tokio::time::timeout(TIMEOUT, connect_async(request))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        response.headers().get("Sec-WebSocket-Protocol").unwrap(),
        SUBPROTOCOL
    );
    socket
}

async fn send(client: &mut Client, value: Value) {
    client.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn recv(client: &mut Client) -> Message {
    loop {
        let message = tokio::time::timeout(TIMEOUT, client.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        if !matches!(message, Message::Ping(_) | Message::Pong(_)) {
            return message;
        }
    }
}

async fn recv_json(client: &mut Client) -> Value {
    match recv(client).await {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("expected text, got {other:?}"),
    }
}

async fn recv_close(client: &mut Client) -> (u16, String) {
    match recv(client).await {
        Message::Close(Some(frame)) => (u16::from(frame.code), frame.reason.as_str().to_owned()),
        other => panic!("expected close, got {other:?}"),
    }
}

async fn init(client: &mut Client) {
    send(client, json!({"type": "connection_init"})).await;
    assert_eq!(recv_json(client).await, json!({"type": "connection_ack"}));
}

async fn http_get(handle: &ServerHandle, path: &str) -> String {
    let mut stream = TcpStream::connect(handle.local_addr()).await.unwrap();
    let request = format!("GET {path} HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n");
    stream.write_all(request.as_bytes()).await.unwrap();
    let mut response = String::new();
    let _ = tokio::time::timeout(TIMEOUT, stream.read_to_string(&mut response))
        .await
        .unwrap()
        .unwrap();
    response
}

// ── protocol ────────────────────────────────────────────────────────

#[tokio::test]
async fn single_result_query_over_websocket() {
    let (_server, handle) = boot_server(ServerConfig::default()).await;
    let mut client = connect(&handle).await;
    init(&mut client).await;

    send(
        &mut client,
        json!({"id": "1", "type": "subscribe", "payload": {"query": "{ hello }"}}),
    )
    .await;
    assert_eq!(
        recv_json(&mut client).await,
        json!({"id": "1", "type": "next", "payload": {"data": {"hello": "world"}}})
    );
    assert_eq!(
        recv_json(&mut client).await,
        json!({"id": "1", "type": "complete"})
    );
}

#[tokio::test]
async fn subscription_streams_in_order() {
    let (_server, handle) = boot_server(ServerConfig::default()).await;
    let mut client = connect(&handle).await;
    init(&mut client).await;

    send(
        &mut client,
        json!({"id": "5", "type": "subscribe", "payload": {"query": "subscription { count }"}}),
    )
    .await;
    for i in 1..=3 {
        let message = recv_json(&mut client).await;
        assert_eq!(message["id"], "5");
        assert_eq!(message["type"], "next");
        assert_eq!(message["payload"]["data"]["count"], i);
    }
    assert_eq!(
        recv_json(&mut client).await,
        json!({"id": "5", "type": "complete"})
    );
}

#[tokio::test]
async fn engine_error_is_reported_without_closing() {
    let (_server, handle) = boot_server(ServerConfig::default()).await;
    let mut client = connect(&handle).await;
    init(&mut client).await;

    send(
        &mut client,
        json!({"id": "e", "type": "subscribe", "payload": {"query": "{ nope }"}}),
    )
    .await;
    assert_eq!(
        recv_json(&mut client).await,
        json!({"id": "e", "type": "error", "payload": [{"message": "unknown operation"}]})
    );

    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv_json(&mut client).await, json!({"type": "pong"}));
}

#[tokio::test]
async fn subscribe_before_init_closes_4401() {
    let (_server, handle) = boot_server(ServerConfig::default()).await;
    let mut client = connect(&handle).await;

    send(
        &mut client,
        json!({"id": "1", "type": "subscribe", "payload": {"query": "{ hello }"}}),
    )
    .await;
    assert_eq!(recv_close(&mut client).await, (4401, "Unauthorized".into()));
}

#[tokio::test]
async fn duplicate_id_closes_4409() {
    let (_server, handle) = boot_server(ServerConfig::default()).await;
    let mut client = connect(&handle).await;
    init(&mut client).await;

    let subscribe =
        json!({"id": "x", "type": "subscribe", "payload": {"query": "subscription { forever }"}});
    send(&mut client, subscribe.clone()).await;
    send(&mut client, subscribe).await;
    assert_eq!(
        recv_close(&mut client).await,
        (4409, "Subscriber for x already exists".into())
    );
}

#[tokio::test]
async fn init_timeout_closes_4408() {
    let mut config = ServerConfig::default();
    config.connection.init_timeout = Duration::from_millis(100);
    let (_server, handle) = boot_server(config).await;
    let mut client = connect(&handle).await;

    assert_eq!(
        recv_close(&mut client).await,
        (4408, "Connection initialisation timeout".into())
    );
}

// ── server ──────────────────────────────────────────────────────────

#[tokio::test]
async fn health_counts_connections_and_operations() {
    let (_server, handle) = boot_server(ServerConfig::default()).await;
    let mut client = connect(&handle).await;
    init(&mut client).await;
    send(
        &mut client,
        json!({"id": "1", "type": "subscribe", "payload": {"query": "subscription { forever }"}}),
    )
    .await;
    // Round trip so the subscribe has been processed.
    send(&mut client, json!({"type": "ping"})).await;
    assert_eq!(recv_json(&mut client).await, json!({"type": "pong"}));

    let response = http_get(&handle, "/health").await;
    assert!(response.starts_with("HTTP/1.1 200"));
    let body = response.split("\r\n\r\n").nth(1).unwrap();
    let health: Value = serde_json::from_str(body).unwrap();
    assert_eq!(health["status"], "ok");
    assert_eq!(health["connections"], 1);
    assert_eq!(health["active_operations"], 1);
}

#[tokio::test]
async fn connection_limit_rejects_upgrade() {
    let (_server, handle) = boot_server(ServerConfig {
        max_connections: 1,
        ..ServerConfig::default()
    })
    .await;
    let _first = connect(&handle).await;

    let url = format!("ws://{}/graphql", handle.local_addr());
    let err = connect_async(url).await.unwrap_err();
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 503);
        }
        other => panic!("expected HTTP 503, got {other:?}"),
    }
}

#[tokio::test]
async fn stop_closes_connections_with_1001() {
    let (server, handle) = boot_server(ServerConfig::default()).await;
    let mut client = connect(&handle).await;
    init(&mut client).await;

    let client_task = tokio::spawn(async move { recv_close(&mut client).await });
    assert!(server.stop(handle).await.is_clean());
    assert_eq!(
        client_task.await.unwrap(),
        (1001, "Server shutting down".into())
    );
    assert_eq!(server.tracker().count(), 0);
}

//! Transport seam between the connection state machine and a socket.
//!
//! The state machine reads [`InboundFrame`]s from an [`InboundStream`] and
//! writes through a [`FrameSink`]. Two transports are provided: the axum
//! `WebSocket` adapter used by the HTTP server, and an in-memory channel
//! transport for tests and embedding.

use async_trait::async_trait;
use axum::extract::ws::{CloseFrame, Message, WebSocket};
use futures::stream::{BoxStream, SplitSink};
use futures::{SinkExt, StreamExt};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;

/// A data frame received from the peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum InboundFrame {
    /// Text frame.
    Text(String),
    /// Binary frame (accepted when it carries UTF-8 JSON).
    Binary(Vec<u8>),
    /// The peer sent a close frame.
    Close,
}

/// Transport-level failure.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The underlying WebSocket reported an error.
    #[error("websocket error: {0}")]
    WebSocket(String),
    /// The other side is gone.
    #[error("transport closed")]
    Closed,
}

/// Frames arriving from the peer. Ends when the peer disconnects.
pub type InboundStream = BoxStream<'static, Result<InboundFrame, TransportError>>;

/// Write half of a transport.
#[async_trait]
pub trait FrameSink: Send + 'static {
    /// Send one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), TransportError>;

    /// Send a close frame and shut the write half.
    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError>;
}

// ── axum ────────────────────────────────────────────────────────────

/// Write half of an axum `WebSocket`.
pub struct AxumSink {
    inner: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl FrameSink for AxumSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.inner
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError> {
        let frame = CloseFrame {
            code,
            reason: reason.into(),
        };
        self.inner
            .send(Message::Close(Some(frame)))
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))?;
        self.inner
            .close()
            .await
            .map_err(|e| TransportError::WebSocket(e.to_string()))
    }
}

/// Split an upgraded socket into the two transport halves.
///
/// Protocol-level ping/pong frames are answered by the WebSocket layer and do
/// not reach the state machine.
pub fn split_socket(socket: WebSocket) -> (AxumSink, InboundStream) {
    let (sink, stream) = socket.split();
    let inbound = stream
        .filter_map(|message| async move {
            match message {
                Ok(Message::Text(text)) => Some(Ok(InboundFrame::Text(text.as_str().to_owned()))),
                Ok(Message::Binary(data)) => Some(Ok(InboundFrame::Binary(data.to_vec()))),
                Ok(Message::Close(_)) => Some(Ok(InboundFrame::Close)),
                Ok(Message::Ping(_) | Message::Pong(_)) => None,
                Err(e) => Some(Err(TransportError::WebSocket(e.to_string()))),
            }
        })
        .boxed();
    (AxumSink { inner: sink }, inbound)
}

// ── in-memory ───────────────────────────────────────────────────────

/// A frame written by the server side of a channel transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Text frame.
    Text(String),
    /// Close frame.
    Close {
        /// Close code.
        code: u16,
        /// Close reason.
        reason: String,
    },
}

/// Server write half of a channel transport.
#[derive(Debug)]
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<OutboundFrame>,
}

#[async_trait]
impl FrameSink for ChannelSink {
    async fn send_text(&mut self, text: String) -> Result<(), TransportError> {
        self.tx
            .send(OutboundFrame::Text(text))
            .map_err(|_| TransportError::Closed)
    }

    async fn close(&mut self, code: u16, reason: String) -> Result<(), TransportError> {
        self.tx
            .send(OutboundFrame::Close { code, reason })
            .map_err(|_| TransportError::Closed)
    }
}

/// Client end of a channel transport.
#[derive(Debug)]
pub struct ChannelClient {
    tx: Option<mpsc::UnboundedSender<Result<InboundFrame, TransportError>>>,
    rx: mpsc::UnboundedReceiver<OutboundFrame>,
}

impl ChannelClient {
    /// Deliver a text frame to the server. Returns `false` once disconnected.
    pub fn send_text(&self, text: impl Into<String>) -> bool {
        self.send_frame(InboundFrame::Text(text.into()))
    }

    /// Deliver any frame to the server.
    pub fn send_frame(&self, frame: InboundFrame) -> bool {
        self.push(Ok(frame))
    }

    /// Make the server's inbound stream yield a transport error.
    pub fn fail(&self, error: TransportError) -> bool {
        self.push(Err(error))
    }

    /// End the server's inbound stream, as if the socket dropped.
    pub fn disconnect(&mut self) {
        self.tx = None;
    }

    /// Next frame written by the server; `None` once the server side is gone.
    pub async fn recv(&mut self) -> Option<OutboundFrame> {
        self.rx.recv().await
    }

    /// A frame already written by the server, without waiting.
    pub fn try_recv(&mut self) -> Option<OutboundFrame> {
        self.rx.try_recv().ok()
    }

    fn push(&self, item: Result<InboundFrame, TransportError>) -> bool {
        self.tx.as_ref().is_some_and(|tx| tx.send(item).is_ok())
    }
}

/// Create an in-memory transport: the server halves and the client end.
pub fn channel_transport() -> (ChannelSink, InboundStream, ChannelClient) {
    let (in_tx, in_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel();
    let inbound = UnboundedReceiverStream::new(in_rx).boxed();
    let client = ChannelClient {
        tx: Some(in_tx),
        rx: out_rx,
    };
    (ChannelSink { tx: out_tx }, inbound, client)
}

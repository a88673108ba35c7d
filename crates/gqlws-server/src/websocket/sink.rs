//! Bounded outbound queue and the writer task that drains it.
//!
//! Every producer (the connection task and each operation task) holds a clone
//! of [`OutboundSink`] and enqueues without waiting. A full queue trips the
//! overflow signal; the connection task observes it and closes with 1013.

use std::time::Duration;

use gqlws_core::{EncodeError, ProtocolMessage, encode};
use metrics::counter;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::transport::FrameSink;
use crate::metrics::OUTBOUND_OVERFLOWS_TOTAL;

/// Why a message was not enqueued.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The queue is full; the connection is being closed.
    #[error("outbound buffer overflow")]
    Overflow,
    /// The writer has stopped.
    #[error("outbound sink closed")]
    Closed,
    /// The message could not be serialized.
    #[error(transparent)]
    Encode(#[from] EncodeError),
}

/// Producer handle of a connection's outbound queue.
#[derive(Clone, Debug)]
pub struct OutboundSink {
    tx: mpsc::Sender<String>,
    overflow: CancellationToken,
}

impl OutboundSink {
    /// Encode and enqueue `message` without waiting.
    pub fn send(&self, message: &ProtocolMessage) -> Result<(), SinkError> {
        let text = encode(message)?;
        match self.tx.try_send(text) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                if !self.overflow.is_cancelled() {
                    counter!(OUTBOUND_OVERFLOWS_TOTAL).increment(1);
                    warn!(
                        message_type = %message.message_type(),
                        "outbound buffer full"
                    );
                    self.overflow.cancel();
                }
                Err(SinkError::Overflow)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkError::Closed),
        }
    }

    /// Whether the queue has overflowed.
    pub fn is_overflowed(&self) -> bool {
        self.overflow.is_cancelled()
    }

    /// Resolves once the queue has overflowed.
    pub async fn overflowed(&self) {
        self.overflow.cancelled().await;
    }
}

/// Consumer end of the queue, handed to [`spawn_writer`].
#[derive(Debug)]
pub struct OutboundQueue {
    rx: mpsc::Receiver<String>,
}

#[cfg(test)]
impl OutboundQueue {
    pub(crate) fn try_recv(&mut self) -> Option<String> {
        self.rx.try_recv().ok()
    }
}

/// A bounded queue holding at most `capacity` encoded messages.
pub fn outbound_channel(capacity: usize) -> (OutboundSink, OutboundQueue) {
    let (tx, rx) = mpsc::channel(capacity.max(1));
    let sink = OutboundSink {
        tx,
        overflow: CancellationToken::new(),
    };
    (sink, OutboundQueue { rx })
}

/// Control handle for a running writer task.
#[derive(Debug)]
pub struct WriterHandle {
    close_tx: oneshot::Sender<(u16, String)>,
    task: JoinHandle<()>,
}

impl WriterHandle {
    /// Flush queued messages, then send a close frame.
    ///
    /// Waits at most `timeout` for the writer, then aborts it.
    pub async fn close(self, code: u16, reason: String, timeout: Duration) {
        let Self { close_tx, mut task } = self;
        let _ = close_tx.send((code, reason));
        if tokio::time::timeout(timeout, &mut task).await.is_err() {
            warn!(code, "writer did not finish closing in time");
            task.abort();
        }
    }

    /// Stop the writer without sending anything further.
    pub fn abort(self) {
        self.task.abort();
    }
}

/// Spawn the task that owns the write half of the transport.
pub fn spawn_writer<S: FrameSink>(mut sink: S, queue: OutboundQueue) -> WriterHandle {
    let (close_tx, mut close_rx) = oneshot::channel::<(u16, String)>();
    let OutboundQueue { mut rx } = queue;

    let task = tokio::spawn(async move {
        loop {
            tokio::select! {
                biased;
                close = &mut close_rx => {
                    if let Ok((code, reason)) = close {
                        while let Ok(text) = rx.try_recv() {
                            if sink.send_text(text).await.is_err() {
                                return;
                            }
                        }
                        if let Err(e) = sink.close(code, reason).await {
                            debug!(error = %e, "close frame not delivered");
                        }
                    }
                    return;
                }
                next = rx.recv() => {
                    let Some(text) = next else { return };
                    if let Err(e) = sink.send_text(text).await {
                        debug!(error = %e, "write failed, stopping writer");
                        return;
                    }
                }
            }
        }
    });

    WriterHandle { close_tx, task }
}

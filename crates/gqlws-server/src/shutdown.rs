//! Graceful shutdown: stop the listener, close every connection with 1001 and
//! wait for the tracker to drain.

use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::tracker::ConnectionTracker;

/// What was still live when a drain ended.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DrainReport {
    /// Connections whose tasks had not finished.
    pub lingering_connections: usize,
    /// Operations registered on those connections.
    pub lingering_operations: usize,
}

impl DrainReport {
    /// Every connection closed before the deadline.
    pub fn is_clean(&self) -> bool {
        self.lingering_connections == 0
    }

    fn snapshot(tracker: &ConnectionTracker) -> Self {
        Self {
            lingering_connections: tracker.count(),
            lingering_operations: tracker.active_operations(),
        }
    }
}

/// Owns the server-wide shutdown token.
///
/// Connection tasks hold a clone of [`token`](Self::token) and close their
/// socket with 1001 once it is cancelled.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    token: CancellationToken,
}

impl ShutdownCoordinator {
    /// Create a new shutdown coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// A clone of the cancellation token.
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }

    /// Initiate shutdown.
    pub fn shutdown(&self) {
        self.token.cancel();
    }

    /// Whether a shutdown has been initiated.
    pub fn is_shutting_down(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Cancel the token, then wait up to `timeout` for the listener task to
    /// exit and for `tracker` to report no live connection.
    pub async fn drain(
        &self,
        tracker: &ConnectionTracker,
        listener: JoinHandle<()>,
        timeout: Duration,
    ) -> DrainReport {
        self.shutdown();
        info!(
            connections = tracker.count(),
            operations = tracker.active_operations(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "draining connections"
        );

        let drained = async {
            if let Err(e) = listener.await {
                warn!(error = %e, "listener task failed");
            }
            tracker.wait_idle().await;
        };
        if tokio::time::timeout(timeout, drained).await.is_ok() {
            return DrainReport::default();
        }

        let report = DrainReport::snapshot(tracker);
        warn!(
            connections = report.lingering_connections,
            operations = report.lingering_operations,
            "shutdown timed out after {timeout:?}"
        );
        report
    }
}

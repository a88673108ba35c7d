//! Server-wide connection tracking.
//!
//! Enforces `max_connections` and backs `/health`. Each accepted upgrade holds
//! a [`ConnectionSlot`]; dropping the slot releases it.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use dashmap::DashMap;
use tokio::sync::Notify;

use crate::websocket::registry::OperationRegistry;

/// Counts live connections and indexes their operation registries.
#[derive(Debug)]
pub struct ConnectionTracker {
    active: AtomicUsize,
    max: usize,
    registries: DashMap<String, Arc<OperationRegistry>>,
    idle: Notify,
}

impl ConnectionTracker {
    /// A tracker admitting at most `max` concurrent connections.
    pub fn new(max: usize) -> Self {
        Self {
            active: AtomicUsize::new(0),
            max,
            registries: DashMap::new(),
            idle: Notify::new(),
        }
    }

    /// Claim a slot, or `None` when the limit is reached.
    pub fn try_reserve(self: &Arc<Self>) -> Option<ConnectionSlot> {
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
                (n < self.max).then_some(n + 1)
            })
            .ok()?;
        Some(ConnectionSlot {
            tracker: Arc::clone(self),
            connection_id: None,
        })
    }

    /// Live connections, including upgrades still in progress.
    pub fn count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// The connection limit.
    pub fn max(&self) -> usize {
        self.max
    }

    /// Live operations summed over every bound connection.
    pub fn active_operations(&self) -> usize {
        self.registries.iter().map(|entry| entry.value().len()).sum()
    }

    /// Resolves once no connection is live.
    pub async fn wait_idle(&self) {
        loop {
            let notified = self.idle.notified();
            if self.count() == 0 {
                return;
            }
            notified.await;
        }
    }

    fn release(&self, connection_id: Option<&str>) {
        if let Some(id) = connection_id {
            let _ = self.registries.remove(id);
        }
        if self.active.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.idle.notify_waiters();
        }
    }
}

/// A reserved connection slot. Released on drop.
#[derive(Debug)]
pub struct ConnectionSlot {
    tracker: Arc<ConnectionTracker>,
    connection_id: Option<String>,
}

impl ConnectionSlot {
    /// Attach the connection's registry so its operations show up in
    /// [`ConnectionTracker::active_operations`].
    pub fn bind(&mut self, connection_id: impl Into<String>, registry: Arc<OperationRegistry>) {
        let connection_id = connection_id.into();
        let _ = self
            .tracker
            .registries
            .insert(connection_id.clone(), registry);
        self.connection_id = Some(connection_id);
    }
}

impl Drop for ConnectionSlot {
    fn drop(&mut self) {
        self.tracker.release(self.connection_id.as_deref());
    }
}

//! Per-connection registry of live operations.
//!
//! The connection task registers and removes ids; each operation's producer
//! task emits through [`OperationRegistry::emit`] and ends through
//! [`OperationRegistry::finish`]. All of these take the same short-lived
//! lock, so:
//!
//! - no element is enqueued after a `complete` or teardown has removed the
//!   entry
//! - the terminal message is enqueued in the same critical section that frees
//!   the id, so a client that has seen `complete` can immediately reuse it
//! - a producer can only remove the registration it was started with
//!   (`seq`), never a newer one that reused its id

use std::collections::HashMap;

use parking_lot::Mutex;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Why an id could not be registered.
#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum RegistryError {
    /// The id belongs to a live operation.
    #[error("operation {0} already exists")]
    AlreadyExists(String),
    /// The connection is tearing down.
    #[error("registry is closed")]
    Closed,
}

/// Handed to the producer of a newly registered operation.
#[derive(Clone, Debug)]
pub struct Registration {
    /// Registration sequence number.
    pub seq: u64,
    /// Cancelled when the operation is removed or the connection closes.
    pub token: CancellationToken,
}

/// A registry entry.
#[derive(Debug)]
pub struct OperationHandle {
    seq: u64,
    token: CancellationToken,
}

impl OperationHandle {
    /// Registration sequence number.
    pub fn seq(&self) -> u64 {
        self.seq
    }

    /// Signal the producer to stop. Cancelling twice is a no-op.
    pub fn cancel(&self) {
        self.token.cancel();
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<String, OperationHandle>,
    next_seq: u64,
    closed: bool,
}

/// Live operations of one connection, keyed by client-chosen id.
#[derive(Debug, Default)]
pub struct OperationRegistry {
    inner: Mutex<Inner>,
}

impl OperationRegistry {
    /// Empty, open registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically check `id` is free and claim it.
    pub fn register(&self, id: &str) -> Result<Registration, RegistryError> {
        let mut inner = self.inner.lock();
        if inner.closed {
            return Err(RegistryError::Closed);
        }
        if inner.entries.contains_key(id) {
            return Err(RegistryError::AlreadyExists(id.to_owned()));
        }
        inner.next_seq += 1;
        let seq = inner.next_seq;
        let token = CancellationToken::new();
        let _ = inner.entries.insert(
            id.to_owned(),
            OperationHandle {
                seq,
                token: token.clone(),
            },
        );
        Ok(Registration { seq, token })
    }

    /// Remove `id`. The caller decides whether to cancel the returned handle.
    pub fn remove(&self, id: &str) -> Option<OperationHandle> {
        self.inner.lock().entries.remove(id)
    }

    /// Run `f` only while registration `seq` of `id` is live.
    ///
    /// Returns `None` (without running `f`) once it has been removed.
    pub fn emit<R>(&self, id: &str, seq: u64, f: impl FnOnce() -> R) -> Option<R> {
        let inner = self.inner.lock();
        match inner.entries.get(id) {
            Some(handle) if handle.seq == seq => Some(f()),
            _ => None,
        }
    }

    /// Remove registration `seq` of `id` and run `f` in the same critical
    /// section.
    ///
    /// Returns `None` (without running `f`) if that registration is already
    /// gone.
    pub fn finish<R>(&self, id: &str, seq: u64, f: impl FnOnce() -> R) -> Option<R> {
        let mut inner = self.inner.lock();
        match inner.entries.get(id) {
            Some(handle) if handle.seq == seq => {
                let _ = inner.entries.remove(id);
                Some(f())
            }
            _ => None,
        }
    }

    /// Close the registry and cancel every live operation.
    ///
    /// Later registrations fail with [`RegistryError::Closed`]. Returns the
    /// number of operations cancelled.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<OperationHandle> = {
            let mut inner = self.inner.lock();
            inner.closed = true;
            inner.entries.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &drained {
            handle.cancel();
        }
        drained.len()
    }

    /// Number of live operations.
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether no operation is live.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether `id` is live.
    pub fn contains(&self, id: &str) -> bool {
        self.inner.lock().entries.contains_key(id)
    }

    /// Whether [`cancel_all`](Self::cancel_all) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

//! Sync status and its subscribers.

use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use tracing::debug;

/// Snapshot of the sync engine's state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    /// A drain is in progress.
    pub is_syncing: bool,
    /// Unsynced records across all kinds, abandoned ones included.
    pub pending_count: usize,
}

type Listener = Arc<dyn Fn(SyncStatus) + Send + Sync>;

#[derive(Default)]
struct Listeners {
    current: SyncStatus,
    next_id: u64,
    entries: BTreeMap<u64, Listener>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Fans status changes out to subscribers.
///
/// A new subscriber receives the current status immediately; afterwards it
/// is called once per change, in the order changes were published.
/// Listeners must not publish or subscribe from inside the callback.
#[derive(Clone, Default)]
pub struct StatusPublisher {
    state: Arc<Mutex<Listeners>>,
    // Held across callbacks so deliveries never interleave.
    delivery: Arc<Mutex<()>>,
}

impl StatusPublisher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Last published status.
    pub fn current(&self) -> SyncStatus {
        lock(&self.state).current
    }

    /// Publish a status. Returns `false` and notifies nobody if unchanged.
    pub fn publish(&self, status: SyncStatus) -> bool {
        let _delivery = lock(&self.delivery);

        let listeners: Vec<Listener> = {
            let mut state = lock(&self.state);
            if state.current == status {
                return false;
            }
            state.current = status;
            state.entries.values().cloned().collect()
        };

        debug!(
            "Sync status: syncing={} pending={}",
            status.is_syncing, status.pending_count
        );
        for listener in listeners {
            listener(status);
        }
        true
    }

    /// Register a listener and deliver the current status to it.
    pub fn subscribe<F>(&self, listener: F) -> Subscription
    where
        F: Fn(SyncStatus) + Send + Sync + 'static,
    {
        let _delivery = lock(&self.delivery);
        let listener: Listener = Arc::new(listener);

        let (id, current) = {
            let mut state = lock(&self.state);
            let id = state.next_id;
            state.next_id += 1;
            state.entries.insert(id, listener.clone());
            (id, state.current)
        };

        listener(current);

        Subscription {
            id,
            state: Arc::downgrade(&self.state),
        }
    }

    /// Number of registered listeners.
    pub fn subscriber_count(&self) -> usize {
        lock(&self.state).entries.len()
    }
}

/// Keeps a listener registered. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    state: Weak<Mutex<Listeners>>,
}

impl Subscription {
    /// Stop receiving status changes.
    pub fn unsubscribe(self) {
        // Dropping self unregisters.
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(state) = self.state.upgrade() {
            lock(&state).entries.remove(&self.id);
        }
    }
}

//! Bounded component change history with subscriber notification.
//!
//! Every component attach, mutation, and detach produces a [`ChangeRecord`].
//! The [`ChangeTracker`] appends records to a capacity-bounded history
//! (oldest evicted first) and fans each record out to subscribers, optionally
//! filtered to a single component kind. Subscriptions are explicit tokens:
//! callers hold a [`SubscriptionId`] and release it when done, so dispatch
//! never has to guess at liveness.
//!
//! A panicking subscriber is caught and logged at the dispatch boundary;
//! remaining subscribers still receive the record.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use crate::component::ComponentId;
use crate::entity::Entity;

/// Change records kept before the oldest is evicted.
pub const DEFAULT_HISTORY_CAPACITY: usize = 10_000;

// ---------------------------------------------------------------------------
// ChangeRecord
// ---------------------------------------------------------------------------

/// What happened to the component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum ChangeKind {
    Added,
    Modified,
    Removed,
}

/// One component state change.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct ChangeRecord {
    pub entity: Entity,
    pub component: ComponentId,
    pub kind: ChangeKind,
    /// World-clock timestamp supplied by the caller, in milliseconds.
    pub timestamp_ms: u64,
}

// ---------------------------------------------------------------------------
// Subscriptions
// ---------------------------------------------------------------------------

/// Token returned by [`ChangeTracker::subscribe`]. Release it with
/// [`ChangeTracker::unsubscribe`] to stop delivery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

struct Subscriber {
    /// `None` subscribes to every component kind.
    filter: Option<ComponentId>,
    callback: Box<dyn Fn(&ChangeRecord) + Send + Sync>,
}

// ---------------------------------------------------------------------------
// ChangeTracker
// ---------------------------------------------------------------------------

/// Bounded history of component changes plus its subscriber registry.
///
/// All methods take `&self`; the history and registry each sit behind their
/// own reader/writer lock. Dispatch snapshots the matching subscribers and
/// runs callbacks with no tracker lock held, so callbacks may subscribe,
/// unsubscribe, and read history freely.
pub struct ChangeTracker {
    history: RwLock<VecDeque<ChangeRecord>>,
    capacity: usize,
    subscribers: RwLock<IndexMap<SubscriptionId, Arc<Subscriber>>>,
    next_token: AtomicU64,
}

impl ChangeTracker {
    /// Create a tracker holding [`DEFAULT_HISTORY_CAPACITY`] records.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_HISTORY_CAPACITY)
    }

    /// Create a tracker holding at most `capacity` records.
    ///
    /// # Panics
    ///
    /// Panics when `capacity` is zero.
    pub fn with_capacity(capacity: usize) -> Self {
        assert!(capacity > 0, "history capacity must be positive");
        Self {
            history: RwLock::new(VecDeque::with_capacity(capacity.min(1024))),
            capacity,
            subscribers: RwLock::new(IndexMap::new()),
            next_token: AtomicU64::new(0),
        }
    }

    /// Maximum records retained.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    // -- recording ------------------------------------------------------------

    /// Append a record and notify matching subscribers.
    pub fn record(&self, record: ChangeRecord) {
        {
            let mut history = self.history.write();
            if history.len() == self.capacity {
                history.pop_front();
            }
            history.push_back(record);
        }
        self.dispatch(&record);
    }

    /// Record a component attach.
    pub fn record_added(&self, entity: Entity, component: ComponentId, timestamp_ms: u64) {
        self.record(ChangeRecord {
            entity,
            component,
            kind: ChangeKind::Added,
            timestamp_ms,
        });
    }

    /// Record an in-place component mutation.
    pub fn record_modified(&self, entity: Entity, component: ComponentId, timestamp_ms: u64) {
        self.record(ChangeRecord {
            entity,
            component,
            kind: ChangeKind::Modified,
            timestamp_ms,
        });
    }

    /// Record a component detach.
    pub fn record_removed(&self, entity: Entity, component: ComponentId, timestamp_ms: u64) {
        self.record(ChangeRecord {
            entity,
            component,
            kind: ChangeKind::Removed,
            timestamp_ms,
        });
    }

    fn dispatch(&self, record: &ChangeRecord) {
        let matching: Vec<(SubscriptionId, Arc<Subscriber>)> = self
            .subscribers
            .read()
            .iter()
            .filter(|(_, sub)| sub.filter.is_none() || sub.filter == Some(record.component))
            .map(|(&id, sub)| (id, sub.clone()))
            .collect();

        for (id, subscriber) in matching {
            let outcome = catch_unwind(AssertUnwindSafe(|| (subscriber.callback)(record)));
            if let Err(payload) = outcome {
                tracing::warn!(
                    subscription = id.0,
                    entity = %record.entity,
                    component = %record.component,
                    "change subscriber panicked: {}",
                    panic_message(&payload)
                );
            }
        }
    }

    // -- subscriptions -----------------------------------------------------------

    /// Register a callback for every record matching `filter` (`None` for
    /// all components). Returns the token that releases the subscription.
    pub fn subscribe<F>(&self, filter: Option<ComponentId>, callback: F) -> SubscriptionId
    where
        F: Fn(&ChangeRecord) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().insert(
            id,
            Arc::new(Subscriber {
                filter,
                callback: Box::new(callback),
            }),
        );
        id
    }

    /// Release a subscription. Returns whether the token was live.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.write().shift_remove(&id).is_some()
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    // -- history access ------------------------------------------------------------

    /// Records currently retained.
    pub fn history_len(&self) -> usize {
        self.history.read().len()
    }

    /// The most recent `n` records, oldest first.
    pub fn recent(&self, n: usize) -> Vec<ChangeRecord> {
        let history = self.history.read();
        let skip = history.len().saturating_sub(n);
        history.iter().skip(skip).copied().collect()
    }

    /// Every retained record touching `entity`, oldest first.
    pub fn records_for(&self, entity: Entity) -> Vec<ChangeRecord> {
        self.history
            .read()
            .iter()
            .filter(|record| record.entity == entity)
            .copied()
            .collect()
    }

    /// Every retained record for component `id`, oldest first.
    pub fn records_for_component(&self, id: ComponentId) -> Vec<ChangeRecord> {
        self.history
            .read()
            .iter()
            .filter(|record| record.component == id)
            .copied()
            .collect()
    }

    /// Every retained record stamped at or after `timestamp_ms`, oldest
    /// first. Records evicted by the capacity bound are gone regardless of
    /// their timestamp.
    pub fn changes_since(&self, timestamp_ms: u64) -> Vec<ChangeRecord> {
        self.history
            .read()
            .iter()
            .filter(|record| record.timestamp_ms >= timestamp_ms)
            .copied()
            .collect()
    }

    /// Drop all retained records. Subscriptions are unaffected.
    pub fn clear_history(&self) {
        self.history.write().clear();
    }
}

impl Default for ChangeTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for ChangeTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChangeTracker")
            .field("capacity", &self.capacity)
            .field("history_len", &self.history.read().len())
            .field("subscribers", &self.subscribers.read().len())
            .finish()
    }
}

/// Best-effort text of a caught panic payload.
pub fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "non-string panic payload"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

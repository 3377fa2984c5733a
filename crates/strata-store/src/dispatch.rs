//! Subscription registry and the pending-update queue.
//!
//! Subscriptions are keyed by a monotonically increasing id that is
//! never reused, held in a `BTreeMap` so ascending iteration is
//! registration order and descending iteration is reverse-enqueue
//! (LIFO) order for the drain. Pending updates are keyed by
//! subscription id; re-enqueueing an id overwrites its delta, which is
//! what coalesces multiple changes for one subscriber into a single
//! delivered notification.
//!
//! Everything here is single-threaded; callbacks are `Rc<dyn Fn>` so a
//! delivery can safely re-enter the store (and even re-trigger itself)
//! without aliasing mutable state.

use crate::accessor::AccessorSpec;
use crate::delta::Delta;
use std::cell::{Cell, RefCell};
use std::collections::BTreeMap;
use std::rc::Rc;

/// Subscriber callback: receives the reconstructed delta.
pub(crate) type Callback = Rc<dyn Fn(Delta)>;

/// One registered subscriber.
pub(crate) struct SubscriptionRecord {
    pub spec: AccessorSpec,
    pub callback: Callback,
}

/// A queued notification for one subscriber.
pub(crate) struct PendingUpdate {
    pub delta: Delta,
    pub first_level: Vec<String>,
}

/// Active subscriptions plus the shared pending queue.
pub(crate) struct Registry {
    subscriptions: RefCell<BTreeMap<u64, Rc<SubscriptionRecord>>>,
    pending: RefCell<BTreeMap<u64, PendingUpdate>>,
    next_id: Cell<u64>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            subscriptions: RefCell::new(BTreeMap::new()),
            pending: RefCell::new(BTreeMap::new()),
            // Id 0 is reserved for the inert guard.
            next_id: Cell::new(1),
        }
    }

    /// Register a subscriber and return its fresh id.
    pub fn add(&self, spec: AccessorSpec, callback: Callback) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.subscriptions
            .borrow_mut()
            .insert(id, Rc::new(SubscriptionRecord { spec, callback }));
        id
    }

    /// Remove a subscriber. Idempotent; returns whether it existed.
    /// Its pending entry (if any) stays queued so the drain still
    /// advances snapshots for its keys, but skips the callback.
    pub fn remove(&self, id: u64) -> bool {
        self.subscriptions.borrow_mut().remove(&id).is_some()
    }

    /// True when the id is still registered.
    pub fn contains(&self, id: u64) -> bool {
        self.subscriptions.borrow().contains_key(&id)
    }

    /// Number of active subscriptions.
    pub fn len(&self) -> usize {
        self.subscriptions.borrow().len()
    }

    /// Snapshot of registered ids in registration order.
    pub fn ids(&self) -> Vec<u64> {
        self.subscriptions.borrow().keys().copied().collect()
    }

    /// Look up one record.
    pub fn get(&self, id: u64) -> Option<Rc<SubscriptionRecord>> {
        self.subscriptions.borrow().get(&id).cloned()
    }

    /// Queue (or overwrite) the pending update for a subscriber.
    pub fn enqueue(&self, id: u64, update: PendingUpdate) {
        self.pending.borrow_mut().insert(id, update);
    }

    /// Snapshot of pending ids in reverse-enqueue (descending id)
    /// order.
    pub fn pending_ids_desc(&self) -> Vec<u64> {
        self.pending.borrow().keys().rev().copied().collect()
    }

    /// Remove and return one pending update, if still queued.
    pub fn take_pending(&self, id: u64) -> Option<PendingUpdate> {
        self.pending.borrow_mut().remove(&id)
    }
}

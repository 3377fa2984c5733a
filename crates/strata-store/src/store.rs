//! The store facade: public operations and the dispatch loop.
//!
//! A [`Store`] is a cheaply cloneable handle to single-threaded shared
//! state. All mutation, diffing and delivery for one call to
//! `set`/`reset`/`delete` completes synchronously before the call
//! returns; correctness rests on the dispatch ordering below rather
//! than on locks.
//!
//! # Dispatch ordering
//!
//! A notify pass has two phases. The *scan* walks subscriptions in
//! registration order, computes each delta against the `previous`
//! snapshots and queues dirty subscribers into the shared pending map
//! (coalescing by id). The *drain* processes pending ids in reverse
//! order; for each it first advances `previous = current` for exactly
//! that subscriber's first-level keys, removes the pending entry, and
//! only then, if the subscription still exists, invokes the callback.
//! A callback that re-enters the store triggers a nested pass over the
//! same pending map, so an outer not-yet-delivered delta is overwritten
//! and delivered exactly once with the final value, and a subscriber
//! disposed mid-drain is skipped (its snapshots still advance, so a
//! later re-subscription never diffs against stale state).

use crate::accessor::{Accessor, AccessorSpec};
use crate::debug::{DebugFlag, DebugFlags};
use crate::delta::{self, Delta};
use crate::dispatch::{PendingUpdate, Registry};
use crate::entry::{StateEntry, StateTable};
use crate::error::{value_type_name, StoreError, StoreResult};
use crate::patch::{Patch, PatchKind, StateView};
use crate::sync::{SyncLayer, SyncTransport};
use serde_json::{Map, Value};
use std::cell::RefCell;
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::time::Instant;

/// Builder for a [`Store`].
pub struct StoreBuilder {
    initial: Value,
    sync_keys: HashSet<String>,
    transport: Option<Rc<dyn SyncTransport>>,
    debug_flags: DebugFlags,
}

impl StoreBuilder {
    fn new(initial: Value) -> Self {
        Self {
            initial,
            sync_keys: HashSet::new(),
            transport: None,
            debug_flags: DebugFlags::none(),
        }
    }

    /// Allow-list of top-level keys mirrored to other contexts.
    /// Synchronization stays off while this is empty.
    pub fn sync_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.sync_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Outbound transport for cross-context synchronization.
    pub fn transport(mut self, transport: impl SyncTransport + 'static) -> Self {
        self.transport = Some(Rc::new(transport));
        self
    }

    /// Diagnostic channels to enable.
    pub fn debug_flags(mut self, flags: DebugFlags) -> Self {
        self.debug_flags = flags;
        self
    }

    /// Build the store. A non-object initial state is logged and
    /// treated as empty.
    pub fn build(self) -> Store {
        let initial = match self.initial {
            Value::Object(map) => map,
            other => {
                tracing::warn!(
                    found = value_type_name(&other),
                    "initial state must be an object; starting empty"
                );
                Map::new()
            }
        };

        Store {
            inner: Rc::new(StoreInner {
                table: RefCell::new(StateTable::from_initial(&initial)),
                initial,
                registry: Registry::new(),
                sync: SyncLayer::new(self.transport, self.sync_keys),
                flags: self.debug_flags,
            }),
        }
    }
}

pub(crate) struct StoreInner {
    initial: Map<String, Value>,
    table: RefCell<StateTable>,
    registry: Registry,
    sync: SyncLayer,
    flags: DebugFlags,
}

/// Fine-grained subscription state store.
///
/// Cloning the handle shares the same underlying state. The store is
/// single-threaded (`!Send`); see the module docs for the dispatch
/// ordering guarantees.
#[derive(Clone)]
pub struct Store {
    inner: Rc<StoreInner>,
}

impl Store {
    /// Create a store from its initial state object.
    pub fn new(initial: Value) -> Self {
        Self::builder(initial).build()
    }

    /// Start building a store with synchronization or diagnostics.
    pub fn builder(initial: Value) -> StoreBuilder {
        StoreBuilder::new(initial)
    }

    /// Register a subscriber for the given accessors.
    ///
    /// Returns the disposer guard together with the current
    /// reconstructed value of the accessors (compares ignored), so a
    /// binding layer can render immediately and re-render on change.
    /// Invalid accessors are logged; the result is then an inert guard
    /// and an empty delta.
    pub fn subscribe<I, A, F>(&self, accessors: I, callback: F) -> (SubscriptionGuard, Delta)
    where
        I: IntoIterator<Item = A>,
        A: Into<Accessor>,
        F: Fn(Delta) + 'static,
    {
        match self.try_subscribe(accessors, callback) {
            Ok(subscribed) => subscribed,
            Err(e) => {
                tracing::warn!(error = %e, "subscribe ignored");
                (SubscriptionGuard::inert(), Delta::empty())
            }
        }
    }

    /// Fallible variant of [`subscribe`](Self::subscribe).
    pub fn try_subscribe<I, A, F>(
        &self,
        accessors: I,
        callback: F,
    ) -> StoreResult<(SubscriptionGuard, Delta)>
    where
        I: IntoIterator<Item = A>,
        A: Into<Accessor>,
        F: Fn(Delta) + 'static,
    {
        let spec = AccessorSpec::parse(accessors)?;

        let current = {
            let table = self.inner.table.borrow();
            delta::compute(&table, &spec, true, None).unwrap_or_default()
        };

        let id = self.inner.registry.add(spec, Rc::new(callback));
        self.inner.log_subscriber_count();

        Ok((
            SubscriptionGuard {
                id,
                store: Rc::downgrade(&self.inner),
            },
            current,
        ))
    }

    /// Synchronous point read: reconstruct the accessors' current
    /// values, bypassing subscriptions and always ignoring compares.
    /// Invalid accessors are logged and yield an empty delta.
    pub fn get<I, A>(&self, accessors: I) -> Delta
    where
        I: IntoIterator<Item = A>,
        A: Into<Accessor>,
    {
        match self.try_get(accessors) {
            Ok(found) => found,
            Err(e) => {
                tracing::warn!(error = %e, "get ignored");
                Delta::empty()
            }
        }
    }

    /// Fallible variant of [`get`](Self::get).
    pub fn try_get<I, A>(&self, accessors: I) -> StoreResult<Delta>
    where
        I: IntoIterator<Item = A>,
        A: Into<Accessor>,
    {
        let spec = AccessorSpec::parse(accessors)?;
        let table = self.inner.table.borrow();
        Ok(delta::compute(&table, &spec, true, None).unwrap_or_default())
    }

    /// Apply a patch and notify affected subscribers synchronously.
    ///
    /// Accepts a JSON object, a [`PatchMap`](crate::PatchMap), or a
    /// deriving patch; anything else is logged and ignored. Keys whose
    /// incoming value is shallowly identical to the current one do not
    /// count as changed.
    pub fn set(&self, patch: impl Into<Patch>) {
        self.inner.apply(patch.into(), false);
    }

    /// Like [`set`](Self::set), but defers delivery: `current` updates
    /// immediately (visible to `get`), while subscriber notification
    /// and snapshot advancement wait for a [`flush`](Self::flush) of
    /// the changed keys.
    pub fn set_deferred(&self, patch: impl Into<Patch>) {
        self.inner.apply(patch.into(), true);
    }

    /// Apply a patch derived from the full current state.
    pub fn set_with(&self, f: impl FnOnce(&StateView) -> Value + 'static) {
        self.set(Patch::deriving(f));
    }

    /// Reset keys to their captured defaults. With no accessors, every
    /// key is reset. Keys already at their default are untouched.
    pub fn reset<I, A>(&self, accessors: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<Accessor>,
    {
        let mut keys = to_keys(accessors);
        if keys.is_empty() {
            keys = self.inner.table.borrow().keys();
        }
        if keys.is_empty() {
            return;
        }

        let changed = self.inner.table.borrow_mut().reset_keys(&keys);
        if !changed.is_empty() {
            self.inner.notify_all(false, Some(&changed));
        }
    }

    /// Reset the entire store to a freshly cloned initial structure.
    ///
    /// Snapshot continuity is broken: every subscriber whose keys
    /// existed before or after is re-delivered, and keys created since
    /// initialization disappear.
    pub fn reset_all(&self) {
        let changed = self
            .inner
            .table
            .borrow_mut()
            .reset_all(&self.inner.initial);
        if !changed.is_empty() {
            self.inner.notify_all(true, Some(&changed));
        }
    }

    /// Remove keys entirely; subsequent reads of a deleted key resolve
    /// to `null`. Zero accessors is a logged no-op.
    pub fn delete<I, A>(&self, accessors: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<Accessor>,
    {
        let keys = to_keys(accessors);
        if keys.is_empty() {
            tracing::warn!(error = %StoreError::empty_accessors(), "delete ignored");
            return;
        }

        let removed = self.inner.table.borrow_mut().delete_keys(&keys);
        if !removed.is_empty() {
            self.inner.notify_all(true, Some(&removed));
        }
    }

    /// Deliver deferred changes for the given keys (all, when none are
    /// given): clears their skip markers and runs a full notify pass so
    /// queued changes reach subscribers and `previous` finally
    /// advances.
    pub fn flush<I, A>(&self, accessors: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<Accessor>,
    {
        let keys = to_keys(accessors);
        self.inner
            .table
            .borrow_mut()
            .clear_deferred(if keys.is_empty() { None } else { Some(&keys) });
        self.inner.notify_all(false, None);
    }

    /// [`flush`](Self::flush) for every deferred key.
    pub fn flush_all(&self) {
        self.flush(Vec::<Accessor>::new());
    }

    /// Apply an inbound synchronization payload.
    ///
    /// Parses the JSON patch text, filters it to the allow-listed keys
    /// and applies the remainder through the normal assign + dispatch
    /// path. Re-broadcasting is suppressed for the duration, so inbound
    /// patches never echo. Malformed payloads are logged and dropped.
    pub fn apply_sync_message(&self, payload: &str) {
        if !self.inner.sync.is_active() {
            return;
        }

        let patch = match self.inner.sync.decode_inbound(payload) {
            Ok(patch) => patch,
            Err(e) => {
                tracing::warn!(error = %e, "ignoring malformed sync payload");
                return;
            }
        };
        if patch.is_empty() {
            return;
        }

        self.inner.sync.set_applying_remote(true);
        self.inner.apply(Patch::from(patch), false);
        self.inner.sync.set_applying_remote(false);
    }

    /// Read-only snapshot of the full current state.
    pub fn state_view(&self) -> StateView {
        self.inner.state_view()
    }

    /// Number of active subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry.len()
    }

    /// True when the store currently holds the key.
    pub fn contains_key(&self, key: &str) -> bool {
        self.inner.table.borrow().contains_key(key)
    }

    /// All top-level keys currently in the store.
    pub fn keys(&self) -> Vec<String> {
        self.inner.table.borrow().keys()
    }

    /// Read-only copy of one key's stored entry (default, previous and
    /// current snapshots), for diagnostics and tests.
    pub fn entry(&self, key: &str) -> Option<StateEntry> {
        self.inner.table.borrow().entry(key).cloned()
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("keys", &self.inner.table.borrow().keys())
            .field("subscribers", &self.inner.registry.len())
            .finish()
    }
}

impl StoreInner {
    fn state_view(&self) -> StateView {
        StateView::new(self.table.borrow().current_values())
    }

    /// Resolve and apply one patch, then broadcast and dispatch.
    fn apply(&self, patch: Patch, defer: bool) {
        let map = match patch.into_kind() {
            PatchKind::Direct(map) => map,
            PatchKind::Deriving(derive) => {
                let view = self.state_view();
                match Patch::from(derive(&view)).into_kind() {
                    PatchKind::Direct(map) => map,
                    PatchKind::Invalid(found) => {
                        tracing::warn!(found, "deriving patch must return an object");
                        return;
                    }
                    PatchKind::Deriving(_) => unreachable!("derived patches are direct"),
                }
            }
            PatchKind::Invalid(found) => {
                tracing::warn!(found, "set expects an object patch or deriving closure");
                return;
            }
        };

        if map.is_empty() {
            return;
        }

        let changed = self.table.borrow_mut().assign(&map);
        if changed.is_empty() {
            return;
        }

        self.sync.broadcast(&map);

        if defer {
            self.table.borrow_mut().mark_deferred(&changed);
        } else {
            self.notify_all(false, Some(&changed));
        }
    }

    /// One notify pass: scan subscriptions, queue dirty ones, drain.
    fn notify_all(&self, ignore_compares: bool, changed: Option<&[String]>) {
        let pass_start = self
            .flags
            .contains(DebugFlag::DispatchTiming)
            .then(Instant::now);

        for id in self.registry.ids() {
            let Some(record) = self.registry.get(id) else {
                continue;
            };

            let diff_start = self
                .flags
                .contains(DebugFlag::DiffTiming)
                .then(Instant::now);

            let outcome = {
                let table = self.table.borrow();
                delta::compute(&table, &record.spec, ignore_compares, changed)
            };

            if let Some(start) = diff_start {
                tracing::debug!(
                    subscriber = id,
                    elapsed_us = start.elapsed().as_micros() as u64,
                    "delta build"
                );
            }

            if let Some(delta) = outcome {
                self.registry.enqueue(
                    id,
                    PendingUpdate {
                        delta,
                        first_level: record.spec.first_level().to_vec(),
                    },
                );
            }
        }

        let mut delivered = 0usize;
        for id in self.registry.pending_ids_desc() {
            // A nested pass inside an earlier callback may have drained
            // this entry already.
            let Some(update) = self.registry.take_pending(id) else {
                continue;
            };

            self.table.borrow_mut().advance(&update.first_level);

            if let Some(record) = self.registry.get(id) {
                let callback = Rc::clone(&record.callback);
                drop(record);
                (*callback)(update.delta);
                delivered += 1;
            }
        }

        if let Some(start) = pass_start {
            tracing::debug!(
                components = delivered,
                elapsed_us = start.elapsed().as_micros() as u64,
                "dispatch pass"
            );
        }
    }

    fn unsubscribe(&self, id: u64) {
        if self.registry.remove(id) {
            self.log_subscriber_count();
        }
    }

    fn log_subscriber_count(&self) {
        if self.flags.contains(DebugFlag::SubscriberCount) {
            tracing::debug!(count = self.registry.len(), "active subscribers");
        }
    }
}

/// Collect raw accessors into top-level key strings.
fn to_keys<I, A>(accessors: I) -> Vec<String>
where
    I: IntoIterator<Item = A>,
    A: Into<Accessor>,
{
    accessors
        .into_iter()
        .map(|a| String::from(a.into()))
        .collect()
}

/// Disposer for one subscription.
///
/// Dropping the guard (or calling [`dispose`](Self::dispose))
/// unregisters the subscriber. Disposal is idempotent and safe at any
/// time, including from inside a callback during a dispatch pass.
#[must_use = "dropping the guard unsubscribes immediately"]
pub struct SubscriptionGuard {
    id: u64,
    store: Weak<StoreInner>,
}

impl SubscriptionGuard {
    /// Guard that was never attached to a live subscription.
    pub(crate) fn inert() -> Self {
        Self {
            id: 0,
            store: Weak::new(),
        }
    }

    /// The subscription id (unique for the store's lifetime).
    pub fn id(&self) -> u64 {
        self.id
    }

    /// True while the subscription is still registered.
    pub fn is_active(&self) -> bool {
        self.store
            .upgrade()
            .map_or(false, |inner| inner.registry.contains(self.id))
    }

    /// Unregister the subscription now.
    pub fn dispose(&self) {
        if let Some(inner) = self.store.upgrade() {
            inner.unsubscribe(self.id);
        }
    }
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl fmt::Debug for SubscriptionGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SubscriptionGuard")
            .field("id", &self.id)
            .field("active", &self.is_active())
            .finish()
    }
}

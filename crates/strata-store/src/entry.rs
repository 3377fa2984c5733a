//! Per-key state entries and the table that owns them.
//!
//! Every top-level key maps to a `{default, previous, current}` triple.
//! Values are held as [`SharedValue`] (`Arc<serde_json::Value>`): the
//! store and its callers share them freely, and Rust's ownership rules
//! make mutating a stored value in place impossible; values only ever
//! change by being replaced.
//!
//! Change detection is shallow by contract: containers (objects and
//! arrays) compare by identity (`Arc::ptr_eq`), scalars by value. A
//! structurally equal but freshly allocated object therefore counts as
//! changed, while re-assigning the very same handle does not. This keeps
//! the per-key change check O(1) regardless of value size.

use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::Arc;

/// Shared, immutable JSON value.
pub type SharedValue = Arc<Value>;

/// The "last seen" snapshot of a key.
///
/// `Unseen` marks an entry whose current value has never been delivered
/// to any subscriber (newly created or just reset). It compares unequal
/// to everything, and path walks through it resolve to "missing", so the
/// next dispatch always observes a change.
#[derive(Clone, Debug)]
pub enum Previous {
    /// No delivery has observed this entry yet.
    Unseen,
    /// The value as of the last delivery that observed this key.
    Seen(SharedValue),
}

/// One top-level key's stored state.
#[derive(Clone, Debug)]
pub struct StateEntry {
    /// Clone captured at initialization or creation; the reset target.
    default: SharedValue,
    /// Snapshot subscribers diff against.
    previous: Previous,
    /// Live value, replaced only by reference.
    current: SharedValue,
}

impl StateEntry {
    /// Entry built during store initialization. `previous` and
    /// `current` share one handle so a freshly initialized key compares
    /// clean under the identity contract.
    fn initial(value: &Value) -> Self {
        let current = Arc::new(value.clone());
        Self {
            default: Arc::new(value.clone()),
            previous: Previous::Seen(current.clone()),
            current,
        }
    }

    /// Entry created by an assignment to an unknown key. `previous`
    /// starts out unseen so the creation itself is observable.
    fn created(value: SharedValue) -> Self {
        Self {
            default: Arc::new((*value).clone()),
            previous: Previous::Unseen,
            current: value,
        }
    }

    /// The default value captured at creation.
    #[inline]
    pub fn default_value(&self) -> &Value {
        &self.default
    }

    /// The last-seen snapshot, if any delivery has observed this key.
    #[inline]
    pub fn previous_value(&self) -> Option<&Value> {
        match &self.previous {
            Previous::Unseen => None,
            Previous::Seen(v) => Some(v),
        }
    }

    /// The live value.
    #[inline]
    pub fn current_value(&self) -> &Value {
        &self.current
    }

    /// Shared handle to the live value.
    #[inline]
    pub fn current_shared(&self) -> &SharedValue {
        &self.current
    }

    /// True when `previous` and `current` are equal under the shallow
    /// identity contract. `Unseen` never matches.
    #[inline]
    pub fn previous_matches_current(&self) -> bool {
        match &self.previous {
            Previous::Unseen => false,
            Previous::Seen(p) => same_shared(p, &self.current),
        }
    }
}

/// Shallow equality for shared values: identity for containers, value
/// equality for scalars.
pub(crate) fn same_shared(a: &SharedValue, b: &SharedValue) -> bool {
    if Arc::ptr_eq(a, b) {
        return true;
    }
    match (&**a, &**b) {
        (Value::Object(_), _) | (Value::Array(_), _) => false,
        _ => **a == **b,
    }
}

/// The mapping from top-level key to [`StateEntry`], plus the set of
/// keys whose delivery is currently deferred.
#[derive(Debug, Default)]
pub(crate) struct StateTable {
    entries: BTreeMap<String, StateEntry>,
    deferred: HashSet<String>,
}

impl StateTable {
    /// Build the table from the initial state object.
    pub fn from_initial(initial: &serde_json::Map<String, Value>) -> Self {
        let entries = initial
            .iter()
            .map(|(key, value)| (key.clone(), StateEntry::initial(value)))
            .collect();
        Self {
            entries,
            deferred: HashSet::new(),
        }
    }

    /// Look up one entry.
    #[inline]
    pub fn entry(&self, key: &str) -> Option<&StateEntry> {
        self.entries.get(key)
    }

    /// True when the table holds the key.
    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.entries.contains_key(key)
    }

    /// All keys currently in the table, in deterministic order.
    pub fn keys(&self) -> Vec<String> {
        self.entries.keys().cloned().collect()
    }

    /// Current values of every key, for building a state view.
    pub fn current_values(&self) -> BTreeMap<String, SharedValue> {
        self.entries
            .iter()
            .map(|(k, e)| (k.clone(), e.current.clone()))
            .collect()
    }

    /// Apply a flat patch. Existing entries are replaced only when the
    /// incoming value is shallowly different from `current`; unknown
    /// keys create fresh entries. Returns the keys that changed.
    pub fn assign(&mut self, patch: &BTreeMap<String, SharedValue>) -> Vec<String> {
        let mut changed = Vec::new();

        for (key, value) in patch {
            match self.entries.get_mut(key) {
                Some(entry) => {
                    if !same_shared(&entry.current, value) {
                        entry.current = value.clone();
                        changed.push(key.clone());
                    }
                }
                None => {
                    self.entries
                        .insert(key.clone(), StateEntry::created(value.clone()));
                    changed.push(key.clone());
                }
            }
        }

        changed
    }

    /// Reset the given keys to their defaults. A key resets only when
    /// its current value shallowly differs from the default; its
    /// deferred marker (if any) is dropped along with the value it
    /// covered. Returns the keys that changed.
    pub fn reset_keys(&mut self, keys: &[String]) -> Vec<String> {
        let mut changed = Vec::new();

        for key in keys {
            if let Some(entry) = self.entries.get_mut(key) {
                if !same_shared(&entry.current, &entry.default) {
                    entry.current = Arc::new((*entry.default).clone());
                    entry.previous = Previous::Unseen;
                    self.deferred.remove(key);
                    changed.push(key.clone());
                }
            }
        }

        changed
    }

    /// Rebuild the whole table from the initial state. Snapshot
    /// continuity is broken: every key that existed before or exists
    /// after is reported changed, and keys created since initialization
    /// disappear.
    pub fn reset_all(&mut self, initial: &serde_json::Map<String, Value>) -> Vec<String> {
        let mut changed: BTreeSet<String> = self.entries.keys().cloned().collect();
        changed.extend(initial.keys().cloned());

        *self = Self::from_initial(initial);

        changed.into_iter().collect()
    }

    /// Remove entries entirely. Returns the keys that existed.
    pub fn delete_keys(&mut self, keys: &[String]) -> Vec<String> {
        let mut removed = Vec::new();

        for key in keys {
            if self.entries.remove(key).is_some() {
                self.deferred.remove(key);
                removed.push(key.clone());
            }
        }

        removed
    }

    /// Advance `previous = current` for the given keys, skipping keys
    /// whose delivery is deferred. The sole place `previous` moves
    /// forward; runs only as part of dispatch.
    pub fn advance(&mut self, keys: &[String]) {
        for key in keys {
            if self.deferred.contains(key) {
                continue;
            }
            if let Some(entry) = self.entries.get_mut(key) {
                entry.previous = Previous::Seen(entry.current.clone());
            }
        }
    }

    /// Mark keys as deferred: their deliveries are skipped until a
    /// flush clears the marker.
    pub fn mark_deferred(&mut self, keys: &[String]) {
        self.deferred.extend(keys.iter().cloned());
    }

    /// Clear deferred markers for the given keys, or all of them.
    pub fn clear_deferred(&mut self, keys: Option<&[String]>) {
        match keys {
            Some(keys) => {
                for key in keys {
                    self.deferred.remove(key);
                }
            }
            None => self.deferred.clear(),
        }
    }

    #[cfg(test)]
    fn is_deferred(&self, key: &str) -> bool {
        self.deferred.contains(key)
    }
}

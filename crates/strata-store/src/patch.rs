//! Patches: the values handed to `set`.
//!
//! A patch is either a flat map of top-level keys to values
//! ([`Patch::direct`]-style, usually built from a JSON object) or a
//! deriving closure that receives a read-only [`StateView`] of the full
//! current state and returns the object to apply.

use crate::entry::SharedValue;
use crate::error::value_type_name;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

/// Flat top-level patch: key to shared value.
pub type PatchMap = BTreeMap<String, SharedValue>;

/// Read-only snapshot of the full current state, keyed by top-level
/// key.
///
/// Handed to deriving patches; the borrow checker guarantees the view
/// cannot be mutated, so a deriving closure can only produce a new
/// patch, never corrupt the store in place.
#[derive(Clone, Debug, Default)]
pub struct StateView {
    values: BTreeMap<String, SharedValue>,
}

impl StateView {
    pub(crate) fn new(values: BTreeMap<String, SharedValue>) -> Self {
        Self { values }
    }

    /// Current value of a key.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key).map(|value| &**value)
    }

    /// Shared handle to a key's current value. Re-assigning this exact
    /// handle through a later patch is a no-op under the identity
    /// change contract.
    #[inline]
    pub fn shared(&self, key: &str) -> Option<SharedValue> {
        self.values.get(key).cloned()
    }

    /// True when the view holds the key.
    #[inline]
    pub fn contains_key(&self, key: &str) -> bool {
        self.values.contains_key(key)
    }

    /// All keys in the view, in deterministic order.
    pub fn keys(&self) -> impl Iterator<Item = &str> {
        self.values.keys().map(String::as_str)
    }

    /// Number of keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.values.len()
    }

    /// True when the view is empty.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Clone the whole view into a plain JSON object.
    pub fn to_value(&self) -> Value {
        let map: Map<String, Value> = self
            .values
            .iter()
            .map(|(k, v)| (k.clone(), (**v).clone()))
            .collect();
        Value::Object(map)
    }
}

pub(crate) enum PatchKind {
    /// Flat key/value assignment.
    Direct(PatchMap),
    /// Closure deriving the assignment from the current state.
    Deriving(Box<dyn FnOnce(&StateView) -> Value>),
    /// A non-object value was supplied; carries its JSON type name so
    /// the rejection can be logged and recovered as a no-op.
    Invalid(&'static str),
}

/// A pending assignment for [`Store::set`](crate::Store::set).
///
/// Built from a JSON object (`store.set(json!({...}))`), a [`PatchMap`]
/// of shared handles, or a deriving closure. Supplying any other JSON
/// value is logged and ignored at apply time.
pub struct Patch(PatchKind);

impl Patch {
    /// A patch assigning one key.
    pub fn of(key: impl Into<String>, value: impl Into<Value>) -> Self {
        let mut map = PatchMap::new();
        map.insert(key.into(), Arc::new(value.into()));
        Patch(PatchKind::Direct(map))
    }

    /// A patch assigning one key from an existing shared handle,
    /// preserving its identity for the change contract.
    pub fn of_shared(key: impl Into<String>, value: SharedValue) -> Self {
        let mut map = PatchMap::new();
        map.insert(key.into(), value);
        Patch(PatchKind::Direct(map))
    }

    /// A deriving patch: the closure receives the full current state
    /// and returns the object to apply.
    pub fn deriving(f: impl FnOnce(&StateView) -> Value + 'static) -> Self {
        Patch(PatchKind::Deriving(Box::new(f)))
    }

    pub(crate) fn into_kind(self) -> PatchKind {
        self.0
    }
}

impl From<Value> for Patch {
    fn from(value: Value) -> Self {
        match value {
            Value::Object(map) => Patch(PatchKind::Direct(
                map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
            )),
            other => Patch(PatchKind::Invalid(value_type_name(&other))),
        }
    }
}

impl From<PatchMap> for Patch {
    fn from(map: PatchMap) -> Self {
        Patch(PatchKind::Direct(map))
    }
}

impl From<Map<String, Value>> for Patch {
    fn from(map: Map<String, Value>) -> Self {
        Patch(PatchKind::Direct(
            map.into_iter().map(|(k, v)| (k, Arc::new(v))).collect(),
        ))
    }
}

impl fmt::Debug for Patch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            PatchKind::Direct(map) => f.debug_tuple("Direct").field(&map.keys()).finish(),
            PatchKind::Deriving(_) => f.debug_tuple("Deriving").field(&"<fn>").finish(),
            PatchKind::Invalid(found) => f.debug_tuple("Invalid").field(found).finish(),
        }
    }
}

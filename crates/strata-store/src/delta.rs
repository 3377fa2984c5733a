//! Change detection and delta reconstruction.
//!
//! Given a subscriber's parsed accessors, compares the `previous` and
//! `current` snapshots along each path and either reports "no relevant
//! change" or reconstructs a partial object containing exactly the
//! requested sub-paths, in the caller's dotted shape.

use crate::accessor::{AccessorSpec, PathGroup, Segment};
use crate::entry::StateTable;
use serde_json::{Map, Value};
use std::fmt;

/// The subset of state, reconstructed in the requested shape, that
/// changed since the subscriber last observed it.
///
/// Always a JSON object mirroring the accessors it was built from:
/// `"a.b.c"` yields `{"a": {"b": {"c": ...}}}`, and a bracket group
/// terminates in an object keyed by the requested field names. Paths
/// that resolve through missing keys terminate in `null`.
#[derive(Clone, Debug, PartialEq)]
pub struct Delta(Value);

impl Delta {
    /// An empty delta.
    #[inline]
    pub fn empty() -> Self {
        Delta(Value::Object(Map::new()))
    }

    pub(crate) fn from_map(map: Map<String, Value>) -> Self {
        Delta(Value::Object(map))
    }

    /// The reconstructed object.
    #[inline]
    pub fn value(&self) -> &Value {
        &self.0
    }

    /// Consume the delta, returning the reconstructed object.
    #[inline]
    pub fn into_value(self) -> Value {
        self.0
    }

    /// Top-level lookup.
    #[inline]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Dotted-path lookup into the reconstructed object.
    pub fn at(&self, path: &str) -> Option<&Value> {
        path.split('.')
            .try_fold(&self.0, |value, segment| value.get(segment))
    }

    /// True when the delta carries no keys.
    pub fn is_empty(&self) -> bool {
        self.0.as_object().map_or(true, Map::is_empty)
    }
}

impl Default for Delta {
    fn default() -> Self {
        Self::empty()
    }
}

impl fmt::Display for Delta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Compare `previous` vs `current` along every group of `spec` and
/// reconstruct the requested sub-paths.
///
/// Returns `None` when nothing relevant changed (and compares are not
/// ignored). When `changed_keys` is supplied, specs whose first-level
/// keys miss it entirely are skipped before any path walk.
pub(crate) fn compute(
    table: &StateTable,
    spec: &AccessorSpec,
    ignore_compares: bool,
    changed_keys: Option<&[String]>,
) -> Option<Delta> {
    if let Some(changed) = changed_keys {
        if !spec.matches_any(changed) {
            return None;
        }
    }

    let mut dirty = false;
    let mut result = Map::new();

    for group in spec.structured() {
        let (leaf, group_dirty) = walk_group(table, group);
        dirty |= group_dirty;

        let keys: Vec<&str> = group
            .segments()
            .iter()
            .filter_map(Segment::as_key)
            .collect();
        merge_tree(&mut result, &keys, leaf);
    }

    if dirty || ignore_compares {
        Some(Delta::from_map(result))
    } else {
        None
    }
}

/// Walk one path group down both snapshots in lockstep.
///
/// Returns the reconstructed leaf (current side) and whether the group
/// is dirty. Only the deepest segment is compared; intermediate
/// descents through missing keys resolve to `null` leaves rather than
/// erroring.
fn walk_group(table: &StateTable, group: &PathGroup) -> (Value, bool) {
    let segments = group.segments();

    let Some(Segment::Key(first)) = segments.first() else {
        // A field set cannot address a top-level entry; strict mode
        // rejects this shape at parse time.
        return (Value::Null, false);
    };

    let entry = table.entry(first);

    if segments.len() == 1 {
        let dirty = entry.is_some_and(|e| !e.previous_matches_current());
        let leaf = entry
            .map(|e| e.current_value().clone())
            .unwrap_or(Value::Null);
        return (leaf, dirty);
    }

    let mut prev: Option<&Value> = entry.and_then(|e| e.previous_value());
    let mut curr: Option<&Value> = entry.map(|e| e.current_value());
    let mut dirty = false;
    let last = segments.len() - 1;

    for (i, segment) in segments.iter().enumerate().skip(1) {
        match segment {
            Segment::Key(key) => {
                prev = prev.and_then(|v| v.get(key));
                curr = curr.and_then(|v| v.get(key));

                if i == last && prev != curr {
                    dirty = true;
                }
            }
            Segment::FieldSet(fields) => {
                let mut collected = Map::new();

                for field in fields {
                    let p = prev.and_then(|v| v.get(field));
                    let c = curr.and_then(|v| v.get(field));

                    if p != c {
                        dirty = true;
                    }
                    collected.insert(field.clone(), c.cloned().unwrap_or(Value::Null));
                }

                // Field sets terminate the walk.
                return (Value::Object(collected), dirty);
            }
        }
    }

    (curr.cloned().unwrap_or(Value::Null), dirty)
}

/// Insert `leaf` into `result` under the nested key path, merging with
/// anything already reconstructed there so multiple groups for the same
/// subscriber combine into one object.
fn merge_tree(result: &mut Map<String, Value>, keys: &[&str], leaf: Value) {
    let Some((head, rest)) = keys.split_first() else {
        return;
    };

    if rest.is_empty() {
        match result.get_mut(*head) {
            Some(existing) => merge_value(existing, leaf),
            None => {
                result.insert((*head).to_owned(), leaf);
            }
        }
        return;
    }

    let slot = result
        .entry((*head).to_owned())
        .or_insert_with(|| Value::Object(Map::new()));
    if !slot.is_object() {
        *slot = Value::Object(Map::new());
    }
    merge_tree(slot.as_object_mut().expect("slot coerced to object"), rest, leaf);
}

/// Merge `incoming` into `existing`: objects merge key-wise, anything
/// else is replaced.
fn merge_value(existing: &mut Value, incoming: Value) {
    match (existing.as_object_mut(), incoming) {
        (Some(target), Value::Object(source)) => {
            for (key, value) in source {
                match target.get_mut(&key) {
                    Some(slot) => merge_value(slot, value),
                    None => {
                        target.insert(key, value);
                    }
                }
            }
        }
        (_, incoming) => *existing = incoming,
    }
}

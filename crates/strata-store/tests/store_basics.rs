//! Integration tests for store reads, writes, resets and deletes.

use serde_json::{json, Value};
use std::cell::RefCell;
use std::rc::Rc;
use strata_store::{Delta, Store};

fn record_into(log: &Rc<RefCell<Vec<Value>>>) -> impl Fn(Delta) + 'static {
    let log = Rc::clone(log);
    move |delta| log.borrow_mut().push(delta.into_value())
}

// ============================================================================
// Point reads
// ============================================================================

#[test]
fn test_get_reconstructs_requested_shape() {
    let store = Store::new(json!({"a": {"b": {"c": 5}}, "other": 1}));
    let delta = store.get(["a.b.c"]);
    assert_eq!(delta.value(), &json!({"a": {"b": {"c": 5}}}));
}

#[test]
fn test_get_bracket_group_excludes_unrequested_fields() {
    let store = Store::new(json!({
        "acct": {"funds": {"balance": 1, "deposit": 2, "profit": 3}}
    }));
    let delta = store.get(["acct.funds.[balance|deposit]"]);
    assert_eq!(
        delta.value(),
        &json!({"acct": {"funds": {"balance": 1, "deposit": 2}}})
    );
}

#[test]
fn test_get_merges_groups_for_shared_first_level_key() {
    let store = Store::new(json!({"a": {"b": 1, "c": 2}}));
    let delta = store.get(["a.b", "a.c"]);
    assert_eq!(delta.value(), &json!({"a": {"b": 1, "c": 2}}));
}

#[test]
fn test_get_numeric_accessor() {
    let store = Store::new(json!({"7": "seventh"}));
    let delta = store.get([7]);
    assert_eq!(delta.value(), &json!({"7": "seventh"}));
}

#[test]
fn test_get_missing_key_resolves_to_null() {
    let store = Store::new(json!({}));
    assert_eq!(store.get(["ghost"]).value(), &json!({"ghost": null}));
}

#[test]
fn test_get_empty_accessors_recovers_empty() {
    let store = Store::new(json!({"k": 1}));
    assert!(store.get(Vec::<&str>::new()).is_empty());
}

// ============================================================================
// Writes
// ============================================================================

#[test]
fn test_set_creates_and_updates_keys() {
    let store = Store::new(json!({"count": 0}));

    store.set(json!({"count": 1, "fresh": {"x": true}}));
    assert_eq!(store.get(["count"]).value(), &json!({"count": 1}));
    assert_eq!(
        store.get(["fresh.x"]).value(),
        &json!({"fresh": {"x": true}})
    );
}

#[test]
fn test_deriving_patch_reads_current_state() {
    let store = Store::new(json!({"count": 2}));

    store.set_with(|state| {
        let count = state.get("count").and_then(Value::as_i64).unwrap_or(0);
        json!({"count": count + 1, "doubled": count * 2})
    });

    assert_eq!(
        store.get(["count", "doubled"]).value(),
        &json!({"count": 3, "doubled": 4})
    );
}

#[test]
fn test_state_view_snapshot() {
    let store = Store::new(json!({"a": 1}));
    store.set(json!({"b": 2}));

    let view = store.state_view();
    assert_eq!(view.get("a"), Some(&json!(1)));
    assert_eq!(view.get("b"), Some(&json!(2)));
    assert_eq!(view.to_value(), json!({"a": 1, "b": 2}));
}

// ============================================================================
// Reset
// ============================================================================

#[test]
fn test_reset_restores_default_and_notifies_watcher() {
    let store = Store::new(json!({"x": {"n": 0}}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["x"], record_into(&calls));

    store.set(json!({"x": {"n": 5}}));
    store.reset(["x"]);

    assert_eq!(store.get(["x"]).value(), &json!({"x": {"n": 0}}));
    let calls = calls.borrow();
    assert_eq!(calls.len(), 2);
    assert_eq!(calls[1], json!({"x": {"n": 0}}));
}

#[test]
fn test_reset_with_no_accessors_resets_every_key() {
    let store = Store::new(json!({"a": 1, "b": 2}));
    store.set(json!({"a": 10, "b": 20}));

    store.reset(Vec::<&str>::new());

    assert_eq!(store.get(["a", "b"]).value(), &json!({"a": 1, "b": 2}));
}

#[test]
fn test_reset_at_default_reports_no_change() {
    let store = Store::new(json!({"x": 1}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["x"], record_into(&calls));

    store.reset(["x"]);
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_reset_then_no_further_pending_change() {
    let store = Store::new(json!({"x": 0}));
    store.set(json!({"x": 5}));
    store.reset(["x"]);

    // A fresh subscriber sees the default, and the reset left nothing
    // pending: a later unrelated write must not re-deliver "x".
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, initial) = store.subscribe(["x"], record_into(&calls));
    assert_eq!(initial.value(), &json!({"x": 0}));

    store.set(json!({"y": 1}));
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_reset_all_drops_created_keys() {
    let store = Store::new(json!({"a": 1}));
    store.set(json!({"a": 2, "extra": 3}));

    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["extra"], record_into(&calls));

    store.reset_all();

    assert!(!store.contains_key("extra"));
    assert_eq!(store.get(["a"]).value(), &json!({"a": 1}));
    // The watcher of the vanished key hears about it once.
    assert_eq!(calls.borrow().as_slice(), [json!({"extra": null})]);
}

// ============================================================================
// Delete
// ============================================================================

#[test]
fn test_delete_removes_keys_and_notifies_with_null() {
    let store = Store::new(json!({"k": {"x": 1}}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["k"], record_into(&calls));

    store.delete(["k"]);

    assert!(!store.contains_key("k"));
    assert_eq!(store.get(["k"]).value(), &json!({"k": null}));
    assert_eq!(calls.borrow().as_slice(), [json!({"k": null})]);
}

#[test]
fn test_delete_with_no_accessors_is_a_no_op() {
    let store = Store::new(json!({"k": 1}));
    store.delete(Vec::<&str>::new());
    assert!(store.contains_key("k"));
}

#[test]
fn test_delete_missing_key_notifies_nobody() {
    let store = Store::new(json!({"k": 1}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["k"], record_into(&calls));

    store.delete(["ghost"]);
    assert!(calls.borrow().is_empty());
}

// ============================================================================
// Introspection
// ============================================================================

#[test]
fn test_entry_snapshots_track_lifecycle() {
    let store = Store::new(json!({"k": 1}));

    let entry = store.entry("k").unwrap();
    assert_eq!(entry.default_value(), &json!(1));
    assert_eq!(entry.current_value(), &json!(1));

    store.set(json!({"k": 2}));
    let entry = store.entry("k").unwrap();
    assert_eq!(entry.default_value(), &json!(1));
    assert_eq!(entry.current_value(), &json!(2));

    assert!(store.entry("missing").is_none());
}

#[test]
fn test_keys_lists_current_entries() {
    let store = Store::new(json!({"b": 1, "a": 2}));
    store.set(json!({"c": 3}));
    assert_eq!(store.keys(), ["a", "b", "c"]);
}

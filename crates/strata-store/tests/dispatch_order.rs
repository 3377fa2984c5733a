//! Integration tests for the dispatch algorithm: change gating,
//! coalescing, drain ordering and mid-drain disposal.

use serde_json::{json, Value};
use std::cell::{Cell, RefCell};
use std::rc::Rc;
use strata_store::{Delta, Patch, SharedValue, Store, SubscriptionGuard};

fn record_into(log: &Rc<RefCell<Vec<Value>>>) -> impl Fn(Delta) + 'static {
    let log = Rc::clone(log);
    move |delta| log.borrow_mut().push(delta.into_value())
}

// ============================================================================
// Change gating
// ============================================================================

#[test]
fn test_identical_handle_assign_notifies_once() {
    let store = Store::new(json!({}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["k"], record_into(&calls));

    let value = SharedValue::new(json!({"x": 1}));
    store.set(Patch::of_shared("k", value.clone()));
    store.set(Patch::of_shared("k", value.clone()));

    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn test_equal_scalar_reassign_is_silent() {
    let store = Store::new(json!({"k": 5}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["k"], record_into(&calls));

    store.set(json!({"k": 5}));
    assert!(calls.borrow().is_empty());
}

#[test]
fn test_fresh_equal_container_counts_as_changed() {
    let store = Store::new(json!({"k": {"x": 1}}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["k"], record_into(&calls));

    // Structurally equal, freshly allocated: the shallow identity
    // contract reports a change.
    store.set(json!({"k": {"x": 1}}));
    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn test_subscribers_of_untouched_keys_stay_quiet() {
    let store = Store::new(json!({"a": 1, "b": 2}));
    let a_calls = Rc::new(RefCell::new(Vec::new()));
    let b_calls = Rc::new(RefCell::new(Vec::new()));
    let (_ga, _) = store.subscribe(["a"], record_into(&a_calls));
    let (_gb, _) = store.subscribe(["b"], record_into(&b_calls));

    store.set(json!({"a": 10}));

    assert_eq!(a_calls.borrow().as_slice(), [json!({"a": 10})]);
    assert!(b_calls.borrow().is_empty());
}

#[test]
fn test_deep_watcher_ignores_irrelevant_replacement() {
    let store = Store::new(json!({"cfg": {"theme": "dark", "lang": "en"}}));
    let theme_calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["cfg.theme"], record_into(&theme_calls));

    // The container is replaced but the watched leaf is unchanged.
    store.set(json!({"cfg": {"theme": "dark", "lang": "fr"}}));
    assert!(theme_calls.borrow().is_empty());

    store.set(json!({"cfg": {"theme": "light", "lang": "fr"}}));
    assert_eq!(
        theme_calls.borrow().as_slice(),
        [json!({"cfg": {"theme": "light"}})]
    );
}

// ============================================================================
// Coalescing and re-entrancy
// ============================================================================

#[test]
fn test_reentrant_set_coalesces_into_one_delivery() {
    let store = Store::new(json!({"x": 0}));

    let a_calls = Rc::new(RefCell::new(Vec::new()));
    let (_ga, _) = store.subscribe(["x"], record_into(&a_calls));

    // B reacts to the first delivery by writing again, synchronously,
    // before A (registered earlier, drained later) has been invoked.
    let reentered = Rc::new(Cell::new(false));
    let flag = Rc::clone(&reentered);
    let writer = store.clone();
    let (_gb, _) = store.subscribe(["x"], move |_| {
        if !flag.get() {
            flag.set(true);
            writer.set(json!({"x": 2}));
        }
    });

    store.set(json!({"x": 1}));

    // A hears exactly once, with the final value.
    assert_eq!(a_calls.borrow().as_slice(), [json!({"x": 2})]);
}

#[test]
fn test_drain_runs_in_reverse_registration_order() {
    let store = Store::new(json!({"k": 0}));
    let order = Rc::new(RefCell::new(Vec::new()));

    let guards: Vec<SubscriptionGuard> = (0..3)
        .map(|tag| {
            let order = Rc::clone(&order);
            let (guard, _) = store.subscribe(["k"], move |_| order.borrow_mut().push(tag));
            guard
        })
        .collect();

    store.set(json!({"k": 1}));

    assert_eq!(order.borrow().as_slice(), [2, 1, 0]);
    drop(guards);
}

#[test]
fn test_callback_subscribing_does_not_join_current_pass() {
    let store = Store::new(json!({"k": 0}));
    let late_calls = Rc::new(RefCell::new(Vec::new()));

    let registrar = store.clone();
    let late = Rc::clone(&late_calls);
    let registered = Rc::new(RefCell::new(None));
    let slot = Rc::clone(&registered);
    let (_guard, _) = store.subscribe(["k"], move |_| {
        if slot.borrow().is_none() {
            let log = Rc::clone(&late);
            let (guard, _) = registrar
                .subscribe(["k"], move |d| log.borrow_mut().push(d.into_value()));
            *slot.borrow_mut() = Some(guard);
        }
    });

    store.set(json!({"k": 1}));
    // The subscriber added mid-pass hears nothing until the next write.
    assert!(late_calls.borrow().is_empty());

    store.set(json!({"k": 2}));
    assert_eq!(late_calls.borrow().as_slice(), [json!({"k": 2})]);
}

// ============================================================================
// Disposal
// ============================================================================

#[test]
fn test_dispose_mid_drain_skips_callback_but_advances_snapshot() {
    let store = Store::new(json!({"k": 0}));

    let a_calls = Rc::new(RefCell::new(Vec::new()));
    let a_guard: Rc<RefCell<Option<SubscriptionGuard>>> = Rc::new(RefCell::new(None));

    let (guard_a, _) = store.subscribe(["k"], record_into(&a_calls));
    *a_guard.borrow_mut() = Some(guard_a);

    // B registers later, so it drains first and disposes A before A's
    // turn comes.
    let to_dispose = Rc::clone(&a_guard);
    let (_gb, _) = store.subscribe(["k"], move |_| {
        if let Some(guard) = to_dispose.borrow_mut().take() {
            guard.dispose();
        }
    });

    store.set(json!({"k": 1}));

    assert!(a_calls.borrow().is_empty());
    // A's keys were still advanced, so nothing is left pending.
    let entry = store.entry("k").unwrap();
    assert!(entry.previous_matches_current());
}

#[test]
fn test_disposed_subscription_never_fires_again() {
    let store = Store::new(json!({"k": 0}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (guard, _) = store.subscribe(["k"], record_into(&calls));

    store.set(json!({"k": 1}));
    guard.dispose();
    store.set(json!({"k": 2}));

    assert_eq!(calls.borrow().len(), 1);
}

#[test]
fn test_subscription_ids_are_not_reused() {
    let store = Store::new(json!({"k": 0}));

    let (first, _) = store.subscribe(["k"], |_| {});
    let first_id = first.id();
    first.dispose();

    let (second, _) = store.subscribe(["k"], |_| {});
    assert!(second.id() > first_id);
    second.dispose();
}

// ============================================================================
// Snapshot advance timing
// ============================================================================

#[test]
fn test_snapshot_advances_only_for_delivered_keys() {
    let store = Store::new(json!({"a": 0, "b": 0}));
    let calls = Rc::new(RefCell::new(Vec::new()));
    let (_guard, _) = store.subscribe(["a"], record_into(&calls));

    store.set(json!({"a": 1, "b": 1}));

    // "a" was delivered and advanced; "b" has no watcher, so its
    // previous snapshot still lags behind.
    assert!(store.entry("a").unwrap().previous_matches_current());
    assert!(!store.entry("b").unwrap().previous_matches_current());
}

#[test]
fn test_subscribe_returns_current_delta() {
    let store = Store::new(json!({"a": {"b": 7}}));
    let (_guard, initial) = store.subscribe(["a.b"], |_| {});
    assert_eq!(initial.value(), &json!({"a": {"b": 7}}));
}

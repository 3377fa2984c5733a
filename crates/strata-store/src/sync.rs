//! Cross-context state synchronization.
//!
//! An optional layer that mirrors local writes to other execution
//! contexts (windows, tabs, processes sharing a broadcast channel) and
//! re-applies inbound patches through the normal assign + dispatch
//! path. Only active when a transport is configured *and* the allow
//! list of synchronized keys is non-empty.
//!
//! The wire format is a JSON-text-serialized flat patch object, exactly
//! as handed to `set`. Filtering to the allow list happens on the
//! receiving side; a one-shot re-entrancy guard keeps a received patch
//! from being broadcast again, so two contexts never echo forever.

use crate::entry::SharedValue;
use crate::patch::PatchMap;
use crate::StoreResult;
use serde_json::{Map, Value};
use std::cell::Cell;
use std::collections::HashSet;
use std::rc::Rc;

/// Outbound half of a broadcast channel.
///
/// Implementations publish a serialized patch to every other context;
/// the embedding layer owns inbound delivery and feeds received
/// payloads to [`Store::apply_sync_message`](crate::Store::apply_sync_message).
/// Any `Fn(&str)` closure is a transport.
pub trait SyncTransport {
    /// Publish one serialized patch payload.
    fn publish(&self, payload: &str);
}

impl<F: Fn(&str)> SyncTransport for F {
    fn publish(&self, payload: &str) {
        self(payload)
    }
}

/// The sync layer owned by a store.
pub(crate) struct SyncLayer {
    transport: Option<Rc<dyn SyncTransport>>,
    allowed: HashSet<String>,
    applying_remote: Cell<bool>,
}

impl SyncLayer {
    pub fn new(transport: Option<Rc<dyn SyncTransport>>, allowed: HashSet<String>) -> Self {
        Self {
            transport,
            allowed,
            applying_remote: Cell::new(false),
        }
    }

    /// Synchronization is on only with both a transport and a
    /// non-empty allow list.
    pub fn is_active(&self) -> bool {
        self.transport.is_some() && !self.allowed.is_empty()
    }

    pub fn set_applying_remote(&self, applying: bool) {
        self.applying_remote.set(applying);
    }

    /// Broadcast a locally applied patch.
    ///
    /// The re-entrancy guard is one-shot: the first broadcast attempt
    /// during an inbound apply is the inbound patch itself and is
    /// swallowed, while writes made by subscriber callbacks reacting to
    /// it propagate normally.
    pub fn broadcast(&self, patch: &PatchMap) {
        if !self.is_active() {
            return;
        }
        if self.applying_remote.replace(false) {
            return;
        }

        let object: Map<String, Value> = patch
            .iter()
            .map(|(k, v)| (k.clone(), (**v).clone()))
            .collect();

        match serde_json::to_string(&Value::Object(object)) {
            Ok(payload) => {
                if let Some(transport) = &self.transport {
                    transport.publish(&payload);
                }
            }
            Err(e) => tracing::warn!(error = %e, "failed to serialize sync payload"),
        }
    }

    /// Parse an inbound payload and keep only allow-listed keys.
    pub fn decode_inbound(&self, payload: &str) -> StoreResult<PatchMap> {
        let value: Value = serde_json::from_str(payload)?;

        let Value::Object(object) = value else {
            return Err(crate::StoreError::invalid_patch(
                crate::error::value_type_name(&value),
            ));
        };

        Ok(object
            .into_iter()
            .filter(|(key, _)| self.allowed.contains(key))
            .map(|(key, value)| (key, SharedValue::new(value)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::cell::RefCell;

    fn layer_with(keys: &[&str]) -> (SyncLayer, Rc<RefCell<Vec<String>>>) {
        let published = Rc::new(RefCell::new(Vec::new()));
        let sink = Rc::clone(&published);
        let transport: Rc<dyn SyncTransport> =
            Rc::new(move |payload: &str| sink.borrow_mut().push(payload.to_owned()));
        let layer = SyncLayer::new(
            Some(transport),
            keys.iter().map(|k| (*k).to_owned()).collect(),
        );
        (layer, published)
    }

    fn patch(value: Value) -> PatchMap {
        value
            .as_object()
            .unwrap()
            .iter()
            .map(|(k, v)| (k.clone(), SharedValue::new(v.clone())))
            .collect()
    }

    #[test]
    fn test_inactive_without_transport_or_allow_list() {
        let layer = SyncLayer::new(None, HashSet::from(["k".to_owned()]));
        assert!(!layer.is_active());

        let (layer, _) = layer_with(&[]);
        assert!(!layer.is_active());

        let (layer, _) = layer_with(&["k"]);
        assert!(layer.is_active());
    }

    #[test]
    fn test_broadcast_serializes_full_patch() {
        let (layer, published) = layer_with(&["k"]);
        layer.broadcast(&patch(json!({"k": 1, "other": 2})));

        let payloads = published.borrow();
        assert_eq!(payloads.len(), 1);
        let sent: Value = serde_json::from_str(&payloads[0]).unwrap();
        // The full patch goes out; filtering happens on receipt.
        assert_eq!(sent, json!({"k": 1, "other": 2}));
    }

    #[test]
    fn test_broadcast_suppressed_while_applying_remote() {
        let (layer, published) = layer_with(&["k"]);
        layer.set_applying_remote(true);
        layer.broadcast(&patch(json!({"k": 1})));
        assert!(published.borrow().is_empty());
    }

    #[test]
    fn test_guard_consumes_after_one_suppression() {
        let (layer, published) = layer_with(&["k"]);
        layer.set_applying_remote(true);
        layer.broadcast(&patch(json!({"k": 1})));
        layer.broadcast(&patch(json!({"k": 2})));
        assert_eq!(published.borrow().len(), 1);
    }

    #[test]
    fn test_decode_filters_to_allow_list() {
        let (layer, _) = layer_with(&["a", "b"]);
        let decoded = layer
            .decode_inbound(r#"{"a": 1, "b": 2, "secret": 3}"#)
            .unwrap();
        assert_eq!(decoded.len(), 2);
        assert!(decoded.contains_key("a"));
        assert!(!decoded.contains_key("secret"));
    }

    #[test]
    fn test_decode_rejects_non_object() {
        let (layer, _) = layer_with(&["a"]);
        assert!(layer.decode_inbound("[1, 2]").is_err());
        assert!(layer.decode_inbound("not json").is_err());
    }
}

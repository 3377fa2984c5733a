//! Fine-grained key/path subscription state store for component UIs.
//!
//! `strata-store` keeps a flat mapping from top-level keys to
//! `{default, previous, current}` value triples and delivers change
//! notifications only to the subscribers whose accessor paths actually
//! changed: the engine a UI binding layer needs so that only
//! components depending on a changed key re-render.
//!
//! # Core Concepts
//!
//! - **Store**: owned handle to the state table, subscriptions and
//!   dispatch loop
//! - **Accessor / AccessorSpec**: dotted (and bracket-grouped) path
//!   strings, parsed once into a typed path tree
//! - **Delta**: the changed subset of state, reconstructed in the
//!   caller's requested shape
//! - **Patch**: a flat assignment object, or a closure deriving one
//!   from the current state
//! - **SubscriptionGuard**: RAII disposer returned by `subscribe`
//!
//! # Change contract
//!
//! Change detection is shallow by design: container values (objects,
//! arrays) compare by handle identity, scalars by value. Replacing a
//! value with a structurally equal but freshly built object counts as
//! a change; re-assigning the same [`SharedValue`] handle does not.
//! This keeps per-key change checks O(1) for arbitrarily large values.
//!
//! # Quick Start
//!
//! ```
//! use strata_store::Store;
//! use serde_json::json;
//!
//! let store = Store::new(json!({
//!     "session": {"user": "ada", "role": "admin"},
//!     "count": 0,
//! }));
//!
//! // Point reads reconstruct the requested shape.
//! let read = store.get(["session.user"]);
//! assert_eq!(read.value(), &json!({"session": {"user": "ada"}}));
//!
//! // Subscribers hear only about keys they watch.
//! let (guard, initial) = store.subscribe(["count"], |delta| {
//!     // re-render with delta...
//!     let _ = delta;
//! });
//! assert_eq!(initial.value(), &json!({"count": 0}));
//!
//! store.set(json!({"count": 1}));
//! assert_eq!(store.get(["count"]).value(), &json!({"count": 1}));
//!
//! guard.dispose();
//! ```
//!
//! # Deriving patches
//!
//! ```
//! use strata_store::Store;
//! use serde_json::{json, Value};
//!
//! let store = Store::new(json!({"count": 2}));
//! store.set_with(|state| {
//!     let count = state.get("count").and_then(Value::as_i64).unwrap_or(0);
//!     json!({"count": count + 1})
//! });
//! assert_eq!(store.get(["count"]).value(), &json!({"count": 3}));
//! ```

mod accessor;
mod debug;
mod delta;
mod dispatch;
mod entry;
mod error;
mod patch;
mod store;
mod sync;

pub use accessor::{Accessor, AccessorSpec, PathGroup, Segment};
pub use debug::{DebugFlag, DebugFlags};
pub use delta::Delta;
pub use entry::{SharedValue, StateEntry};
pub use error::{value_type_name, StoreError, StoreResult};
pub use patch::{Patch, PatchMap, StateView};
pub use store::{Store, StoreBuilder, SubscriptionGuard};
pub use sync::SyncTransport;

//! World state for Florafield: the spatial index, the durable flower store,
//! and the field logic that keeps the two consistent.
//!
//! The engine performs no locking of its own. Callers that share a
//! [`FlowerField`] across tasks must serialize every mutating call behind one
//! exclusive lock so the index and the store never diverge mid-operation.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

pub mod field;
pub mod quadtree;
pub mod store;

pub use field::FlowerField;
pub use quadtree::FlowerQuadtree;
pub use store::{FlowerStore, StoreError};

static ID_COUNTER: AtomicU64 = AtomicU64::new(1);

pub(crate) fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis()
        .try_into()
        .unwrap_or(i64::MAX)
}

/// Generate a process-unique flower id.
pub fn new_flower_id() -> String {
    let c = ID_COUNTER.fetch_add(1, Ordering::Relaxed);
    format!("flw-{}-{c}", now_ms())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flower_ids_are_unique_and_prefixed() {
        let a = new_flower_id();
        let b = new_flower_id();
        assert_ne!(a, b);
        assert!(a.starts_with("flw-"));
    }
}

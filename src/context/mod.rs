//! Async operation identities and the contexts captured for them
//!
//! Host objects that carry a continuation (timers, requests, promises,
//! dispatched events) are identified by an [`AsyncId`]. The [`ContextStore`]
//! maps those ids to the [`Context`] their instrumentation events share, and
//! evicts the entry when the operation completes.

mod ambient;

pub use ambient::{Ambient, Frame, FrameExit};

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::bus::Context;

/// Stable identifier of one asynchronous host operation
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct AsyncId(pub u64);

impl AsyncId {
    pub fn from_value(value: &serde_json::Value) -> Option<Self> {
        value.as_u64().map(AsyncId)
    }
}

impl fmt::Display for AsyncId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hands out [`AsyncId`]s, starting at 1
#[derive(Debug)]
pub struct AsyncIdAllocator {
    next: AtomicU64,
}

impl Default for AsyncIdAllocator {
    fn default() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }
}

impl AsyncIdAllocator {
    pub fn next(&self) -> AsyncId {
        AsyncId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}

/// Side table from async operation to captured context
#[derive(Clone, Default)]
pub struct ContextStore {
    slots: Arc<Mutex<HashMap<AsyncId, Context>>>,
}

impl ContextStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// The context for `id`, created on first use
    pub fn context_for(&self, id: AsyncId) -> Context {
        self.slots.lock().entry(id).or_default().clone()
    }

    pub fn attach(&self, id: AsyncId, ctx: &Context) {
        self.slots.lock().insert(id, ctx.clone());
    }

    pub fn lookup(&self, id: AsyncId) -> Option<Context> {
        self.slots.lock().get(&id).cloned()
    }

    pub fn evict(&self, id: AsyncId) -> Option<Context> {
        self.slots.lock().remove(&id)
    }

    pub fn len(&self) -> usize {
        self.slots.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl fmt::Debug for ContextStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ContextStore")
            .field("live", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_monotonic_from_one() {
        let ids = AsyncIdAllocator::default();
        assert_eq!(ids.next(), AsyncId(1));
        assert_eq!(ids.next(), AsyncId(2));
    }

    #[test]
    fn store_creates_shares_and_evicts() {
        let store = ContextStore::new();
        let id = AsyncId(7);
        let first = store.context_for(id);
        first.insert(5_u32);

        assert!(store.context_for(id).ptr_eq(&first));
        assert_eq!(store.lookup(id).and_then(|c| c.get::<u32>()), Some(5));

        let evicted = store.evict(id).unwrap();
        assert!(evicted.ptr_eq(&first));
        assert!(store.lookup(id).is_none());
        assert!(store.is_empty());
    }
}

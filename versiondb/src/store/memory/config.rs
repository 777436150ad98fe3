use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor, MAX_RAW_VERSION};
use crate::store::StoreEventListener;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Configuration of an [`InMemoryStore`](super::InMemoryStore).
///
/// - `max_version`: the raw version ceiling, `2^53 - 1` unless lowered.
///   Tests lower it to exercise counter exhaustion.
/// - event listeners subscribed when the store is created.
#[derive(Clone)]
pub struct InMemoryStoreConfig {
    inner: Arc<InMemoryStoreConfigInner>,
}

impl InMemoryStoreConfig {
    pub fn new() -> InMemoryStoreConfig {
        InMemoryStoreConfig {
            inner: Arc::new(InMemoryStoreConfigInner::new()),
        }
    }

    /// Sets the raw version ceiling. Values below 1 are raised to 1 and
    /// values above `2^53 - 1` are lowered to it.
    pub fn with_max_version(self, max_version: u64) -> Self {
        let clamped = max_version.clamp(1, MAX_RAW_VERSION);
        self.inner.max_version.store(clamped, Ordering::Relaxed);
        self
    }

    pub fn max_version(&self) -> u64 {
        self.inner.max_version.load(Ordering::Relaxed)
    }

    pub fn add_store_listener(&self, listener: StoreEventListener) {
        self.inner.add_store_listener(listener)
    }

    pub fn event_listeners(&self) -> Vec<StoreEventListener> {
        self.inner.event_listeners()
    }
}

impl Default for InMemoryStoreConfig {
    fn default() -> Self {
        Self::new()
    }
}

struct InMemoryStoreConfigInner {
    max_version: AtomicU64,
    event_listeners: Atomic<Vec<StoreEventListener>>,
}

impl InMemoryStoreConfigInner {
    fn new() -> InMemoryStoreConfigInner {
        InMemoryStoreConfigInner {
            max_version: AtomicU64::new(MAX_RAW_VERSION),
            event_listeners: atomic(Vec::new()),
        }
    }

    fn add_store_listener(&self, listener: StoreEventListener) {
        self.event_listeners.write_with(|it| it.push(listener))
    }

    fn event_listeners(&self) -> Vec<StoreEventListener> {
        self.event_listeners.read_with(|listeners| listeners.to_vec())
    }
}

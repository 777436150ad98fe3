use super::object_store::InMemoryObjectStore;
use super::state::DatabaseState;
use super::store::InMemoryStoreInner;
use crate::common::{Atomic, ReadExecutor};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::{
    ConnectionProvider, ObjectStore, TransactionMode, VersionChangeCallback, VersionChangeEvent,
};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

#[derive(Clone)]
pub(crate) struct InMemoryConnection {
    inner: Arc<ConnectionInner>,
}

impl InMemoryConnection {
    pub(crate) fn new(inner: Arc<ConnectionInner>) -> Self {
        InMemoryConnection { inner }
    }
}

impl ConnectionProvider for InMemoryConnection {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn version(&self) -> u64 {
        self.inner.version
    }

    fn object_store_names(&self) -> DbResult<Vec<String>> {
        self.inner.check_open()?;
        Ok(self.inner.state.read_with(|state| state.store_names()))
    }

    fn object_store(&self, name: &str, mode: TransactionMode) -> DbResult<ObjectStore> {
        self.inner.check_open()?;
        self.inner.state.read_with(|state| state.store(name).map(|_| ()))?;
        Ok(ObjectStore::new(InMemoryObjectStore::new(
            name,
            self.inner.state.clone(),
            mode,
            false,
            self.inner.closed.clone(),
        )))
    }

    fn close(&self) {
        self.inner.close()
    }

    fn is_closed(&self) -> bool {
        self.inner.is_closed()
    }

    fn on_version_change(&self, callback: VersionChangeCallback) {
        self.inner.callbacks.lock().push(callback);
    }
}

/// State of one open connection. The store keeps only a weak reference, so
/// a connection whose handles were all dropped counts as closed.
pub(crate) struct ConnectionInner {
    id: u64,
    name: String,
    version: u64,
    state: Atomic<DatabaseState>,
    closed: Arc<AtomicBool>,
    callbacks: Mutex<Vec<VersionChangeCallback>>,
    store: Weak<InMemoryStoreInner>,
}

impl ConnectionInner {
    pub(crate) fn new(
        id: u64,
        name: &str,
        version: u64,
        state: Atomic<DatabaseState>,
        store: Weak<InMemoryStoreInner>,
    ) -> Self {
        ConnectionInner {
            id,
            name: name.to_string(),
            version,
            state,
            closed: Arc::new(AtomicBool::new(false)),
            callbacks: Mutex::new(Vec::new()),
            store,
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Runs the version-change callbacks. The callback list is copied first
    /// so a callback may register further callbacks or close the connection.
    pub(crate) fn fire_version_change(&self, event: VersionChangeEvent) {
        if self.is_closed() {
            return;
        }
        let callbacks: Vec<VersionChangeCallback> = self.callbacks.lock().clone();
        for callback in callbacks {
            callback(event);
        }
    }

    fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(store) = self.store.upgrade() {
            store.connection_closed(self.id, &self.name, self.version);
        }
    }

    fn check_open(&self) -> DbResult<()> {
        if self.is_closed() {
            return Err(DbError::new(
                &format!("Connection to {} is closed", self.name),
                ErrorKind::StoreClosed,
            ));
        }
        Ok(())
    }
}

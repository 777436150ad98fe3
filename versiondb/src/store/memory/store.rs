use super::config::InMemoryStoreConfig;
use super::connection::{ConnectionInner, InMemoryConnection};
use super::state::DatabaseState;
use super::upgrade::InMemoryUpgrade;
use crate::common::{atomic, Atomic, ReadExecutor, StoreEventBus, SubscriberRef, WriteExecutor};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::{
    Connection, OpenOutcome, StoreEventInfo, StoreEventListener, StoreEvents, StoreProvider,
    UpgradeTransaction, VersionChangeEvent,
};
use dashmap::DashMap;
use itertools::Itertools;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

/// A [`StoreProvider`] that keeps every database in process memory.
///
/// It follows the versioned object store protocol closely enough for the
/// migration engine to be exercised end to end: monotonic raw versions with
/// a configurable ceiling, staged version-change transactions, version-change
/// notifications to open connections and blocked opens.
///
/// Plain (non version-change) transactions apply each write immediately.
///
/// # Examples
///
/// ```rust
/// use versiondb::store::memory::{InMemoryStore, InMemoryStoreConfig};
/// use versiondb::store::{OpenOutcome, Store};
///
/// let store = Store::new(InMemoryStore::new(InMemoryStoreConfig::new().with_max_version(10)));
/// assert_eq!(store.max_version(), 10);
///
/// match store.open("clock", 1).unwrap() {
///     OpenOutcome::UpgradeNeeded(tx) => {
///         assert_eq!(tx.old_version(), 0);
///         tx.commit().unwrap().close();
///     }
///     OpenOutcome::Opened(_) => unreachable!(),
/// }
/// assert_eq!(store.database_names().unwrap(), vec!["clock".to_string()]);
/// ```
#[derive(Clone)]
pub struct InMemoryStore {
    inner: Arc<InMemoryStoreInner>,
}

impl InMemoryStore {
    pub fn new(config: InMemoryStoreConfig) -> InMemoryStore {
        let inner = Arc::new(InMemoryStoreInner::new(config));
        for listener in inner.config.event_listeners() {
            if let Err(e) = inner.event_bus.register(listener) {
                log::warn!("Failed to register store event listener: {}", e);
            }
        }
        InMemoryStore { inner }
    }

    pub fn config(&self) -> InMemoryStoreConfig {
        self.inner.config.clone()
    }

    pub(crate) fn commit_upgrade(
        &self,
        name: &str,
        old_version: u64,
        new_version: u64,
        mut staged: DatabaseState,
    ) -> DbResult<Connection> {
        staged.version = new_version;
        let connection = {
            let _guard = self.inner.open_lock.lock();
            let live = self.inner.live_state(name);
            live.write_with(|state| *state = staged);
            self.inner.pending.remove(name);
            self.new_connection(name, new_version, live)
        };

        log::debug!(
            "Database {} moved from raw version {} to {}",
            name,
            old_version,
            new_version
        );
        self.inner
            .alert(StoreEvents::Upgraded, name, old_version, Some(new_version));
        Ok(connection)
    }

    pub(crate) fn abort_upgrade(&self, name: &str, old_version: u64, new_version: u64) {
        self.inner.pending.remove(name);
        self.inner
            .alert(StoreEvents::Aborted, name, old_version, Some(new_version));
    }

    fn new_connection(&self, name: &str, version: u64, state: Atomic<DatabaseState>) -> Connection {
        let id = self.inner.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let inner = Arc::new(ConnectionInner::new(
            id,
            name,
            version,
            state,
            Arc::downgrade(&self.inner),
        ));
        self.inner
            .connections
            .insert(id, (name.to_string(), Arc::downgrade(&inner)));
        Connection::new(InMemoryConnection::new(inner))
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new(InMemoryStoreConfig::new())
    }
}

impl StoreProvider for InMemoryStore {
    fn open(&self, name: &str, version: u64) -> DbResult<OpenOutcome> {
        let max_version = self.inner.config.max_version();
        if version == 0 || version > max_version {
            return Err(DbError::new(
                &format!(
                    "Version {} of {} is outside the valid range 1..={}",
                    version, name, max_version
                ),
                ErrorKind::InvalidOperation,
            ));
        }

        let (current, staged) = {
            let _guard = self.inner.open_lock.lock();
            let existing = self.inner.databases.get(name).map(|db| db.value().clone());
            let current = existing
                .as_ref()
                .map(|db| db.read_with(|state| state.version))
                .unwrap_or(0);

            if version < current {
                return Err(DbError::new(
                    &format!(
                        "Requested version {} of {} is less than the existing version {}",
                        version, name, current
                    ),
                    ErrorKind::VersionError,
                ));
            }

            if version == current {
                if let Some(live) = existing.clone() {
                    let connection = self.new_connection(name, version, live);
                    drop(_guard);
                    self.inner
                        .alert(StoreEvents::Opened, name, current, Some(version));
                    return Ok(OpenOutcome::Opened(connection));
                }
            }

            if self.inner.pending.contains_key(name) {
                return Err(DbError::new(
                    &format!("Another version change of {} is in progress", name),
                    ErrorKind::Blocked,
                ));
            }
            self.inner.pending.insert(name.to_string(), version);

            let staged = existing
                .map(|db| db.read_with(|state| state.clone()))
                .unwrap_or_default();
            (current, staged)
        };

        if current > 0 {
            if let Err(e) = self.inner.notify_version_change(name, current, Some(version)) {
                self.inner.pending.remove(name);
                return Err(e);
            }
        }

        Ok(OpenOutcome::UpgradeNeeded(UpgradeTransaction::new(
            InMemoryUpgrade::new(self.clone(), name, current, version, staged),
        )))
    }

    fn delete_database(&self, name: &str) -> DbResult<()> {
        let current = {
            let _guard = self.inner.open_lock.lock();
            if self.inner.pending.contains_key(name) {
                return Err(DbError::new(
                    &format!("Cannot delete {} during a version change", name),
                    ErrorKind::Blocked,
                ));
            }
            match self.inner.databases.get(name) {
                Some(db) => db.read_with(|state| state.version),
                None => return Ok(()),
            }
        };

        self.inner.notify_version_change(name, current, None)?;
        {
            let _guard = self.inner.open_lock.lock();
            self.inner.databases.remove(name);
        }

        log::debug!("Deleted database {} at raw version {}", name, current);
        self.inner.alert(StoreEvents::Deleted, name, current, None);
        Ok(())
    }

    fn database_names(&self) -> DbResult<Vec<String>> {
        Ok(self
            .inner
            .databases
            .iter()
            .map(|entry| entry.key().clone())
            .sorted()
            .collect())
    }

    fn max_version(&self) -> u64 {
        self.inner.config.max_version()
    }

    fn subscribe(&self, listener: StoreEventListener) -> DbResult<Option<SubscriberRef>> {
        self.inner.event_bus.register(listener)
    }

    fn unsubscribe(&self, subscriber: SubscriberRef) -> DbResult<()> {
        self.inner.event_bus.deregister(subscriber)
    }
}

pub(crate) struct InMemoryStoreInner {
    config: InMemoryStoreConfig,
    event_bus: StoreEventBus<StoreEventInfo, StoreEventListener>,
    databases: DashMap<String, Atomic<DatabaseState>>,
    // database name -> requested version of the in-flight version change
    pending: DashMap<String, u64>,
    connections: DashMap<u64, (String, Weak<ConnectionInner>)>,
    next_connection_id: AtomicU64,
    open_lock: Mutex<()>,
}

impl InMemoryStoreInner {
    fn new(config: InMemoryStoreConfig) -> Self {
        InMemoryStoreInner {
            config,
            event_bus: StoreEventBus::new(),
            databases: DashMap::new(),
            pending: DashMap::new(),
            connections: DashMap::new(),
            next_connection_id: AtomicU64::new(1),
            open_lock: Mutex::new(()),
        }
    }

    pub(crate) fn connection_closed(&self, id: u64, name: &str, version: u64) {
        self.connections.remove(&id);
        self.alert(StoreEvents::Closed, name, version, Some(version));
    }

    fn live_state(&self, name: &str) -> Atomic<DatabaseState> {
        self.databases
            .entry(name.to_string())
            .or_insert_with(|| atomic(DatabaseState::default()))
            .value()
            .clone()
    }

    /// Asks every open connection to `name` to close. Fails with `Blocked`
    /// when some of them are still open afterwards.
    fn notify_version_change(
        &self,
        name: &str,
        old_version: u64,
        new_version: Option<u64>,
    ) -> DbResult<()> {
        let open_connections = self.open_connections(name);
        if open_connections.is_empty() {
            return Ok(());
        }

        let event = VersionChangeEvent {
            old_version,
            new_version,
        };
        for connection in &open_connections {
            connection.fire_version_change(event);
        }

        let still_open = open_connections.iter().filter(|c| !c.is_closed()).count();
        if still_open > 0 {
            log::warn!(
                "{} connection(s) to {} stayed open after a version change request",
                still_open,
                name
            );
            self.alert(StoreEvents::Blocked, name, old_version, new_version);
            return Err(DbError::new(
                &format!(
                    "Version change of {} is blocked by {} open connection(s)",
                    name, still_open
                ),
                ErrorKind::Blocked,
            ));
        }
        Ok(())
    }

    fn open_connections(&self, name: &str) -> Vec<Arc<ConnectionInner>> {
        let mut open = Vec::new();
        let mut dropped = Vec::new();
        for entry in self.connections.iter() {
            let (db_name, connection) = entry.value();
            if db_name != name {
                continue;
            }
            match connection.upgrade() {
                Some(connection) if !connection.is_closed() => open.push(connection),
                _ => dropped.push(*entry.key()),
            }
        }
        for id in dropped {
            self.connections.remove(&id);
        }
        open
    }

    fn alert(&self, event: StoreEvents, name: &str, old_version: u64, new_version: Option<u64>) {
        if !self.event_bus.has_listeners() {
            return;
        }
        let info = StoreEventInfo::new(event, name, old_version, new_version);
        if let Err(e) = self.event_bus.publish(info) {
            log::warn!("Failed to publish {:?} event for {}: {}", event, name, e);
        }
    }
}

use super::broker::mutator_lock;
use super::migrator::Migrator;
use super::queue::ConnectQueue;
use super::reset;
use super::{DatabaseBuilder, DatabaseOptions, MutatorBroker, Mutators, ProbedVersion, VersionProber};
use crate::common::{Key, SubscriberRef, Value, CONNECT_ATTEMPTS};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::schema::{SchemaRegistry, Transform};
use crate::store::{
    Connection, ConnectionProvider, CursorDirection, ObjectStore, OpenOutcome, Store,
    StoreEventInfo, StoreEventListener, StoreEvents, TransactionMode,
};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use once_cell::sync::{Lazy, OnceCell};
use parking_lot::{Mutex, RwLock};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

static SINGLETONS: Lazy<DashMap<String, Database>> = Lazy::new(DashMap::new);

/// A named database kept at a fixed effective schema version.
///
/// [`connect`](Self::connect) brings the stored data to the configured
/// version before handing out a connection: it probes the store, chains the
/// registered upgraders or downgraders and reinitializes from scratch when
/// no chain exists. Connect calls on the same `Database` are served one at
/// a time in arrival order.
///
/// `Database` is cheap to clone; clones share the mutator lists, the
/// version memo and the connect queue.
///
/// # Examples
///
/// ```rust
/// use versiondb::database::Database;
/// use versiondb::schema::{SchemaTransforms, SchemaVersion};
/// use versiondb::store::{CursorDirection, ObjectStoreParams};
/// use versiondb::common::{Key, Value};
///
/// SchemaVersion::new(
///     "database-example",
///     1,
///     SchemaTransforms::new().initializer(|tx| {
///         tx.create_object_store("settings", ObjectStoreParams::new())?;
///         Ok(())
///     }),
/// )
/// .unwrap();
///
/// let db = Database::builder().name("database-example").version(1).open().unwrap();
/// db.put("settings", Value::from("24h"), Some(Key::from("clock_format"))).unwrap();
///
/// let entries = db.alist("settings", CursorDirection::Next).unwrap();
/// assert_eq!(entries, vec![(Key::from("clock_format"), Value::from("24h"))]);
/// ```
#[derive(Clone)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Debug for Database {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("name", &self.name())
            .field("version", &self.version())
            .finish()
    }
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub fn new(options: DatabaseOptions) -> DbResult<Database> {
        options.validate()?;
        let inner = DatabaseInner::new(options)?;
        Ok(Database {
            inner: Arc::new(inner),
        })
    }

    /// The process-wide database of `options.name()`.
    ///
    /// The first call creates it; later calls return the same instance and
    /// ignore their options.
    pub fn singleton(options: DatabaseOptions) -> DbResult<Database> {
        options.validate()?;
        match SINGLETONS.entry(options.name().to_string()) {
            Entry::Occupied(entry) => {
                let existing = entry.get().clone();
                if existing.version() != options.version() {
                    log::warn!(
                        "Database {} already exists at version {}, ignoring version {}",
                        options.name(),
                        existing.version(),
                        options.version()
                    );
                }
                Ok(existing)
            }
            Entry::Vacant(entry) => {
                let database = Database::new(options)?;
                entry.insert(database.clone());
                Ok(database)
            }
        }
    }

    /// Forgets one singleton, or all of them when `name` is `None`.
    pub fn clear_singletons(name: Option<&str>) {
        match name {
            Some(name) => {
                SINGLETONS.remove(name);
            }
            None => SINGLETONS.clear(),
        }
    }

    pub fn name(&self) -> &str {
        self.inner.options.name()
    }

    pub fn version(&self) -> u64 {
        self.inner.options.version()
    }

    pub fn options(&self) -> &DatabaseOptions {
        &self.inner.options
    }

    pub fn store(&self) -> &Store {
        self.inner.broker.store()
    }

    pub fn add_initializer(&self, version: u64, transform: Transform) {
        self.inner.mutators.write().initializers.add(version, transform);
    }

    pub fn add_upgrader(&self, version: u64, transform: Transform) {
        self.inner.mutators.write().upgraders.add(version, transform);
    }

    pub fn add_downgrader(&self, version: u64, transform: Transform) {
        self.inner.mutators.write().downgraders.add(version, transform);
    }

    pub fn remove_initializer(&self, version: u64) -> bool {
        self.inner.mutators.write().initializers.remove(version)
    }

    pub fn remove_upgrader(&self, version: u64) -> bool {
        self.inner.mutators.write().upgraders.remove(version)
    }

    pub fn remove_downgrader(&self, version: u64) -> bool {
        self.inner.mutators.write().downgraders.remove(version)
    }

    /// A snapshot of the registered mutators.
    pub fn mutators(&self) -> Mutators {
        self.inner.mutators.read().clone()
    }

    /// Opens a connection at the configured effective version, migrating
    /// the stored data first when needed.
    ///
    /// The connection closes itself when another party changes the version
    /// of the database or deletes it.
    pub fn connect(&self) -> DbResult<Connection> {
        let _turn = self.inner.queue.enter();

        let mut attempt = 1;
        loop {
            match self.inner.connect_once() {
                Ok(Some(connection)) => return Ok(connection),
                Ok(None) if attempt < CONNECT_ATTEMPTS => {
                    log::debug!("{} changed while connecting, retrying", self.name());
                }
                Err(e) if e.kind() == &ErrorKind::VersionError && attempt < CONNECT_ATTEMPTS => {
                    log::debug!("{} moved past the probed version, retrying: {}", self.name(), e);
                    self.inner.prober.invalidate(self.name());
                }
                Ok(None) => {
                    return Err(DbError::new(
                        &format!(
                            "{} kept changing while connecting, gave up after {} attempts",
                            self.name(),
                            attempt
                        ),
                        ErrorKind::Blocked,
                    ))
                }
                Err(e) => return Err(e),
            }
            attempt += 1;
        }
    }

    /// Reads the record stored under `key`.
    pub fn request(&self, store_name: &str, key: &Key) -> DbResult<Value> {
        self.with_object_store(store_name, TransactionMode::ReadOnly, |object_store| {
            object_store
                .get(key)?
                .ok_or_else(|| DbError::new("key not found", ErrorKind::NotFound))
        })
    }

    /// Stores `value` and returns it as stored, with a generated key
    /// written at the key path of the object store.
    pub fn put(&self, store_name: &str, value: Value, key: Option<Key>) -> DbResult<Value> {
        self.with_object_store(store_name, TransactionMode::ReadWrite, |object_store| {
            let key = object_store.put(value, key)?;
            object_store.get(&key)?.ok_or_else(|| {
                DbError::new(
                    &format!("Record {} vanished right after it was written", key),
                    ErrorKind::InternalError,
                )
            })
        })
    }

    pub fn delete(&self, store_name: &str, key: &Key) -> DbResult<()> {
        self.with_object_store(store_name, TransactionMode::ReadWrite, |object_store| {
            object_store.delete(key)
        })
    }

    /// Every record of the object store in cursor order.
    pub fn alist(&self, store_name: &str, direction: CursorDirection) -> DbResult<Vec<(Key, Value)>> {
        self.with_object_store(store_name, TransactionMode::ReadOnly, |object_store| {
            Ok(object_store.open_cursor(None, direction)?.collect())
        })
    }

    /// The raw and effective versions currently in the store.
    pub fn probe_version(&self) -> DbResult<ProbedVersion> {
        self.inner.prober.probe(self.store(), self.name())
    }

    /// Restarts the raw version counter at 1 while keeping all data.
    pub fn reset_version_counter(&self) -> DbResult<()> {
        let lock = mutator_lock(self.name());
        let _guard = lock.lock();
        self.inner.prober.invalidate(self.name());
        let result = reset::reset_version_counter(self.store(), self.name());
        self.inner.prober.invalidate(self.name());
        result
    }

    fn with_object_store<R, F>(&self, store_name: &str, mode: TransactionMode, f: F) -> DbResult<R>
    where
        F: FnOnce(&ObjectStore) -> DbResult<R>,
    {
        let connection = self.connect()?;
        let result = connection
            .transaction(&[store_name], mode)
            .and_then(|tx| tx.object_store(store_name))
            .and_then(|object_store| f(&object_store));
        connection.close();
        result
    }
}

struct DatabaseInner {
    options: DatabaseOptions,
    mutators: RwLock<Mutators>,
    prober: VersionProber,
    broker: MutatorBroker,
    queue: ConnectQueue,
    schemas_loaded: OnceCell<()>,
    subscriber: Mutex<Option<SubscriberRef>>,
}

impl DatabaseInner {
    fn new(options: DatabaseOptions) -> DbResult<Self> {
        let store = options.store_or_default();
        let prober = VersionProber::new();

        // version changes made through other handles make the memo stale
        let memo = prober.clone();
        let watched = options.name().to_string();
        let listener = StoreEventListener::new(move |info: StoreEventInfo| {
            if info.database_name() == watched
                && matches!(info.event(), StoreEvents::Upgraded | StoreEvents::Deleted)
            {
                memo.invalidate(&watched);
            }
            Ok(())
        });
        let subscriber = store.subscribe(listener)?;

        Ok(DatabaseInner {
            options,
            mutators: RwLock::new(Mutators::default()),
            broker: MutatorBroker::new(store, prober.clone()),
            prober,
            queue: ConnectQueue::new(),
            schemas_loaded: OnceCell::new(),
            subscriber: Mutex::new(subscriber),
        })
    }

    fn name(&self) -> &str {
        self.options.name()
    }

    fn store(&self) -> &Store {
        self.broker.store()
    }

    /// One connect sequence. `None` means the database was recreated
    /// between the probe and the open and the sequence must start over.
    fn connect_once(self: &Arc<Self>) -> DbResult<Option<Connection>> {
        let name = self.name();
        let target = self.options.version();

        let mut probed = self.prober.probe(self.store(), name)?;
        if probed.raw == 0 || probed.effective != target {
            log::info!(
                "{} is at effective version {} (raw {}), connecting at {}",
                name,
                probed.effective,
                probed.raw,
                target
            );
            self.register_schemas()?;
            let mutators = self.mutators.read().clone();
            Migrator::new(&self.broker, name, &mutators).migrate(probed.effective, target)?;
            self.prober.invalidate(name);
            probed = self.prober.probe(self.store(), name)?;
        }

        match self.store().open(name, probed.raw)? {
            OpenOutcome::Opened(connection) => {
                self.watch(&connection);
                log::debug!("Connected to {} at raw version {}", name, probed.raw);
                Ok(Some(connection))
            }
            OpenOutcome::UpgradeNeeded(tx) => {
                tx.rollback()?;
                self.prober.invalidate(name);
                Ok(None)
            }
        }
    }

    fn watch(&self, connection: &Connection) {
        let prober = self.prober.clone();
        let name = self.name().to_string();
        let shared: &Arc<dyn ConnectionProvider> = connection;
        let handle = Arc::downgrade(shared);
        connection.on_version_change(Arc::new(move |event| {
            prober.invalidate(&name);
            if let Some(connection) = handle.upgrade() {
                log::debug!(
                    "Closing connection to {} for a version change from {} to {:?}",
                    name,
                    event.old_version,
                    event.new_version
                );
                connection.close();
            }
        }));
    }

    // Loads the schema modules once, then copies every registered version
    // of this database into the mutator lists.
    fn register_schemas(self: &Arc<Self>) -> DbResult<()> {
        self.schemas_loaded.get_or_try_init(|| -> DbResult<()> {
            for module in self.options.schemas() {
                module.load()?;
            }
            Ok(())
        })?;

        let database = Database {
            inner: self.clone(),
        };
        for schema_version in SchemaRegistry::global().list(self.name()) {
            schema_version.register(&database)?;
        }
        Ok(())
    }
}

impl Drop for DatabaseInner {
    fn drop(&mut self) {
        if let Some(subscriber) = self.subscriber.lock().take() {
            if let Err(e) = self.store().unsubscribe(subscriber) {
                log::warn!("Failed to unsubscribe {} from store events: {}", self.name(), e);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::schema::{SchemaModule, SchemaTransforms, SchemaVersion};
    use crate::store::memory::InMemoryStore;
    use crate::store::ObjectStoreParams;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Barrier;
    use std::thread;

    #[ctor::ctor]
    fn init() {
        colog::init();
    }

    static NEXT_NAME: AtomicUsize = AtomicUsize::new(0);

    fn unique_name(prefix: &str) -> String {
        format!("{}-{}", prefix, NEXT_NAME.fetch_add(1, Ordering::SeqCst))
    }

    fn alarms_v1(name: &str) {
        SchemaVersion::new(
            name,
            1,
            SchemaTransforms::new().initializer(|tx| {
                tx.create_object_store(
                    "alarms",
                    ObjectStoreParams::new().key_path("id").auto_increment(true),
                )?;
                Ok(())
            }),
        )
        .unwrap();
    }

    fn open(name: &str, version: u64, store: &Store) -> Database {
        Database::builder()
            .name(name)
            .version(version)
            .store_handle(store.clone())
            .open()
            .unwrap()
    }

    #[test]
    fn test_connect_initializes_new_database() {
        let name = unique_name("db-init");
        alarms_v1(&name);
        let store = Store::new(InMemoryStore::default());
        let db = open(&name, 1, &store);

        let connection = db.connect().unwrap();
        assert!(connection
            .object_store_names()
            .unwrap()
            .contains(&"alarms".to_string()));
        connection.close();
        assert_eq!(db.probe_version().unwrap(), ProbedVersion { raw: 1, effective: 1 });

        // a second connect has nothing to migrate
        db.connect().unwrap().close();
        assert_eq!(db.probe_version().unwrap().raw, 1);
        SchemaRegistry::global().clear(Some(&name));
    }

    #[test]
    fn test_record_operations() {
        let name = unique_name("db-records");
        alarms_v1(&name);
        let db = Database::builder().name(&name).version(1).open().unwrap();

        let first = db.put("alarms", doc! { hour: 6 }.into(), None).unwrap();
        let second = db.put("alarms", doc! { hour: 7 }.into(), None).unwrap();
        assert_eq!(first.resolve_path("id"), Some(&Value::from(1)));
        assert_eq!(db.request("alarms", &Key::from(2)).unwrap(), second);

        let keys: Vec<Key> = db
            .alist("alarms", CursorDirection::Prev)
            .unwrap()
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        assert_eq!(keys, vec![Key::from(2), Key::from(1)]);

        db.delete("alarms", &Key::from(1)).unwrap();
        let err = db.request("alarms", &Key::from(1)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NotFound);
        assert_eq!(err.message(), "key not found");

        let err = db.request("missing", &Key::from(1)).unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::ObjectStoreNotFound);
        SchemaRegistry::global().clear(Some(&name));
    }

    #[test]
    fn test_upgrade_and_downgrade_through_shared_store() {
        let name = unique_name("db-chain");
        SchemaVersion::new(
            &name,
            1,
            SchemaTransforms::new()
                .initializer(|tx| {
                    tx.create_object_store(
                        "alarms",
                        ObjectStoreParams::new().key_path("id").auto_increment(true),
                    )?;
                    Ok(())
                })
                .upgrader(|tx| {
                    tx.create_object_store("timers", ObjectStoreParams::new().key_path("id"))?;
                    Ok(())
                }),
        )
        .unwrap();
        SchemaVersion::new(
            &name,
            2,
            SchemaTransforms::new()
                .initializer(|tx| {
                    tx.create_object_store("alarms", ObjectStoreParams::new().key_path("id"))?;
                    tx.create_object_store("timers", ObjectStoreParams::new().key_path("id"))?;
                    Ok(())
                })
                .downgrader(|tx| tx.delete_object_store("timers")),
        )
        .unwrap();

        let store = Store::new(InMemoryStore::default());
        let v1 = open(&name, 1, &store);
        v1.put("alarms", doc! { hour: 9 }.into(), None).unwrap();

        let v2 = open(&name, 2, &store);
        v2.put("timers", doc! { id: 1, seconds: 90 }.into(), None).unwrap();
        assert_eq!(v2.alist("alarms", CursorDirection::Next).unwrap().len(), 1);
        assert_eq!(v2.probe_version().unwrap(), ProbedVersion { raw: 3, effective: 2 });

        // back down: the downgrader of 2 drops the timers, alarms survive
        let connection = v1.connect().unwrap();
        let mut names = connection.object_store_names().unwrap();
        names.sort();
        assert_eq!(names, vec!["__effectiveVersion__".to_string(), "alarms".to_string()]);
        connection.close();
        assert_eq!(v1.probe_version().unwrap(), ProbedVersion { raw: 5, effective: 1 });
        assert_eq!(v1.alist("alarms", CursorDirection::Next).unwrap().len(), 1);
        SchemaRegistry::global().clear(Some(&name));
    }

    #[test]
    fn test_open_connection_closes_on_version_change() {
        let name = unique_name("db-watch");
        alarms_v1(&name);
        SchemaVersion::new(
            &name,
            2,
            SchemaTransforms::new()
                .initializer(|tx| {
                    tx.create_object_store("alarms", ObjectStoreParams::new())?;
                    Ok(())
                }),
        )
        .unwrap();
        let store = Store::new(InMemoryStore::default());
        let v1 = open(&name, 1, &store);
        let held = v1.connect().unwrap();

        let v2 = open(&name, 2, &store);
        v2.add_upgrader(1, SchemaVersion::noop());
        v2.connect().unwrap().close();
        assert!(held.is_closed());
        SchemaRegistry::global().clear(Some(&name));
    }

    #[test]
    fn test_missing_initializer() {
        let name = unique_name("db-noinit");
        let db = Database::builder().name(&name).version(1).open().unwrap();
        let err = db.connect().unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::NoInitializer);
        assert!(db.store().database_names().unwrap().is_empty());
    }

    #[test]
    fn test_schema_modules_load_once() {
        let name = unique_name("db-modules");
        let loads = Arc::new(AtomicUsize::new(0));
        let counter = loads.clone();
        let module_name = name.clone();
        let module = SchemaModule::new("alarms", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            alarms_v1(&module_name);
            Ok(())
        });
        let db = Database::builder()
            .name(&name)
            .version(1)
            .schema(module)
            .open()
            .unwrap();

        db.connect().unwrap().close();
        db.connect().unwrap().close();
        assert_eq!(loads.load(Ordering::SeqCst), 1);
        SchemaRegistry::global().clear(Some(&name));
    }

    #[test]
    fn test_mutator_management() {
        let db = Database::builder().name(&unique_name("db-mutators")).open().unwrap();
        db.add_initializer(1, SchemaVersion::noop());
        db.add_upgrader(1, SchemaVersion::noop());
        db.add_upgrader(2, SchemaVersion::noop());
        db.add_downgrader(2, SchemaVersion::noop());

        assert!(db.remove_upgrader(1));
        assert!(!db.remove_upgrader(1));
        assert!(db.remove_downgrader(2));
        assert!(!db.remove_initializer(3));

        let mutators = db.mutators();
        assert_eq!(mutators.initializers.versions(), vec![1]);
        assert_eq!(mutators.upgraders.versions(), vec![2]);
        assert!(mutators.downgraders.is_empty());
    }

    #[test]
    fn test_singleton() {
        let name = unique_name("db-singleton");
        let first = Database::singleton(DatabaseOptions::new(&name, 1).unwrap()).unwrap();
        let second = Database::builder().name(&name).version(2).singleton().unwrap();
        assert!(Arc::ptr_eq(&first.inner, &second.inner));
        assert_eq!(second.version(), 1);

        Database::clear_singletons(Some(&name));
        let third = Database::singleton(DatabaseOptions::new(&name, 2).unwrap()).unwrap();
        assert!(!Arc::ptr_eq(&first.inner, &third.inner));
        assert_eq!(third.version(), 2);
        Database::clear_singletons(Some(&name));
    }

    #[test]
    fn test_concurrent_connects() {
        let name = unique_name("db-concurrent");
        alarms_v1(&name);
        let db = Database::builder().name(&name).version(1).open().unwrap();

        let handles: Vec<_> = (0..4)
            .map(|hour| {
                let db = db.clone();
                thread::spawn(move || {
                    db.put("alarms", doc! { hour: hour }.into(), None).unwrap();
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(db.alist("alarms", CursorDirection::Next).unwrap().len(), 4);
        assert_eq!(db.probe_version().unwrap(), ProbedVersion { raw: 1, effective: 1 });
        SchemaRegistry::global().clear(Some(&name));
    }

    #[test]
    fn test_databases_without_store_share_the_default() {
        let name = unique_name("db-default-store");
        alarms_v1(&name);
        let writer = Database::builder().name(&name).version(1).open().unwrap();
        let reader = Database::builder().name(&name).version(1).open().unwrap();

        let stored = writer.put("alarms", doc! { hour: 5 }.into(), None).unwrap();
        let key = stored.resolve_path("id").cloned().unwrap();
        assert_eq!(reader.request("alarms", &key).unwrap(), stored);
        SchemaRegistry::global().clear(Some(&name));
    }

    #[test]
    fn test_separate_handles_connect_concurrently() {
        for _ in 0..25 {
            let name = unique_name("db-handles");
            alarms_v1(&name);
            let store = Store::new(InMemoryStore::default());
            let barrier = Arc::new(Barrier::new(2));

            let handles: Vec<_> = (0..2)
                .map(|_| {
                    let db = open(&name, 1, &store);
                    let barrier = barrier.clone();
                    thread::spawn(move || {
                        barrier.wait();
                        db.connect().map(|connection| connection.close())
                    })
                })
                .collect();
            for handle in handles {
                let result = handle.join().unwrap();
                assert!(result.is_ok(), "connect failed: {:?}", result);
            }

            let db = open(&name, 1, &store);
            assert_eq!(db.probe_version().unwrap().effective, 1);
            SchemaRegistry::global().clear(Some(&name));
        }
    }

    #[test]
    fn test_reset_version_counter_keeps_data() {
        let name = unique_name("db-reset");
        alarms_v1(&name);
        let db = Database::builder().name(&name).version(1).open().unwrap();
        db.put("alarms", doc! { hour: 5 }.into(), None).unwrap();

        db.reset_version_counter().unwrap();
        assert_eq!(db.probe_version().unwrap(), ProbedVersion { raw: 1, effective: 1 });
        assert_eq!(db.request("alarms", &Key::from(1)).unwrap().resolve_path("hour"), Some(&Value::from(5)));
        SchemaRegistry::global().clear(Some(&name));
    }
}

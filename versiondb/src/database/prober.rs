use super::broker::mutator_lock;
use crate::common::{Key, EFFECTIVE_VERSION_FIELD, EFFECTIVE_VERSION_KEY, EFFECTIVE_VERSION_STORE};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::{Connection, ConnectionProvider, ObjectStore, OpenOutcome, Store, TransactionMode, UpgradeTransaction};
use dashmap::DashMap;
use std::sync::Arc;

/// The two versions of a database.
///
/// `raw` is the store's own monotonic counter (`0` when the database does
/// not exist); `effective` is the schema version the data is actually in
/// (`0` when it was never initialized).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProbedVersion {
    pub raw: u64,
    pub effective: u64,
}

/// Discovers raw and effective versions, memoizing the last result per
/// database name.
///
/// A memoized result is revalidated by opening at the memoized raw version:
/// if that starts a version change or is refused as too low, the database
/// moved on and is probed again. Clones share the memo.
///
/// Probing holds the mutator lock of the database name, so probes and
/// version-change transactions of one name never overlap within the process.
#[derive(Clone, Default)]
pub struct VersionProber {
    memo: Arc<DashMap<String, ProbedVersion>>,
}

impl VersionProber {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn probe(&self, store: &Store, name: &str) -> DbResult<ProbedVersion> {
        let lock = mutator_lock(name);
        let _guard = lock.lock();
        self.probe_locked(store, name)
    }

    /// Same as [`probe`](Self::probe) for callers already holding the
    /// mutator lock of `name`.
    pub(crate) fn probe_locked(&self, store: &Store, name: &str) -> DbResult<ProbedVersion> {
        let memoized = self.memo.get(name).map(|entry| *entry.value());
        if let Some(memoized) = memoized {
            if self.revalidate(store, name, memoized)? {
                return Ok(memoized);
            }
            log::debug!("Memoized version of {} is stale", name);
            self.invalidate(name);
        }

        let probed = self.probe_store(store, name)?;
        log::debug!(
            "Probed {}: raw version {}, effective version {}",
            name,
            probed.raw,
            probed.effective
        );
        self.memo.insert(name.to_string(), probed);
        Ok(probed)
    }

    pub fn invalidate(&self, name: &str) {
        self.memo.remove(name);
    }

    pub fn memoized(&self, name: &str) -> Option<ProbedVersion> {
        self.memo.get(name).map(|entry| *entry.value())
    }

    fn revalidate(&self, store: &Store, name: &str, memoized: ProbedVersion) -> DbResult<bool> {
        if memoized.raw == 0 {
            return Ok(false);
        }
        match store.open(name, memoized.raw) {
            Ok(OpenOutcome::Opened(connection)) => {
                close_on_version_change(&connection);
                connection.close();
                Ok(true)
            }
            Ok(OpenOutcome::UpgradeNeeded(tx)) => {
                tx.rollback().map_err(|e| probe_error(name, e))?;
                Ok(false)
            }
            Err(e) if e.kind() == &ErrorKind::VersionError => Ok(false),
            Err(e) => Err(probe_error(name, e)),
        }
    }

    // Opening at the ceiling forces a version change on any database below
    // it; the transaction exposes the old version and is then aborted.
    fn probe_store(&self, store: &Store, name: &str) -> DbResult<ProbedVersion> {
        let outcome = store
            .open(name, store.max_version())
            .map_err(|e| probe_error(name, e))?;

        match outcome {
            OpenOutcome::UpgradeNeeded(tx) => {
                let raw = tx.old_version();
                let effective = if raw > 0 {
                    read_effective_in_upgrade(&tx)
                } else {
                    Ok(0)
                };
                tx.rollback().map_err(|e| probe_error(name, e))?;
                Ok(ProbedVersion {
                    raw,
                    effective: effective.map_err(|e| probe_error(name, e))?,
                })
            }
            OpenOutcome::Opened(connection) => {
                close_on_version_change(&connection);
                let raw = connection.version();
                let effective = read_effective_in_connection(&connection);
                connection.close();
                Ok(ProbedVersion {
                    raw,
                    effective: effective.map_err(|e| probe_error(name, e))?,
                })
            }
        }
    }
}

// A probing connection never stands in the way of a version change.
fn close_on_version_change(connection: &Connection) {
    let shared: &Arc<dyn ConnectionProvider> = connection;
    let handle = Arc::downgrade(shared);
    connection.on_version_change(Arc::new(move |_| {
        if let Some(connection) = handle.upgrade() {
            connection.close();
        }
    }));
}

fn read_effective_in_upgrade(tx: &UpgradeTransaction) -> DbResult<u64> {
    if !tx.has_object_store(EFFECTIVE_VERSION_STORE)? {
        return Ok(0);
    }
    read_effective(&tx.object_store(EFFECTIVE_VERSION_STORE)?)
}

fn read_effective_in_connection(connection: &Connection) -> DbResult<u64> {
    let names = connection.object_store_names()?;
    if !names.iter().any(|n| n == EFFECTIVE_VERSION_STORE) {
        return Ok(0);
    }
    let tx = connection.transaction(&[EFFECTIVE_VERSION_STORE], TransactionMode::ReadOnly)?;
    read_effective(&tx.object_store(EFFECTIVE_VERSION_STORE)?)
}

fn read_effective(object_store: &ObjectStore) -> DbResult<u64> {
    let record = object_store.get(&Key::from(EFFECTIVE_VERSION_KEY))?;
    Ok(record
        .as_ref()
        .and_then(|r| r.resolve_path(EFFECTIVE_VERSION_FIELD))
        .and_then(|n| n.as_i64())
        .and_then(|n| u64::try_from(n).ok())
        .unwrap_or(0))
}

fn probe_error(name: &str, e: DbError) -> DbError {
    // a blocked open keeps its kind so callers can retry
    if e.kind() == &ErrorKind::Blocked || e.kind() == &ErrorKind::VersionProbeError {
        return e;
    }
    DbError::new_with_cause(
        &format!("Failed to probe the version of {}", name),
        ErrorKind::VersionProbeError,
        e,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc;
    use crate::store::memory::{InMemoryStore, InMemoryStoreConfig};
    use crate::store::ObjectStoreParams;

    fn commit_version(store: &Store, name: &str, version: u64, effective: Option<u64>) {
        let tx = match store.open(name, version).unwrap() {
            OpenOutcome::UpgradeNeeded(tx) => tx,
            OpenOutcome::Opened(_) => panic!("expected a version change"),
        };
        if let Some(effective) = effective {
            if !tx.has_object_store(EFFECTIVE_VERSION_STORE).unwrap() {
                tx.create_object_store(EFFECTIVE_VERSION_STORE, ObjectStoreParams::new())
                    .unwrap();
            }
            tx.object_store(EFFECTIVE_VERSION_STORE)
                .unwrap()
                .put(doc! { number: effective }.into(), Some(Key::from(0)))
                .unwrap();
        }
        tx.commit().unwrap().close();
    }

    #[test]
    fn test_new_database_probes_zero_and_leaves_nothing() {
        let store = Store::new(InMemoryStore::default());
        let prober = VersionProber::new();
        let probed = prober.probe(&store, "fresh").unwrap();
        assert_eq!(probed, ProbedVersion { raw: 0, effective: 0 });
        assert!(store.database_names().unwrap().is_empty());
    }

    #[test]
    fn test_reads_effective_version() {
        let store = Store::new(InMemoryStore::default());
        commit_version(&store, "clock", 7, Some(3));
        let probed = VersionProber::new().probe(&store, "clock").unwrap();
        assert_eq!(probed, ProbedVersion { raw: 7, effective: 3 });
    }

    #[test]
    fn test_missing_effective_store_is_zero() {
        let store = Store::new(InMemoryStore::default());
        commit_version(&store, "clock", 2, None);
        let probed = VersionProber::new().probe(&store, "clock").unwrap();
        assert_eq!(probed, ProbedVersion { raw: 2, effective: 0 });
    }

    #[test]
    fn test_probe_at_ceiling_uses_read_only_path() {
        let store = Store::new(InMemoryStore::new(
            InMemoryStoreConfig::new().with_max_version(4),
        ));
        commit_version(&store, "clock", 4, Some(2));
        let probed = VersionProber::new().probe(&store, "clock").unwrap();
        assert_eq!(probed, ProbedVersion { raw: 4, effective: 2 });
    }

    #[test]
    fn test_memo_is_revalidated() {
        let store = Store::new(InMemoryStore::default());
        let prober = VersionProber::new();
        commit_version(&store, "clock", 1, Some(1));
        assert_eq!(prober.probe(&store, "clock").unwrap().raw, 1);
        assert_eq!(prober.memoized("clock").map(|m| m.raw), Some(1));

        commit_version(&store, "clock", 5, Some(2));
        let probed = prober.probe(&store, "clock").unwrap();
        assert_eq!(probed, ProbedVersion { raw: 5, effective: 2 });
    }

    #[test]
    fn test_memo_after_delete() {
        let store = Store::new(InMemoryStore::default());
        let prober = VersionProber::new();
        commit_version(&store, "clock", 3, Some(1));
        prober.probe(&store, "clock").unwrap();

        store.delete_database("clock").unwrap();
        let probed = prober.probe(&store, "clock").unwrap();
        assert_eq!(probed, ProbedVersion::default());
        assert!(store.database_names().unwrap().is_empty());
    }

    #[test]
    fn test_open_connection_blocks_probe() {
        let store = Store::new(InMemoryStore::default());
        commit_version(&store, "clock", 1, Some(1));
        let connection = match store.open("clock", 1).unwrap() {
            OpenOutcome::Opened(connection) => connection,
            OpenOutcome::UpgradeNeeded(_) => panic!("expected an opened connection"),
        };
        let err = VersionProber::new().probe(&store, "clock").unwrap_err();
        assert_eq!(err.kind(), &ErrorKind::Blocked);
        connection.close();
    }
}

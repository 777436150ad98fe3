use super::{Connection, StoreEventListener, UpgradeTransaction};
use crate::common::SubscriberRef;
use crate::errors::DbResult;
use std::ops::Deref;
use std::sync::Arc;

/// Result of opening a database at a requested raw version.
pub enum OpenOutcome {
    /// The database already was at the requested version.
    Opened(Connection),
    /// The requested version is higher than the stored one (or the database
    /// did not exist). The caller owns the version-change transaction and
    /// must commit or abort it.
    UpgradeNeeded(UpgradeTransaction),
}

impl OpenOutcome {
    pub fn is_upgrade(&self) -> bool {
        matches!(self, OpenOutcome::UpgradeNeeded(_))
    }
}

/// Contract of the underlying versioned key-value store.
///
/// A store holds any number of named databases. Each database has a raw
/// version counter that only moves forward: opening at a higher version
/// starts a version-change transaction, opening at a lower one fails.
///
/// # Errors
///
/// `open` reports
/// - `InvalidOperation` for version `0` or a version above [`max_version`],
/// - `VersionError` when the requested version is lower than the stored one,
/// - `Blocked` when other connections stay open after being notified of the
///   version change, or another version change is already in flight.
///
/// [`max_version`]: StoreProvider::max_version
pub trait StoreProvider: Send + Sync {
    /// Opens `name` at raw `version`, creating it when it does not exist.
    fn open(&self, name: &str, version: u64) -> DbResult<OpenOutcome>;

    /// Deletes a database. Open connections are notified first; if any of
    /// them stays open the deletion is `Blocked`. Deleting a database that
    /// does not exist succeeds.
    fn delete_database(&self, name: &str) -> DbResult<()>;

    /// Names of all existing databases, sorted.
    fn database_names(&self) -> DbResult<Vec<String>>;

    /// The highest raw version this store accepts.
    fn max_version(&self) -> u64;

    fn subscribe(&self, listener: StoreEventListener) -> DbResult<Option<SubscriberRef>>;

    fn unsubscribe(&self, subscriber: SubscriberRef) -> DbResult<()>;
}

/// Cloneable handle to a [`StoreProvider`].
#[derive(Clone)]
pub struct Store {
    inner: Arc<dyn StoreProvider>,
}

impl Store {
    pub fn new<T: StoreProvider + 'static>(inner: T) -> Self {
        Store {
            inner: Arc::new(inner),
        }
    }

    pub fn has_database(&self, name: &str) -> DbResult<bool> {
        Ok(self.database_names()?.iter().any(|n| n == name))
    }
}

impl Deref for Store {
    type Target = Arc<dyn StoreProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

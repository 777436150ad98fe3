use super::{Connection, ObjectStore, ObjectStoreParams};
use crate::errors::{DbResult, ErrorKind};
use std::ops::Deref;
use std::sync::Arc;

/// A version-change transaction.
///
/// It is the only place where object stores and indexes can be created or
/// deleted. Changes are staged until [`commit`]; [`abort`] discards them and
/// leaves the raw version where it was. Dropping an unfinished transaction
/// aborts it.
///
/// [`commit`]: UpgradeTransactionProvider::commit
/// [`abort`]: UpgradeTransactionProvider::abort
pub trait UpgradeTransactionProvider: Send + Sync {
    fn name(&self) -> String;

    /// Raw version before the change, `0` when the database is new.
    fn old_version(&self) -> u64;

    fn new_version(&self) -> u64;

    fn object_store_names(&self) -> DbResult<Vec<String>>;

    fn create_object_store(&self, name: &str, params: ObjectStoreParams)
        -> DbResult<ObjectStore>;

    fn delete_object_store(&self, name: &str) -> DbResult<()>;

    /// Read-write handle to an existing object store.
    fn object_store(&self, name: &str) -> DbResult<ObjectStore>;

    /// Publishes the staged changes and returns a connection at the new
    /// version.
    fn commit(&self) -> DbResult<Connection>;

    /// Discards the staged changes.
    ///
    /// Once the abort took effect the store reports it the way it reports
    /// any failed open: with an `Aborted` error. Any other error kind means
    /// the abort itself failed.
    fn abort(&self) -> DbResult<()>;

    fn is_finished(&self) -> bool;
}

#[derive(Clone)]
pub struct UpgradeTransaction {
    inner: Arc<dyn UpgradeTransactionProvider>,
}

impl UpgradeTransaction {
    pub fn new<T: UpgradeTransactionProvider + 'static>(inner: T) -> Self {
        UpgradeTransaction {
            inner: Arc::new(inner),
        }
    }

    pub fn has_object_store(&self, name: &str) -> DbResult<bool> {
        Ok(self.object_store_names()?.iter().any(|n| n == name))
    }

    /// Aborts and swallows the `Aborted` report of a deliberate abort.
    pub fn rollback(&self) -> DbResult<()> {
        match self.abort() {
            Err(e) if e.kind() == &ErrorKind::Aborted => Ok(()),
            other => other,
        }
    }
}

impl Deref for UpgradeTransaction {
    type Target = Arc<dyn UpgradeTransactionProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

use super::object_store::InMemoryObjectStore;
use super::state::{DatabaseState, StoreState};
use super::InMemoryStore;
use crate::common::{atomic, Atomic, ReadExecutor, WriteExecutor};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::{
    Connection, ObjectStore, ObjectStoreParams, ObjectStoreSchema, TransactionMode,
    UpgradeTransactionProvider,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct InMemoryUpgrade {
    inner: Arc<UpgradeInner>,
}

impl InMemoryUpgrade {
    pub(crate) fn new(
        store: InMemoryStore,
        name: &str,
        old_version: u64,
        new_version: u64,
        staged: DatabaseState,
    ) -> Self {
        InMemoryUpgrade {
            inner: Arc::new(UpgradeInner {
                store,
                name: name.to_string(),
                old_version,
                new_version,
                staged: atomic(staged),
                finished: Arc::new(AtomicBool::new(false)),
            }),
        }
    }
}

impl UpgradeTransactionProvider for InMemoryUpgrade {
    fn name(&self) -> String {
        self.inner.name.clone()
    }

    fn old_version(&self) -> u64 {
        self.inner.old_version
    }

    fn new_version(&self) -> u64 {
        self.inner.new_version
    }

    fn object_store_names(&self) -> DbResult<Vec<String>> {
        self.inner.check_active()?;
        Ok(self.inner.staged.read_with(|state| state.store_names()))
    }

    fn create_object_store(&self, name: &str, params: ObjectStoreParams) -> DbResult<ObjectStore> {
        self.inner.check_active()?;
        if let Some(key_path) = &params.key_path {
            if key_path.is_empty() {
                return Err(DbError::new(
                    &format!("Object store {} has an empty key path", name),
                    ErrorKind::InvalidOperation,
                ));
            }
        }

        self.inner.staged.write_with(|state| {
            if state.stores.contains_key(name) {
                return Err(DbError::new(
                    &format!("Object store {} already exists", name),
                    ErrorKind::ConstraintError,
                ));
            }
            state.stores.insert(
                name.to_string(),
                StoreState::new(ObjectStoreSchema::new(name, &params)),
            );
            Ok(())
        })?;
        Ok(self.inner.handle(name))
    }

    fn delete_object_store(&self, name: &str) -> DbResult<()> {
        self.inner.check_active()?;
        self.inner.staged.write_with(|state| match state.stores.remove(name) {
            Some(_) => Ok(()),
            None => Err(DbError::new(
                &format!("Object store {} does not exist", name),
                ErrorKind::ObjectStoreNotFound,
            )),
        })
    }

    fn object_store(&self, name: &str) -> DbResult<ObjectStore> {
        self.inner.check_active()?;
        self.inner
            .staged
            .read_with(|state| state.store(name).map(|_| ()))?;
        Ok(self.inner.handle(name))
    }

    fn commit(&self) -> DbResult<Connection> {
        self.inner.finish()?;
        let staged = self.inner.staged.read_with(|state| state.clone());
        self.inner.store.commit_upgrade(
            &self.inner.name,
            self.inner.old_version,
            self.inner.new_version,
            staged,
        )
    }

    fn abort(&self) -> DbResult<()> {
        self.inner.finish()?;
        self.inner.store.abort_upgrade(
            &self.inner.name,
            self.inner.old_version,
            self.inner.new_version,
        );
        Err(DbError::new(
            &format!(
                "Version change of {} from {} to {} was aborted",
                self.inner.name, self.inner.old_version, self.inner.new_version
            ),
            ErrorKind::Aborted,
        ))
    }

    fn is_finished(&self) -> bool {
        self.inner.finished.load(Ordering::Acquire)
    }
}

struct UpgradeInner {
    store: InMemoryStore,
    name: String,
    old_version: u64,
    new_version: u64,
    staged: Atomic<DatabaseState>,
    // Shared with every object store handed out by this transaction.
    finished: Arc<AtomicBool>,
}

impl UpgradeInner {
    fn handle(&self, name: &str) -> ObjectStore {
        ObjectStore::new(InMemoryObjectStore::new(
            name,
            self.staged.clone(),
            TransactionMode::ReadWrite,
            true,
            self.finished.clone(),
        ))
    }

    fn check_active(&self) -> DbResult<()> {
        if self.finished.load(Ordering::Acquire) {
            return Err(DbError::new(
                &format!("Version change transaction of {} has finished", self.name),
                ErrorKind::StoreClosed,
            ));
        }
        Ok(())
    }

    fn finish(&self) -> DbResult<()> {
        if self.finished.swap(true, Ordering::AcqRel) {
            return Err(DbError::new(
                &format!("Version change transaction of {} has finished", self.name),
                ErrorKind::StoreClosed,
            ));
        }
        Ok(())
    }
}

impl Drop for UpgradeInner {
    fn drop(&mut self) {
        if !self.finished.swap(true, Ordering::AcqRel) {
            log::debug!(
                "Version change transaction of {} dropped without commit, aborting",
                self.name
            );
            self.store
                .abort_upgrade(&self.name, self.old_version, self.new_version);
        }
    }
}

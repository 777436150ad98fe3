use super::state::{DatabaseState, StoreState};
use crate::common::{Atomic, Key, ReadExecutor, Value, WriteExecutor};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::{
    Cursor, CursorDirection, IndexParams, KeyRange, ObjectStoreProvider, ObjectStoreSchema,
    TransactionMode,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// An object store handle over either the live state of a database or the
/// staged state of a version-change transaction.
///
/// `closed` is shared with the owning connection or transaction; once it is
/// set every operation fails with `StoreClosed`.
pub(crate) struct InMemoryObjectStore {
    name: String,
    state: Atomic<DatabaseState>,
    mode: TransactionMode,
    version_change: bool,
    closed: Arc<AtomicBool>,
}

impl InMemoryObjectStore {
    pub(crate) fn new(
        name: &str,
        state: Atomic<DatabaseState>,
        mode: TransactionMode,
        version_change: bool,
        closed: Arc<AtomicBool>,
    ) -> Self {
        InMemoryObjectStore {
            name: name.to_string(),
            state,
            mode,
            version_change,
            closed,
        }
    }

    fn check_open(&self) -> DbResult<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(DbError::new(
                &format!("Object store {} belongs to a finished transaction", self.name),
                ErrorKind::StoreClosed,
            ));
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&StoreState) -> R) -> DbResult<R> {
        self.check_open()?;
        self.state
            .read_with(|state| state.store(&self.name).map(f))
    }

    fn write<R>(&self, f: impl FnOnce(&mut StoreState) -> DbResult<R>) -> DbResult<R> {
        self.check_open()?;
        if self.mode == TransactionMode::ReadOnly {
            return Err(DbError::new(
                &format!("Object store {} was opened read-only", self.name),
                ErrorKind::ReadOnly,
            ));
        }
        self.state
            .write_with(|state| state.store_mut(&self.name).and_then(f))
    }

    fn check_version_change(&self, operation: &str) -> DbResult<()> {
        if !self.version_change {
            return Err(DbError::new(
                &format!("{} is only allowed in a version change transaction", operation),
                ErrorKind::InvalidOperation,
            ));
        }
        Ok(())
    }
}

impl ObjectStoreProvider for InMemoryObjectStore {
    fn name(&self) -> String {
        self.name.clone()
    }

    fn schema(&self) -> DbResult<ObjectStoreSchema> {
        self.read(|store| store.schema.clone())
    }

    fn get(&self, key: &Key) -> DbResult<Option<Value>> {
        self.read(|store| store.get(key))
    }

    fn put(&self, value: Value, key: Option<Key>) -> DbResult<Key> {
        self.write(|store| store.put(value, key))
    }

    fn delete(&self, key: &Key) -> DbResult<()> {
        self.write(|store| {
            store.delete(key);
            Ok(())
        })
    }

    fn clear(&self) -> DbResult<()> {
        self.write(|store| {
            store.clear();
            Ok(())
        })
    }

    fn count(&self) -> DbResult<u64> {
        self.read(|store| store.count())
    }

    fn open_cursor(
        &self,
        range: Option<&KeyRange>,
        direction: CursorDirection,
    ) -> DbResult<Cursor> {
        self.read(|store| Cursor::new(store.entries(range, direction)))
    }

    fn create_index(&self, params: IndexParams) -> DbResult<()> {
        self.check_version_change("Creating an index")?;
        self.write(|store| store.create_index(params))
    }

    fn delete_index(&self, name: &str) -> DbResult<()> {
        self.check_version_change("Deleting an index")?;
        self.write(|store| store.delete_index(name))
    }
}

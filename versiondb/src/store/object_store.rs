use super::{CursorDirection, IndexParams, KeyRange, ObjectStoreSchema};
use crate::common::{Key, Value};
use crate::errors::DbResult;
use std::ops::Deref;
use std::sync::Arc;

/// Record-level access to one object store.
///
/// Handles obtained from a read-only transaction reject writes with
/// `ReadOnly`; index changes are only allowed inside a version-change
/// transaction.
pub trait ObjectStoreProvider: Send + Sync {
    fn name(&self) -> String;

    /// Name, key options and index definitions of the store.
    fn schema(&self) -> DbResult<ObjectStoreSchema>;

    fn get(&self, key: &Key) -> DbResult<Option<Value>>;

    /// Inserts or replaces a record and returns its key.
    ///
    /// With a key path the key comes from the value and `key` must be
    /// `None`; a generated key is written back into the value at the key
    /// path. Without a key path `key` is required unless the store
    /// auto-increments.
    fn put(&self, value: Value, key: Option<Key>) -> DbResult<Key>;

    /// Removes a record. Removing a missing key is not an error.
    fn delete(&self, key: &Key) -> DbResult<()>;

    fn clear(&self) -> DbResult<()>;

    fn count(&self) -> DbResult<u64>;

    fn open_cursor(&self, range: Option<&KeyRange>, direction: CursorDirection)
        -> DbResult<Cursor>;

    fn create_index(&self, params: IndexParams) -> DbResult<()>;

    fn delete_index(&self, name: &str) -> DbResult<()>;
}

#[derive(Clone)]
pub struct ObjectStore {
    inner: Arc<dyn ObjectStoreProvider>,
}

impl ObjectStore {
    pub fn new<T: ObjectStoreProvider + 'static>(inner: T) -> Self {
        ObjectStore {
            inner: Arc::new(inner),
        }
    }
}

impl Deref for ObjectStore {
    type Target = Arc<dyn ObjectStoreProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// Iterates the `(key, value)` pairs a cursor was opened over, in the
/// requested direction. The entries are a snapshot taken when the cursor
/// was opened.
pub struct Cursor {
    entries: std::vec::IntoIter<(Key, Value)>,
}

impl Cursor {
    pub fn new(entries: Vec<(Key, Value)>) -> Self {
        Cursor {
            entries: entries.into_iter(),
        }
    }
}

impl Iterator for Cursor {
    type Item = (Key, Value);

    fn next(&mut self) -> Option<Self::Item> {
        self.entries.next()
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.entries.size_hint()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cursor_yields_entries_in_order() {
        let cursor = Cursor::new(vec![
            (Key::from(1), Value::from("a")),
            (Key::from(2), Value::from("b")),
        ]);
        assert_eq!(cursor.size_hint(), (2, Some(2)));
        let keys: Vec<Key> = cursor.map(|(k, _)| k).collect();
        assert_eq!(keys, vec![Key::from(1), Key::from(2)]);
    }
}

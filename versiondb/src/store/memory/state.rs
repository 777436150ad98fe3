use crate::common::{Key, Value};
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::{CursorDirection, IndexParams, KeyRange, ObjectStoreSchema};
use im::OrdMap;

// Generated keys stay within the range of exactly representable integers.
const MAX_GENERATED_KEY: i64 = (1 << 53) - 1;

/// The contents of one database at one raw version.
///
/// Persistent maps make the clone a version-change transaction stages its
/// work on cheap, whatever the size of the database.
#[derive(Clone, Default)]
pub(crate) struct DatabaseState {
    pub(crate) version: u64,
    pub(crate) stores: OrdMap<String, StoreState>,
}

impl DatabaseState {
    pub(crate) fn store_names(&self) -> Vec<String> {
        self.stores.keys().cloned().collect()
    }

    pub(crate) fn store(&self, name: &str) -> DbResult<&StoreState> {
        self.stores.get(name).ok_or_else(|| not_found(name))
    }

    pub(crate) fn store_mut(&mut self, name: &str) -> DbResult<&mut StoreState> {
        self.stores.get_mut(name).ok_or_else(|| not_found(name))
    }
}

fn not_found(name: &str) -> DbError {
    DbError::new(
        &format!("Object store {} does not exist", name),
        ErrorKind::ObjectStoreNotFound,
    )
}

#[derive(Clone)]
pub(crate) struct StoreState {
    pub(crate) schema: ObjectStoreSchema,
    key_generator: i64,
    records: OrdMap<Key, Value>,
}

impl StoreState {
    pub(crate) fn new(schema: ObjectStoreSchema) -> Self {
        StoreState {
            schema,
            key_generator: 1,
            records: OrdMap::new(),
        }
    }

    pub(crate) fn get(&self, key: &Key) -> Option<Value> {
        self.records.get(key).cloned()
    }

    pub(crate) fn put(&mut self, mut value: Value, key: Option<Key>) -> DbResult<Key> {
        let key = match self.schema.key_path.clone() {
            Some(key_path) => {
                if key.is_some() {
                    return Err(DbError::new(
                        &format!(
                            "Object store {} uses in-line keys, an explicit key is not allowed",
                            self.schema.name
                        ),
                        ErrorKind::DataError,
                    ));
                }
                let existing = value
                    .resolve_path(&key_path)
                    .filter(|found| !found.is_null())
                    .cloned();
                match existing {
                    Some(found) => found,
                    None if self.schema.auto_increment => {
                        let generated = self.generate_key()?;
                        let injected = value
                            .as_document_mut()
                            .map(|doc| doc.set_path(&key_path, generated.clone()))
                            .unwrap_or(false);
                        if !injected {
                            return Err(DbError::new(
                                &format!("Cannot write a generated key at key path {}", key_path),
                                ErrorKind::DataError,
                            ));
                        }
                        generated
                    }
                    None => {
                        return Err(DbError::new(
                            &format!("Value has no key at key path {}", key_path),
                            ErrorKind::DataError,
                        ))
                    }
                }
            }
            None => match key {
                Some(key) => key,
                None if self.schema.auto_increment => self.generate_key()?,
                None => {
                    return Err(DbError::new(
                        &format!(
                            "Object store {} has no key path and no key generator, a key is required",
                            self.schema.name
                        ),
                        ErrorKind::DataError,
                    ))
                }
            },
        };

        if !key.is_valid_key() {
            return Err(DbError::new(
                &format!("{} is not a valid key", key),
                ErrorKind::DataError,
            ));
        }

        if self.schema.auto_increment {
            if let Some(number) = key.as_f64() {
                if number >= self.key_generator as f64 {
                    self.key_generator = (number.floor() as i64).saturating_add(1);
                }
            }
        }

        self.records.insert(key.clone(), value);
        Ok(key)
    }

    pub(crate) fn delete(&mut self, key: &Key) {
        self.records.remove(key);
    }

    pub(crate) fn clear(&mut self) {
        self.records.clear();
    }

    pub(crate) fn count(&self) -> u64 {
        self.records.len() as u64
    }

    pub(crate) fn entries(
        &self,
        range: Option<&KeyRange>,
        direction: CursorDirection,
    ) -> Vec<(Key, Value)> {
        let mut entries: Vec<(Key, Value)> = self
            .records
            .iter()
            .filter(|(key, _)| range.map_or(true, |r| r.includes(key)))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        if direction.is_reverse() {
            entries.reverse();
        }
        entries
    }

    pub(crate) fn create_index(&mut self, params: IndexParams) -> DbResult<()> {
        if self.schema.indexes.iter().any(|i| i.name == params.name) {
            return Err(DbError::new(
                &format!(
                    "Index {} already exists on object store {}",
                    params.name, self.schema.name
                ),
                ErrorKind::ConstraintError,
            ));
        }
        self.schema.indexes.push(params);
        Ok(())
    }

    pub(crate) fn delete_index(&mut self, name: &str) -> DbResult<()> {
        let before = self.schema.indexes.len();
        self.schema.indexes.retain(|i| i.name != name);
        if self.schema.indexes.len() == before {
            return Err(DbError::new(
                &format!("Index {} does not exist on object store {}", name, self.schema.name),
                ErrorKind::NotFound,
            ));
        }
        Ok(())
    }

    fn generate_key(&mut self) -> DbResult<Key> {
        if self.key_generator > MAX_GENERATED_KEY {
            return Err(DbError::new(
                &format!("Key generator of {} is exhausted", self.schema.name),
                ErrorKind::ConstraintError,
            ));
        }
        let key = self.key_generator;
        self.key_generator += 1;
        Ok(Key::from(key))
    }
}

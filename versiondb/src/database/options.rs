use super::Database;
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::schema::SchemaModule;
use crate::store::memory::InMemoryStore;
use crate::store::{Store, StoreProvider};
use once_cell::sync::Lazy;
use std::fmt::{Debug, Formatter};

static DEFAULT_STORE: Lazy<Store> = Lazy::new(|| Store::new(InMemoryStore::default()));

/// Settings of a [`Database`].
///
/// - `name` - database name in the store, required
/// - `version` - the effective schema version to connect at, at least 1
/// - `schemas` - deferred schema modules, loaded on the first migration
/// - `store` - the backing store; an in-memory store when unset
#[derive(Clone)]
pub struct DatabaseOptions {
    name: String,
    version: u64,
    schemas: Vec<SchemaModule>,
    store: Option<Store>,
}

impl DatabaseOptions {
    pub fn new(name: &str, version: u64) -> DbResult<Self> {
        let mut options = DatabaseOptions::default();
        options.set_name(name)?;
        options.set_version(version)?;
        Ok(options)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) -> DbResult<()> {
        if name.trim().is_empty() {
            log::error!("Database name cannot be empty");
            return Err(DbError::new(
                "Database name cannot be empty",
                ErrorKind::ConfigurationError,
            ));
        }
        self.name = name.to_string();
        Ok(())
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn set_version(&mut self, version: u64) -> DbResult<()> {
        if version < 1 {
            log::error!("Database version must be at least 1, got {}", version);
            return Err(DbError::new(
                &format!("Database version must be at least 1, got {}", version),
                ErrorKind::ConfigurationError,
            ));
        }
        self.version = version;
        Ok(())
    }

    pub fn schemas(&self) -> &[SchemaModule] {
        &self.schemas
    }

    pub fn add_schema(&mut self, module: SchemaModule) {
        self.schemas.push(module);
    }

    pub fn store(&self) -> Option<&Store> {
        self.store.as_ref()
    }

    pub fn set_store(&mut self, store: Store) {
        self.store = Some(store);
    }

    pub(crate) fn validate(&self) -> DbResult<()> {
        if self.name.is_empty() {
            return Err(DbError::new(
                "Database name is not set",
                ErrorKind::ConfigurationError,
            ));
        }
        Ok(())
    }

    /// The configured store, or the process-wide in-memory store shared by
    /// every database opened without one.
    pub(crate) fn store_or_default(&self) -> Store {
        match &self.store {
            Some(store) => store.clone(),
            None => {
                log::debug!("No store configured for {}, using the default in-memory store", self.name);
                DEFAULT_STORE.clone()
            }
        }
    }
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            name: String::new(),
            version: 1,
            schemas: Vec::new(),
            store: None,
        }
    }
}

impl Debug for DatabaseOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseOptions")
            .field("name", &self.name)
            .field("version", &self.version)
            .field("schemas", &self.schemas)
            .field("store", &self.store.is_some())
            .finish()
    }
}

/// Fluent construction of a [`Database`].
///
/// The first invalid setting is kept and reported by [`open`](Self::open)
/// or [`singleton`](Self::singleton); later settings are ignored.
///
/// ```rust
/// use versiondb::database::Database;
/// use versiondb::ErrorKind;
///
/// let err = Database::builder().name("clock").version(0).open().unwrap_err();
/// assert_eq!(err.kind(), &ErrorKind::ConfigurationError);
/// ```
#[derive(Default)]
pub struct DatabaseBuilder {
    error: Option<DbError>,
    options: DatabaseOptions,
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn name(mut self, name: &str) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.options.set_name(name) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn version(mut self, version: u64) -> Self {
        if self.error.is_none() {
            if let Err(e) = self.options.set_version(version) {
                self.error = Some(e);
            }
        }
        self
    }

    pub fn schema(mut self, module: SchemaModule) -> Self {
        self.options.add_schema(module);
        self
    }

    pub fn store<T: StoreProvider + 'static>(self, store: T) -> Self {
        self.store_handle(Store::new(store))
    }

    /// Uses an existing [`Store`] handle, shared with other databases.
    pub fn store_handle(mut self, store: Store) -> Self {
        self.options.set_store(store);
        self
    }

    pub fn options(self) -> DbResult<DatabaseOptions> {
        match self.error {
            Some(error) => Err(error),
            None => Ok(self.options),
        }
    }

    /// Creates a new, unconnected [`Database`].
    pub fn open(self) -> DbResult<Database> {
        Database::new(self.options()?)
    }

    /// Returns the process-wide [`Database`] of this name, creating it with
    /// these options if it does not exist yet.
    pub fn singleton(self) -> DbResult<Database> {
        Database::singleton(self.options()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_options_validation() {
        assert!(DatabaseOptions::new("clock", 1).is_ok());
        assert_eq!(
            DatabaseOptions::new("", 1).unwrap_err().kind(),
            &ErrorKind::ConfigurationError
        );
        assert_eq!(
            DatabaseOptions::new("clock", 0).unwrap_err().kind(),
            &ErrorKind::ConfigurationError
        );
        assert!(DatabaseOptions::default().validate().is_err());
    }

    #[test]
    fn test_builder_keeps_first_error() {
        let err = DatabaseBuilder::new()
            .name(" ")
            .version(0)
            .options()
            .unwrap_err();
        assert!(err.message().contains("name"));
    }

    #[test]
    fn test_builder_collects_settings() {
        let options = DatabaseBuilder::new()
            .name("clock")
            .version(3)
            .schema(SchemaModule::new("alarms", || Ok(())))
            .schema(SchemaModule::new("timers", || Ok(())))
            .store(InMemoryStore::default())
            .options()
            .unwrap();

        assert_eq!(options.name(), "clock");
        assert_eq!(options.version(), 3);
        assert_eq!(options.schemas().len(), 2);
        assert!(options.store().is_some());
    }
}

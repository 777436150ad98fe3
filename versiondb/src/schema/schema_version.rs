use super::SchemaRegistry;
use crate::database::Database;
use crate::errors::{DbError, DbResult, ErrorKind};
use crate::store::UpgradeTransaction;
use std::fmt::{Debug, Formatter};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

type TransformFn = dyn Fn(&UpgradeTransaction) -> DbResult<()> + Send + Sync;

/// A unit of schema or data work run inside a version-change transaction.
///
/// Returning is the completion signal: `Ok(())` for success, an error for
/// failure. A panic inside the closure is caught and reported as a
/// `TransformError`.
#[derive(Clone)]
pub struct Transform {
    inner: Arc<TransformFn>,
}

impl Transform {
    pub fn new<F>(f: F) -> Self
    where
        F: Fn(&UpgradeTransaction) -> DbResult<()> + Send + Sync + 'static,
    {
        Transform { inner: Arc::new(f) }
    }

    /// Runs the transform against `tx`.
    pub fn apply(&self, tx: &UpgradeTransaction) -> DbResult<()> {
        match catch_unwind(AssertUnwindSafe(|| (self.inner)(tx))) {
            Ok(result) => result,
            Err(payload) => {
                let reason = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                Err(DbError::new(
                    &format!("Transform panicked: {}", reason),
                    ErrorKind::TransformError,
                ))
            }
        }
    }

    pub fn ptr_eq(&self, other: &Transform) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for Transform {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transform").finish()
    }
}

/// The optional transforms of one schema version.
///
/// - `initializer` builds the schema of this version from an empty database
/// - `upgrader` moves data from this version to the next one
/// - `downgrader` moves data from this version to the previous one
#[derive(Clone, Default, Debug)]
pub struct SchemaTransforms {
    initializer: Option<Transform>,
    upgrader: Option<Transform>,
    downgrader: Option<Transform>,
}

impl SchemaTransforms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn initializer<F>(self, f: F) -> Self
    where
        F: Fn(&UpgradeTransaction) -> DbResult<()> + Send + Sync + 'static,
    {
        self.with_initializer(Transform::new(f))
    }

    pub fn upgrader<F>(self, f: F) -> Self
    where
        F: Fn(&UpgradeTransaction) -> DbResult<()> + Send + Sync + 'static,
    {
        self.with_upgrader(Transform::new(f))
    }

    pub fn downgrader<F>(self, f: F) -> Self
    where
        F: Fn(&UpgradeTransaction) -> DbResult<()> + Send + Sync + 'static,
    {
        self.with_downgrader(Transform::new(f))
    }

    pub fn with_initializer(mut self, transform: Transform) -> Self {
        self.initializer = Some(transform);
        self
    }

    pub fn with_upgrader(mut self, transform: Transform) -> Self {
        self.upgrader = Some(transform);
        self
    }

    pub fn with_downgrader(mut self, transform: Transform) -> Self {
        self.downgrader = Some(transform);
        self
    }
}

/// A numbered schema version of a named database.
///
/// Creating a `SchemaVersion` registers it in the process-wide
/// [`SchemaRegistry`]; a later version with the same name and number
/// replaces it in the per-name view. Cloning shares the same entry.
///
/// # Examples
///
/// ```rust
/// use versiondb::schema::{SchemaRegistry, SchemaTransforms, SchemaVersion};
/// use versiondb::store::ObjectStoreParams;
///
/// let v1 = SchemaVersion::new(
///     "schema-version-example",
///     1,
///     SchemaTransforms::new()
///         .initializer(|tx| {
///             tx.create_object_store("timers", ObjectStoreParams::new().key_path("id"))?;
///             Ok(())
///         })
///         .with_upgrader(SchemaVersion::noop()),
/// )
/// .unwrap();
///
/// assert_eq!(v1.version(), 1);
/// assert_eq!(SchemaRegistry::global().list("schema-version-example").len(), 1);
/// SchemaRegistry::global().clear(Some("schema-version-example"));
/// ```
#[derive(Clone)]
pub struct SchemaVersion {
    inner: Arc<SchemaVersionInner>,
}

struct SchemaVersionInner {
    name: String,
    version: u64,
    transforms: SchemaTransforms,
}

impl SchemaVersion {
    pub fn new(name: &str, version: u64, transforms: SchemaTransforms) -> DbResult<SchemaVersion> {
        if name.is_empty() {
            return Err(DbError::new(
                "Schema version needs a database name",
                ErrorKind::ConfigurationError,
            ));
        }
        if version < 1 {
            return Err(DbError::new(
                &format!("Schema version of {} must be at least 1, got {}", name, version),
                ErrorKind::ConfigurationError,
            ));
        }

        let schema_version = SchemaVersion {
            inner: Arc::new(SchemaVersionInner {
                name: name.to_string(),
                version,
                transforms,
            }),
        };
        SchemaRegistry::global().register(schema_version.clone());
        Ok(schema_version)
    }

    pub fn name(&self) -> &str {
        &self.inner.name
    }

    pub fn version(&self) -> u64 {
        self.inner.version
    }

    pub fn initializer(&self) -> Option<&Transform> {
        self.inner.transforms.initializer.as_ref()
    }

    pub fn upgrader(&self) -> Option<&Transform> {
        self.inner.transforms.upgrader.as_ref()
    }

    pub fn downgrader(&self) -> Option<&Transform> {
        self.inner.transforms.downgrader.as_ref()
    }

    /// Copies the transforms of this version into the mutator lists of
    /// `database`. Every registered version needs an initializer.
    pub fn register(&self, database: &Database) -> DbResult<()> {
        let initializer = self.initializer().ok_or_else(|| {
            DbError::new(
                &format!(
                    "Cannot register a schema without an initializer: version {} of {}",
                    self.version(),
                    self.name()
                ),
                ErrorKind::ConfigurationError,
            )
        })?;

        database.add_initializer(self.version(), initializer.clone());
        if let Some(upgrader) = self.upgrader() {
            database.add_upgrader(self.version(), upgrader.clone());
        }
        if let Some(downgrader) = self.downgrader() {
            database.add_downgrader(self.version(), downgrader.clone());
        }
        Ok(())
    }

    /// A transform that does nothing and succeeds.
    pub fn noop() -> Transform {
        Transform::new(|_| Ok(()))
    }

    /// A transform that always reports failure.
    pub fn error() -> Transform {
        Transform::new(|_| {
            Err(DbError::new(
                "Erroneous upgrader or downgrader",
                ErrorKind::TransformError,
            ))
        })
    }

    pub fn ptr_eq(&self, other: &SchemaVersion) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Debug for SchemaVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaVersion")
            .field("name", &self.inner.name)
            .field("version", &self.inner.version)
            .field("initializer", &self.initializer().is_some())
            .field("upgrader", &self.upgrader().is_some())
            .field("downgrader", &self.downgrader().is_some())
            .finish()
    }
}

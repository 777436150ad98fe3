use crate::errors::{DbError, DbResult};
use std::fmt::{Debug, Formatter};
use std::sync::Arc;

type LoaderFn = dyn Fn() -> DbResult<()> + Send + Sync;

/// A deferred set of schema definitions.
///
/// The loader usually declares a handful of [`SchemaVersion`]s. A
/// [`Database`] runs the loaders of its modules once, the first time a
/// connect finds that a migration is needed, so schema code is only built
/// when it is actually used.
///
/// [`SchemaVersion`]: super::SchemaVersion
/// [`Database`]: crate::database::Database
#[derive(Clone)]
pub struct SchemaModule {
    name: String,
    loader: Arc<LoaderFn>,
}

impl SchemaModule {
    pub fn new<F>(name: &str, loader: F) -> Self
    where
        F: Fn() -> DbResult<()> + Send + Sync + 'static,
    {
        SchemaModule {
            name: name.to_string(),
            loader: Arc::new(loader),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn load(&self) -> DbResult<()> {
        log::debug!("Loading schema module {}", self.name);
        (self.loader)().map_err(|e| {
            DbError::new_with_cause(
                &format!("Failed to load schema module {}", self.name),
                e.kind().clone(),
                e,
            )
        })
    }
}

impl Debug for SchemaModule {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaModule")
            .field("name", &self.name)
            .finish()
    }
}

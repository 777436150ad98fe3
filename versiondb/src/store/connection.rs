use super::{ObjectStore, TransactionMode};
use crate::errors::{DbError, DbResult, ErrorKind};
use std::fmt::{Debug, Formatter};
use std::ops::Deref;
use std::sync::Arc;

/// Delivered to a connection when another party wants to change the version
/// of (or delete) its database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VersionChangeEvent {
    pub old_version: u64,
    /// `None` when the database is being deleted.
    pub new_version: Option<u64>,
}

pub type VersionChangeCallback = Arc<dyn Fn(VersionChangeEvent) + Send + Sync>;

/// An open connection to one database at one raw version.
pub trait ConnectionProvider: Send + Sync {
    fn name(&self) -> String;

    fn version(&self) -> u64;

    fn object_store_names(&self) -> DbResult<Vec<String>>;

    /// Handle to an object store in the given mode. Prefer
    /// [`Connection::transaction`], which checks the scope.
    fn object_store(&self, name: &str, mode: TransactionMode) -> DbResult<ObjectStore>;

    /// Closes the connection. Closing twice is a no-op.
    fn close(&self);

    fn is_closed(&self) -> bool;

    /// Registers a callback run when a version change or deletion of this
    /// database is requested. A connection that does not close itself from
    /// the callback blocks the request.
    fn on_version_change(&self, callback: VersionChangeCallback);
}

#[derive(Clone)]
pub struct Connection {
    inner: Arc<dyn ConnectionProvider>,
}

impl Connection {
    pub fn new<T: ConnectionProvider + 'static>(inner: T) -> Self {
        Connection {
            inner: Arc::new(inner),
        }
    }

    /// Starts a transaction over `scope`.
    ///
    /// Every object store in the scope must exist.
    pub fn transaction(&self, scope: &[&str], mode: TransactionMode) -> DbResult<Transaction> {
        if self.is_closed() {
            return Err(DbError::new(
                &format!("Connection to {} is closed", self.name()),
                ErrorKind::StoreClosed,
            ));
        }
        if scope.is_empty() {
            return Err(DbError::new(
                "A transaction needs at least one object store in scope",
                ErrorKind::InvalidOperation,
            ));
        }

        let names = self.object_store_names()?;
        for store_name in scope {
            if !names.iter().any(|n| n == store_name) {
                return Err(DbError::new(
                    &format!("Object store {} does not exist", store_name),
                    ErrorKind::ObjectStoreNotFound,
                ));
            }
        }

        Ok(Transaction {
            connection: self.clone(),
            scope: scope.iter().map(|s| s.to_string()).collect(),
            mode,
        })
    }
}

impl Debug for Connection {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("name", &self.name())
            .field("version", &self.version())
            .field("closed", &self.is_closed())
            .finish()
    }
}

impl Deref for Connection {
    type Target = Arc<dyn ConnectionProvider>;

    fn deref(&self) -> &Self::Target {
        &self.inner
    }
}

/// A transaction over a fixed set of object stores of one connection.
pub struct Transaction {
    connection: Connection,
    scope: Vec<String>,
    mode: TransactionMode,
}

impl Transaction {
    pub fn mode(&self) -> TransactionMode {
        self.mode
    }

    pub fn scope(&self) -> &[String] {
        &self.scope
    }

    pub fn object_store(&self, name: &str) -> DbResult<ObjectStore> {
        if !self.scope.iter().any(|n| n == name) {
            return Err(DbError::new(
                &format!("Object store {} is not in the transaction scope", name),
                ErrorKind::InvalidOperation,
            ));
        }
        self.connection.object_store(name, self.mode)
    }
}

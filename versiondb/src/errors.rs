use backtrace::Backtrace;
use std::error::Error;
use std::fmt::{Debug, Display, Formatter};
use std::result::Result;

use crate::common::{atomic, Atomic};

/// Error kinds for versiondb operations.
///
/// The first group mirrors the failure categories of the migration engine
/// itself; the second group is reported by store backends.
///
/// # Examples
///
/// ```rust
/// use versiondb::errors::{DbError, DbResult, ErrorKind};
///
/// fn example() -> DbResult<()> {
///     Err(DbError::new("no initializer for 3", ErrorKind::NoInitializer))
/// }
/// assert!(example().is_err());
/// ```
#[derive(Debug, PartialEq, Eq, Clone)]
pub enum ErrorKind {
    // Migration engine errors
    /// A schema version was declared or registered incorrectly
    ConfigurationError,
    /// Reinitialization needed an initializer that was never registered
    NoInitializer,
    /// The store reported an error while its version was being probed
    VersionProbeError,
    /// Another open connection prevented a version change
    Blocked,
    /// An initializer, upgrader or downgrader reported failure
    TransformError,
    /// The version counter reset failed to extract, delete or restore data
    CopyError,

    // Store errors
    /// The requested key does not exist
    NotFound,
    /// The requested object store does not exist
    ObjectStoreNotFound,
    /// An object store or index with the same name already exists
    ConstraintError,
    /// A key could not be resolved or is not a valid key
    DataError,
    /// A write was attempted through a read-only transaction
    ReadOnly,
    /// The transaction was aborted
    Aborted,
    /// The requested version is lower than the stored one
    VersionError,
    /// The operation is not valid in the current context
    InvalidOperation,
    /// The connection or transaction has already been closed
    StoreClosed,

    // Infrastructure errors
    /// Error in event processing
    EventError,
    /// Internal error (usually indicates a bug)
    InternalError,
}

impl Display for ErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::ConfigurationError => write!(f, "Configuration error"),
            ErrorKind::NoInitializer => write!(f, "No initializer"),
            ErrorKind::VersionProbeError => write!(f, "Version probe error"),
            ErrorKind::Blocked => write!(f, "Blocked"),
            ErrorKind::TransformError => write!(f, "Transform error"),
            ErrorKind::CopyError => write!(f, "Copy error"),
            ErrorKind::NotFound => write!(f, "Not found"),
            ErrorKind::ObjectStoreNotFound => write!(f, "Object store not found"),
            ErrorKind::ConstraintError => write!(f, "Constraint error"),
            ErrorKind::DataError => write!(f, "Data error"),
            ErrorKind::ReadOnly => write!(f, "Read only"),
            ErrorKind::Aborted => write!(f, "Aborted"),
            ErrorKind::VersionError => write!(f, "Version error"),
            ErrorKind::InvalidOperation => write!(f, "Invalid operation"),
            ErrorKind::StoreClosed => write!(f, "Store closed"),
            ErrorKind::EventError => write!(f, "Event error"),
            ErrorKind::InternalError => write!(f, "Internal error"),
        }
    }
}

/// Error type shared by every versiondb operation.
///
/// `DbError` carries a message, an [ErrorKind], an optional cause and the
/// backtrace captured at construction. Errors chain through `new_with_cause`,
/// which is how a failed transform is reported underneath the fallback that
/// followed it.
///
/// # Type alias
///
/// `DbResult<T>` is `Result<T, DbError>` and is used throughout the crate.
#[derive(Clone)]
pub struct DbError {
    message: String,
    error_kind: ErrorKind,
    cause: Option<Box<DbError>>,
    backtrace: Atomic<Backtrace>,
}

impl DbError {
    /// Creates a new `DbError` with the specified message and error kind.
    pub fn new(message: &str, error_kind: ErrorKind) -> Self {
        DbError {
            message: message.to_string(),
            error_kind,
            cause: None,
            backtrace: atomic(Backtrace::new()),
        }
    }

    /// Creates a new `DbError` wrapping the error that caused it.
    pub fn new_with_cause(message: &str, error_kind: ErrorKind, cause: DbError) -> Self {
        DbError {
            message: message.to_string(),
            error_kind,
            cause: Some(Box::new(cause)),
            backtrace: atomic(Backtrace::new()),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.error_kind
    }

    pub fn cause(&self) -> Option<&DbError> {
        self.cause.as_deref()
    }

    /// Returns true when this error or any error in its cause chain has `kind`.
    pub fn has_kind(&self, kind: &ErrorKind) -> bool {
        let mut current = Some(self);
        while let Some(err) = current {
            if &err.error_kind == kind {
                return true;
            }
            current = err.cause();
        }
        false
    }
}

impl Display for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Debug for DbError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        // print error message with stack trace followed by cause
        match &self.cause {
            Some(cause) => write!(f, "{}\nCaused by: {:?}", self.message, cause),
            None => write!(f, "{}\n{:?}", self.message, self.backtrace.read()),
        }
    }
}

impl Error for DbError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match &self.cause {
            Some(cause) => Some(cause.as_ref()),
            None => None,
        }
    }
}

pub type DbResult<T> = Result<T, DbError>;

impl From<String> for DbError {
    fn from(msg: String) -> Self {
        DbError::new(&msg, ErrorKind::InternalError)
    }
}

impl From<&str> for DbError {
    fn from(msg: &str) -> Self {
        DbError::new(msg, ErrorKind::InternalError)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn db_error_new_creates_error() {
        let error = DbError::new("An error occurred", ErrorKind::Blocked);
        assert_eq!(error.message, "An error occurred");
        assert_eq!(error.error_kind, ErrorKind::Blocked);
        assert!(error.cause.is_none());
    }

    #[test]
    fn db_error_new_with_cause_creates_error() {
        let cause = DbError::new("step 2 failed", ErrorKind::TransformError);
        let error = DbError::new_with_cause("reset failed", ErrorKind::CopyError, cause);
        assert_eq!(error.kind(), &ErrorKind::CopyError);
        assert_eq!(error.cause().map(|c| c.message()), Some("step 2 failed"));
    }

    #[test]
    fn db_error_has_kind_walks_cause_chain() {
        let root = DbError::new("bad upgrader", ErrorKind::TransformError);
        let middle = DbError::new_with_cause("fallback", ErrorKind::NoInitializer, root);
        let top = DbError::new_with_cause("connect failed", ErrorKind::InternalError, middle);
        assert!(top.has_kind(&ErrorKind::TransformError));
        assert!(top.has_kind(&ErrorKind::NoInitializer));
        assert!(!top.has_kind(&ErrorKind::Blocked));
    }

    #[test]
    fn db_error_display_formats_correctly() {
        let error = DbError::new("key not found", ErrorKind::NotFound);
        assert_eq!(format!("{}", error), "key not found");
    }

    #[test]
    fn db_error_debug_formats_with_cause() {
        let cause = DbError::new("io", ErrorKind::InternalError);
        let error = DbError::new_with_cause("outer", ErrorKind::CopyError, cause);
        let formatted = format!("{:?}", error);
        assert!(formatted.contains("outer"));
        assert!(formatted.contains("Caused by:"));
    }

    #[test]
    fn db_error_source_returns_cause() {
        let error = DbError::new_with_cause(
            "outer",
            ErrorKind::CopyError,
            DbError::new("inner", ErrorKind::DataError),
        );
        assert!(error.source().is_some());
        assert!(DbError::new("plain", ErrorKind::DataError).source().is_none());
    }

    #[test]
    fn db_error_from_str_is_internal() {
        let error: DbError = "boom".into();
        assert_eq!(error.kind(), &ErrorKind::InternalError);
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::NoInitializer.to_string(), "No initializer");
        assert_eq!(ErrorKind::VersionProbeError.to_string(), "Version probe error");
        assert_eq!(ErrorKind::CopyError.to_string(), "Copy error");
    }
}

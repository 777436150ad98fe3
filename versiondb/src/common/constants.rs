// store constants
pub const EFFECTIVE_VERSION_STORE: &str = "__effectiveVersion__";
pub const EFFECTIVE_VERSION_KEY: i64 = 0;
pub const EFFECTIVE_VERSION_FIELD: &str = "number";

/// Highest raw version a store accepts (2^53 - 1).
pub const MAX_RAW_VERSION: u64 = (1 << 53) - 1;

/// Suffix appended to a database name for the temporary copy made while
/// resetting its raw version counter.
pub const RESET_SUFFIX: &str = ".__reset__";

// connect constants
/// How often a connect sequence is restarted when the database changes
/// underneath it before the error is surfaced.
pub const CONNECT_ATTEMPTS: u32 = 5;

// event constants
pub const STORE_EVENT: &str = "versiondb_store_event";

// key path constants
pub const KEY_PATH_SEPARATOR: char = '.';

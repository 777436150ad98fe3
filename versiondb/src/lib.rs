//! # versiondb
//!
//! A versioned database-migration engine for versioned key-value object
//! stores.
//!
//! Applications declare a sequence of schema versions. Each version can carry
//! an initializer (build the schema from scratch), an upgrader (move data from
//! the previous version) and a downgrader (move data back from the next
//! version). On [`Database::connect`](database::Database::connect) the engine
//! compares the version persisted in the store with the requested one and
//! chains the registered transforms to get there, falling back to a full
//! reinitialization when no contiguous chain exists.
//!
//! The store's own version counter is monotonic, so every migration bumps it
//! by one while the application-level *effective* version is recorded in a
//! reserved object store. Downgrades therefore work on stores that would
//! otherwise refuse to go back. When the counter is exhausted the engine
//! copies the data out, recreates the store at version one and copies it
//! back.
//!
//! ## Quick start
//!
//! ```rust
//! use versiondb::database::Database;
//! use versiondb::schema::{SchemaModule, SchemaTransforms, SchemaVersion};
//! use versiondb::store::memory::InMemoryStore;
//! use versiondb::store::ObjectStoreParams;
//! use versiondb::doc;
//!
//! let alarms = SchemaModule::new("alarms", || {
//!     SchemaVersion::new(
//!         "quick-start-example",
//!         1,
//!         SchemaTransforms::new().initializer(|tx| {
//!             tx.create_object_store(
//!                 "alarms",
//!                 ObjectStoreParams::new().key_path("id").auto_increment(true),
//!             )?;
//!             Ok(())
//!         }),
//!     )?;
//!     Ok(())
//! });
//!
//! let db = Database::builder()
//!     .name("quick-start-example")
//!     .version(1)
//!     .schema(alarms)
//!     .store(InMemoryStore::default())
//!     .open()
//!     .unwrap();
//!
//! let stored = db.put("alarms", doc! { hour: 7, minute: 30 }.into(), None).unwrap();
//! let id = stored.resolve_path("id").cloned().unwrap();
//! let fetched = db.request("alarms", &id).unwrap();
//! assert_eq!(fetched, stored);
//! ```
//!
//! ## Modules
//!
//! - [`common`] - values and keys, named locks, the event bus
//! - [`errors`] - error kinds and the crate result type
//! - [`store`] - the object store provider contract and an in-memory backend
//! - [`schema`] - schema versions and the process-wide registry
//! - [`database`] - probing, planning, migrating and the record operations

pub mod common;
pub mod database;
pub mod errors;
pub mod schema;
pub mod store;

pub use database::Database;
pub use errors::{DbError, DbResult, ErrorKind};

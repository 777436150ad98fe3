//! The object store contract the migration engine runs on, and an in-memory
//! implementation of it.
//!
//! The contract follows the shape of a browser-style versioned object store:
//! a [`Store`] holds named databases, each with a monotonic raw version.
//! Opening at a higher version yields an [`UpgradeTransaction`], the only
//! place where the set of object stores can change. Regular work goes through
//! a [`Connection`] and its [`Transaction`]s.

mod connection;
mod event;
pub mod memory;
mod object_store;
mod schema;
mod store_provider;
mod upgrade;

pub use connection::*;
pub use event::*;
pub use object_store::*;
pub use schema::*;
pub use store_provider::*;
pub use upgrade::*;

//! In-memory implementation of the store contract.

mod config;
mod connection;
mod object_store;
mod state;
mod store;
mod upgrade;

pub use config::InMemoryStoreConfig;
pub use store::InMemoryStore;

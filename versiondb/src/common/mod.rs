//! Common types shared across versiondb: values and keys, the event bus,
//! named locks and small concurrency helpers.

mod constants;
mod event_bus;
mod lock;
mod type_utils;
mod value;

pub use constants::*;
pub use event_bus::*;
pub use lock::*;
pub use type_utils::*;
pub use value::*;

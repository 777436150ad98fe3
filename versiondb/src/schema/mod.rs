//! Schema versions, their transforms and the process-wide registry.

mod module;
mod registry;
mod schema_version;

pub use module::*;
pub use registry::*;
pub use schema_version::*;

//! The migration engine: version probing, migration planning, serialized
//! version-change transactions and the [`Database`] entry point.

mod broker;
mod database;
mod migrator;
mod mutators;
mod options;
mod planner;
mod prober;
mod queue;
mod reset;

pub use broker::*;
pub use database::*;
pub use mutators::*;
pub use options::*;
pub use planner::*;
pub use prober::*;

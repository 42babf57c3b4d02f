#![cfg_attr(test, allow(unused_crate_dependencies))]
//! Worker runtime primitives shared by the purse crates.
//!
//! Everything async in the synchronization layer is routed through here so
//! tasks carry a [`TaskClass`] for observability and detached work has one
//! place where its failures are logged instead of dropped.

mod class;
mod join_set;
#[cfg(test)]
mod panic_tests;
mod spawn;
mod token;

pub use class::TaskClass;
pub use join_set::WorkerJoinSet;
pub use spawn::{join_error_panic_message, spawn, spawn_detached};
pub use token::{GenerationClock, GenerationToken};

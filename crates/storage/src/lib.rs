//! Storage layer for surge
//!
//! This crate holds everything that persists between fold attempts:
//! - UpdateRecord: immutable, priority-stamped update requests
//! - UpdateQueue: per-unit arena + priority buckets in commit order
//! - UnitSlot: committed state, owner context, queue, in-flight attempt
//! - UnitStore: DashMap of all live units
//! - FoldContext: execution context handed to payload functions

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod context;
pub mod queue;
pub mod record;
pub mod store;
pub mod unit;

pub use context::FoldContext;
pub use queue::UpdateQueue;
pub use record::{callback, Callback, MergeMode, Payload, UpdateRecord, UpdateRequest, UpdaterFn};
pub use store::UnitStore;
pub use unit::{AttemptId, EnqueueEffect, FoldPhase, InFlight, UnitSlot};

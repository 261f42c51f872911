//! Engine layer for surge
//!
//! Drives the work loop over every unit:
//! - Engine: unit lifecycle, enqueue, flush
//! - FoldAttempt: step-wise attempts for hosts that yield between records
//! - PriorityArbiter: external priority policy and yield budget
//! - Reconciler: commit notifications and owner context refresh
//! - EngineConfig / EngineBuilder: configuration

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod arbiter;
pub mod attempt;
pub mod config;
pub mod engine;
pub mod reconcile;
pub mod report;

pub use arbiter::{FixedPriority, PriorityArbiter, ScopedPriority};
pub use attempt::FoldAttempt;
pub use config::EngineConfig;
pub use engine::{Engine, EngineBuilder};
pub use reconcile::{NoopReconciler, Reconciler};
pub use report::{AttemptOutcome, CommitSummary, EngineMetrics, FlushReport};

pub use surge_concurrency::{AttemptStatus, FoldProgress, PreemptReason, Step};

//! Fold layer for surge
//!
//! This crate turns queued update records into committed state:
//! - Materializer: folds records over a base state into a candidate
//! - AttemptContext: one resumable, preemptible fold over a unit
//! - AttemptManager: attempt ids, commit validation and publication

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod attempt;
pub mod manager;
pub mod materializer;

pub use attempt::{AttemptContext, AttemptStatus, FoldProgress, PreemptReason, Step};
pub use manager::{AttemptManager, AttemptMetrics, CommitOutcome, CommittedFold};
pub use materializer::{materialize, Callbacks, CollectedCallback, Fold, Materialized};

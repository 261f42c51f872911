//! Outcome and metrics types

use surge_concurrency::PreemptReason;
use surge_core::{Error, UnitId, Value};

/// What a committed fold did
#[derive(Debug, Clone, PartialEq)]
pub struct CommitSummary {
    /// Unit that committed
    pub unit: UnitId,
    /// The new base state
    pub state: Value,
    /// Records folded into it
    pub records: usize,
    /// Callbacks fired
    pub callbacks: usize,
    /// True if a REPLACE record was folded
    pub fully_replaced: bool,
}

/// How one attempt ended
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// The fold was published and its callbacks have run
    Committed(CommitSummary),
    /// The fold was discarded; every record stays pending
    Preempted(PreemptReason),
    /// Nothing was pending in scope
    Idle,
}

impl AttemptOutcome {
    /// True for [`AttemptOutcome::Committed`]
    pub fn is_committed(&self) -> bool {
        matches!(self, AttemptOutcome::Committed(_))
    }

    /// The commit summary, if the attempt committed
    pub fn committed(&self) -> Option<&CommitSummary> {
        match self {
            AttemptOutcome::Committed(summary) => Some(summary),
            _ => None,
        }
    }
}

/// What one flush did
#[derive(Debug, Default)]
pub struct FlushReport {
    /// Distinct units that committed at least once
    pub committed_units: Vec<UnitId>,
    /// Commits, counting repeat commits of one unit
    pub commits: usize,
    /// Folds that failed; their units were skipped for the rest of the flush
    pub failures: Vec<Error>,
    /// True if the arbiter asked the flush to stop early
    pub yielded: bool,
}

impl FlushReport {
    /// Number of distinct units committed
    pub fn committed_count(&self) -> usize {
        self.committed_units.len()
    }

    /// True if every attempted fold succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Engine metrics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EngineMetrics {
    /// Live units
    pub units: usize,
    /// Records pending across all units
    pub pending: usize,
    /// Total commits
    pub commits: u64,
    /// Attempts discarded by preemption or yielding
    pub preemptions: u64,
    /// Attempts stopped by a failing payload
    pub failures: u64,
    /// Records published by commits
    pub records_committed: u64,
    /// Payload evaluations, counting replays after preemption
    pub records_evaluated: u64,
}

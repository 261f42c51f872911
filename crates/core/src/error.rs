//! Error types for surge
//!
//! Every failure in the engine is scoped to a single unit's fold attempt or
//! to a single API call. Nothing here is fatal to the process.

use crate::types::{Sequence, UnitId};
use thiserror::Error;

/// All surge errors.
#[derive(Debug, Error)]
pub enum Error {
    /// The unit was never created or has been destroyed
    #[error("unit not found: {0}")]
    UnitNotFound(UnitId),

    /// A fold attempt for the unit is already in flight
    #[error("unit {0} already has a fold in flight")]
    UnitBusy(UnitId),

    /// Evaluating or merging an update record failed
    ///
    /// The record stays pending and is retried by the next fold that
    /// covers its priority.
    #[error("update {sequence} for unit {unit} failed: {source}")]
    RecordFailed {
        /// Unit the record belongs to
        unit: UnitId,
        /// Sequence of the failing record
        sequence: Sequence,
        /// Underlying failure reported by the payload or the merge
        #[source]
        source: anyhow::Error,
    },

    /// A MERGE payload produced a value that cannot be shallow-merged
    #[error("cannot merge {partial} into {accumulated}")]
    MergeTypeMismatch {
        /// Type of the accumulated state
        accumulated: &'static str,
        /// Type of the partial value
        partial: &'static str,
    },

    /// A single flush kept finding new work past the configured round limit
    #[error("flush exceeded {rounds} rounds")]
    FlushLimitExceeded {
        /// The configured limit
        rounds: usize,
    },

    /// Configuration could not be parsed or is out of range
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Internal error (bug or invariant violation)
    #[error("internal error: {0}")]
    Internal(String),
}

/// Result type for surge operations.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    /// Check if this error is retryable.
    ///
    /// Record failures leave the record pending, and a busy unit becomes
    /// available once its attempt finishes, so both may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::RecordFailed { .. } | Error::UnitBusy(_))
    }

    /// Check if this is a not-found error.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::UnitNotFound(_))
    }

    /// Check if this is a serious/unrecoverable error.
    pub fn is_serious(&self) -> bool {
        matches!(self, Error::Internal(_))
    }

    /// Unit the error is scoped to, if any
    pub fn unit(&self) -> Option<UnitId> {
        match self {
            Error::UnitNotFound(unit) | Error::UnitBusy(unit) => Some(*unit),
            Error::RecordFailed { unit, .. } => Some(*unit),
            _ => None,
        }
    }
}

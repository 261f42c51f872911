//! Per-unit update queue
//!
//! Records live in an arena keyed by their [`Sequence`]; the queue itself is
//! a set of per-priority buckets holding sequences in insertion order.
//!
//! ```text
//! arena:   { #1 -> rec, #2 -> rec, #3 -> rec, #4 -> rec }
//! buckets: SYNC -> [#3]
//!          LOW  -> [#1, #2, #4]
//!
//! commit order: #3, #1, #2, #4
//! ```
//!
//! # Design
//!
//! - **Stable priority order**: iteration walks buckets most-urgent first,
//!   and each bucket is ordered by sequence. Never plain FIFO across tiers.
//! - **No persisted fold cursor**: a fold reads a snapshot via
//!   [`UpdateQueue::peek_at_or_below`]; discarding the fold needs no undo.
//! - **Exact pruning**: [`UpdateQueue::prune`] removes the given sequences and
//!   nothing else, so records inserted while a fold was running survive it.

use crate::record::UpdateRecord;
use rustc_hash::FxHashMap;
use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use surge_core::{Priority, Sequence};

/// Priority-ordered queue of pending updates for one unit
#[derive(Debug, Default)]
pub struct UpdateQueue {
    /// Arena of pending records
    records: FxHashMap<Sequence, Arc<UpdateRecord>>,
    /// Sequences per priority tier, ascending
    buckets: BTreeMap<Priority, VecDeque<Sequence>>,
}

impl UpdateQueue {
    /// Create an empty queue
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of pending records
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// True if nothing is pending
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Insert a record at its commit-order position
    ///
    /// O(1) when sequences arrive in order, which is the common case;
    /// a late sequence is placed by binary search within its bucket.
    pub fn enqueue(&mut self, record: UpdateRecord) -> Arc<UpdateRecord> {
        let record = Arc::new(record);
        let sequence = record.sequence();
        let bucket = self.buckets.entry(record.priority()).or_default();

        match bucket.back() {
            Some(last) if *last > sequence => {
                let at = bucket.partition_point(|s| *s < sequence);
                bucket.insert(at, sequence);
            }
            _ => bucket.push_back(sequence),
        }

        self.records.insert(sequence, Arc::clone(&record));
        record
    }

    /// Every pending record admitted by `threshold`, in commit order
    ///
    /// Does not mutate the queue.
    pub fn peek_at_or_below(&self, threshold: Priority) -> Vec<Arc<UpdateRecord>> {
        self.buckets
            .range(..=threshold)
            .flat_map(|(_, bucket)| bucket.iter())
            .filter_map(|sequence| self.records.get(sequence).cloned())
            .collect()
    }

    /// Number of pending records admitted by `threshold`
    pub fn count_at_or_below(&self, threshold: Priority) -> usize {
        self.buckets.range(..=threshold).map(|(_, b)| b.len()).sum()
    }

    /// Where a fold at `threshold` starts: the first pending record in commit order
    pub fn first_unprocessed_at_or_below(&self, threshold: Priority) -> Option<Sequence> {
        self.buckets
            .range(..=threshold)
            .find_map(|(_, bucket)| bucket.front().copied())
    }

    /// Oldest pending record admitted by `threshold`
    ///
    /// Used to pick which unit runs first: the one holding the oldest request.
    pub fn earliest_at_or_below(&self, threshold: Priority) -> Option<Sequence> {
        self.buckets
            .range(..=threshold)
            .filter_map(|(_, bucket)| bucket.front().copied())
            .min()
    }

    /// Remove exactly the given committed records
    ///
    /// Sequences that are not pending are ignored. Returns how many were removed.
    pub fn prune(&mut self, committed: &[Sequence]) -> usize {
        let mut removed = 0;
        for sequence in committed {
            let Some(record) = self.records.remove(sequence) else {
                continue;
            };
            removed += 1;

            let priority = record.priority();
            if let Some(bucket) = self.buckets.get_mut(&priority) {
                if bucket.front() == Some(sequence) {
                    bucket.pop_front();
                } else if let Some(at) = bucket.iter().position(|s| s == sequence) {
                    bucket.remove(at);
                }
                if bucket.is_empty() {
                    self.buckets.remove(&priority);
                }
            }
        }
        removed
    }

    /// Drop everything, returning how many records were discarded
    pub fn clear(&mut self) -> usize {
        let n = self.records.len();
        self.records.clear();
        self.buckets.clear();
        n
    }
}

//! Sharded unit storage
//!
//! All stateful units of an engine live in one [`UnitStore`].
//!
//! # Design
//!
//! - DashMap keyed by [`UnitId`]: independent units never contend, so
//!   different units may be folded from different threads.
//! - Guards are only held inside the closures passed to
//!   [`UnitStore::with_slot`] / [`UnitStore::with_slot_mut`]. Payload
//!   functions and callbacks never run under a guard, which lets them call
//!   back into the store.
//! - Sequences come from one global counter, so "oldest pending request"
//!   is comparable across units.

use crate::record::{UpdateRecord, UpdateRequest};
use crate::unit::{EnqueueEffect, UnitSlot};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use surge_core::{Priority, Sequence, UnitId, Value};

/// Store of every live stateful unit
pub struct UnitStore {
    /// Per-unit slots
    units: DashMap<UnitId, UnitSlot>,
    /// Next unit id
    next_unit: AtomicU64,
    /// Next record sequence
    next_sequence: AtomicU64,
}

impl UnitStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self {
            units: DashMap::new(),
            next_unit: AtomicU64::new(1),
            next_sequence: AtomicU64::new(1),
        }
    }

    /// Number of live units
    pub fn unit_count(&self) -> usize {
        self.units.len()
    }

    /// Check if a unit exists
    pub fn contains(&self, unit: UnitId) -> bool {
        self.units.contains_key(&unit)
    }

    /// Total pending records across all units
    pub fn total_pending(&self) -> usize {
        self.units.iter().map(|entry| entry.value().queue.len()).sum()
    }

    /// Allocate the next insertion sequence
    #[inline]
    pub fn next_sequence(&self) -> Sequence {
        Sequence::from_raw(self.next_sequence.fetch_add(1, Ordering::AcqRel))
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create a unit and return its id
    pub fn create(&self, initial: Value, owner_context: Value) -> UnitId {
        let unit = UnitId::from_raw(self.next_unit.fetch_add(1, Ordering::AcqRel));
        self.units.insert(unit, UnitSlot::new(initial, owner_context));
        tracing::trace!(%unit, "unit created");
        unit
    }

    /// Remove a unit, returning its slot
    ///
    /// Pending records go with the slot; their callbacks never fire.
    pub fn destroy(&self, unit: UnitId) -> Option<UnitSlot> {
        let (_, slot) = self.units.remove(&unit)?;
        tracing::trace!(%unit, discarded = slot.queue.len(), "unit destroyed");
        Some(slot)
    }

    // ========================================================================
    // Slot access
    // ========================================================================

    /// Read a unit under its shard's read lock
    pub fn with_slot<R>(&self, unit: UnitId, f: impl FnOnce(&UnitSlot) -> R) -> Option<R> {
        self.units.get(&unit).map(|slot| f(slot.value()))
    }

    /// Mutate a unit under its shard's write lock
    pub fn with_slot_mut<R>(&self, unit: UnitId, f: impl FnOnce(&mut UnitSlot) -> R) -> Option<R> {
        self.units.get_mut(&unit).map(|mut slot| f(slot.value_mut()))
    }

    /// Stamp a request and queue it for `unit`
    ///
    /// A request queued while one of the unit's payloads is running takes
    /// the running fold's threshold instead of `priority`. Returns `None` if
    /// the unit does not exist; the request is dropped.
    pub fn enqueue(
        &self,
        unit: UnitId,
        priority: Priority,
        request: UpdateRequest,
    ) -> Option<(Arc<UpdateRecord>, EnqueueEffect)> {
        let mut slot = self.units.get_mut(&unit)?;
        let priority = slot.reentrant_priority().unwrap_or(priority);
        // allocated under the guard so one unit's sequences arrive in order
        let record = UpdateRecord::new(self.next_sequence(), priority, request);
        Some(slot.enqueue(record))
    }

    // ========================================================================
    // Scheduling queries
    // ========================================================================

    /// Idle units with work admitted by `threshold`, oldest request first
    pub fn ready_units(&self, threshold: Priority) -> Vec<UnitId> {
        let mut ready: Vec<(Sequence, UnitId)> = self
            .units
            .iter()
            .filter(|entry| entry.value().is_idle())
            .filter_map(|entry| {
                entry
                    .value()
                    .queue
                    .earliest_at_or_below(threshold)
                    .map(|sequence| (sequence, *entry.key()))
            })
            .collect();
        ready.sort_unstable();
        ready.into_iter().map(|(_, unit)| unit).collect()
    }
}

impl Default for UnitStore {
    fn default() -> Self {
        Self::new()
    }
}

//! Core identifier and ordering types
//!
//! This module defines the fundamental types used throughout the engine:
//! - [`UnitId`]: identifier of a stateful unit
//! - [`Sequence`]: global insertion order of update records
//! - [`Priority`]: urgency tier of an update record

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Identifier of a stateful unit
///
/// Allocated by the engine when a unit is created. Ids are never reused
/// within one engine, so a destroyed unit's id stays dead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct UnitId(u64);

impl UnitId {
    /// Wrap a raw id
    pub const fn from_raw(raw: u64) -> Self {
        UnitId(raw)
    }

    /// Get the raw id
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for UnitId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unit-{}", self.0)
    }
}

/// Insertion sequence of an update record
///
/// Monotonically increasing across the whole engine. Used as the tie-break
/// between records of equal priority, and as the "oldest request first"
/// key when choosing which unit to fold next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Sequence(u64);

impl Sequence {
    /// Wrap a raw sequence number
    pub const fn from_raw(raw: u64) -> Self {
        Sequence(raw)
    }

    /// Get the raw sequence number
    pub const fn as_u64(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for Sequence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Urgency tier of an update record
///
/// Priorities form a total order in which a **lower** numeric value is
/// **more** urgent. `SYNC` is the immediate tier; everything after it is
/// deferrable.
///
/// A priority is also used as a *threshold*: a fold at threshold `T`
/// covers every record whose priority is `<= T`.
///
/// # Examples
///
/// ```
/// use surge_core::Priority;
///
/// assert!(Priority::SYNC.is_more_urgent_than(Priority::LOW));
/// assert!(Priority::LOW.admits(Priority::TASK));
/// assert!(!Priority::SYNC.admits(Priority::TASK));
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Priority(u8);

impl Priority {
    /// Immediate tier, applied before control returns to the caller
    pub const SYNC: Priority = Priority(0);
    /// Applied at the end of the current task
    pub const TASK: Priority = Priority(1);
    /// Applied before the next frame
    pub const ANIMATION: Priority = Priority(2);
    /// Interaction-driven work that should land soon
    pub const HIGH: Priority = Priority(3);
    /// Background work such as data fetching results
    pub const LOW: Priority = Priority(4);
    /// Work for content that is not visible
    pub const OFFSCREEN: Priority = Priority(5);

    /// All named levels, most urgent first
    pub const LEVELS: [Priority; 6] = [
        Priority::SYNC,
        Priority::TASK,
        Priority::ANIMATION,
        Priority::HIGH,
        Priority::LOW,
        Priority::OFFSCREEN,
    ];

    /// Least urgent level; a threshold that admits everything
    pub const LEAST_URGENT: Priority = Priority::OFFSCREEN;

    /// Build a priority from its numeric level
    ///
    /// Returns `None` for levels past [`Priority::OFFSCREEN`].
    pub fn from_level(level: u8) -> Option<Self> {
        Self::LEVELS.get(level as usize).copied()
    }

    /// Numeric level (0 = most urgent)
    pub const fn level(&self) -> u8 {
        self.0
    }

    /// True for the immediate tier
    pub const fn is_sync(&self) -> bool {
        self.0 == Priority::SYNC.0
    }

    /// True if `self` must run before `other`
    pub const fn is_more_urgent_than(&self, other: Priority) -> bool {
        self.0 < other.0
    }

    /// Treating `self` as a threshold, does it cover `priority`?
    pub const fn admits(&self, priority: Priority) -> bool {
        priority.0 <= self.0
    }

    /// Lower-case name, as used in configuration files
    pub const fn name(&self) -> &'static str {
        match self.0 {
            0 => "sync",
            1 => "task",
            2 => "animation",
            3 => "high",
            4 => "low",
            _ => "offscreen",
        }
    }
}

impl Default for Priority {
    fn default() -> Self {
        Priority::TASK
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Priority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Priority::LEVELS
            .iter()
            .copied()
            .find(|p| p.name().eq_ignore_ascii_case(s))
            .ok_or_else(|| format!("unknown priority '{}'", s))
    }
}

impl TryFrom<String> for Priority {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Priority> for String {
    fn from(p: Priority) -> Self {
        p.name().to_string()
    }
}

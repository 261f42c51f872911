//! # Surge
//!
//! Incremental, priority-aware state updates.
//!
//! Surge keeps independent *units* of state. Callers queue updates against a
//! unit at a priority; a flush folds every pending update at or below a
//! threshold over the last committed state and commits the result, firing
//! each update's callback once, in order, after its effect is visible.
//! Folds that are interrupted by more urgent work are discarded whole and
//! redone later.
//!
//! ## Quick Start
//!
//! ```
//! use surge::prelude::*;
//!
//! let engine = Engine::new();
//! let unit = engine.create_unit(Value::object());
//!
//! engine.enqueue(unit, Value::from(json!({"a": "a"})), MergeMode::Merge, Priority::SYNC, None);
//! engine.enqueue(unit, Value::from(json!({"b": "b"})), MergeMode::Merge, Priority::LOW, None);
//!
//! // only the immediate tier
//! engine.flush_at_or_below(Priority::SYNC)?;
//! assert_eq!(engine.current_state(unit)?, Value::from(json!({"a": "a"})));
//!
//! // everything
//! engine.flush_at_or_below(Priority::LOW)?;
//! assert_eq!(engine.current_state(unit)?, Value::from(json!({"a": "a", "b": "b"})));
//! # Ok::<(), surge::Error>(())
//! ```
//!
//! ## Layers
//!
//! - `surge-core` - [`Value`], [`Priority`], ids, [`Error`]
//! - `surge-storage` - update records, per-unit queues, the unit store
//! - `surge-concurrency` - the materializer and fold attempts
//! - `surge-engine` - the work loop, arbiters, reconciler hook, configuration

#![warn(missing_docs)]

pub mod prelude;

pub use surge_concurrency;
pub use surge_core;
pub use surge_engine;
pub use surge_storage;

// Re-export main entry points
pub use surge_engine::{Engine, EngineBuilder, EngineConfig};
pub use surge_core::{Error, Result};

// Re-export types
pub use surge_core::{Priority, Sequence, UnitId, Value};
pub use surge_storage::{callback, Callback, FoldContext, MergeMode, Payload, UpdateRequest};

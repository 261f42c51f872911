//! Convenient imports for Surge.
//!
//! ```
//! use surge::prelude::*;
//!
//! let engine = Engine::new();
//! let unit = engine.create_unit(Value::object());
//! engine.submit(unit, Value::from(json!({"count": 1})), None);
//! ```

// Main entry point
pub use surge_engine::{Engine, EngineBuilder, EngineConfig};

// Error handling
pub use surge_core::{Error, Result};

// Core types
pub use surge_core::{Priority, UnitId, Value};

// Updates
pub use surge_storage::{callback, Callback, FoldContext, MergeMode, Payload, UpdateRequest};

// Work loop
pub use surge_engine::{
    AttemptOutcome, FixedPriority, FlushReport, FoldAttempt, PreemptReason, PriorityArbiter, Reconciler,
    ScopedPriority, Step,
};

// Re-export serde_json for convenience
pub use serde_json::json;

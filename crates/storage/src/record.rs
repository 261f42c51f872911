//! Update records
//!
//! An [`UpdateRecord`] is one immutable request to transform a unit's
//! state. Once stamped with a priority and a sequence it never changes;
//! only the queue that holds it does.

use crate::context::FoldContext;
use std::fmt;
use std::sync::Arc;
use surge_core::{Priority, Sequence, Value};

/// Signature of a payload function
///
/// Receives the state accumulated so far in the current fold and the fold's
/// execution context (owner context, fold priority, re-entrant enqueue).
/// May run more than once for the same record if a fold is discarded and
/// redone.
pub type UpdaterFn = dyn Fn(&Value, &mut FoldContext<'_>) -> anyhow::Result<Value> + Send + Sync;

/// Side-effecting action fired once, after its record is committed
pub type Callback = Arc<dyn Fn() + Send + Sync>;

/// Wrap a closure as a [`Callback`]
pub fn callback<F>(f: F) -> Callback
where
    F: Fn() + Send + Sync + 'static,
{
    Arc::new(f)
}

/// What an update produces
#[derive(Clone)]
pub enum Payload {
    /// A fixed value, used as-is
    Literal(Value),
    /// A function of the previous state and the owner context
    Updater(Arc<UpdaterFn>),
}

impl Payload {
    /// A literal payload
    pub fn literal(value: impl Into<Value>) -> Self {
        Payload::Literal(value.into())
    }

    /// A function payload
    pub fn updater<F>(f: F) -> Self
    where
        F: Fn(&Value, &mut FoldContext<'_>) -> anyhow::Result<Value> + Send + Sync + 'static,
    {
        Payload::Updater(Arc::new(f))
    }

    /// Produce this payload's value against `previous`
    pub fn evaluate(&self, previous: &Value, ctx: &mut FoldContext<'_>) -> anyhow::Result<Value> {
        match self {
            Payload::Literal(value) => Ok(value.clone()),
            Payload::Updater(f) => f(previous, ctx),
        }
    }

    /// True for function payloads
    pub fn is_updater(&self) -> bool {
        matches!(self, Payload::Updater(_))
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Payload::Literal(value) => f.debug_tuple("Literal").field(value).finish(),
            Payload::Updater(_) => f.write_str("Updater(..)"),
        }
    }
}

impl From<Value> for Payload {
    fn from(value: Value) -> Self {
        Payload::Literal(value)
    }
}

/// How a payload's result combines with the accumulated state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MergeMode {
    /// Shallow-merge the result into the accumulated state
    #[default]
    Merge,
    /// Discard the accumulated state and adopt the result
    Replace,
}

/// An update that has not been stamped with a priority yet
///
/// This is what callers and re-entrant payloads hand to the engine.
#[derive(Clone)]
pub struct UpdateRequest {
    /// What the update produces
    pub payload: Payload,
    /// How the result combines with accumulated state
    pub mode: MergeMode,
    /// Fired after the update is committed
    pub callback: Option<Callback>,
}

impl UpdateRequest {
    /// A MERGE request
    pub fn merge(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            mode: MergeMode::Merge,
            callback: None,
        }
    }

    /// A REPLACE request
    pub fn replace(payload: impl Into<Payload>) -> Self {
        Self {
            payload: payload.into(),
            mode: MergeMode::Replace,
            callback: None,
        }
    }

    /// Attach a callback
    pub fn with_callback(mut self, callback: Callback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl fmt::Debug for UpdateRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRequest")
            .field("payload", &self.payload)
            .field("mode", &self.mode)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

/// One queued update
///
/// Immutable once created. Shared by `Arc` between the queue and any fold
/// attempt that is currently reading it.
pub struct UpdateRecord {
    sequence: Sequence,
    priority: Priority,
    payload: Payload,
    mode: MergeMode,
    callback: Option<Callback>,
}

impl UpdateRecord {
    /// Stamp a request with its priority and insertion sequence
    pub fn new(sequence: Sequence, priority: Priority, request: UpdateRequest) -> Self {
        Self {
            sequence,
            priority,
            payload: request.payload,
            mode: request.mode,
            callback: request.callback,
        }
    }

    /// Insertion sequence
    pub fn sequence(&self) -> Sequence {
        self.sequence
    }

    /// Priority tier
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Payload
    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    /// Merge mode
    pub fn mode(&self) -> MergeMode {
        self.mode
    }

    /// Completion callback, if any
    pub fn callback(&self) -> Option<&Callback> {
        self.callback.as_ref()
    }

    /// Commit-order key: priority first, then insertion sequence
    pub fn order_key(&self) -> (Priority, Sequence) {
        (self.priority, self.sequence)
    }
}

impl fmt::Debug for UpdateRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdateRecord")
            .field("sequence", &self.sequence)
            .field("priority", &self.priority)
            .field("payload", &self.payload)
            .field("mode", &self.mode)
            .field("callback", &self.callback.is_some())
            .finish()
    }
}

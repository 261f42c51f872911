//! Core types for surge
//!
//! This crate defines the vocabulary shared by every layer of the engine:
//! - [`Value`]: the state model and its shallow-merge rule
//! - [`Priority`]: the total order of urgency tiers
//! - [`UnitId`] / [`Sequence`]: identifiers for stateful units and update records
//! - [`Error`] / [`Result`]: the canonical error type

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod types;
pub mod value;

pub use error::{Error, Result};
pub use types::{Priority, Sequence, UnitId};
pub use value::Value;

//! Crate-wide error taxonomy (spec §7).
//!
//! Each variant is a distinct failure mode observable at the API boundary.
//! Per-module error types (e.g. [`crate::sorter::SorterError`],
//! [`crate::permutation::PermutationError`]) convert into [`EngineError`]
//! with `From` impls at the point they cross into the public surface —
//! never earlier, so a caller can still match on the precise module error
//! if they're calling the module directly.

use crate::memory::AllocationExceedsLimit;
use thiserror::Error;

/// Identifies which operator or subsystem noticed a cancellation, per
/// spec §7 ("carries the descriptor of the operator that noticed").
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CancellationError {
    pub noticed_by: String,
}

impl std::fmt::Display for CancellationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "query cancelled (noticed by {})", self.noticed_by)
    }
}

impl std::error::Error for CancellationError {}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid view name: {0} (must match [A-Za-z0-9-]+)")]
    InvalidViewName(String),

    #[error("invalid parameter value for '{name}': {message}")]
    InvalidParameter { name: String, message: String },

    #[error("conflicting configuration: {0}")]
    Conflict(String),
}

/// The seven error kinds of spec §7.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("allocation exceeds limit: {0}")]
    AllocationExceedsLimit(#[from] AllocationExceedsLimit),

    #[error("cancelled: {0}")]
    Cancelled(#[from] CancellationError),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("corruption: {0}")]
    Corruption(String),

    #[error("internal invariant violation: {0}")]
    Internal(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Raise an [`EngineError::Internal`] after logging at `error` level; used
/// for `InternalInvariantViolation`-class bugs that must never be presented
/// to a client as a recoverable error (spec §7: "Never surface as a handled
/// error for the client" — callers of this helper are expected to let it
/// propagate straight to the process boundary, not retry on it).
#[track_caller]
pub fn internal_invariant(condition: bool, message: impl Into<String>) -> EngineResult<()> {
    if condition {
        Ok(())
    } else {
        let message = message.into();
        tracing::error!(location = %std::panic::Location::caller(), %message, "internal invariant violation");
        Err(EngineError::Internal(message))
    }
}

//! Crate-level error taxonomy for pipeline cycles.

use crate::ledger::{LedgerError, NormalizeError};
use crate::math::MathError;
use crate::store::StoreError;
use crate::tx::MalformedInput;
use thiserror::Error;

/// Failures that end a cycle. Per-message and per-denom problems are handled where they occur
/// and never reach this type; see the individual aggregators.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    MalformedInput(#[from] MalformedInput),
    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(#[from] LedgerError),
    #[error("division by zero")]
    DivisionByZero,
    #[error("invalid decimal: {0}")]
    InvalidDecimal(String),
    #[error("store: {0}")]
    Store(#[from] StoreError),
    #[error("time: {0}")]
    Time(#[from] NormalizeError),
}

impl From<MathError> for PipelineError {
    fn from(e: MathError) -> Self {
        match e {
            MathError::DivisionByZero => PipelineError::DivisionByZero,
            MathError::InvalidDecimal(s) => PipelineError::InvalidDecimal(s),
        }
    }
}

//! Error types for the Roster engine.

use crate::RecordId;
use thiserror::Error;

/// All possible errors from the Roster engine.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    // Store errors
    #[error("record not found: {0}")]
    RecordNotFound(RecordId),

    #[error("invalid fields: {0}")]
    InvalidFields(String),

    #[error("store error: {0}")]
    Store(String),

    // Query errors
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    // Engine invariant violations
    #[error("duplicate identity {id} in {side} snapshot")]
    DuplicateIdentity { id: RecordId, side: &'static str },

    #[error("records controller is closed")]
    ControllerClosed,

    // Consumer errors
    #[error("invalid batch: {0}")]
    InvalidBatch(String),
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

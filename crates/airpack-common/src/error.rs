//! Error types for the Airpack core
//!
//! Provides a unified error type shared by the ledger, session lifecycle,
//! and monitoring crates.

use thiserror::Error;
use uuid::Uuid;

use crate::types::session::SessionState;

/// Result type alias using AirpackError
pub type Result<T> = std::result::Result<T, AirpackError>;

/// Unified error type for Airpack operations
#[derive(Debug, Error)]
pub enum AirpackError {
    /// The owner holds no active allowance at all. Partial shortfalls are
    /// reported as data on the allocation result, not as this error.
    #[error("no active allowance for owner {owner_id}")]
    QuotaExhausted { owner_id: String },

    #[error("quota denied: {reason}")]
    QuotaDenied { reason: String },

    #[error("session not found: {0}")]
    SessionNotFound(Uuid),

    #[error("allowance not found: {0}")]
    AllowanceNotFound(Uuid),

    #[error("illegal session transition: {from:?} -> {to:?}")]
    InvalidStateTransition { from: SessionState, to: SessionState },

    #[error("session allowance is fully consumed: {0}")]
    SessionExhausted(Uuid),

    // Collaborator failure, surfaced to the caller without retry
    #[error("provisioning failure: {0}")]
    Provisioning(String),

    #[error("transfer failure: {0}")]
    Transfer(String),

    /// Lost a conditional-update race. The single operation may be retried
    /// by the caller; the core imposes no retry policy of its own.
    #[error("conditional update lost: expected version {expected}, found {found}")]
    PersistenceConflict { expected: u64, found: u64 },

    #[error("amount must be positive")]
    InvalidAmount,

    #[error("storage error: {0}")]
    Storage(String),

    #[error("notification error: {0}")]
    Notification(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<serde_json::Error> for AirpackError {
    fn from(err: serde_json::Error) -> Self {
        AirpackError::Storage(err.to_string())
    }
}

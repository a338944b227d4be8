//! Append-only usage audit records

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A single tracked consumption against a session
///
/// Events form an append-only audit trail; they are never mutated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageEvent {
    /// Unique event ID
    pub id: Uuid,
    /// Session the usage was posted against
    pub session_id: Uuid,
    /// Owning user, denormalized for per-owner queries
    pub owner_id: String,
    /// Amount consumed in MB
    pub amount_mb: u64,
    /// Event timestamp
    pub recorded_at: DateTime<Utc>,
}

impl UsageEvent {
    pub fn new(session_id: Uuid, owner_id: String, amount_mb: u64) -> Self {
        Self {
            id: Uuid::new_v4(),
            session_id,
            owner_id,
            amount_mb,
            recorded_at: Utc::now(),
        }
    }
}

//! Download session and its lifecycle state machine

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{AirpackError, Result};

/// Session lifecycle state
///
/// Legal path: `Pending -> Downloading -> Transferring -> Stored -> Active
/// -> {Exhausted | Expired}`. `Failed` is reachable from any non-terminal
/// state; no other transition skips a state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    Pending,
    Downloading,
    Transferring,
    Stored,
    Active,
    Exhausted,
    Expired,
    Failed,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionState::Exhausted | SessionState::Expired | SessionState::Failed
        )
    }

    /// Whether moving from `self` to `next` is a legal lifecycle step
    pub fn can_transition(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (from, Failed) => !from.is_terminal(),
            (Pending, Downloading) => true,
            (Downloading, Transferring) => true,
            (Transferring, Stored) => true,
            (Stored, Active) => true,
            (Active, Exhausted) => true,
            (Active, Expired) => true,
            _ => false,
        }
    }
}

/// Policy class of a download request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanClass {
    /// Counts against the monthly free-tier cap
    Free,
    Standard,
    /// Requires an active unlimited subscription
    UnlimitedRequired,
}

/// A request to materialize a new allowance via a chunked download
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Unique session ID
    pub id: Uuid,
    /// Owning user
    pub owner_id: String,
    /// Human-readable option name, e.g. "2GB"
    pub name: String,
    /// Requested capacity in MB
    pub requested_mb: u64,
    /// Price paid for the download
    pub price: Decimal,
    /// Policy class checked at download start
    pub plan_class: PlanClass,
    /// Validity of the resulting allowance in days; `None` never expires
    pub validity_days: Option<u32>,
    /// Current lifecycle state
    pub state: SessionState,
    /// Download progress, 0..=100, monotonic
    pub progress_percent: u8,
    /// Allowance created on completion; set when the session reaches Stored
    pub linked_allowance_id: Option<Uuid>,
    /// Access credential issued by the provisioning collaborator
    pub credential_id: Option<String>,
    /// Usage tracked since activation in MB
    pub consumed_mb: u64,
    /// Captured reason when the session failed
    pub failure_reason: Option<String>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Activation timestamp
    pub activated_at: Option<DateTime<Utc>>,
    /// Timestamp of the last tracked usage
    pub last_usage_at: Option<DateTime<Utc>>,
}

impl Session {
    /// Create a new session in `Pending`
    pub fn new(
        owner_id: String,
        name: String,
        requested_mb: u64,
        price: Decimal,
        plan_class: PlanClass,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            owner_id,
            name,
            requested_mb,
            price,
            plan_class,
            validity_days: None,
            state: SessionState::Pending,
            progress_percent: 0,
            linked_allowance_id: None,
            credential_id: None,
            consumed_mb: 0,
            failure_reason: None,
            created_at: Utc::now(),
            activated_at: None,
            last_usage_at: None,
        }
    }

    /// Set the validity window of the allowance this download materializes
    pub fn with_validity(mut self, days: u32) -> Self {
        self.validity_days = Some(days);
        self
    }

    /// Apply a lifecycle transition, rejecting illegal moves
    pub fn transition(&mut self, next: SessionState) -> Result<()> {
        if !self.state.can_transition(next) {
            return Err(AirpackError::InvalidStateTransition {
                from: self.state,
                to: next,
            });
        }
        self.state = next;
        Ok(())
    }

    /// Raise download progress; never lowers the stored value
    pub fn set_progress(&mut self, percent: u8) {
        self.progress_percent = self.progress_percent.max(percent.min(100));
    }

    /// Whether the download was free of charge
    pub fn is_free(&self) -> bool {
        self.price.is_zero()
    }
}

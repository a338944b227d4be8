//! Allowance - a finite, consumable quantity of data owned by a user
//!
//! Key characteristics:
//! - Immutable capacity, monotonically non-decreasing consumption
//! - Optional expiry; `None` means the allowance only ever exhausts
//! - One-shot 75%/90% alert flags
//! - Version field for optimistic concurrency

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Allowance lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AllowanceStatus {
    Active,
    Exhausted,
    Expired,
}

/// A data allowance ("pack") held by a user
///
/// Allowances are never deleted; they only transition between statuses.
/// Remaining capacity is always derived from `capacity_mb - consumed_mb`,
/// never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Allowance {
    /// Unique allowance ID
    pub id: Uuid,
    /// Owning user
    pub owner_id: String,
    /// Total capacity in MB, fixed at creation
    pub capacity_mb: u64,
    /// Consumed capacity in MB, never decreases
    pub consumed_mb: u64,
    /// Current status
    pub status: AllowanceStatus,
    /// Expiry instant; `None` never expires
    pub expires_at: Option<DateTime<Utc>>,
    /// 75% usage alert already sent
    pub alert_75_sent: bool,
    /// 90% usage alert already sent
    pub alert_90_sent: bool,
    /// Version for optimistic concurrency control
    pub version: u64,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
    /// Timestamp of last modification
    pub updated_at: DateTime<Utc>,
}

impl Allowance {
    /// Create a new active allowance with zero consumption
    pub fn new(owner_id: String, capacity_mb: u64, expires_at: Option<DateTime<Utc>>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            owner_id,
            capacity_mb,
            consumed_mb: 0,
            status: AllowanceStatus::Active,
            expires_at,
            alert_75_sent: false,
            alert_90_sent: false,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Remaining capacity in MB, derived
    #[inline]
    pub fn remaining_mb(&self) -> u64 {
        self.capacity_mb.saturating_sub(self.consumed_mb)
    }

    /// Consumed share of capacity as a whole percentage
    pub fn usage_percent(&self) -> u8 {
        if self.capacity_mb == 0 {
            return 100;
        }
        ((self.consumed_mb * 100) / self.capacity_mb) as u8
    }

    /// Whether the expiry instant has passed
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        matches!(self.expires_at, Some(at) if at <= now)
    }

    /// Consume up to `amount_mb`, capped at the remaining capacity.
    ///
    /// Returns the amount actually taken. Transitions to `Exhausted` when
    /// consumption reaches capacity.
    pub fn consume(&mut self, amount_mb: u64) -> u64 {
        let take = amount_mb.min(self.remaining_mb());
        if take > 0 {
            self.consumed_mb += take;
            if self.consumed_mb == self.capacity_mb {
                self.status = AllowanceStatus::Exhausted;
            }
            self.touch();
        }
        take
    }

    /// Transition to `Expired`
    pub fn expire(&mut self) {
        self.status = AllowanceStatus::Expired;
        self.touch();
    }

    /// Record that a threshold alert has gone out
    pub fn mark_alert_sent(&mut self, threshold_percent: u8) {
        match threshold_percent {
            90 => self.alert_90_sent = true,
            _ => self.alert_75_sent = true,
        }
        self.touch();
    }

    /// Update version and timestamp
    fn touch(&mut self) {
        self.version += 1;
        self.updated_at = Utc::now();
    }
}

impl std::fmt::Display for Allowance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Allowance({}, {}/{}MB, {:?})",
            self.id, self.consumed_mb, self.capacity_mb, self.status
        )
    }
}

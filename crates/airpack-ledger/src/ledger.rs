//! The quota ledger

use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use airpack_common::{
    AirpackError, Allowance, AllowanceStatus, Result, Storage,
};

use crate::allocation::{AllocationResult, AllocationSlice};

/// Ledger tuning knobs
#[derive(Debug, Clone)]
pub struct LedgerConfig {
    /// How many times a lost conditional update on one allowance is
    /// re-read and retried before the conflict is surfaced. There is no
    /// baked-in backoff; deployments choose their own policy here.
    pub conflict_retries: u32,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            conflict_retries: 3,
        }
    }
}

impl LedgerConfig {
    /// Load from environment, falling back to defaults
    pub fn load() -> Self {
        let mut cfg = Self::default();
        if let Ok(val) = std::env::var("AIRPACK_LEDGER_CONFLICT_RETRIES") {
            if let Ok(v) = val.parse() {
                cfg.conflict_retries = v;
            }
        }
        cfg
    }
}

/// Allocates consumption across a user's active allowances
pub struct Ledger {
    storage: Arc<dyn Storage>,
    config: LedgerConfig,
}

impl Ledger {
    pub fn new(storage: Arc<dyn Storage>, config: LedgerConfig) -> Self {
        Self { storage, config }
    }

    /// Spend `amount_mb` across the owner's active allowances.
    ///
    /// Fails with `QuotaExhausted` only when the owner has no active
    /// allowance at all; insufficient capacity comes back as
    /// `unallocated_mb` on the result.
    #[instrument(skip(self))]
    pub async fn allocate(&self, owner_id: &str, amount_mb: u64) -> Result<AllocationResult> {
        if amount_mb == 0 {
            return Err(AirpackError::InvalidAmount);
        }

        let mut packs = self
            .storage
            .owner_allowances(owner_id, Some(AllowanceStatus::Active))
            .await?;
        if packs.is_empty() {
            return Err(AirpackError::QuotaExhausted {
                owner_id: owner_id.to_string(),
            });
        }

        packs.sort_by(compare_expiry);

        let mut remaining = amount_mb;
        let mut slices = Vec::new();
        for pack in packs {
            if remaining == 0 {
                break;
            }
            let allowance_id = pack.id;
            let taken = self.consume_one(pack, remaining).await?;
            if taken > 0 {
                remaining -= taken;
                slices.push(AllocationSlice {
                    allowance_id,
                    amount_mb: taken,
                });
            }
        }

        debug!(
            owner_id,
            requested_mb = amount_mb,
            unallocated_mb = remaining,
            packs_touched = slices.len(),
            "Allocation complete"
        );

        Ok(AllocationResult {
            slices,
            unallocated_mb: remaining,
        })
    }

    /// Spend against one specific allowance, the degenerate path used when
    /// a session tracks usage on its linked allowance.
    #[instrument(skip(self))]
    pub async fn consume_from(
        &self,
        allowance_id: Uuid,
        amount_mb: u64,
    ) -> Result<AllocationResult> {
        if amount_mb == 0 {
            return Err(AirpackError::InvalidAmount);
        }

        let pack = self
            .storage
            .allowance(allowance_id)
            .await?
            .ok_or(AirpackError::AllowanceNotFound(allowance_id))?;

        let taken = if pack.status == AllowanceStatus::Active {
            self.consume_one(pack, amount_mb).await?
        } else {
            0
        };

        let mut slices = Vec::new();
        if taken > 0 {
            slices.push(AllocationSlice {
                allowance_id,
                amount_mb: taken,
            });
        }
        Ok(AllocationResult {
            slices,
            unallocated_mb: amount_mb - taken,
        })
    }

    /// Open a fresh active allowance for an owner
    pub async fn grant(
        &self,
        owner_id: &str,
        capacity_mb: u64,
        expires_at: Option<DateTime<Utc>>,
    ) -> Result<Allowance> {
        if capacity_mb == 0 {
            return Err(AirpackError::InvalidAmount);
        }
        let allowance = Allowance::new(owner_id.to_string(), capacity_mb, expires_at);
        self.storage.insert_allowance(allowance.clone()).await?;
        info!(
            allowance_id = %allowance.id,
            owner_id,
            capacity_mb,
            "Opened allowance"
        );
        Ok(allowance)
    }

    /// Take up to `want` MB from one allowance via conditional update,
    /// re-reading and retrying on a lost race.
    async fn consume_one(&self, mut pack: Allowance, want: u64) -> Result<u64> {
        let mut attempts = 0u32;
        loop {
            let expected = pack.version;
            let mut candidate = pack.clone();
            let take = candidate.consume(want);
            if take == 0 {
                return Ok(0);
            }
            match self.storage.update_allowance(&candidate, expected).await {
                Ok(()) => return Ok(take),
                Err(AirpackError::PersistenceConflict { .. })
                    if attempts < self.config.conflict_retries =>
                {
                    attempts += 1;
                    debug!(
                        allowance_id = %pack.id,
                        attempts,
                        "Lost consumption race, re-reading"
                    );
                    pack = self
                        .storage
                        .allowance(pack.id)
                        .await?
                        .ok_or(AirpackError::AllowanceNotFound(pack.id))?;
                    if pack.status != AllowanceStatus::Active {
                        return Ok(0);
                    }
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Soonest-expiring first; never-expiring allowances sort last
fn compare_expiry(a: &Allowance, b: &Allowance) -> Ordering {
    match (a.expires_at, b.expires_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

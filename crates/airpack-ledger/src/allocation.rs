//! Allocation results

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Consumption taken from a single allowance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationSlice {
    pub allowance_id: Uuid,
    pub amount_mb: u64,
}

/// Per-allowance breakdown of an allocation
///
/// A shortfall is reported as `unallocated_mb`, not as an error; the caller
/// decides whether to reject, defer, or record it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AllocationResult {
    pub slices: Vec<AllocationSlice>,
    pub unallocated_mb: u64,
}

impl AllocationResult {
    /// Total MB actually consumed
    pub fn allocated_mb(&self) -> u64 {
        self.slices.iter().map(|s| s.amount_mb).sum()
    }

    pub fn fully_allocated(&self) -> bool {
        self.unallocated_mb == 0
    }
}

//! Chunked transfer abstraction
//!
//! The session manager drives the chunk loop and owns all progress and
//! state bookkeeping; the medium only moves one chunk at a time. The
//! shipped [`PacedMedium`] stands in for radio time with size-scaled
//! delays; tests use [`InstantMedium`].

use async_trait::async_trait;
use tokio::time::{sleep, Duration};
use uuid::Uuid;

use airpack_common::{Result, MAX_CHUNK_MB, MIN_CHUNK_MB};

/// Adaptive chunk size: a tenth of the request, clamped to 50..=100 MB
pub fn chunk_size_mb(requested_mb: u64) -> u64 {
    (requested_mb / 10).clamp(MIN_CHUNK_MB, MAX_CHUNK_MB)
}

/// Moves download chunks for a session
#[async_trait]
pub trait TransferMedium: Send + Sync {
    /// Resolve once the chunk has landed
    async fn fetch_chunk(&self, session_id: Uuid, chunk_mb: u64) -> Result<()>;
}

/// Simulated link whose per-chunk delay scales with chunk size
#[derive(Debug, Clone)]
pub struct PacedMedium {
    millis_per_mb: u64,
}

impl PacedMedium {
    pub fn new(millis_per_mb: u64) -> Self {
        Self { millis_per_mb }
    }
}

impl Default for PacedMedium {
    fn default() -> Self {
        Self { millis_per_mb: 10 }
    }
}

#[async_trait]
impl TransferMedium for PacedMedium {
    async fn fetch_chunk(&self, _session_id: Uuid, chunk_mb: u64) -> Result<()> {
        let delay_ms = (chunk_mb * self.millis_per_mb).clamp(300, 2000);
        sleep(Duration::from_millis(delay_ms)).await;
        Ok(())
    }
}

/// Zero-delay medium for tests and dry runs
#[derive(Debug, Clone, Default)]
pub struct InstantMedium;

#[async_trait]
impl TransferMedium for InstantMedium {
    async fn fetch_chunk(&self, _session_id: Uuid, _chunk_mb: u64) -> Result<()> {
        Ok(())
    }
}

//! # Airpack Session
//!
//! The download session lifecycle: policy-gated start, simulated chunked
//! transfer, credential provisioning, activation, and usage tracking
//! against the allowance each completed download materializes.
//!
//! ## Lifecycle
//!
//! ```text
//! Pending -> Downloading -> Transferring -> Stored -> Active -> Exhausted
//!                                                           \-> Expired
//! (Failed reachable from any non-terminal state)
//! ```

mod catalog;
mod manager;
mod transfer;

pub use catalog::{Catalog, DownloadOption};
pub use manager::{
    ActivationReport, SessionConfig, SessionManager, SessionSummary, UsageReport,
};
pub use transfer::{chunk_size_mb, InstantMedium, PacedMedium, TransferMedium};

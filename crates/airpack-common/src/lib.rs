//! # Airpack Common
//!
//! Shared types, errors, and collaborator contracts for the Airpack data
//! allowance core.
//!
//! ## Core Types
//!
//! - [`Allowance`]: a finite, expiring or exhaustible quantity of data
//! - [`Session`]: a download request with its own lifecycle state machine
//! - [`UsageEvent`]: append-only audit record of consumption
//!
//! ## Contracts
//!
//! - [`Storage`]: key-addressable persistence with conditional updates
//! - [`Provisioning`]: credential issue/activate/revoke and usage reads
//! - [`Notifier`]: fire-and-forget user alerts
//! - [`SubscriptionOracle`]: subscription checks for gated plan classes

pub mod error;
pub mod traits;
pub mod types;

// Re-export commonly used types at crate root
pub use error::{AirpackError, Result};
pub use traits::{
    AlertKind, CredentialUsage, Notifier, Provisioning, Storage, SubscriptionOracle,
};
pub use types::{
    allowance::{Allowance, AllowanceStatus},
    session::{PlanClass, Session, SessionState},
    usage::UsageEvent,
};

/// Airpack version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Monthly cap on free-class downloads in MB (5 GB)
pub const FREE_TIER_MONTHLY_CAP_MB: u64 = 5 * 1024;

/// First usage alert threshold (percent of capacity)
pub const ALERT_THRESHOLD_75: u8 = 75;

/// Second usage alert threshold (percent of capacity)
pub const ALERT_THRESHOLD_90: u8 = 90;

/// Smallest transfer chunk in MB
pub const MIN_CHUNK_MB: u64 = 50;

/// Largest transfer chunk in MB
pub const MAX_CHUNK_MB: u64 = 100;

/// Cumulative progress at which a download enters the transfer phase
pub const TRANSFER_PHASE_PERCENT: u8 = 35;

/// Default low-balance alert threshold in MB
pub const DEFAULT_LOW_BALANCE_THRESHOLD_MB: u64 = 100;

/// Subscription plan name gating unlimited-class downloads
pub const UNLIMITED_PLAN: &str = "unlimited";

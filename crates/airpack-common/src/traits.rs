//! Collaborator and storage contracts
//!
//! The core never talks to a concrete database, credential gateway, or
//! push service; it is wired against these traits. Implementations decide
//! their own timeouts and transports.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;
use crate::types::allowance::{Allowance, AllowanceStatus};
use crate::types::session::{Session, SessionState};
use crate::types::usage::UsageEvent;

/// Key-addressable persistence for the core records
///
/// `update_allowance` is the one atomic read-modify-write primitive in the
/// system: it must commit only when the stored record still carries
/// `expected_version`, and fail with
/// [`AirpackError::PersistenceConflict`](crate::AirpackError::PersistenceConflict)
/// otherwise. Both consumption and monitoring flag/status writes go through
/// it, which is what keeps concurrent mutations of one allowance linearized.
#[async_trait]
pub trait Storage: Send + Sync {
    async fn insert_allowance(&self, allowance: Allowance) -> Result<()>;
    async fn allowance(&self, id: Uuid) -> Result<Option<Allowance>>;
    /// Conditional write: commits only if the stored version matches
    async fn update_allowance(&self, allowance: &Allowance, expected_version: u64) -> Result<()>;
    async fn owner_allowances(
        &self,
        owner_id: &str,
        status: Option<AllowanceStatus>,
    ) -> Result<Vec<Allowance>>;
    async fn allowances_by_status(&self, status: AllowanceStatus) -> Result<Vec<Allowance>>;
    /// Active allowances whose expiry instant is at or before `now`
    async fn expiring_allowances(&self, now: DateTime<Utc>) -> Result<Vec<Allowance>>;

    async fn insert_session(&self, session: Session) -> Result<()>;
    async fn session(&self, id: Uuid) -> Result<Option<Session>>;
    async fn update_session(&self, session: &Session) -> Result<()>;
    async fn owner_sessions(&self, owner_id: &str) -> Result<Vec<Session>>;
    async fn sessions_by_state(&self, state: SessionState) -> Result<Vec<Session>>;
    /// Sessions created by `owner_id` at or after `since`
    async fn owner_sessions_since(
        &self,
        owner_id: &str,
        since: DateTime<Utc>,
    ) -> Result<Vec<Session>>;

    async fn append_usage(&self, event: UsageEvent) -> Result<()>;
    async fn session_usage(&self, session_id: Uuid) -> Result<Vec<UsageEvent>>;
    /// Count of usage events recorded at or after `since`
    async fn usage_events_since(&self, since: DateTime<Utc>) -> Result<u64>;
}

/// Externally reported consumption for a credential
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialUsage {
    /// Total MB the provider has seen on this credential
    pub used_mb: u64,
    /// Provider-side report timestamp
    pub reported_at: DateTime<Utc>,
}

/// Credential provisioning collaborator
#[async_trait]
pub trait Provisioning: Send + Sync {
    /// Issue a credential sized for the finished download
    async fn issue_credential(&self, session_id: Uuid, size_mb: u64) -> Result<String>;
    async fn activate_credential(&self, credential_id: &str) -> Result<()>;
    async fn revoke_credential(&self, credential_id: &str) -> Result<()>;
    /// Read the provider's usage meter for a credential
    async fn credential_usage(&self, credential_id: &str) -> Result<CredentialUsage>;
}

/// Category of a user alert
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// Remaining capacity fell below the configured floor; may repeat
    LowBalance,
    /// One-shot 75%/90% usage threshold crossing
    UsageThreshold,
    /// An allowance passed its expiry instant
    PackExpired,
    /// A session credential went live
    CredentialActivated,
}

/// Fire-and-forget user notifications
///
/// Failures are logged by callers and never block core logic.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(
        &self,
        owner_id: &str,
        kind: AlertKind,
        payload: serde_json::Value,
    ) -> Result<()>;
}

/// Subscription lookups for gated plan classes
#[async_trait]
pub trait SubscriptionOracle: Send + Sync {
    async fn has_active_subscription(&self, owner_id: &str, plan: &str) -> Result<bool>;
}

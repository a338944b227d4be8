//! Session lifecycle manager
//!
//! Owns every session mutation: policy-gated creation, the chunked
//! download driver, activation, usage tracking, and failure capture.
//! Allowance writes go through the ledger; credentials through the
//! provisioning collaborator.

use std::sync::Arc;

use chrono::{DateTime, Datelike, Duration, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, error, info, instrument, warn};
use uuid::Uuid;

use airpack_common::{
    AirpackError, AlertKind, AllowanceStatus, Notifier, PlanClass, Provisioning, Result, Session,
    SessionState, Storage, SubscriptionOracle, UsageEvent, FREE_TIER_MONTHLY_CAP_MB,
    TRANSFER_PHASE_PERCENT, UNLIMITED_PLAN,
};
use airpack_ledger::Ledger;

use crate::catalog::Catalog;
use crate::transfer::{chunk_size_mb, TransferMedium};

/// Session manager configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Calendar-month cap on free-class downloads in MB
    pub free_tier_monthly_cap_mb: u64,
    /// Subscription plan required for unlimited-class downloads
    pub unlimited_plan: String,
    /// Assumed link speed for download time estimates, in Mbps
    pub download_rate_mbps: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            free_tier_monthly_cap_mb: FREE_TIER_MONTHLY_CAP_MB,
            unlimited_plan: UNLIMITED_PLAN.to_string(),
            download_rate_mbps: 5,
        }
    }
}

impl SessionConfig {
    /// Load configuration from environment, falling back to defaults
    pub fn load() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();
        if let Ok(val) = std::env::var("AIRPACK_FREE_TIER_CAP_MB") {
            if let Ok(v) = val.parse() {
                cfg.free_tier_monthly_cap_mb = v;
            }
        }
        if let Ok(val) = std::env::var("AIRPACK_DOWNLOAD_RATE_MBPS") {
            if let Ok(v) = val.parse() {
                cfg.download_rate_mbps = v;
            }
        }
        Ok(cfg)
    }
}

/// Result of a successful activation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivationReport {
    pub session_id: Uuid,
    pub credential_id: String,
    pub remaining_mb: u64,
}

/// Result of posting usage against a session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageReport {
    pub session_id: Uuid,
    /// MB actually charged to the linked allowance
    pub tracked_mb: u64,
    /// Total usage tracked since activation
    pub session_consumed_mb: u64,
    /// Capacity left on the linked allowance
    pub remaining_mb: u64,
    pub exhausted: bool,
}

/// Per-session view for owner listings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub name: String,
    pub state: SessionState,
    pub progress_percent: u8,
    pub requested_mb: u64,
    pub consumed_mb: u64,
    pub remaining_mb: u64,
    pub is_active: bool,
    pub can_activate: bool,
    pub created_at: DateTime<Utc>,
}

/// Drives download sessions through their lifecycle
pub struct SessionManager {
    storage: Arc<dyn Storage>,
    ledger: Arc<Ledger>,
    provisioning: Arc<dyn Provisioning>,
    subscriptions: Arc<dyn SubscriptionOracle>,
    notifier: Arc<dyn Notifier>,
    medium: Arc<dyn TransferMedium>,
    catalog: Catalog,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(
        storage: Arc<dyn Storage>,
        ledger: Arc<Ledger>,
        provisioning: Arc<dyn Provisioning>,
        subscriptions: Arc<dyn SubscriptionOracle>,
        notifier: Arc<dyn Notifier>,
        medium: Arc<dyn TransferMedium>,
        config: SessionConfig,
    ) -> Self {
        Self {
            storage,
            ledger,
            provisioning,
            subscriptions,
            notifier,
            medium,
            catalog: Catalog::new(),
            config,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Start a download for an explicit size and plan class.
    ///
    /// Runs the policy gates, creates the session, and leaves it in
    /// `Downloading`. The transfer itself runs via [`Self::run_download`]
    /// or the spawned [`Self::spawn_download`].
    #[instrument(skip(self))]
    pub async fn start_download(
        &self,
        owner_id: &str,
        requested_mb: u64,
        plan_class: PlanClass,
    ) -> Result<Session> {
        let name = format_size(requested_mb);
        self.begin(owner_id, name, requested_mb, Decimal::ZERO, plan_class, None)
            .await
    }

    /// Start a download for a catalog option id like "2gb"
    #[instrument(skip(self))]
    pub async fn start_download_option(&self, owner_id: &str, option_id: &str) -> Result<Session> {
        let option = self.catalog.resolve(option_id)?;
        self.begin(
            owner_id,
            option.name,
            option.data_mb,
            option.price,
            option.plan_class,
            option.validity_days,
        )
        .await
    }

    async fn begin(
        &self,
        owner_id: &str,
        name: String,
        requested_mb: u64,
        price: Decimal,
        plan_class: PlanClass,
        validity_days: Option<u32>,
    ) -> Result<Session> {
        if requested_mb == 0 {
            return Err(AirpackError::InvalidAmount);
        }
        self.check_policy(owner_id, requested_mb, plan_class).await?;

        let mut session = Session::new(
            owner_id.to_string(),
            name,
            requested_mb,
            price,
            plan_class,
        );
        if let Some(days) = validity_days {
            session = session.with_validity(days);
        }
        session.transition(SessionState::Downloading)?;
        self.storage.insert_session(session.clone()).await?;

        info!(
            session_id = %session.id,
            owner_id,
            requested_mb,
            ?plan_class,
            "Download started"
        );
        Ok(session)
    }

    async fn check_policy(
        &self,
        owner_id: &str,
        requested_mb: u64,
        plan_class: PlanClass,
    ) -> Result<()> {
        match plan_class {
            PlanClass::Free => {
                let month_start = calendar_month_start(Utc::now());
                let sessions = self
                    .storage
                    .owner_sessions_since(owner_id, month_start)
                    .await?;
                let free_total: u64 = sessions
                    .iter()
                    .filter(|s| s.is_free())
                    .map(|s| s.requested_mb)
                    .sum();
                if free_total + requested_mb > self.config.free_tier_monthly_cap_mb {
                    return Err(AirpackError::QuotaDenied {
                        reason: format!(
                            "monthly free tier cap of {} MB reached",
                            self.config.free_tier_monthly_cap_mb
                        ),
                    });
                }
            }
            PlanClass::UnlimitedRequired => {
                let subscribed = self
                    .subscriptions
                    .has_active_subscription(owner_id, &self.config.unlimited_plan)
                    .await?;
                if !subscribed {
                    return Err(AirpackError::QuotaDenied {
                        reason: "active unlimited subscription required".to_string(),
                    });
                }
            }
            PlanClass::Standard => {}
        }
        Ok(())
    }

    /// Drive the chunked transfer to completion.
    ///
    /// Any failure transitions the session to `Failed` with the captured
    /// reason and is returned to the caller; there is no automatic retry.
    #[instrument(skip(self))]
    pub async fn run_download(&self, session_id: Uuid) -> Result<()> {
        match self.drive_transfer(session_id).await {
            Ok(()) => Ok(()),
            Err(e) => {
                error!(%session_id, error = %e, "Download failed");
                if let Err(mark_err) = self.fail(session_id, &e.to_string()).await {
                    warn!(%session_id, error = %mark_err, "Could not mark session failed");
                }
                Err(e)
            }
        }
    }

    /// Run the download as a detached background task
    pub fn spawn_download(self: &Arc<Self>, session_id: Uuid) -> tokio::task::JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            // run_download already captured the failure on the session
            let _ = manager.run_download(session_id).await;
        })
    }

    async fn drive_transfer(&self, session_id: Uuid) -> Result<()> {
        let mut session = self.load_session(session_id).await?;
        if session.state != SessionState::Downloading {
            return Err(AirpackError::InvalidStateTransition {
                from: session.state,
                to: SessionState::Transferring,
            });
        }

        let chunk = chunk_size_mb(session.requested_mb);
        let mut moved = 0u64;
        while moved < session.requested_mb {
            self.medium.fetch_chunk(session_id, chunk).await?;
            moved = (moved + chunk).min(session.requested_mb);
            let percent = ((moved * 100) / session.requested_mb) as u8;
            session.set_progress(percent);
            if session.state == SessionState::Downloading
                && session.progress_percent >= TRANSFER_PHASE_PERCENT
            {
                session.transition(SessionState::Transferring)?;
                debug!(%session_id, progress = session.progress_percent, "Transfer phase");
            }
            self.storage.update_session(&session).await?;
        }

        // 100%: issue the credential and materialize the allowance
        let credential_id = self
            .provisioning
            .issue_credential(session.id, session.requested_mb)
            .await?;
        let expires_at = session
            .validity_days
            .map(|days| Utc::now() + Duration::days(i64::from(days)));
        let allowance = self
            .ledger
            .grant(&session.owner_id, session.requested_mb, expires_at)
            .await?;

        session.credential_id = Some(credential_id);
        session.linked_allowance_id = Some(allowance.id);
        session.transition(SessionState::Stored)?;
        self.storage.update_session(&session).await?;

        info!(
            %session_id,
            allowance_id = %allowance.id,
            capacity_mb = allowance.capacity_mb,
            "Download stored"
        );
        Ok(())
    }

    /// Activate a stored session: credential goes live, usage tracking
    /// starts from zero.
    #[instrument(skip(self))]
    pub async fn activate(&self, session_id: Uuid) -> Result<ActivationReport> {
        let mut session = self.load_session(session_id).await?;
        if session.state != SessionState::Stored {
            return Err(AirpackError::InvalidStateTransition {
                from: session.state,
                to: SessionState::Active,
            });
        }

        let allowance_id = linked_allowance(&session)?;
        let allowance = self
            .storage
            .allowance(allowance_id)
            .await?
            .ok_or(AirpackError::AllowanceNotFound(allowance_id))?;
        if allowance.remaining_mb() == 0 {
            return Err(AirpackError::SessionExhausted(session.id));
        }

        let credential_id = session
            .credential_id
            .clone()
            .ok_or_else(|| AirpackError::Provisioning("stored session has no credential".into()))?;
        self.provisioning.activate_credential(&credential_id).await?;

        session.transition(SessionState::Active)?;
        session.consumed_mb = 0;
        session.activated_at = Some(Utc::now());
        self.storage.update_session(&session).await?;

        let payload = json!({
            "session_id": session.id,
            "remaining_mb": allowance.remaining_mb(),
        });
        if let Err(e) = self
            .notifier
            .notify(&session.owner_id, AlertKind::CredentialActivated, payload)
            .await
        {
            warn!(%session_id, error = %e, "Activation notice failed");
        }

        info!(%session_id, %credential_id, "Session activated");
        Ok(ActivationReport {
            session_id: session.id,
            credential_id,
            remaining_mb: allowance.remaining_mb(),
        })
    }

    /// Post usage against an active session.
    ///
    /// Appends the audit event, charges the linked allowance through the
    /// ledger, and on exhaustion closes the session and revokes its
    /// credential.
    #[instrument(skip(self))]
    pub async fn track_usage(&self, session_id: Uuid, amount_mb: u64) -> Result<UsageReport> {
        if amount_mb == 0 {
            return Err(AirpackError::InvalidAmount);
        }
        let mut session = self.load_session(session_id).await?;
        if session.state != SessionState::Active {
            return Err(AirpackError::InvalidStateTransition {
                from: session.state,
                to: SessionState::Active,
            });
        }
        let allowance_id = linked_allowance(&session)?;

        self.storage
            .append_usage(UsageEvent::new(
                session.id,
                session.owner_id.clone(),
                amount_mb,
            ))
            .await?;

        let allocation = self.ledger.consume_from(allowance_id, amount_mb).await?;
        session.consumed_mb += allocation.allocated_mb();
        session.last_usage_at = Some(Utc::now());

        let allowance = self
            .storage
            .allowance(allowance_id)
            .await?
            .ok_or(AirpackError::AllowanceNotFound(allowance_id))?;
        let exhausted = allowance.status == AllowanceStatus::Exhausted;
        if exhausted {
            session.transition(SessionState::Exhausted)?;
        }
        self.storage.update_session(&session).await?;

        if exhausted {
            info!(%session_id, "Session exhausted");
            if let Some(credential_id) = session.credential_id.as_deref() {
                self.provisioning.revoke_credential(credential_id).await?;
            }
        }

        debug!(
            %session_id,
            tracked_mb = allocation.allocated_mb(),
            remaining_mb = allowance.remaining_mb(),
            "Usage tracked"
        );
        Ok(UsageReport {
            session_id: session.id,
            tracked_mb: allocation.allocated_mb(),
            session_consumed_mb: session.consumed_mb,
            remaining_mb: allowance.remaining_mb(),
            exhausted,
        })
    }

    /// Move a session to `Failed` with a captured reason
    pub async fn fail(&self, session_id: Uuid, reason: &str) -> Result<()> {
        let mut session = self.load_session(session_id).await?;
        session.transition(SessionState::Failed)?;
        session.failure_reason = Some(reason.to_string());
        self.storage.update_session(&session).await?;
        warn!(%session_id, reason, "Session failed");
        Ok(())
    }

    /// Owner-facing listing with activation and balance hints
    pub async fn owner_sessions(&self, owner_id: &str) -> Result<Vec<SessionSummary>> {
        let sessions = self.storage.owner_sessions(owner_id).await?;
        let mut summaries = Vec::with_capacity(sessions.len());
        for session in sessions {
            let remaining_mb = match session.linked_allowance_id {
                Some(id) => self
                    .storage
                    .allowance(id)
                    .await?
                    .map(|a| a.remaining_mb())
                    .unwrap_or(0),
                None => session.requested_mb,
            };
            summaries.push(SessionSummary {
                id: session.id,
                name: session.name.clone(),
                state: session.state,
                progress_percent: session.progress_percent,
                requested_mb: session.requested_mb,
                consumed_mb: session.consumed_mb,
                remaining_mb,
                is_active: session.state == SessionState::Active,
                can_activate: session.state == SessionState::Stored,
                created_at: session.created_at,
            });
        }
        Ok(summaries)
    }

    /// Conservative download time estimate in whole minutes
    pub fn estimate_download_minutes(&self, data_mb: u64) -> u64 {
        let mbps = self.config.download_rate_mbps.max(1);
        let seconds = data_mb * 8 / mbps;
        (seconds / 60).max(1)
    }

    async fn load_session(&self, session_id: Uuid) -> Result<Session> {
        self.storage
            .session(session_id)
            .await?
            .ok_or(AirpackError::SessionNotFound(session_id))
    }
}

fn linked_allowance(session: &Session) -> Result<Uuid> {
    session.linked_allowance_id.ok_or_else(|| {
        AirpackError::Storage(format!("session {} has no linked allowance", session.id))
    })
}

/// First instant of the calendar month containing `now`
fn calendar_month_start(now: DateTime<Utc>) -> DateTime<Utc> {
    let date = now
        .date_naive()
        .with_day(1)
        .unwrap_or_else(|| now.date_naive());
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc())
        .unwrap_or(now)
}

fn format_size(data_mb: u64) -> String {
    if data_mb % 1024 == 0 {
        format!("{}GB", data_mb / 1024)
    } else {
        format!("{data_mb}MB")
    }
}

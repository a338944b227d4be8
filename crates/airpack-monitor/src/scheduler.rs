//! The monitoring scheduler
//!
//! An explicit lifecycle object: construct with injected collaborator
//! handles, `start()` to spawn the loops, `stop()` the returned handle to
//! shut down. The stop flag is observed between iterations; a pass already
//! in flight finishes before its loop exits.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, instrument, warn};

use airpack_common::{
    AirpackError, AlertKind, Allowance, AllowanceStatus, Notifier, Provisioning, Result, Session,
    SessionState, Storage, ALERT_THRESHOLD_75, ALERT_THRESHOLD_90,
};
use airpack_session::SessionManager;

use crate::config::MonitorConfig;

/// Snapshot of what the monitor is watching
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorStats {
    pub active_allowances: u64,
    pub active_sessions: u64,
    pub usage_events_last_hour: u64,
    pub low_balance_threshold_mb: u64,
    pub usage_check_interval_secs: u64,
    pub captured_at: DateTime<Utc>,
}

/// Runs the background reconciliation loops
pub struct Monitor {
    storage: Arc<dyn Storage>,
    sessions: Arc<SessionManager>,
    provisioning: Arc<dyn Provisioning>,
    notifier: Arc<dyn Notifier>,
    config: MonitorConfig,
}

/// Running monitor loops. Dropping the handle also shuts the loops down,
/// just without waiting for them; prefer [`MonitorHandle::stop`].
pub struct MonitorHandle {
    shutdown: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl MonitorHandle {
    /// Signal shutdown and wait for every loop to exit.
    ///
    /// An iteration already in progress is allowed to finish; the flag is
    /// only checked between iterations.
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        for handle in self.handles {
            let _ = handle.await;
        }
        info!("Monitor stopped");
    }
}

impl Monitor {
    pub fn new(
        storage: Arc<dyn Storage>,
        sessions: Arc<SessionManager>,
        provisioning: Arc<dyn Provisioning>,
        notifier: Arc<dyn Notifier>,
        config: MonitorConfig,
    ) -> Self {
        Self {
            storage,
            sessions,
            provisioning,
            notifier,
            config,
        }
    }

    /// Spawn the four loops, each on its own interval
    pub fn start(self: &Arc<Self>) -> MonitorHandle {
        let (shutdown, rx) = watch::channel(false);
        let handles = vec![
            spawn_loop(
                self.clone(),
                "usage_sweep",
                self.config.usage_check_interval,
                rx.clone(),
                |m| async move { m.usage_sweep().await },
            ),
            spawn_loop(
                self.clone(),
                "credential_sync",
                self.config.credential_sync_interval,
                rx.clone(),
                |m| async move { m.credential_sync().await },
            ),
            spawn_loop(
                self.clone(),
                "expiry_sweep",
                self.config.expiry_sweep_interval,
                rx.clone(),
                |m| async move { m.expiry_sweep().await },
            ),
            spawn_loop(
                self.clone(),
                "provisioning_sync",
                self.config.provisioning_sync_interval,
                rx,
                |m| async move { m.provisioning_sync().await },
            ),
        ];
        info!("Monitor started");
        MonitorHandle { shutdown, handles }
    }

    /// One pass of the usage/low-balance check over every active allowance
    #[instrument(skip(self))]
    pub async fn usage_sweep(&self) -> Result<()> {
        let packs = self
            .storage
            .allowances_by_status(AllowanceStatus::Active)
            .await?;
        let checked = packs.len();
        for pack in packs {
            let id = pack.id;
            if let Err(e) = self.check_allowance(pack).await {
                warn!(allowance_id = %id, error = %e, "Allowance check failed");
            }
        }
        debug!(checked, "Usage sweep complete");
        Ok(())
    }

    async fn check_allowance(&self, pack: Allowance) -> Result<()> {
        // Low balance repeats on every pass until topped up or closed
        if pack.remaining_mb() <= self.config.low_balance_threshold_mb {
            self.notify(
                &pack.owner_id,
                AlertKind::LowBalance,
                json!({
                    "allowance_id": pack.id,
                    "remaining_mb": pack.remaining_mb(),
                    "capacity_mb": pack.capacity_mb,
                }),
            )
            .await;
        }

        let percent = pack.usage_percent();
        if percent >= ALERT_THRESHOLD_90 && !pack.alert_90_sent {
            self.send_threshold_alert(pack, ALERT_THRESHOLD_90).await?;
        } else if percent >= ALERT_THRESHOLD_75 && !pack.alert_75_sent {
            self.send_threshold_alert(pack, ALERT_THRESHOLD_75).await?;
        }
        Ok(())
    }

    /// Set the alert flag first; whoever wins the conditional update sends
    /// the one notification.
    async fn send_threshold_alert(&self, mut pack: Allowance, threshold: u8) -> Result<()> {
        let expected = pack.version;
        pack.mark_alert_sent(threshold);
        match self.storage.update_allowance(&pack, expected).await {
            Ok(()) => {
                self.notify(
                    &pack.owner_id,
                    AlertKind::UsageThreshold,
                    json!({
                        "allowance_id": pack.id,
                        "threshold_percent": threshold,
                        "usage_percent": pack.usage_percent(),
                    }),
                )
                .await;
                Ok(())
            }
            Err(AirpackError::PersistenceConflict { .. }) => Ok(()),
            Err(e) => Err(e),
        }
    }

    /// One pass reconciling provider-reported usage into active sessions
    #[instrument(skip(self))]
    pub async fn credential_sync(&self) -> Result<()> {
        let active = self.storage.sessions_by_state(SessionState::Active).await?;
        let checked = active.len();
        for session in active {
            let id = session.id;
            if let Err(e) = self.reconcile_session(&session).await {
                warn!(session_id = %id, error = %e, "Credential sync failed");
            }
        }
        debug!(checked, "Credential sync complete");
        Ok(())
    }

    async fn reconcile_session(&self, session: &Session) -> Result<()> {
        let Some(credential_id) = session.credential_id.as_deref() else {
            return Ok(());
        };
        let reported = self.provisioning.credential_usage(credential_id).await?;
        if reported.used_mb > session.consumed_mb {
            let delta = reported.used_mb - session.consumed_mb;
            self.sessions.track_usage(session.id, delta).await?;
            debug!(
                session_id = %session.id,
                delta_mb = delta,
                "Reconciled external usage"
            );
        }
        Ok(())
    }

    /// One pass expiring overdue allowances.
    ///
    /// The status transition is the dedup key: an allowance that already
    /// left `Active` is not in the candidate set, and a lost conditional
    /// update means another writer got there first, so no second
    /// notification can fire.
    #[instrument(skip(self))]
    pub async fn expiry_sweep(&self) -> Result<()> {
        let now = Utc::now();
        let due = self.storage.expiring_allowances(now).await?;
        for mut pack in due {
            let expected = pack.version;
            pack.expire();
            match self.storage.update_allowance(&pack, expected).await {
                Ok(()) => {
                    info!(allowance_id = %pack.id, "Allowance expired");
                    self.notify(
                        &pack.owner_id,
                        AlertKind::PackExpired,
                        json!({
                            "allowance_id": pack.id,
                            "capacity_mb": pack.capacity_mb,
                            "expired_at": pack.expires_at,
                        }),
                    )
                    .await;
                }
                Err(AirpackError::PersistenceConflict { .. }) => {}
                Err(e) => {
                    warn!(allowance_id = %pack.id, error = %e, "Expiry write failed");
                }
            }
        }
        Ok(())
    }

    /// One pass pulling provider usage for every owner with active
    /// credentials and replaying it through usage tracking
    #[instrument(skip(self))]
    pub async fn provisioning_sync(&self) -> Result<()> {
        let active = self.storage.sessions_by_state(SessionState::Active).await?;
        let mut by_owner: HashMap<String, Vec<Session>> = HashMap::new();
        for session in active {
            if session.credential_id.is_some() {
                by_owner
                    .entry(session.owner_id.clone())
                    .or_default()
                    .push(session);
            }
        }
        let owners = by_owner.len();
        for (owner_id, sessions) in by_owner {
            for session in sessions {
                if let Err(e) = self.reconcile_session(&session).await {
                    warn!(
                        owner_id = %owner_id,
                        session_id = %session.id,
                        error = %e,
                        "Provider sync failed"
                    );
                }
            }
        }
        debug!(owners, "Provider sync complete");
        Ok(())
    }

    /// Snapshot of current monitoring counts
    pub async fn stats(&self) -> Result<MonitorStats> {
        let now = Utc::now();
        let active_allowances = self
            .storage
            .allowances_by_status(AllowanceStatus::Active)
            .await?
            .len() as u64;
        let active_sessions = self
            .storage
            .sessions_by_state(SessionState::Active)
            .await?
            .len() as u64;
        let usage_events_last_hour = self
            .storage
            .usage_events_since(now - chrono::Duration::hours(1))
            .await?;
        Ok(MonitorStats {
            active_allowances,
            active_sessions,
            usage_events_last_hour,
            low_balance_threshold_mb: self.config.low_balance_threshold_mb,
            usage_check_interval_secs: self.config.usage_check_interval.as_secs(),
            captured_at: now,
        })
    }

    async fn notify(&self, owner_id: &str, kind: AlertKind, payload: serde_json::Value) {
        if let Err(e) = self.notifier.notify(owner_id, kind, payload).await {
            warn!(owner_id, ?kind, error = %e, "Notification failed");
        }
    }
}

fn spawn_loop<F, Fut>(
    monitor: Arc<Monitor>,
    name: &'static str,
    period: Duration,
    mut shutdown: watch::Receiver<bool>,
    run: F,
) -> JoinHandle<()>
where
    F: Fn(Arc<Monitor>) -> Fut + Send + 'static,
    Fut: Future<Output = Result<()>> + Send + 'static,
{
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(sweep = name, period_secs = period.as_secs(), "Monitor loop started");
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    if *shutdown.borrow() {
                        break;
                    }
                    if let Err(e) = run(monitor.clone()).await {
                        warn!(sweep = name, error = %e, "Monitor iteration failed");
                    }
                }
                _ = shutdown.changed() => break,
            }
        }
        info!(sweep = name, "Monitor loop stopped");
    })
}

//! Monitoring loop behavior against the in-memory store

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use uuid::Uuid;

use airpack_common::{
    AirpackError, AlertKind, Allowance, AllowanceStatus, CredentialUsage, Notifier, PlanClass,
    Provisioning, Result, SessionState, Storage, SubscriptionOracle,
};
use airpack_ledger::{Ledger, LedgerConfig};
use airpack_monitor::{Monitor, MonitorConfig};
use airpack_session::{InstantMedium, SessionConfig, SessionManager};
use airpack_store::MemoryStore;

// ---- fakes ----------------------------------------------------------------

#[derive(Default)]
struct FakeProvisioning {
    counter: AtomicU64,
    revoked: Mutex<Vec<String>>,
    reported_usage: Mutex<HashMap<String, u64>>,
    broken_credentials: Mutex<HashSet<String>>,
}

impl FakeProvisioning {
    fn report_usage(&self, credential_id: &str, used_mb: u64) {
        self.reported_usage
            .lock()
            .unwrap()
            .insert(credential_id.to_string(), used_mb);
    }

    fn break_credential(&self, credential_id: &str) {
        self.broken_credentials
            .lock()
            .unwrap()
            .insert(credential_id.to_string());
    }
}

#[async_trait]
impl Provisioning for FakeProvisioning {
    async fn issue_credential(&self, _session_id: Uuid, _size_mb: u64) -> Result<String> {
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(format!("cred-{n}"))
    }

    async fn activate_credential(&self, _credential_id: &str) -> Result<()> {
        Ok(())
    }

    async fn revoke_credential(&self, credential_id: &str) -> Result<()> {
        self.revoked.lock().unwrap().push(credential_id.to_string());
        Ok(())
    }

    async fn credential_usage(&self, credential_id: &str) -> Result<CredentialUsage> {
        if self.broken_credentials.lock().unwrap().contains(credential_id) {
            return Err(AirpackError::Provisioning("meter unavailable".to_string()));
        }
        let used_mb = self
            .reported_usage
            .lock()
            .unwrap()
            .get(credential_id)
            .copied()
            .unwrap_or(0);
        Ok(CredentialUsage {
            used_mb,
            reported_at: Utc::now(),
        })
    }
}

#[derive(Default)]
struct RecordingNotifier {
    events: Mutex<Vec<(String, AlertKind, serde_json::Value)>>,
}

impl RecordingNotifier {
    fn count(&self, kind: AlertKind) -> usize {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k, _)| *k == kind)
            .count()
    }

    fn threshold_percents(&self) -> Vec<u64> {
        self.events
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, k, _)| *k == AlertKind::UsageThreshold)
            .filter_map(|(_, _, payload)| payload["threshold_percent"].as_u64())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(
        &self,
        owner_id: &str,
        kind: AlertKind,
        payload: serde_json::Value,
    ) -> Result<()> {
        self.events
            .lock()
            .unwrap()
            .push((owner_id.to_string(), kind, payload));
        Ok(())
    }
}

struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn notify(
        &self,
        _owner_id: &str,
        _kind: AlertKind,
        _payload: serde_json::Value,
    ) -> Result<()> {
        Err(AirpackError::Notification("push gateway down".to_string()))
    }
}

struct StaticOracle(bool);

#[async_trait]
impl SubscriptionOracle for StaticOracle {
    async fn has_active_subscription(&self, _owner_id: &str, _plan: &str) -> Result<bool> {
        Ok(self.0)
    }
}

// ---- harness --------------------------------------------------------------

struct Harness {
    storage: Arc<MemoryStore>,
    ledger: Arc<Ledger>,
    provisioning: Arc<FakeProvisioning>,
    notifier: Arc<RecordingNotifier>,
    manager: Arc<SessionManager>,
    monitor: Arc<Monitor>,
}

fn harness_with_config(config: MonitorConfig) -> Harness {
    let storage = Arc::new(MemoryStore::new());
    let ledger = Arc::new(Ledger::new(storage.clone(), LedgerConfig::default()));
    let provisioning = Arc::new(FakeProvisioning::default());
    let notifier = Arc::new(RecordingNotifier::default());
    let manager = Arc::new(SessionManager::new(
        storage.clone(),
        ledger.clone(),
        provisioning.clone(),
        Arc::new(StaticOracle(true)),
        notifier.clone(),
        Arc::new(InstantMedium),
        SessionConfig::default(),
    ));
    let monitor = Arc::new(Monitor::new(
        storage.clone(),
        manager.clone(),
        provisioning.clone(),
        notifier.clone(),
        config,
    ));
    Harness {
        storage,
        ledger,
        provisioning,
        notifier,
        manager,
        monitor,
    }
}

fn harness() -> Harness {
    harness_with_config(MonitorConfig::default())
}

async fn seed_allowance(h: &Harness, owner: &str, capacity: u64) -> Allowance {
    let allowance = Allowance::new(owner.to_string(), capacity, None);
    h.storage.insert_allowance(allowance.clone()).await.unwrap();
    allowance
}

/// Download, store, and activate a session; returns (session_id, credential_id)
async fn active_session(h: &Harness, owner: &str, size_mb: u64) -> (Uuid, String) {
    let session = h
        .manager
        .start_download(owner, size_mb, PlanClass::Standard)
        .await
        .unwrap();
    h.manager.run_download(session.id).await.unwrap();
    let report = h.manager.activate(session.id).await.unwrap();
    (session.id, report.credential_id)
}

// ---- usage sweep ----------------------------------------------------------

#[tokio::test]
async fn threshold_alerts_fire_exactly_once() {
    let h = harness();
    seed_allowance(&h, "user-1", 1000).await;

    h.monitor.usage_sweep().await.unwrap();
    assert_eq!(h.notifier.count(AlertKind::UsageThreshold), 0);

    // 80% consumed: one 75% alert no matter how often the sweep runs
    h.ledger.allocate("user-1", 800).await.unwrap();
    for _ in 0..3 {
        h.monitor.usage_sweep().await.unwrap();
    }
    assert_eq!(h.notifier.threshold_percents(), vec![75]);

    // 95% consumed: one further 90% alert
    h.ledger.allocate("user-1", 150).await.unwrap();
    for _ in 0..3 {
        h.monitor.usage_sweep().await.unwrap();
    }
    assert_eq!(h.notifier.threshold_percents(), vec![75, 90]);
}

#[tokio::test]
async fn jump_past_both_thresholds_sends_only_the_higher() {
    let h = harness();
    seed_allowance(&h, "user-1", 1000).await;
    h.ledger.allocate("user-1", 950).await.unwrap();

    h.monitor.usage_sweep().await.unwrap();
    assert_eq!(h.notifier.threshold_percents(), vec![90]);

    let pack = h
        .storage
        .owner_allowances("user-1", None)
        .await
        .unwrap()
        .remove(0);
    assert!(pack.alert_90_sent);
    assert!(!pack.alert_75_sent);
}

#[tokio::test]
async fn low_balance_alert_repeats_every_sweep() {
    let h = harness();
    seed_allowance(&h, "user-1", 1000).await;
    h.ledger.allocate("user-1", 950).await.unwrap();

    h.monitor.usage_sweep().await.unwrap();
    h.monitor.usage_sweep().await.unwrap();
    assert_eq!(h.notifier.count(AlertKind::LowBalance), 2);
}

#[tokio::test]
async fn notifier_failure_does_not_block_the_sweep() {
    let storage = Arc::new(MemoryStore::new());
    let ledger = Arc::new(Ledger::new(storage.clone(), LedgerConfig::default()));
    let provisioning = Arc::new(FakeProvisioning::default());
    let manager = Arc::new(SessionManager::new(
        storage.clone(),
        ledger.clone(),
        provisioning.clone(),
        Arc::new(StaticOracle(true)),
        Arc::new(FailingNotifier),
        Arc::new(InstantMedium),
        SessionConfig::default(),
    ));
    let monitor = Monitor::new(
        storage.clone(),
        manager,
        provisioning,
        Arc::new(FailingNotifier),
        MonitorConfig::default(),
    );

    let allowance = Allowance::new("user-1".to_string(), 1000, None);
    storage.insert_allowance(allowance.clone()).await.unwrap();
    ledger.allocate("user-1", 800).await.unwrap();

    monitor.usage_sweep().await.unwrap();

    // The flag still lands; the lost notification is only logged
    let pack = storage.allowance(allowance.id).await.unwrap().unwrap();
    assert!(pack.alert_75_sent);
}

// ---- expiry sweep ---------------------------------------------------------

#[tokio::test]
async fn expiry_sweep_is_idempotent() {
    let h = harness();
    let overdue = Allowance::new(
        "user-1".to_string(),
        1000,
        Some(Utc::now() - chrono::Duration::hours(1)),
    );
    h.storage.insert_allowance(overdue.clone()).await.unwrap();

    h.monitor.expiry_sweep().await.unwrap();
    let pack = h.storage.allowance(overdue.id).await.unwrap().unwrap();
    assert_eq!(pack.status, AllowanceStatus::Expired);
    assert_eq!(h.notifier.count(AlertKind::PackExpired), 1);

    // Second sweep is a no-op: the pack is no longer active
    h.monitor.expiry_sweep().await.unwrap();
    assert_eq!(h.notifier.count(AlertKind::PackExpired), 1);
}

#[tokio::test]
async fn expiry_sweep_leaves_current_and_eternal_packs_alone() {
    let h = harness();
    let current = Allowance::new(
        "user-1".to_string(),
        1000,
        Some(Utc::now() + chrono::Duration::days(7)),
    );
    let eternal = Allowance::new("user-1".to_string(), 1000, None);
    h.storage.insert_allowance(current.clone()).await.unwrap();
    h.storage.insert_allowance(eternal.clone()).await.unwrap();

    h.monitor.expiry_sweep().await.unwrap();

    for id in [current.id, eternal.id] {
        let pack = h.storage.allowance(id).await.unwrap().unwrap();
        assert_eq!(pack.status, AllowanceStatus::Active);
    }
    assert_eq!(h.notifier.count(AlertKind::PackExpired), 0);
}

// ---- credential / provider sync -------------------------------------------

#[tokio::test]
async fn credential_sync_replays_external_usage() {
    let h = harness();
    let (session_id, credential_id) = active_session(&h, "user-1", 1024).await;

    h.provisioning.report_usage(&credential_id, 300);
    h.monitor.credential_sync().await.unwrap();

    let session = h.storage.session(session_id).await.unwrap().unwrap();
    assert_eq!(session.consumed_mb, 300);
    let allowance = h
        .storage
        .allowance(session.linked_allowance_id.unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(allowance.consumed_mb, 300);

    // Unchanged meter reading adds nothing on the next pass
    h.monitor.credential_sync().await.unwrap();
    let events = h.storage.session_usage(session_id).await.unwrap();
    assert_eq!(events.len(), 1);
}

#[tokio::test]
async fn credential_sync_exhausts_and_revokes() {
    let h = harness();
    let (session_id, credential_id) = active_session(&h, "user-1", 1024).await;

    h.provisioning.report_usage(&credential_id, 1024);
    h.monitor.credential_sync().await.unwrap();

    let session = h.storage.session(session_id).await.unwrap().unwrap();
    assert_eq!(session.state, SessionState::Exhausted);
    assert_eq!(*h.provisioning.revoked.lock().unwrap(), vec![credential_id]);
}

#[tokio::test]
async fn one_broken_credential_does_not_stop_the_pass() {
    let h = harness();
    let (_, broken_cred) = active_session(&h, "user-1", 1024).await;
    let (healthy_id, healthy_cred) = active_session(&h, "user-2", 1024).await;

    h.provisioning.break_credential(&broken_cred);
    h.provisioning.report_usage(&healthy_cred, 200);

    h.monitor.credential_sync().await.unwrap();

    let healthy = h.storage.session(healthy_id).await.unwrap().unwrap();
    assert_eq!(healthy.consumed_mb, 200);
}

#[tokio::test]
async fn provisioning_sync_covers_every_owner() {
    let h = harness();
    let (first_id, first_cred) = active_session(&h, "user-1", 1024).await;
    let (second_id, second_cred) = active_session(&h, "user-2", 2048).await;

    h.provisioning.report_usage(&first_cred, 100);
    h.provisioning.report_usage(&second_cred, 400);

    h.monitor.provisioning_sync().await.unwrap();

    let first = h.storage.session(first_id).await.unwrap().unwrap();
    let second = h.storage.session(second_id).await.unwrap().unwrap();
    assert_eq!(first.consumed_mb, 100);
    assert_eq!(second.consumed_mb, 400);
}

// ---- lifecycle ------------------------------------------------------------

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

#[tokio::test]
async fn background_loops_run_and_stop() {
    init_tracing();
    let config = MonitorConfig {
        usage_check_interval: Duration::from_millis(20),
        credential_sync_interval: Duration::from_millis(20),
        expiry_sweep_interval: Duration::from_millis(20),
        provisioning_sync_interval: Duration::from_millis(20),
        ..MonitorConfig::default()
    };
    let h = harness_with_config(config);

    let overdue = Allowance::new(
        "user-1".to_string(),
        1000,
        Some(Utc::now() - chrono::Duration::hours(1)),
    );
    h.storage.insert_allowance(overdue.clone()).await.unwrap();

    let handle = h.monitor.start();
    tokio::time::sleep(Duration::from_millis(120)).await;
    handle.stop().await;

    let pack = h.storage.allowance(overdue.id).await.unwrap().unwrap();
    assert_eq!(pack.status, AllowanceStatus::Expired);
    assert_eq!(h.notifier.count(AlertKind::PackExpired), 1);
}

#[tokio::test]
async fn stats_reflect_current_records() {
    let h = harness();
    seed_allowance(&h, "user-1", 1000).await;
    let (session_id, _) = active_session(&h, "user-2", 1024).await;
    h.manager.track_usage(session_id, 50).await.unwrap();

    let stats = h.monitor.stats().await.unwrap();
    // The completed download granted a second active allowance
    assert_eq!(stats.active_allowances, 2);
    assert_eq!(stats.active_sessions, 1);
    assert_eq!(stats.usage_events_last_hour, 1);
}

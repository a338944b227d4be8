//! Monitor configuration

use std::time::Duration;

use anyhow::Result;

use airpack_common::DEFAULT_LOW_BALANCE_THRESHOLD_MB;

/// Intervals and thresholds for the monitoring loops
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Usage and low-balance check cadence
    pub usage_check_interval: Duration,
    /// Credential/status sync cadence
    pub credential_sync_interval: Duration,
    /// Expiry sweep cadence
    pub expiry_sweep_interval: Duration,
    /// Provider usage sync cadence
    pub provisioning_sync_interval: Duration,
    /// Remaining-MB floor below which low-balance alerts fire
    pub low_balance_threshold_mb: u64,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            usage_check_interval: Duration::from_secs(5 * 60),
            credential_sync_interval: Duration::from_secs(15 * 60),
            expiry_sweep_interval: Duration::from_secs(60 * 60),
            provisioning_sync_interval: Duration::from_secs(30 * 60),
            low_balance_threshold_mb: DEFAULT_LOW_BALANCE_THRESHOLD_MB,
        }
    }
}

impl MonitorConfig {
    /// Load configuration from environment, falling back to defaults
    pub fn load() -> Result<Self> {
        let _ = dotenvy::dotenv();

        let mut cfg = Self::default();
        if let Some(minutes) = env_u64("AIRPACK_USAGE_CHECK_MINUTES") {
            cfg.usage_check_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(minutes) = env_u64("AIRPACK_CREDENTIAL_SYNC_MINUTES") {
            cfg.credential_sync_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(minutes) = env_u64("AIRPACK_EXPIRY_SWEEP_MINUTES") {
            cfg.expiry_sweep_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(minutes) = env_u64("AIRPACK_PROVISIONING_SYNC_MINUTES") {
            cfg.provisioning_sync_interval = Duration::from_secs(minutes * 60);
        }
        if let Some(mb) = env_u64("AIRPACK_LOW_BALANCE_THRESHOLD_MB") {
            cfg.low_balance_threshold_mb = mb;
        }
        Ok(cfg)
    }
}

fn env_u64(key: &str) -> Option<u64> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

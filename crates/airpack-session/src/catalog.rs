//! Download option catalog
//!
//! Free presets cover 1-5 GB; larger sizes up to 100 GB are open to
//! subscribers with unlimited access. Option ids are the lowercase size
//! ("2gb", "50gb").

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use airpack_common::{AirpackError, PlanClass, Result};

/// Custom sizes offered beyond the free presets, in GB
const CUSTOM_SIZES_GB: [u64; 16] = [6, 7, 8, 9, 10, 15, 20, 25, 30, 40, 50, 60, 70, 80, 90, 100];

/// Validity window of free preset downloads, in days
const FREE_PRESET_VALIDITY_DAYS: u32 = 30;

/// A downloadable session option
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadOption {
    pub id: String,
    pub name: String,
    pub data_mb: u64,
    pub price: Decimal,
    pub plan_class: PlanClass,
    /// Days until the resulting allowance expires; `None` only exhausts
    pub validity_days: Option<u32>,
}

impl DownloadOption {
    fn preset(size_gb: u64) -> Self {
        Self {
            id: format!("{size_gb}gb"),
            name: format!("{size_gb}GB"),
            data_mb: size_gb * 1024,
            price: Decimal::ZERO,
            plan_class: PlanClass::Free,
            validity_days: Some(FREE_PRESET_VALIDITY_DAYS),
        }
    }

    fn custom(size_gb: u64) -> Self {
        Self {
            id: format!("{size_gb}gb"),
            name: format!("{size_gb}GB"),
            data_mb: size_gb * 1024,
            price: Decimal::ZERO,
            plan_class: PlanClass::UnlimitedRequired,
            validity_days: None,
        }
    }
}

/// The shipped download catalog
#[derive(Debug, Clone, Default)]
pub struct Catalog;

impl Catalog {
    pub fn new() -> Self {
        Self
    }

    /// All available download options, presets first
    pub fn options(&self) -> Vec<DownloadOption> {
        let mut options: Vec<DownloadOption> = (1..=5).map(DownloadOption::preset).collect();
        options.extend(CUSTOM_SIZES_GB.iter().map(|gb| DownloadOption::custom(*gb)));
        options
    }

    /// Resolve an option id like "2gb" or "50gb"
    pub fn resolve(&self, option_id: &str) -> Result<DownloadOption> {
        if let Some(size_str) = option_id.strip_suffix("gb") {
            if let Ok(size_gb) = size_str.parse::<u64>() {
                if (1..=5).contains(&size_gb) {
                    return Ok(DownloadOption::preset(size_gb));
                }
                if CUSTOM_SIZES_GB.contains(&size_gb) {
                    return Ok(DownloadOption::custom(size_gb));
                }
            }
        }
        Err(AirpackError::QuotaDenied {
            reason: format!("unknown download option: {option_id}"),
        })
    }
}

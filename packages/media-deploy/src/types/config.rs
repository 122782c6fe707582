//! Configuration types for deployments and phases.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::error::ConfigError;
use crate::types::target::{PriorityTier, ScrapingDifficulty};

/// Configuration for one deployment. Immutable once the deployment starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TypedBuilder)]
#[builder(field_defaults(setter(into)))]
pub struct DeploymentConfig {
    pub tenant_id: String,

    /// Targets per scraping batch; also the in-batch fan-out cap.
    #[builder(default = 10)]
    pub batch_size: usize,

    /// Pause after every scraping batch except the last.
    #[builder(default = 2_000)]
    pub delay_between_batches_ms: u64,

    /// Tiers in scheduling order. Tiers not listed are not deployed.
    #[builder(default = PriorityTier::ALL.to_vec())]
    pub priority_order: Vec<PriorityTier>,

    /// Difficulty order within a tier.
    #[builder(default = ScrapingDifficulty::ALL.to_vec())]
    pub difficulty_preference: Vec<ScrapingDifficulty>,

    #[builder(default = 10)]
    pub max_concurrent_jobs: usize,

    #[builder(default = true)]
    pub auto_verify: bool,

    #[builder(default = true)]
    pub auto_categorize: bool,

    #[builder(default = false)]
    pub enable_monitoring: bool,
}

impl DeploymentConfig {
    pub fn delay_between_batches(&self) -> Duration {
        Duration::from_millis(self.delay_between_batches_ms)
    }

    /// Reject configs that could never run. Checked before anything is dispatched.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.tenant_id.trim().is_empty() {
            return Err(ConfigError::EmptyTenant);
        }
        if self.batch_size == 0 {
            return Err(ConfigError::ZeroBatchSize);
        }
        if self.max_concurrent_jobs == 0 {
            return Err(ConfigError::ZeroConcurrency);
        }
        if self.priority_order.is_empty() {
            return Err(ConfigError::EmptyPriorityOrder);
        }

        let mut tiers = HashSet::new();
        for tier in &self.priority_order {
            if !tiers.insert(tier) {
                return Err(ConfigError::Duplicate {
                    field: "priority_order",
                    value: tier.to_string(),
                });
            }
        }

        let mut difficulties = HashSet::new();
        for difficulty in &self.difficulty_preference {
            if !difficulties.insert(difficulty) {
                return Err(ConfigError::Duplicate {
                    field: "difficulty_preference",
                    value: difficulty.to_string(),
                });
            }
        }

        Ok(())
    }
}

/// Named deployment profiles trading speed against completeness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPreset {
    /// Balanced default.
    QuickStart,
    /// Large batches, short delays, discovery only.
    Aggressive,
    /// Small batches, long delays, every optional phase.
    Premium,
}

impl DeploymentPreset {
    pub const ALL: [DeploymentPreset; 3] = [
        DeploymentPreset::QuickStart,
        DeploymentPreset::Aggressive,
        DeploymentPreset::Premium,
    ];

    /// The profile table. Every preset is a full config for `tenant_id`.
    pub fn config(self, tenant_id: impl Into<String>) -> DeploymentConfig {
        let tenant_id = tenant_id.into();
        match self {
            DeploymentPreset::QuickStart => DeploymentConfig::builder()
                .tenant_id(tenant_id)
                .batch_size(10usize)
                .delay_between_batches_ms(2_000u64)
                .max_concurrent_jobs(10usize)
                .auto_verify(true)
                .auto_categorize(true)
                .enable_monitoring(false)
                .build(),
            DeploymentPreset::Aggressive => DeploymentConfig::builder()
                .tenant_id(tenant_id)
                .batch_size(25usize)
                .delay_between_batches_ms(500u64)
                .max_concurrent_jobs(25usize)
                .auto_verify(false)
                .auto_categorize(false)
                .enable_monitoring(false)
                .build(),
            DeploymentPreset::Premium => DeploymentConfig::builder()
                .tenant_id(tenant_id)
                .batch_size(5usize)
                .delay_between_batches_ms(5_000u64)
                .max_concurrent_jobs(5usize)
                .auto_verify(true)
                .auto_categorize(true)
                .enable_monitoring(true)
                .build(),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeploymentPreset::QuickStart => "quick_start",
            DeploymentPreset::Aggressive => "aggressive",
            DeploymentPreset::Premium => "premium",
        }
    }
}

impl fmt::Display for DeploymentPreset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeploymentPreset {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "quick_start" | "quickstart" => Ok(DeploymentPreset::QuickStart),
            "aggressive" => Ok(DeploymentPreset::Aggressive),
            "premium" => Ok(DeploymentPreset::Premium),
            other => Err(format!("unknown preset: {other}")),
        }
    }
}

/// Phase-specific sizing, timeouts and throttles.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PhaseTimings {
    /// Per-target scrape job timeout.
    pub scrape_timeout: Duration,

    /// Contact ids per verify job.
    pub verify_batch_size: usize,
    pub verify_timeout: Duration,
    /// Pause between verify sub-batches.
    pub verify_delay: Duration,

    /// Contact ids per categorize job.
    pub categorize_batch_size: usize,
    pub categorize_timeout: Duration,
    /// Pause between categorize sub-batches.
    pub categorize_delay: Duration,

    pub monitor_timeout: Duration,

    /// Assumed time per scraping batch before any batch has finished.
    pub estimated_batch_time: Duration,
}

impl Default for PhaseTimings {
    fn default() -> Self {
        Self {
            scrape_timeout: Duration::from_secs(5 * 60),
            verify_batch_size: 50,
            verify_timeout: Duration::from_secs(10 * 60),
            verify_delay: Duration::from_secs(5),
            categorize_batch_size: 25,
            categorize_timeout: Duration::from_secs(15 * 60),
            categorize_delay: Duration::from_secs(10),
            monitor_timeout: Duration::from_secs(5 * 60),
            estimated_batch_time: Duration::from_secs(30),
        }
    }
}

impl PhaseTimings {
    /// Same sub-batch sizes, every timeout set to `timeout` and every delay to `delay`.
    pub fn uniform(timeout: Duration, delay: Duration) -> Self {
        Self {
            scrape_timeout: timeout,
            verify_timeout: timeout,
            verify_delay: delay,
            categorize_timeout: timeout,
            categorize_delay: delay,
            monitor_timeout: timeout,
            ..Self::default()
        }
    }

    pub fn with_verify_batch_size(mut self, size: usize) -> Self {
        self.verify_batch_size = size.max(1);
        self
    }

    pub fn with_categorize_batch_size(mut self, size: usize) -> Self {
        self.categorize_batch_size = size.max(1);
        self
    }
}

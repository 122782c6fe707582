//! The catalog of known discovery targets and scraping order.

use std::path::Path;

use tracing::debug;

use crate::error::ConfigError;
use crate::scheduler::partition;
use crate::types::config::DeploymentConfig;
use crate::types::target::{PriorityTier, Target};

/// Read-only list of targets a deployment can scrape.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TargetCatalog {
    targets: Vec<Target>,
}

impl TargetCatalog {
    pub fn new(targets: Vec<Target>) -> Self {
        Self { targets }
    }

    /// Parse a JSON array of targets.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let targets: Vec<Target> =
            serde_json::from_str(json).map_err(|e| ConfigError::Catalog(e.to_string()))?;
        Ok(Self::new(targets))
    }

    /// Load a JSON catalog file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::Catalog(format!("{}: {e}", path.display())))?;
        let catalog = Self::from_json_str(&json)?;
        debug!(path = %path.display(), targets = catalog.len(), "target catalog loaded");
        Ok(catalog)
    }

    pub fn targets(&self) -> &[Target] {
        &self.targets
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.targets.is_empty()
    }

    /// Targets in scraping order, grouped per tier.
    ///
    /// Tiers follow `config.priority_order`; tiers it does not name are left
    /// out. Within a tier targets are stable-sorted by
    /// `config.difficulty_preference`, unnamed difficulties last.
    pub fn ordered_by_tier(&self, config: &DeploymentConfig) -> Vec<(PriorityTier, Vec<Target>)> {
        let difficulty_rank = |target: &Target| {
            config
                .difficulty_preference
                .iter()
                .position(|d| *d == target.scraping_difficulty)
                .unwrap_or(config.difficulty_preference.len())
        };

        config
            .priority_order
            .iter()
            .map(|tier| {
                let mut targets: Vec<Target> = self
                    .targets
                    .iter()
                    .filter(|t| t.priority_tier == *tier)
                    .cloned()
                    .collect();
                targets.sort_by_key(difficulty_rank);
                (*tier, targets)
            })
            .filter(|(_, targets)| !targets.is_empty())
            .collect()
    }

    /// The scraping batch plan: each tier partitioned on its own so no batch
    /// ever mixes tiers, tiers concatenated in priority order.
    pub fn ordered_batches(&self, config: &DeploymentConfig) -> Vec<Vec<Target>> {
        self.ordered_by_tier(config)
            .into_iter()
            .flat_map(|(_, targets)| partition(targets, config.batch_size))
            .collect()
    }
}

//! Deployment progress records and phase bookkeeping.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::types::job::ContactId;

pub type DeploymentId = Uuid;

/// A runnable stage of the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PhaseKind {
    Scraping,
    Verification,
    Categorization,
    Monitoring,
}

impl fmt::Display for PhaseKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        DeploymentPhase::from(*self).fmt(f)
    }
}

/// Where a deployment is in the fixed phase order. Only ever moves forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeploymentPhase {
    Scraping,
    Verification,
    Categorization,
    Monitoring,
    Completed,
}

impl From<PhaseKind> for DeploymentPhase {
    fn from(kind: PhaseKind) -> Self {
        match kind {
            PhaseKind::Scraping => DeploymentPhase::Scraping,
            PhaseKind::Verification => DeploymentPhase::Verification,
            PhaseKind::Categorization => DeploymentPhase::Categorization,
            PhaseKind::Monitoring => DeploymentPhase::Monitoring,
        }
    }
}

impl fmt::Display for DeploymentPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DeploymentPhase::Scraping => "scraping",
            DeploymentPhase::Verification => "verification",
            DeploymentPhase::Categorization => "categorization",
            DeploymentPhase::Monitoring => "monitoring",
            DeploymentPhase::Completed => "completed",
        };
        f.write_str(s)
    }
}

/// Live progress of one deployment.
///
/// Observers always receive a snapshot clone, never the stored record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentProgress {
    pub deployment_id: DeploymentId,
    pub tenant_id: String,
    pub total_targets: usize,
    pub completed_targets: usize,
    pub failed_targets: usize,
    pub active_jobs: usize,
    pub contacts_discovered: usize,
    pub contacts_verified: usize,
    pub contacts_categorized: usize,
    pub estimated_completion_time: DateTime<Utc>,
    pub current_phase: DeploymentPhase,
    /// 0-100, share of the current phase's working set processed
    pub phase_progress: u8,
    pub start_time: DateTime<Utc>,
    pub last_update: DateTime<Utc>,
    pub errors: Vec<String>,
    pub warnings: Vec<String>,
}

impl DeploymentProgress {
    pub fn new(
        deployment_id: DeploymentId,
        tenant_id: impl Into<String>,
        total_targets: usize,
        estimated_completion_time: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            deployment_id,
            tenant_id: tenant_id.into(),
            total_targets,
            completed_targets: 0,
            failed_targets: 0,
            active_jobs: 0,
            contacts_discovered: 0,
            contacts_verified: 0,
            contacts_categorized: 0,
            estimated_completion_time,
            current_phase: DeploymentPhase::Scraping,
            phase_progress: 0,
            start_time: now,
            last_update: now,
            errors: Vec::new(),
            warnings: Vec::new(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.current_phase == DeploymentPhase::Completed
    }

    /// Targets that reached a terminal outcome.
    pub fn processed_targets(&self) -> usize {
        self.completed_targets + self.failed_targets
    }
}

/// Integer percentage of `done` over `total`. An empty set counts as done.
pub fn percent(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((done.min(total) * 100) / total) as u8
}

/// Counters returned by one phase run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseResult {
    pub processed_count: usize,
    pub success_count: usize,
    pub failure_count: usize,
    pub output_ids: Vec<ContactId>,
}

/// Contact counts for a tenant, as reported by the contact directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactCounts {
    pub total: usize,
    pub verified: usize,
    pub categorized: usize,
    /// Catalog targets with at least one discovered contact
    pub outlets_covered: usize,
}

/// Discovery totals for a tenant against the known catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentStatistics {
    pub tenant_id: String,
    pub total_contacts: usize,
    pub verified_contacts: usize,
    pub categorized_contacts: usize,
    pub outlets_covered: usize,
    pub catalog_size: usize,
    /// 0.0-100.0
    pub coverage_percent: f64,
}

impl DeploymentStatistics {
    pub fn from_counts(tenant_id: impl Into<String>, counts: ContactCounts, catalog_size: usize) -> Self {
        let coverage_percent = if catalog_size == 0 {
            0.0
        } else {
            (counts.outlets_covered.min(catalog_size) as f64 / catalog_size as f64) * 100.0
        };

        Self {
            tenant_id: tenant_id.into(),
            total_contacts: counts.total,
            verified_contacts: counts.verified,
            categorized_contacts: counts.categorized,
            outlets_covered: counts.outlets_covered,
            catalog_size,
            coverage_percent,
        }
    }
}

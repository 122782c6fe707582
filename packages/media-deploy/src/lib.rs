//! Bulk Contact Discovery Deployment
//!
//! Drives a large discovery run across a catalog of media outlets: scrape
//! each outlet's staff directory for contacts, then optionally verify,
//! categorize and monitor them. The actual work is done by an external
//! discovery backend; this crate schedules it, tracks every job to a
//! terminal state and keeps a live progress record per deployment.
//!
//! # Usage
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use media_deploy::{DeploymentOrchestrator, DeploymentPreset, TargetCatalog};
//! use media_deploy::testing::MockBackend;
//!
//! let backend = Arc::new(MockBackend::new());
//! let catalog = TargetCatalog::load("catalog.json")?;
//! let orchestrator = DeploymentOrchestrator::new(backend.clone(), backend, catalog);
//!
//! let handle = orchestrator.deploy_preset(DeploymentPreset::QuickStart, "tenant-1", None)?;
//! let progress = handle.wait().await?;
//! println!("{} contacts discovered", progress.contacts_discovered);
//! ```
//!
//! # Modules
//!
//! - [`registry`] - Job registry: dispatch, status, wait with timeout
//! - [`scheduler`] - Batch scheduler with inter-batch throttling
//! - [`phase`] - Phase runner (scraping, verification, categorization, monitoring)
//! - [`orchestrator`] - Deployment lifecycle and presets
//! - [`reporter`] - Progress records, observers and snapshot streams
//! - [`catalog`] - Target catalog and scraping order
//! - [`traits`] - Discovery backend and contact directory abstractions
//! - [`backends`] - HTTP discovery backend
//! - [`testing`] - Mock backend for tests and local runs

pub mod backends;
pub mod catalog;
pub mod error;
pub mod orchestrator;
pub mod phase;
pub mod registry;
pub mod reporter;
pub mod scheduler;
pub mod testing;
pub mod traits;
pub mod types;

// Re-export core types at crate root
pub use error::{BackendError, ConfigError, DeployError, JobError, PhaseError, Result};
pub use traits::{backend::DiscoveryBackend, directory::ContactDirectory};
pub use types::{
    config::{DeploymentConfig, DeploymentPreset, PhaseTimings},
    job::{BackendJob, BackendJobId, ContactId, Job, JobId, JobKind, JobRequest, JobStatus},
    progress::{
        ContactCounts, DeploymentId, DeploymentPhase, DeploymentProgress, DeploymentStatistics,
        PhaseKind, PhaseResult,
    },
    target::{PriorityTier, ScrapingDifficulty, Target},
};

pub use backends::HttpDiscoveryBackend;
pub use catalog::TargetCatalog;
pub use orchestrator::{DeploymentHandle, DeploymentOrchestrator};
pub use phase::{PhaseRunner, WorkingSet};
pub use registry::{JobRegistry, RegistryConfig};
pub use reporter::{ProgressObserver, ProgressReporter};
pub use scheduler::{BatchScheduler, ItemFailure};

//! Deployment orchestration.
//!
//! The orchestrator owns a deployment from start to finish:
//!
//! ```text
//! deploy(config)
//!     │
//!     ├─► validate config
//!     ├─► order targets (tier, then difficulty)
//!     ├─► register progress record
//!     └─► spawn pipeline ─► scraping
//!                            ├─► verification    (auto_verify)
//!                            ├─► categorization  (auto_categorize)
//!                            └─► monitoring      (enable_monitoring)
//! ```
//!
//! Each phase runs in its own task. A phase that panics or returns a
//! [`PhaseError`] ends the deployment: the error is appended to the progress
//! record, the phase is set to completed and `phase_progress` keeps the
//! value it had reached. Callers learn about it through the returned
//! [`DeploymentHandle`], the observer, or the progress record.

use std::any::Any;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::watch;
use tokio::task::{JoinError, JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::catalog::TargetCatalog;
use crate::error::{DeployError, PhaseError, Result};
use crate::phase::{PhaseRunner, WorkingSet};
use crate::registry::{JobRegistry, RegistryConfig};
use crate::reporter::{estimate_completion, ProgressObserver, ProgressReporter};
use crate::traits::backend::DiscoveryBackend;
use crate::traits::directory::ContactDirectory;
use crate::types::config::{DeploymentConfig, DeploymentPreset, PhaseTimings};
use crate::types::progress::{
    DeploymentId, DeploymentProgress, DeploymentStatistics, PhaseKind, PhaseResult,
};
use crate::types::target::Target;

/// A running deployment.
///
/// Dropping the handle does not stop the deployment.
pub struct DeploymentHandle {
    id: DeploymentId,
    task: JoinHandle<Result<DeploymentProgress>>,
    cancel: CancellationToken,
}

impl DeploymentHandle {
    pub fn id(&self) -> DeploymentId {
        self.id
    }

    /// Stop scheduling new work. Jobs already dispatched run to completion
    /// on the backend.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Wait for the deployment to finish.
    ///
    /// Returns the final progress record, or [`DeployError::Phase`] if a
    /// phase failed or the deployment was cancelled.
    pub async fn wait(self) -> Result<DeploymentProgress> {
        match self.task.await {
            Ok(outcome) => outcome,
            Err(e) => Err(DeployError::Task(e.to_string())),
        }
    }

    /// Let the deployment run unobserved and keep only its id.
    pub fn detach(self) -> DeploymentId {
        self.id
    }
}

/// Runs deployments against a discovery backend.
#[derive(Clone)]
pub struct DeploymentOrchestrator {
    registry: JobRegistry,
    reporter: ProgressReporter,
    catalog: Arc<TargetCatalog>,
    directory: Arc<dyn ContactDirectory>,
    timings: PhaseTimings,
}

impl DeploymentOrchestrator {
    pub fn new(
        backend: Arc<dyn DiscoveryBackend>,
        directory: Arc<dyn ContactDirectory>,
        catalog: TargetCatalog,
    ) -> Self {
        Self::with_registry(JobRegistry::new(backend), directory, catalog)
    }

    /// Use an existing registry (and its polling configuration).
    pub fn with_registry(
        registry: JobRegistry,
        directory: Arc<dyn ContactDirectory>,
        catalog: TargetCatalog,
    ) -> Self {
        Self {
            registry,
            reporter: ProgressReporter::new(),
            catalog: Arc::new(catalog),
            directory,
            timings: PhaseTimings::default(),
        }
    }

    /// Build with a registry configured by `config`.
    pub fn with_registry_config(
        backend: Arc<dyn DiscoveryBackend>,
        directory: Arc<dyn ContactDirectory>,
        catalog: TargetCatalog,
        config: RegistryConfig,
    ) -> Self {
        Self::with_registry(JobRegistry::with_config(backend, config), directory, catalog)
    }

    pub fn with_timings(mut self, timings: PhaseTimings) -> Self {
        self.timings = timings;
        self
    }

    pub fn catalog(&self) -> &TargetCatalog {
        &self.catalog
    }

    pub fn registry(&self) -> &JobRegistry {
        &self.registry
    }

    /// Start a deployment and return a handle to it.
    ///
    /// The config is validated before anything is dispatched. Must be called
    /// from within a tokio runtime.
    pub fn deploy(
        &self,
        config: DeploymentConfig,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<DeploymentHandle> {
        config.validate()?;

        let batches = self.catalog.ordered_batches(&config);
        let total_targets: usize = batches.iter().map(Vec::len).sum();
        let id = Uuid::now_v7();

        let now = Utc::now();
        let per_batch = config
            .delay_between_batches()
            .saturating_add(self.timings.estimated_batch_time);
        let estimate = estimate_completion(now, now, 0, batches.len(), per_batch);
        self.reporter.register(
            DeploymentProgress::new(id, config.tenant_id.clone(), total_targets, estimate),
            observer,
        );

        info!(
            deployment_id = %id,
            tenant_id = %config.tenant_id,
            targets = total_targets,
            batches = batches.len(),
            batch_size = config.batch_size,
            "deployment started"
        );

        let cancel = CancellationToken::new();
        let task = tokio::spawn(self.clone().run_pipeline(id, config, batches, cancel.clone()));

        Ok(DeploymentHandle { id, task, cancel })
    }

    /// Start a deployment in the background and return its id immediately.
    ///
    /// Failures are only visible through the observer and the progress
    /// record.
    pub fn deploy_media_database(
        &self,
        config: DeploymentConfig,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<DeploymentId> {
        self.deploy(config, observer).map(DeploymentHandle::detach)
    }

    /// Start a deployment from a named profile.
    pub fn deploy_preset(
        &self,
        preset: DeploymentPreset,
        tenant_id: impl Into<String>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<DeploymentHandle> {
        self.deploy(preset.config(tenant_id), observer)
    }

    pub fn quick_start_deployment(
        &self,
        tenant_id: impl Into<String>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<DeploymentId> {
        self.deploy_preset(DeploymentPreset::QuickStart, tenant_id, observer)
            .map(DeploymentHandle::detach)
    }

    pub fn aggressive_deployment(
        &self,
        tenant_id: impl Into<String>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<DeploymentId> {
        self.deploy_preset(DeploymentPreset::Aggressive, tenant_id, observer)
            .map(DeploymentHandle::detach)
    }

    pub fn premium_deployment(
        &self,
        tenant_id: impl Into<String>,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> Result<DeploymentId> {
        self.deploy_preset(DeploymentPreset::Premium, tenant_id, observer)
            .map(DeploymentHandle::detach)
    }

    pub fn get_deployment_progress(&self, id: DeploymentId) -> Option<DeploymentProgress> {
        self.reporter.get(id)
    }

    /// Snapshot stream for one deployment.
    pub fn subscribe(&self, id: DeploymentId) -> Option<watch::Receiver<DeploymentProgress>> {
        self.reporter.subscribe(id)
    }

    pub fn list_deployments(&self, tenant_id: Option<&str>) -> Vec<DeploymentProgress> {
        self.reporter.list(tenant_id)
    }

    /// Forget a deployment's progress record.
    pub fn discard_deployment(&self, id: DeploymentId) -> Option<DeploymentProgress> {
        self.reporter.discard(id)
    }

    /// Contact totals for a tenant and its coverage of the catalog.
    pub async fn get_deployment_statistics(&self, tenant_id: &str) -> Result<DeploymentStatistics> {
        let counts = self.directory.contact_counts(tenant_id).await?;
        Ok(DeploymentStatistics::from_counts(
            tenant_id,
            counts,
            self.catalog.len(),
        ))
    }

    /// Stop background job tracking.
    pub fn shutdown(&self) {
        self.registry.shutdown();
    }

    // ------------------------------------------------------------------
    // Pipeline
    // ------------------------------------------------------------------

    async fn run_pipeline(
        self,
        id: DeploymentId,
        config: DeploymentConfig,
        batches: Vec<Vec<Target>>,
        cancel: CancellationToken,
    ) -> Result<DeploymentProgress> {
        let runner = PhaseRunner::new(
            self.registry.clone(),
            self.reporter.clone(),
            id,
            self.timings.clone(),
        )
        .with_cancellation(cancel);
        let config = Arc::new(config);

        match self.run_phases(&runner, &config, batches).await {
            Ok(()) => {
                let progress = self.reporter.complete(id, false);
                info!(deployment_id = %id, "deployment completed");
                progress
                    .or_else(|| self.reporter.get(id))
                    .ok_or(DeployError::NotFound(id))
            }
            Err(e) => {
                let message = match &e {
                    PhaseError::Cancelled { phase } => {
                        warn!(deployment_id = %id, phase = %phase, "deployment cancelled");
                        "deployment cancelled".to_string()
                    }
                    other => {
                        error!(deployment_id = %id, phase = %other.phase(), error = %other, "deployment aborted");
                        other.to_string()
                    }
                };
                self.reporter.update(id, |p| p.errors.push(message));
                self.reporter.complete(id, true);
                Err(DeployError::Phase(e))
            }
        }
    }

    async fn run_phases(
        &self,
        runner: &PhaseRunner,
        config: &Arc<DeploymentConfig>,
        batches: Vec<Vec<Target>>,
    ) -> std::result::Result<(), PhaseError> {
        let scraped = spawn_phase(runner, PhaseKind::Scraping, WorkingSet::Targets(batches), config).await?;
        let mut working = scraped.output_ids;

        if config.auto_verify && !working.is_empty() {
            let verified = spawn_phase(runner, PhaseKind::Verification, WorkingSet::Contacts(working), config).await?;
            working = verified.output_ids;
        }

        if config.auto_categorize && !working.is_empty() {
            let categorized = spawn_phase(
                runner,
                PhaseKind::Categorization,
                WorkingSet::Contacts(working),
                config,
            )
            .await?;
            working = categorized.output_ids;
        }

        if config.enable_monitoring && !working.is_empty() {
            spawn_phase(runner, PhaseKind::Monitoring, WorkingSet::Tenant, config).await?;
        }

        Ok(())
    }
}

/// Run one phase in its own task so a panic stays contained to the phase.
async fn spawn_phase(
    runner: &PhaseRunner,
    phase: PhaseKind,
    working_set: WorkingSet,
    config: &Arc<DeploymentConfig>,
) -> std::result::Result<PhaseResult, PhaseError> {
    let runner = runner.clone();
    let config = Arc::clone(config);

    let task = tokio::spawn(async move { runner.run_phase(phase, working_set, &config).await });
    match task.await {
        Ok(result) => result,
        Err(e) => Err(PhaseError::Crashed {
            phase,
            message: join_error_message(e),
        }),
    }
}

fn join_error_message(e: JoinError) -> String {
    if !e.is_panic() {
        return e.to_string();
    }
    panic_message(e.into_panic())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "phase panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ConfigError;
    use crate::testing::MockBackend;
    use crate::types::progress::ContactCounts;
    use crate::types::target::{PriorityTier, ScrapingDifficulty};

    fn catalog(n: usize) -> TargetCatalog {
        TargetCatalog::new(
            (0..n)
                .map(|i| {
                    Target::new(
                        format!("outlet-{i}"),
                        format!("https://outlet-{i}.example"),
                        PriorityTier::Tier1,
                        ScrapingDifficulty::Easy,
                    )
                })
                .collect(),
        )
    }

    fn orchestrator(backend: Arc<MockBackend>, n: usize) -> DeploymentOrchestrator {
        DeploymentOrchestrator::new(backend.clone(), backend, catalog(n))
    }

    #[tokio::test]
    async fn invalid_config_is_rejected_before_dispatch() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(backend.clone(), 3);
        let config = DeploymentConfig::builder()
            .tenant_id("acme")
            .batch_size(0usize)
            .build();

        let err = orchestrator.deploy(config, None).err().unwrap();
        assert!(matches!(err, DeployError::Config(ConfigError::ZeroBatchSize)));
        assert!(backend.calls().is_empty());
        assert!(orchestrator.list_deployments(None).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn huge_batch_delay_still_deploys() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(backend.clone(), 2);
        let config = DeploymentConfig::builder()
            .tenant_id("acme")
            .batch_size(1usize)
            .delay_between_batches_ms(100_000_000_000_000_000u64)
            .auto_verify(false)
            .auto_categorize(false)
            .build();

        let handle = orchestrator.deploy(config, None).unwrap();
        let progress = orchestrator.get_deployment_progress(handle.id()).unwrap();
        assert!(progress.estimated_completion_time > progress.start_time);

        let mut rx = orchestrator.subscribe(handle.id()).unwrap();
        loop {
            if rx.borrow_and_update().completed_targets >= 1 {
                break;
            }
            rx.changed().await.unwrap();
        }
        handle.cancel();

        let err = handle.wait().await.unwrap_err();
        assert!(matches!(err, DeployError::Phase(PhaseError::Cancelled { .. })));
        assert_eq!(backend.scraped_urls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn progress_is_queryable_until_discarded() {
        let backend = Arc::new(MockBackend::new());
        let orchestrator = orchestrator(backend, 2);

        let id = orchestrator.quick_start_deployment("acme", None).unwrap();
        assert_eq!(orchestrator.get_deployment_progress(id).unwrap().total_targets, 2);

        let mut rx = orchestrator.subscribe(id).unwrap();
        loop {
            if rx.borrow_and_update().is_completed() {
                break;
            }
            rx.changed().await.unwrap();
        }

        assert_eq!(orchestrator.list_deployments(Some("acme")).len(), 1);
        assert!(orchestrator.discard_deployment(id).is_some());
        assert!(orchestrator.get_deployment_progress(id).is_none());
    }

    #[tokio::test]
    async fn statistics_report_catalog_coverage() {
        let backend = Arc::new(MockBackend::new().with_contact_counts(
            "acme",
            ContactCounts {
                total: 120,
                verified: 90,
                categorized: 60,
                outlets_covered: 2,
            },
        ));
        let orchestrator = orchestrator(backend, 8);

        let stats = orchestrator.get_deployment_statistics("acme").await.unwrap();
        assert_eq!(stats.total_contacts, 120);
        assert_eq!(stats.catalog_size, 8);
        assert!((stats.coverage_percent - 25.0).abs() < f64::EPSILON);
    }

    #[test]
    fn panic_payloads_become_messages() {
        assert_eq!(panic_message(Box::new("boom")), "boom");
        assert_eq!(panic_message(Box::new(String::from("bang"))), "bang");
        assert_eq!(panic_message(Box::new(7u8)), "phase panicked");
    }
}

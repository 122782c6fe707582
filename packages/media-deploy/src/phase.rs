//! Phase execution.
//!
//! A phase turns a working set into backend jobs, waits for them through
//! the [`JobRegistry`] and folds the outcomes into a [`PhaseResult`] and the
//! deployment's progress record.
//!
//! | Phase          | Working set      | Unit of work                  |
//! |----------------|------------------|-------------------------------|
//! | scraping       | target batches   | one scrape job per target     |
//! | verification   | contact ids      | one verify job per sub-batch  |
//! | categorization | contact ids      | one categorize job per sub-batch |
//! | monitoring     | tenant           | one monitor job               |
//!
//! Item failures (failed jobs, timeouts, unreadable payloads) are recorded
//! and the phase carries on. A job that disappears from the registry is a
//! broken invariant and aborts the phase with [`PhaseError::Registry`].

use std::sync::Mutex;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::{JobError, PhaseError};
use crate::registry::JobRegistry;
use crate::reporter::{estimate_completion, ProgressReporter};
use crate::scheduler::{partition, BatchEvent, BatchScheduler, ItemFailure};
use crate::types::config::{DeploymentConfig, PhaseTimings};
use crate::types::job::{ContactBatchResult, ContactId, Job, JobRequest, JobStatus};
use crate::types::progress::{percent, DeploymentId, PhaseKind, PhaseResult};
use crate::types::target::Target;

/// Input of a phase.
#[derive(Debug, Clone)]
pub enum WorkingSet {
    /// Ordered scraping batch plan
    Targets(Vec<Vec<Target>>),
    /// Contacts produced by the previous phase
    Contacts(Vec<ContactId>),
    /// The whole tenant (monitoring)
    Tenant,
}

impl WorkingSet {
    pub fn len(&self) -> usize {
        match self {
            WorkingSet::Targets(batches) => batches.iter().map(Vec::len).sum(),
            WorkingSet::Contacts(ids) => ids.len(),
            WorkingSet::Tenant => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What one scraped target produced.
#[derive(Debug)]
struct ScrapeOutput {
    target: String,
    contact_ids: Vec<ContactId>,
}

/// What one verify or categorize sub-batch produced.
#[derive(Debug)]
struct ContactOutput {
    submitted: usize,
    contact_ids: Vec<ContactId>,
}

/// Phase-local abort switch, tripped when the registry loses a job.
struct Abort {
    token: CancellationToken,
    fatal: Mutex<Option<JobError>>,
}

impl Abort {
    fn new(parent: &CancellationToken) -> Self {
        Self {
            token: parent.child_token(),
            fatal: Mutex::new(None),
        }
    }

    fn trip(&self, error: JobError) {
        let mut fatal = self.fatal.lock().unwrap_or_else(|e| e.into_inner());
        fatal.get_or_insert(error);
        self.token.cancel();
    }

    fn into_error(self, phase: PhaseKind) -> Option<PhaseError> {
        let fatal = self.fatal.into_inner().unwrap_or_else(|e| e.into_inner());
        match fatal {
            Some(source) => Some(PhaseError::Registry { phase, source }),
            None if self.token.is_cancelled() => Some(PhaseError::Cancelled { phase }),
            None => None,
        }
    }
}

/// Runs the phases of one deployment.
#[derive(Clone)]
pub struct PhaseRunner {
    registry: JobRegistry,
    reporter: ProgressReporter,
    deployment_id: DeploymentId,
    timings: PhaseTimings,
    cancel: CancellationToken,
}

impl PhaseRunner {
    pub fn new(
        registry: JobRegistry,
        reporter: ProgressReporter,
        deployment_id: DeploymentId,
        timings: PhaseTimings,
    ) -> Self {
        Self {
            registry,
            reporter,
            deployment_id,
            timings,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop scheduling further batches once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Run one phase over `working_set`.
    ///
    /// Only fails for pipeline-level problems; per-item failures are part
    /// of the returned counts.
    pub async fn run_phase(
        &self,
        phase: PhaseKind,
        working_set: WorkingSet,
        config: &DeploymentConfig,
    ) -> Result<PhaseResult, PhaseError> {
        if self.cancel.is_cancelled() {
            return Err(PhaseError::Cancelled { phase });
        }

        info!(
            deployment_id = %self.deployment_id,
            phase = %phase,
            items = working_set.len(),
            "phase started"
        );
        self.reporter.enter_phase(self.deployment_id, phase.into());

        let result = match (phase, working_set) {
            (PhaseKind::Scraping, WorkingSet::Targets(batches)) => {
                self.scrape(batches, config).await
            }
            (PhaseKind::Verification | PhaseKind::Categorization, WorkingSet::Contacts(ids)) => {
                self.process_contacts(phase, ids, config).await
            }
            (PhaseKind::Monitoring, _) => self.monitor(config).await,
            (phase, working_set) => {
                warn!(
                    deployment_id = %self.deployment_id,
                    phase = %phase,
                    working_set = ?working_set,
                    "working set does not fit phase, nothing to do"
                );
                Ok(PhaseResult::default())
            }
        }?;

        info!(
            deployment_id = %self.deployment_id,
            phase = %phase,
            processed = result.processed_count,
            succeeded = result.success_count,
            failed = result.failure_count,
            outputs = result.output_ids.len(),
            "phase finished"
        );
        Ok(result)
    }

    // ------------------------------------------------------------------
    // Scraping
    // ------------------------------------------------------------------

    async fn scrape(
        &self,
        batches: Vec<Vec<Target>>,
        config: &DeploymentConfig,
    ) -> Result<PhaseResult, PhaseError> {
        let abort = Abort::new(&self.cancel);
        let scheduler = BatchScheduler::new(config.batch_size, config.delay_between_batches())
            .with_max_in_flight(config.max_concurrent_jobs)
            .with_cancellation(abort.token.clone());

        let phase_start = Utc::now();
        let per_batch = config
            .delay_between_batches()
            .saturating_add(self.timings.estimated_batch_time);
        let total_batches = batches.len();
        self.reporter.update(self.deployment_id, |p| {
            p.estimated_completion_time = estimate_completion(phase_start, phase_start, 0, total_batches, per_batch);
        });

        let action = |target: Target| {
            let abort = &abort;
            async move {
                let request = JobRequest::Scrape {
                    url: target.url.clone(),
                    tenant_id: config.tenant_id.clone(),
                };
                self.track_in_flight(1);
                let outcome = self
                    .run_job(request, self.timings.scrape_timeout, abort)
                    .await;
                self.track_in_flight(-1);
                let job = outcome.map_err(|error| ItemFailure::new(&target.name, error))?;

                let parsed = ContactBatchResult::from_job(&job).map_err(|e| {
                    ItemFailure::new(&target.name, format!("unreadable scrape result: {e}"))
                })?;

                Ok(ScrapeOutput {
                    target: target.name,
                    contact_ids: parsed.contact_ids,
                })
            }
        };

        let on_event = |event: BatchEvent<'_, ScrapeOutput>| match event {
            BatchEvent::Started { index, size, .. } => {
                debug!(deployment_id = %self.deployment_id, batch = index + 1, size, "scrape batch started");
            }
            BatchEvent::Settled(outcome) => {
                let discovered: usize = outcome.outputs.iter().map(|o| o.contact_ids.len()).sum();
                let now = Utc::now();

                for failure in &outcome.failures {
                    warn!(
                        deployment_id = %self.deployment_id,
                        target = %failure.item,
                        error = %failure.error,
                        "target failed"
                    );
                }

                self.reporter.update(self.deployment_id, |p| {
                    p.completed_targets += outcome.outputs.len();
                    p.failed_targets += outcome.failures.len();
                    p.contacts_discovered += discovered;
                    p.active_jobs = 0;
                    p.phase_progress = percent(outcome.processed, outcome.total_items);
                    p.estimated_completion_time = estimate_completion(
                        phase_start,
                        now,
                        outcome.index + 1,
                        outcome.total_batches,
                        per_batch,
                    );
                    p.errors.extend(
                        outcome
                            .failures
                            .iter()
                            .map(|f| format!("scrape {}: {}", f.item, f.error)),
                    );
                    p.warnings.extend(
                        outcome
                            .outputs
                            .iter()
                            .filter(|o| o.contact_ids.is_empty())
                            .map(|o| format!("{}: no contacts discovered", o.target)),
                    );
                });
            }
        };

        let report = scheduler.run_batches(batches, action, on_event).await;
        if let Some(error) = abort.into_error(PhaseKind::Scraping) {
            return Err(error);
        }

        let success_count = report.successes();
        let failure_count = report.failures.len();
        Ok(PhaseResult {
            processed_count: success_count + failure_count,
            success_count,
            failure_count,
            output_ids: report
                .outputs
                .into_iter()
                .flat_map(|o| o.contact_ids)
                .collect(),
        })
    }

    // ------------------------------------------------------------------
    // Verification / categorization
    // ------------------------------------------------------------------

    async fn process_contacts(
        &self,
        phase: PhaseKind,
        ids: Vec<ContactId>,
        config: &DeploymentConfig,
    ) -> Result<PhaseResult, PhaseError> {
        let (size, timeout, delay) = match phase {
            PhaseKind::Categorization => (
                self.timings.categorize_batch_size,
                self.timings.categorize_timeout,
                self.timings.categorize_delay,
            ),
            _ => (
                self.timings.verify_batch_size,
                self.timings.verify_timeout,
                self.timings.verify_delay,
            ),
        };

        let sub_batches = partition(ids, size);
        let sizes: Vec<usize> = sub_batches.iter().map(Vec::len).collect();
        let total_ids: usize = sizes.iter().sum();
        let total_sub_batches = sub_batches.len();

        let abort = Abort::new(&self.cancel);
        let scheduler = BatchScheduler::new(1, delay).with_cancellation(abort.token.clone());

        let action = |(index, chunk): (usize, Vec<ContactId>)| {
            let abort = &abort;
            async move {
                let label = format!("sub-batch {}/{}", index + 1, total_sub_batches);
                let submitted = chunk.len();
                let request = match phase {
                    PhaseKind::Categorization => JobRequest::Categorize {
                        contact_ids: chunk.clone(),
                        tenant_id: config.tenant_id.clone(),
                    },
                    _ => JobRequest::Verify {
                        contact_ids: chunk.clone(),
                        tenant_id: config.tenant_id.clone(),
                    },
                };

                let job = self
                    .run_job(request, timeout, abort)
                    .await
                    .map_err(|error| ItemFailure::new(&label, error))?;

                let contact_ids = reported_ids(&job)
                    .map_err(|e| ItemFailure::new(&label, format!("unreadable {phase} result: {e}")))?
                    .unwrap_or(chunk);

                Ok(ContactOutput {
                    submitted,
                    contact_ids,
                })
            }
        };

        let on_event = |event: BatchEvent<'_, ContactOutput>| match event {
            BatchEvent::Started { .. } => {
                self.reporter.update(self.deployment_id, |p| p.active_jobs = 1);
            }
            BatchEvent::Settled(outcome) => {
                let done: usize = outcome.outputs.iter().map(|o| o.contact_ids.len()).sum();
                let ids_processed: usize = sizes.iter().take(outcome.processed).sum();
                self.reporter.update(self.deployment_id, |p| {
                    match phase {
                        PhaseKind::Categorization => p.contacts_categorized += done,
                        _ => p.contacts_verified += done,
                    }
                    p.active_jobs = 0;
                    p.phase_progress = percent(ids_processed, total_ids);
                    p.errors.extend(
                        outcome
                            .failures
                            .iter()
                            .map(|f| format!("{phase} {}: {}", f.item, f.error)),
                    );
                });
            }
        };

        let items: Vec<(usize, Vec<ContactId>)> = sub_batches.into_iter().enumerate().collect();
        let report = scheduler.run(items, action, on_event).await;
        if let Some(error) = abort.into_error(phase) {
            return Err(error);
        }

        if total_sub_batches == 0 {
            self.reporter
                .update(self.deployment_id, |p| p.phase_progress = 100);
        }

        let processed_count: usize = sizes.iter().take(report.batches).sum();
        let succeeded_ids: usize = report.outputs.iter().map(|o| o.submitted).sum();
        let output_ids: Vec<ContactId> = report
            .outputs
            .into_iter()
            .flat_map(|o| o.contact_ids)
            .collect();

        Ok(PhaseResult {
            processed_count,
            success_count: output_ids.len(),
            failure_count: processed_count - succeeded_ids,
            output_ids,
        })
    }

    // ------------------------------------------------------------------
    // Monitoring
    // ------------------------------------------------------------------

    async fn monitor(&self, config: &DeploymentConfig) -> Result<PhaseResult, PhaseError> {
        let abort = Abort::new(&self.cancel);
        self.reporter.update(self.deployment_id, |p| p.active_jobs = 1);

        let request = JobRequest::Monitor {
            tenant_id: config.tenant_id.clone(),
        };
        let outcome = self
            .run_job(request, self.timings.monitor_timeout, &abort)
            .await;
        if let Some(error) = abort.into_error(PhaseKind::Monitoring) {
            return Err(error);
        }

        let succeeded = outcome.is_ok();
        self.reporter.update(self.deployment_id, |p| {
            p.active_jobs = 0;
            p.phase_progress = 100;
            if let Err(error) = &outcome {
                p.errors.push(format!("monitoring: {error}"));
            }
        });

        Ok(PhaseResult {
            processed_count: 1,
            success_count: usize::from(succeeded),
            failure_count: usize::from(!succeeded),
            output_ids: Vec::new(),
        })
    }

    // ------------------------------------------------------------------
    // Jobs
    // ------------------------------------------------------------------

    /// Count a scrape job in (`1`) or out (`-1`) of `active_jobs`.
    fn track_in_flight(&self, delta: isize) {
        self.reporter.update(self.deployment_id, |p| {
            p.active_jobs = p.active_jobs.saturating_add_signed(delta);
        });
    }

    /// Dispatch `request` and wait for it. `Ok` only for a completed job;
    /// everything else becomes an item error message.
    async fn run_job(&self, request: JobRequest, timeout: Duration, abort: &Abort) -> Result<Job, String> {
        let kind = request.kind();
        let job_id = self.registry.dispatch(request).await;

        match self.registry.await_completion(job_id, timeout).await {
            Ok(job) if job.status == JobStatus::Completed => Ok(job),
            Ok(job) => Err(job
                .error
                .unwrap_or_else(|| format!("{kind} job failed"))),
            Err(e @ JobError::Timeout { .. }) => Err(e.to_string()),
            Err(e) => {
                warn!(
                    deployment_id = %self.deployment_id,
                    job_id = %job_id,
                    error = %e,
                    "registry lost job, aborting phase"
                );
                let message = e.to_string();
                abort.trip(e);
                Err(message)
            }
        }
    }
}

/// Contact ids a verify/categorize job reported. `None` when the payload
/// does not mention them.
fn reported_ids(job: &Job) -> Result<Option<Vec<ContactId>>, serde_json::Error> {
    match job.result.as_ref().and_then(|value| value.get("contact_ids")) {
        Some(_) => ContactBatchResult::from_job(job).map(|r| Some(r.contact_ids)),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use crate::registry::JobRegistry;
    use crate::reporter::ProgressObserver;
    use crate::testing::{BatchBehavior, MockBackend, MockBackendCall, ScrapeBehavior};
    use crate::types::progress::DeploymentProgress;
    use crate::types::target::{PriorityTier, ScrapingDifficulty};
    use uuid::Uuid;

    struct Harness {
        runner: PhaseRunner,
        reporter: ProgressReporter,
        deployment_id: DeploymentId,
    }

    fn harness(backend: Arc<MockBackend>, total_targets: usize) -> Harness {
        let registry = JobRegistry::new(backend);
        let reporter = ProgressReporter::new();
        let deployment_id = Uuid::now_v7();
        reporter.register(
            DeploymentProgress::new(deployment_id, "acme", total_targets, Utc::now()),
            None,
        );
        let runner = PhaseRunner::new(
            registry,
            reporter.clone(),
            deployment_id,
            PhaseTimings::uniform(Duration::from_secs(30), Duration::from_secs(1)),
        );
        Harness {
            runner,
            reporter,
            deployment_id,
        }
    }

    /// Re-register the harness deployment with an observer keeping every snapshot.
    fn record_snapshots(h: &Harness, total_targets: usize) -> Arc<Mutex<Vec<DeploymentProgress>>> {
        let snapshots = Arc::new(Mutex::new(Vec::new()));
        let sink = snapshots.clone();
        let observer: Arc<dyn ProgressObserver> = Arc::new(move |p: &DeploymentProgress| {
            sink.lock().unwrap().push(p.clone());
        });
        h.reporter.register(
            DeploymentProgress::new(h.deployment_id, "acme", total_targets, Utc::now()),
            Some(observer),
        );
        snapshots
    }

    fn target(name: &str) -> Target {
        Target::new(
            name,
            format!("https://{name}.example"),
            PriorityTier::Tier1,
            ScrapingDifficulty::Easy,
        )
    }

    fn config(batch_size: usize) -> DeploymentConfig {
        DeploymentConfig::builder()
            .tenant_id("acme")
            .batch_size(batch_size)
            .delay_between_batches_ms(100u64)
            .build()
    }

    #[tokio::test(start_paused = true)]
    async fn scraping_isolates_failures() {
        let backend = Arc::new(
            MockBackend::new()
                .with_default_yield(2)
                .with_scrape("https://b.example", ScrapeBehavior::Fail("403 forbidden".into()))
                .with_scrape("https://c.example", ScrapeBehavior::Yield(0)),
        );
        let h = harness(backend, 3);

        let result = h
            .runner
            .run_phase(
                PhaseKind::Scraping,
                WorkingSet::Targets(vec![vec![target("a"), target("b"), target("c")]]),
                &config(3),
            )
            .await
            .unwrap();

        assert_eq!(result.processed_count, 3);
        assert_eq!(result.success_count, 2);
        assert_eq!(result.failure_count, 1);
        assert_eq!(result.output_ids.len(), 2);

        let progress = h.reporter.get(h.deployment_id).unwrap();
        assert_eq!(progress.completed_targets, 2);
        assert_eq!(progress.failed_targets, 1);
        assert_eq!(progress.contacts_discovered, 2);
        assert_eq!(progress.phase_progress, 100);
        assert_eq!(progress.errors, vec!["scrape b: 403 forbidden".to_string()]);
        assert_eq!(progress.warnings, vec!["c: no contacts discovered".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn scrape_timeout_is_an_item_failure() {
        let backend = Arc::new(
            MockBackend::new().with_scrape("https://slow.example", ScrapeBehavior::Hang),
        );
        let h = harness(backend, 2);

        let result = h
            .runner
            .run_phase(
                PhaseKind::Scraping,
                WorkingSet::Targets(vec![vec![target("slow"), target("fast")]]),
                &config(2),
            )
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
        let progress = h.reporter.get(h.deployment_id).unwrap();
        assert!(progress.errors[0].starts_with("scrape slow: job"));
    }

    #[tokio::test(start_paused = true)]
    async fn unreadable_scrape_payload_fails_item() {
        let backend = Arc::new(MockBackend::new().with_scrape(
            "https://odd.example",
            ScrapeBehavior::Respond(serde_json::json!({ "contact_ids": "nope" })),
        ));
        let h = harness(backend, 2);

        let result = h
            .runner
            .run_phase(
                PhaseKind::Scraping,
                WorkingSet::Targets(vec![vec![target("odd"), target("a")]]),
                &config(2),
            )
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(result.failure_count, 1);
        let progress = h.reporter.get(h.deployment_id).unwrap();
        assert!(progress.errors[0].starts_with("scrape odd: unreadable scrape result"));
    }

    #[tokio::test(start_paused = true)]
    async fn verification_runs_sub_batches_sequentially() {
        let backend = Arc::new(MockBackend::new().with_verify(BatchBehavior::KeepFirst(10)));
        let mut h = harness(backend.clone(), 0);
        h.runner.timings = h.runner.timings.clone().with_verify_batch_size(50);

        let ids: Vec<ContactId> = (0..120).map(|n| format!("c{n}")).collect();
        let result = h
            .runner
            .run_phase(PhaseKind::Verification, WorkingSet::Contacts(ids), &config(10))
            .await
            .unwrap();

        let verify_calls: Vec<usize> = backend
            .calls()
            .into_iter()
            .filter_map(|c| match c {
                MockBackendCall::Verify { count } => Some(count),
                _ => None,
            })
            .collect();
        assert_eq!(verify_calls, vec![50, 50, 20]);
        assert_eq!(backend.peak_in_flight(), 1);

        assert_eq!(result.processed_count, 120);
        assert_eq!(result.success_count, 30);
        assert_eq!(result.failure_count, 0);
        assert_eq!(h.reporter.get(h.deployment_id).unwrap().contacts_verified, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn verification_progress_counts_ids() {
        let backend = Arc::new(MockBackend::new());
        let mut h = harness(backend, 0);
        h.runner.timings = h.runner.timings.clone().with_verify_batch_size(50);
        let snapshots = record_snapshots(&h, 0);

        let ids: Vec<ContactId> = (0..120).map(|n| format!("c{n}")).collect();
        h.runner
            .run_phase(PhaseKind::Verification, WorkingSet::Contacts(ids), &config(10))
            .await
            .unwrap();

        let mut steps: Vec<u8> = snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.phase_progress)
            .filter(|progress| *progress > 0)
            .collect();
        steps.dedup();
        // 50, 100 and 120 of 120 ids
        assert_eq!(steps, vec![41, 83, 100]);
    }

    #[tokio::test(start_paused = true)]
    async fn active_jobs_drop_as_targets_settle() {
        let backend = Arc::new(
            MockBackend::new().with_scrape("https://slow.example", ScrapeBehavior::Hang),
        );
        let h = harness(backend, 2);
        let snapshots = record_snapshots(&h, 2);

        h.runner
            .run_phase(
                PhaseKind::Scraping,
                WorkingSet::Targets(vec![vec![target("slow"), target("fast")]]),
                &config(2),
            )
            .await
            .unwrap();

        let mut active: Vec<usize> = snapshots
            .lock()
            .unwrap()
            .iter()
            .map(|p| p.active_jobs)
            .collect();
        active.dedup();
        // both dispatched, fast settles, slow times out
        assert_eq!(active, vec![0, 1, 2, 1, 0]);
    }

    #[tokio::test(start_paused = true)]
    async fn categorization_keeps_submitted_ids_when_omitted() {
        let backend = Arc::new(MockBackend::new().with_categorize(BatchBehavior::OmitIds));
        let h = harness(backend, 0);

        let ids: Vec<ContactId> = (0..30).map(|n| format!("c{n}")).collect();
        let result = h
            .runner
            .run_phase(PhaseKind::Categorization, WorkingSet::Contacts(ids.clone()), &config(10))
            .await
            .unwrap();

        assert_eq!(result.output_ids, ids);
        assert_eq!(h.reporter.get(h.deployment_id).unwrap().contacts_categorized, 30);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_sub_batch_is_recorded() {
        let backend = Arc::new(MockBackend::new().with_verify(BatchBehavior::Fail("quota".into())));
        let h = harness(backend, 0);

        let ids: Vec<ContactId> = (0..5).map(|n| format!("c{n}")).collect();
        let result = h
            .runner
            .run_phase(PhaseKind::Verification, WorkingSet::Contacts(ids), &config(10))
            .await
            .unwrap();

        assert_eq!(result.processed_count, 5);
        assert_eq!(result.failure_count, 5);
        assert!(result.output_ids.is_empty());
        let progress = h.reporter.get(h.deployment_id).unwrap();
        assert_eq!(progress.errors, vec!["verification sub-batch 1/1: quota".to_string()]);
    }

    #[tokio::test(start_paused = true)]
    async fn monitoring_dispatches_one_job() {
        let backend = Arc::new(MockBackend::new());
        let h = harness(backend.clone(), 0);

        let result = h
            .runner
            .run_phase(PhaseKind::Monitoring, WorkingSet::Tenant, &config(10))
            .await
            .unwrap();

        assert_eq!(result.success_count, 1);
        assert_eq!(
            backend
                .calls()
                .iter()
                .filter(|c| matches!(c, MockBackendCall::Monitor { .. }))
                .count(),
            1
        );
    }

    #[tokio::test(start_paused = true)]
    async fn cancelled_runner_refuses_new_phase() {
        let backend = Arc::new(MockBackend::new());
        let h = harness(backend.clone(), 1);
        let token = CancellationToken::new();
        token.cancel();
        let runner = h.runner.clone().with_cancellation(token);

        let err = runner
            .run_phase(
                PhaseKind::Scraping,
                WorkingSet::Targets(vec![vec![target("a")]]),
                &config(1),
            )
            .await
            .unwrap_err();

        assert!(matches!(err, PhaseError::Cancelled { phase: PhaseKind::Scraping }));
        assert!(backend.scraped_urls().is_empty());
    }
}

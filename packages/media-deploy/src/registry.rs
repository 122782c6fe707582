//! Job registry for work delegated to a discovery backend.
//!
//! The registry gives every dispatched request a local id and keeps a local
//! record of its lifecycle. A background tracker per job polls the backend
//! and mirrors progress, result and error into that record:
//!
//! ```text
//! dispatch(request)
//!     │
//!     ├─► insert pending record
//!     ├─► pending -> running
//!     ├─► submit to DiscoveryBackend
//!     │       ├─ error ─► running -> failed
//!     │       └─ ok ────► spawn tracker (poll job_status until terminal)
//!     └─► return JobId
//! ```
//!
//! Terminal records are frozen: once a job is completed or failed nothing
//! writes to it again, so every observer sees the same final outcome.
//! They are kept for [`RegistryConfig::track_limit`] after settling and
//! pruned on the next dispatch; running jobs are never pruned.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::Utc;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::error::JobError;
use crate::traits::backend::DiscoveryBackend;
use crate::types::job::{BackendJob, BackendJobId, Job, JobId, JobRequest, JobStatus};

/// Polling and tracking knobs for the registry.
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// How often trackers poll the backend and waiters re-check a job
    pub poll_interval: Duration,
    /// Trackers give up on a backend job after this long
    pub track_limit: Duration,
    /// Ask the backend to cancel a job when a waiter times out
    pub cancel_on_timeout: bool,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(1),
            track_limit: Duration::from_secs(60 * 60),
            cancel_on_timeout: true,
        }
    }
}

impl RegistryConfig {
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    pub fn with_track_limit(mut self, limit: Duration) -> Self {
        self.track_limit = limit;
        self
    }

    pub fn with_cancel_on_timeout(mut self, cancel: bool) -> Self {
        self.cancel_on_timeout = cancel;
        self
    }
}

struct TrackedJob {
    job: Job,
    backend_id: Option<BackendJobId>,
}

struct Inner {
    jobs: RwLock<HashMap<JobId, TrackedJob>>,
    backend: Arc<dyn DiscoveryBackend>,
    config: RegistryConfig,
    shutdown: CancellationToken,
}

/// Tracks jobs dispatched to a [`DiscoveryBackend`].
///
/// Cheap to clone; clones share the same records.
#[derive(Clone)]
pub struct JobRegistry {
    inner: Arc<Inner>,
}

impl JobRegistry {
    pub fn new(backend: Arc<dyn DiscoveryBackend>) -> Self {
        Self::with_config(backend, RegistryConfig::default())
    }

    pub fn with_config(backend: Arc<dyn DiscoveryBackend>, config: RegistryConfig) -> Self {
        Self {
            inner: Arc::new(Inner {
                jobs: RwLock::new(HashMap::new()),
                backend,
                config,
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Create a job for `request`, start it on the backend and return its id.
    ///
    /// A submission error does not surface here: the job is recorded as
    /// failed and the id is still returned.
    pub async fn dispatch(&self, request: JobRequest) -> JobId {
        let job = Job::new(request.kind());
        let job_id = job.id;
        let kind = job.kind;

        self.insert(job);
        if let Err(e) = self.transition(job_id, JobStatus::Pending, JobStatus::Running) {
            warn!(job_id = %job_id, error = %e, "freshly inserted job was not pending");
        }

        let backend = &self.inner.backend;
        let submitted = match &request {
            JobRequest::Scrape { url, tenant_id } => backend.scrape_target(url, tenant_id).await,
            JobRequest::Verify {
                contact_ids,
                tenant_id,
            } => backend.verify(contact_ids, tenant_id).await,
            JobRequest::Categorize {
                contact_ids,
                tenant_id,
            } => backend.categorize(contact_ids, tenant_id).await,
            JobRequest::Monitor { tenant_id } => backend.monitor(tenant_id).await,
        };

        match submitted {
            Ok(backend_id) => {
                debug!(
                    job_id = %job_id,
                    kind = %kind,
                    backend = backend.name(),
                    backend_job_id = %backend_id,
                    "job submitted"
                );
                self.set_backend_id(job_id, backend_id.clone());
                tokio::spawn(self.clone().track(job_id, backend_id));
            }
            Err(e) => {
                warn!(job_id = %job_id, kind = %kind, error = %e, "backend rejected job");
                self.fail(job_id, e.to_string());
            }
        }

        job_id
    }

    /// Snapshot of a job.
    pub fn status(&self, job_id: JobId) -> Result<Job, JobError> {
        self.read()
            .get(&job_id)
            .map(|tracked| tracked.job.clone())
            .ok_or(JobError::NotFound(job_id))
    }

    /// Wait until the job is terminal, polling at the configured interval.
    ///
    /// On timeout the backend is asked (best effort) to cancel the job and
    /// [`JobError::Timeout`] is returned. The local record is left as it is.
    pub async fn await_completion(&self, job_id: JobId, timeout: Duration) -> Result<Job, JobError> {
        let deadline = Instant::now() + timeout;

        loop {
            let job = self.status(job_id)?;
            if job.status.is_terminal() {
                return Ok(job);
            }

            let now = Instant::now();
            if now >= deadline {
                warn!(job_id = %job_id, status = %job.status, waited = ?timeout, "job timed out");
                self.cancel_remote(job_id).await;
                return Err(JobError::Timeout {
                    job_id,
                    status: job.status,
                    waited: timeout,
                });
            }

            let wait = self.inner.config.poll_interval.min(deadline - now);
            tokio::time::sleep(wait).await;
        }
    }

    /// Compare-and-set status transition.
    pub fn transition(
        &self,
        job_id: JobId,
        expected: JobStatus,
        next: JobStatus,
    ) -> Result<(), JobError> {
        let mut jobs = self.write();
        let tracked = jobs.get_mut(&job_id).ok_or(JobError::NotFound(job_id))?;

        let actual = tracked.job.status;
        if actual != expected || !tracked.job.transition(next) {
            return Err(JobError::InvalidTransition {
                job_id,
                expected,
                actual,
                next,
            });
        }
        Ok(())
    }

    /// Stop every tracker. Records stay readable.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ------------------------------------------------------------------
    // Store operations
    // ------------------------------------------------------------------

    fn insert(&self, job: Job) {
        let cutoff = chrono::Duration::from_std(self.inner.config.track_limit)
            .ok()
            .and_then(|limit| Utc::now().checked_sub_signed(limit));

        let mut jobs = self.write();
        if let Some(cutoff) = cutoff {
            let before = jobs.len();
            jobs.retain(|_, tracked| {
                !tracked.job.status.is_terminal()
                    || tracked.job.completed_at.map_or(true, |at| at > cutoff)
            });
            if jobs.len() < before {
                debug!(pruned = before - jobs.len(), "pruned settled jobs");
            }
        }

        jobs.insert(
            job.id,
            TrackedJob {
                job,
                backend_id: None,
            },
        );
    }

    fn set_backend_id(&self, job_id: JobId, backend_id: BackendJobId) {
        if let Some(tracked) = self.write().get_mut(&job_id) {
            tracked.backend_id = Some(backend_id);
        }
    }

    fn backend_id(&self, job_id: JobId) -> Option<BackendJobId> {
        self.read()
            .get(&job_id)
            .and_then(|tracked| tracked.backend_id.clone())
    }

    fn fail(&self, job_id: JobId, error: impl Into<String>) {
        if let Some(tracked) = self.write().get_mut(&job_id) {
            tracked.job.fail(error);
        }
    }

    /// Copy the backend's view into the local record. Returns true once the
    /// local record is terminal (or gone) and tracking can stop.
    fn mirror(&self, job_id: JobId, remote: BackendJob) -> bool {
        let mut jobs = self.write();
        let Some(tracked) = jobs.get_mut(&job_id) else {
            return true;
        };

        let job = &mut tracked.job;
        match remote.status {
            JobStatus::Completed => {
                job.complete(remote.result);
            }
            JobStatus::Failed => {
                let error = remote
                    .error
                    .unwrap_or_else(|| "backend reported failure".to_string());
                job.fail(error);
            }
            JobStatus::Pending | JobStatus::Running => {
                job.set_progress(remote.progress);
            }
        }

        job.status.is_terminal()
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<JobId, TrackedJob>> {
        self.inner.jobs.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<JobId, TrackedJob>> {
        self.inner.jobs.write().unwrap_or_else(|e| e.into_inner())
    }

    // ------------------------------------------------------------------
    // Backend interaction
    // ------------------------------------------------------------------

    async fn track(self, job_id: JobId, backend_id: BackendJobId) {
        let started = Instant::now();
        let config = &self.inner.config;

        loop {
            tokio::select! {
                _ = self.inner.shutdown.cancelled() => {
                    debug!(job_id = %job_id, "registry shutting down, tracker stopped");
                    return;
                }
                _ = tokio::time::sleep(config.poll_interval) => {}
            }

            match self.inner.backend.job_status(&backend_id).await {
                Ok(Some(remote)) => {
                    if self.mirror(job_id, remote) {
                        debug!(job_id = %job_id, backend_job_id = %backend_id, "job settled");
                        return;
                    }
                }
                Ok(None) => {
                    warn!(job_id = %job_id, backend_job_id = %backend_id, "backend lost job");
                    self.fail(job_id, "backend lost job");
                    return;
                }
                Err(e) => {
                    warn!(job_id = %job_id, error = %e, "job status poll failed");
                }
            }

            if started.elapsed() >= config.track_limit {
                warn!(job_id = %job_id, limit = ?config.track_limit, "tracking limit exceeded");
                self.fail(job_id, "tracking limit exceeded");
                return;
            }
        }
    }

    async fn cancel_remote(&self, job_id: JobId) {
        if !self.inner.config.cancel_on_timeout {
            return;
        }
        let Some(backend_id) = self.backend_id(job_id) else {
            return;
        };

        match self.inner.backend.cancel(&backend_id).await {
            Ok(true) => debug!(job_id = %job_id, backend_job_id = %backend_id, "backend job cancelled"),
            Ok(false) => debug!(job_id = %job_id, "backend did not cancel job"),
            Err(e) => warn!(job_id = %job_id, error = %e, "failed to cancel backend job"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockBackend, MockBackendCall, ScrapeBehavior};
    use crate::types::job::{ContactBatchResult, JobKind};
    use uuid::Uuid;

    fn scrape(url: &str) -> JobRequest {
        JobRequest::Scrape {
            url: url.to_string(),
            tenant_id: "acme".to_string(),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn completed_job_carries_result() {
        let backend = Arc::new(
            MockBackend::new()
                .with_latency(Duration::from_secs(3))
                .with_scrape("https://a.example", ScrapeBehavior::Yield(2)),
        );
        let registry = JobRegistry::new(backend);

        let id = registry.dispatch(scrape("https://a.example")).await;
        assert_eq!(registry.status(id).unwrap().status, JobStatus::Running);

        let job = registry
            .await_completion(id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(job.kind, JobKind::Scrape);
        assert_eq!(job.status, JobStatus::Completed);
        assert_eq!(job.progress, 100);
        assert_eq!(ContactBatchResult::from_job(&job).unwrap().contact_ids.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_submission_fails_job() {
        let backend = Arc::new(
            MockBackend::new().with_scrape("https://a.example", ScrapeBehavior::Reject("quota".into())),
        );
        let registry = JobRegistry::new(backend);

        let id = registry.dispatch(scrape("https://a.example")).await;
        let job = registry.status(id).unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert!(job.error.unwrap().contains("quota"));
    }

    #[tokio::test(start_paused = true)]
    async fn failed_backend_job_is_mirrored() {
        let backend = Arc::new(
            MockBackend::new().with_scrape("https://a.example", ScrapeBehavior::Fail("403".into())),
        );
        let registry = JobRegistry::new(backend);

        let id = registry.dispatch(scrape("https://a.example")).await;
        let job = registry
            .await_completion(id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("403"));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_cancels_backend_job_and_keeps_status() {
        let backend = Arc::new(
            MockBackend::new()
                .with_cancel_support(true)
                .with_scrape("https://slow.example", ScrapeBehavior::Hang),
        );
        let registry = JobRegistry::new(backend.clone());

        let id = registry.dispatch(scrape("https://slow.example")).await;
        let err = registry
            .await_completion(id, Duration::from_secs(5))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            JobError::Timeout {
                status: JobStatus::Running,
                ..
            }
        ));
        assert_eq!(registry.status(id).unwrap().status, JobStatus::Running);
        assert!(backend
            .calls()
            .iter()
            .any(|call| matches!(call, MockBackendCall::Cancel { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn timeout_without_cancel_leaves_backend_alone() {
        let backend =
            Arc::new(MockBackend::new().with_scrape("https://slow.example", ScrapeBehavior::Hang));
        let registry = JobRegistry::with_config(
            backend.clone(),
            RegistryConfig::default().with_cancel_on_timeout(false),
        );

        let id = registry.dispatch(scrape("https://slow.example")).await;
        assert!(registry
            .await_completion(id, Duration::from_secs(2))
            .await
            .is_err());
        assert!(!backend
            .calls()
            .iter()
            .any(|call| matches!(call, MockBackendCall::Cancel { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn vanished_backend_job_fails_locally() {
        let backend = Arc::new(
            MockBackend::new().with_scrape("https://gone.example", ScrapeBehavior::Vanish),
        );
        let registry = JobRegistry::new(backend);

        let id = registry.dispatch(scrape("https://gone.example")).await;
        let job = registry
            .await_completion(id, Duration::from_secs(30))
            .await
            .unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error.as_deref(), Some("backend lost job"));
    }

    #[tokio::test]
    async fn unknown_job_is_not_found() {
        let registry = JobRegistry::new(Arc::new(MockBackend::new()));
        let missing = Uuid::now_v7();

        assert!(matches!(registry.status(missing), Err(JobError::NotFound(_))));
        assert!(matches!(
            registry.await_completion(missing, Duration::from_secs(1)).await,
            Err(JobError::NotFound(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn transition_is_compare_and_set() {
        let backend =
            Arc::new(MockBackend::new().with_scrape("https://a.example", ScrapeBehavior::Hang));
        let registry = JobRegistry::new(backend);
        let id = registry.dispatch(scrape("https://a.example")).await;

        let err = registry
            .transition(id, JobStatus::Pending, JobStatus::Running)
            .unwrap_err();
        assert!(matches!(
            err,
            JobError::InvalidTransition {
                actual: JobStatus::Running,
                ..
            }
        ));

        registry
            .transition(id, JobStatus::Running, JobStatus::Failed)
            .unwrap();
        assert!(registry
            .transition(id, JobStatus::Failed, JobStatus::Completed)
            .is_err());
        assert_eq!(registry.len(), 1);
    }

    #[tokio::test]
    async fn settled_jobs_are_pruned_after_track_limit() {
        let backend = Arc::new(
            MockBackend::new()
                .with_scrape("https://slow.example", ScrapeBehavior::Hang)
                .with_scrape("https://a.example", ScrapeBehavior::Yield(1)),
        );
        let config = RegistryConfig::default()
            .with_poll_interval(Duration::from_millis(5))
            .with_track_limit(Duration::from_millis(200));
        let registry = JobRegistry::with_config(backend, config);

        let running = registry.dispatch(scrape("https://slow.example")).await;
        let settled = registry.dispatch(scrape("https://a.example")).await;
        registry
            .await_completion(settled, Duration::from_secs(5))
            .await
            .unwrap();
        registry.shutdown();

        tokio::time::sleep(Duration::from_millis(300)).await;
        let fresh = registry.dispatch(scrape("https://a.example")).await;

        assert!(matches!(registry.status(settled), Err(JobError::NotFound(_))));
        assert_eq!(registry.status(running).unwrap().status, JobStatus::Running);
        assert!(registry.status(fresh).is_ok());
        assert_eq!(registry.len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_stops_tracking() {
        let backend = Arc::new(
            MockBackend::new()
                .with_latency(Duration::from_secs(10))
                .with_scrape("https://a.example", ScrapeBehavior::Yield(1)),
        );
        let registry = JobRegistry::new(backend);
        let id = registry.dispatch(scrape("https://a.example")).await;

        registry.shutdown();
        tokio::time::sleep(Duration::from_secs(20)).await;
        assert_eq!(registry.status(id).unwrap().status, JobStatus::Running);
    }
}

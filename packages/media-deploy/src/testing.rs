//! Testing utilities including a scriptable discovery backend.
//!
//! [`MockBackend`] runs entirely in memory. Jobs settle after a configurable
//! latency measured on the tokio clock, so tests on a paused runtime run
//! instantly and deterministically. Every call is recorded for assertions.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tokio::time::Instant;

use crate::error::{BackendError, BackendResult};
use crate::traits::backend::DiscoveryBackend;
use crate::traits::directory::ContactDirectory;
use crate::types::job::{BackendJob, BackendJobId, ContactId, JobStatus};
use crate::types::progress::ContactCounts;

/// How the mock handles a scrape of one url.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScrapeBehavior {
    /// Complete with this many new contacts
    Yield(usize),
    /// Complete with this exact result payload
    Respond(serde_json::Value),
    /// Complete as failed with this error
    Fail(String),
    /// Refuse the submission
    Reject(String),
    /// Stay running forever
    Hang,
    /// Forget the job right after accepting it
    Vanish,
    /// Panic inside `scrape_target`
    Panic,
}

/// How the mock handles verify and categorize submissions.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BatchBehavior {
    /// Report every submitted id back
    #[default]
    EchoAll,
    /// Report back only the first n ids of each sub-batch
    KeepFirst(usize),
    /// Complete with a payload that has no `contact_ids`
    OmitIds,
    /// Complete as failed with this error
    Fail(String),
}

/// Record of a call made to the mock backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockBackendCall {
    Scrape { url: String, tenant_id: String },
    Verify { count: usize },
    Categorize { count: usize },
    Monitor { tenant_id: String },
    /// A job was first observed terminal through `job_status`
    Finished { label: String },
    Cancel { job_id: String },
}

enum Outcome {
    Completed(serde_json::Value),
    Failed(String),
    Never,
    Vanished,
}

struct MockJob {
    label: String,
    ready_at: Instant,
    outcome: Outcome,
    observed_terminal: bool,
}

#[derive(Default)]
struct State {
    jobs: HashMap<BackendJobId, MockJob>,
    next_job: usize,
    next_contact: usize,
    in_flight: usize,
    peak_in_flight: usize,
}

/// In-memory [`DiscoveryBackend`] and [`ContactDirectory`] for tests.
#[derive(Default)]
pub struct MockBackend {
    latency: Duration,
    default_yield: usize,
    cancel_supported: bool,
    scrapes: HashMap<String, ScrapeBehavior>,
    verify: BatchBehavior,
    categorize: BatchBehavior,
    counts: HashMap<String, ContactCounts>,
    state: RwLock<State>,
    calls: Arc<RwLock<Vec<MockBackendCall>>>,
}

impl MockBackend {
    /// Instant jobs; unscripted urls yield one contact each.
    pub fn new() -> Self {
        Self {
            default_yield: 1,
            ..Default::default()
        }
    }

    /// How long every job runs before settling.
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Contacts yielded by urls without a scripted behavior.
    pub fn with_default_yield(mut self, contacts: usize) -> Self {
        self.default_yield = contacts;
        self
    }

    pub fn with_scrape(mut self, url: impl Into<String>, behavior: ScrapeBehavior) -> Self {
        self.scrapes.insert(url.into(), behavior);
        self
    }

    pub fn with_verify(mut self, behavior: BatchBehavior) -> Self {
        self.verify = behavior;
        self
    }

    pub fn with_categorize(mut self, behavior: BatchBehavior) -> Self {
        self.categorize = behavior;
        self
    }

    pub fn with_cancel_support(mut self, supported: bool) -> Self {
        self.cancel_supported = supported;
        self
    }

    /// Counts reported by the contact directory for a tenant.
    pub fn with_contact_counts(mut self, tenant_id: impl Into<String>, counts: ContactCounts) -> Self {
        self.counts.insert(tenant_id.into(), counts);
        self
    }

    /// Get all calls made to this mock.
    pub fn calls(&self) -> Vec<MockBackendCall> {
        self.calls.read().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Urls in the order they were submitted for scraping.
    pub fn scraped_urls(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockBackendCall::Scrape { url, .. } => Some(url),
                _ => None,
            })
            .collect()
    }

    /// Most jobs that were submitted and not yet observed terminal at once.
    pub fn peak_in_flight(&self) -> usize {
        self.state().peak_in_flight
    }

    fn record(&self, call: MockBackendCall) {
        self.calls
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push(call);
    }

    fn state(&self) -> std::sync::RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    fn fresh_contacts(state: &mut State, count: usize) -> Vec<ContactId> {
        (0..count)
            .map(|_| {
                state.next_contact += 1;
                format!("contact-{}", state.next_contact)
            })
            .collect()
    }

    fn submit(&self, label: String, outcome: impl FnOnce(&mut State) -> Outcome) -> BackendJobId {
        let mut guard = self.state();
        let state = &mut *guard;
        state.next_job += 1;
        let id = format!("mock-job-{}", state.next_job);
        let outcome = outcome(state);

        state.in_flight += 1;
        state.peak_in_flight = state.peak_in_flight.max(state.in_flight);
        state.jobs.insert(
            id.clone(),
            MockJob {
                label,
                ready_at: Instant::now() + self.latency,
                outcome,
                observed_terminal: false,
            },
        );
        id
    }

    fn batch_outcome(behavior: &BatchBehavior, contact_ids: &[ContactId]) -> Outcome {
        match behavior {
            BatchBehavior::EchoAll => Outcome::Completed(json!({ "contact_ids": contact_ids })),
            BatchBehavior::KeepFirst(n) => {
                let kept: Vec<&ContactId> = contact_ids.iter().take(*n).collect();
                Outcome::Completed(json!({ "contact_ids": kept }))
            }
            BatchBehavior::OmitIds => Outcome::Completed(json!({ "processed": contact_ids.len() })),
            BatchBehavior::Fail(error) => Outcome::Failed(error.clone()),
        }
    }
}

#[async_trait]
impl DiscoveryBackend for MockBackend {
    async fn scrape_target(&self, url: &str, tenant_id: &str) -> BackendResult<BackendJobId> {
        self.record(MockBackendCall::Scrape {
            url: url.to_string(),
            tenant_id: tenant_id.to_string(),
        });

        let behavior = self
            .scrapes
            .get(url)
            .cloned()
            .unwrap_or(ScrapeBehavior::Yield(self.default_yield));

        let outcome = match behavior {
            ScrapeBehavior::Panic => panic!("mock backend panicked scraping {url}"),
            ScrapeBehavior::Reject(reason) => {
                return Err(BackendError::Rejected {
                    status: 422,
                    reason,
                })
            }
            ScrapeBehavior::Yield(n) => {
                return Ok(self.submit(url.to_string(), |state| {
                    Outcome::Completed(json!({ "contact_ids": Self::fresh_contacts(state, n) }))
                }))
            }
            ScrapeBehavior::Respond(value) => Outcome::Completed(value),
            ScrapeBehavior::Fail(error) => Outcome::Failed(error),
            ScrapeBehavior::Hang => Outcome::Never,
            ScrapeBehavior::Vanish => Outcome::Vanished,
        };

        Ok(self.submit(url.to_string(), |_| outcome))
    }

    async fn verify(&self, contact_ids: &[ContactId], _tenant_id: &str) -> BackendResult<BackendJobId> {
        self.record(MockBackendCall::Verify {
            count: contact_ids.len(),
        });
        let outcome = Self::batch_outcome(&self.verify, contact_ids);
        Ok(self.submit("verify".to_string(), |_| outcome))
    }

    async fn categorize(
        &self,
        contact_ids: &[ContactId],
        _tenant_id: &str,
    ) -> BackendResult<BackendJobId> {
        self.record(MockBackendCall::Categorize {
            count: contact_ids.len(),
        });
        let outcome = Self::batch_outcome(&self.categorize, contact_ids);
        Ok(self.submit("categorize".to_string(), |_| outcome))
    }

    async fn monitor(&self, tenant_id: &str) -> BackendResult<BackendJobId> {
        self.record(MockBackendCall::Monitor {
            tenant_id: tenant_id.to_string(),
        });
        Ok(self.submit("monitor".to_string(), |_| {
            Outcome::Completed(json!({ "monitoring": true }))
        }))
    }

    async fn job_status(&self, job_id: &str) -> BackendResult<Option<BackendJob>> {
        let mut finished = None;

        let status = {
            let mut guard = self.state();
            let state = &mut *guard;
            let Some(job) = state.jobs.get_mut(job_id) else {
                return Ok(None);
            };

            let ready = Instant::now() >= job.ready_at;
            let remote = match (&job.outcome, ready) {
                (Outcome::Vanished, _) => None,
                (Outcome::Never, _) | (_, false) => Some(BackendJob {
                    id: job_id.to_string(),
                    status: JobStatus::Running,
                    progress: 50,
                    result: None,
                    error: None,
                }),
                (Outcome::Completed(value), true) => Some(BackendJob {
                    id: job_id.to_string(),
                    status: JobStatus::Completed,
                    progress: 100,
                    result: Some(value.clone()),
                    error: None,
                }),
                (Outcome::Failed(error), true) => Some(BackendJob {
                    id: job_id.to_string(),
                    status: JobStatus::Failed,
                    progress: 100,
                    result: None,
                    error: Some(error.clone()),
                }),
            };

            let terminal = remote
                .as_ref()
                .map_or(true, |remote| remote.status.is_terminal());
            if terminal && !job.observed_terminal {
                job.observed_terminal = true;
                finished = Some(job.label.clone());
                state.in_flight = state.in_flight.saturating_sub(1);
            }
            remote
        };

        if let Some(label) = finished {
            self.record(MockBackendCall::Finished { label });
        }
        Ok(status)
    }

    async fn cancel(&self, job_id: &str) -> BackendResult<bool> {
        self.record(MockBackendCall::Cancel {
            job_id: job_id.to_string(),
        });
        Ok(self.cancel_supported)
    }

    fn name(&self) -> &str {
        "mock"
    }
}

#[async_trait]
impl ContactDirectory for MockBackend {
    async fn contact_counts(&self, tenant_id: &str) -> BackendResult<ContactCounts> {
        Ok(self.counts.get(tenant_id).copied().unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn job_settles_after_latency() {
        let backend = MockBackend::new().with_latency(Duration::from_secs(2));
        let id = backend.scrape_target("https://a.example", "acme").await.unwrap();

        let running = backend.job_status(&id).await.unwrap().unwrap();
        assert_eq!(running.status, JobStatus::Running);

        tokio::time::advance(Duration::from_secs(2)).await;
        let done = backend.job_status(&id).await.unwrap().unwrap();
        assert_eq!(done.status, JobStatus::Completed);
        assert_eq!(done.result.unwrap()["contact_ids"], json!(["contact-1"]));

        backend.job_status(&id).await.unwrap();
        let finished: Vec<_> = backend
            .calls()
            .into_iter()
            .filter(|c| matches!(c, MockBackendCall::Finished { .. }))
            .collect();
        assert_eq!(finished.len(), 1);
    }

    #[tokio::test]
    async fn keep_first_trims_reported_ids() {
        let backend = MockBackend::new().with_verify(BatchBehavior::KeepFirst(1));
        let ids = vec!["c1".to_string(), "c2".to_string()];
        let id = backend.verify(&ids, "acme").await.unwrap();

        let done = backend.job_status(&id).await.unwrap().unwrap();
        assert_eq!(done.result.unwrap()["contact_ids"], json!(["c1"]));
    }

    #[tokio::test]
    async fn directory_defaults_to_zero() {
        let backend = MockBackend::new().with_contact_counts(
            "acme",
            ContactCounts {
                total: 3,
                ..Default::default()
            },
        );
        assert_eq!(backend.contact_counts("acme").await.unwrap().total, 3);
        assert_eq!(backend.contact_counts("other").await.unwrap(), ContactCounts::default());
    }
}

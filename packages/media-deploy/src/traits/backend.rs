//! Discovery backend trait.
//!
//! The backend does the actual scraping, verification, categorization and
//! monitoring work. The pipeline hands it work by reference and learns the
//! outcome by polling `job_status`.

use async_trait::async_trait;

use crate::error::BackendResult;
use crate::types::job::{BackendJob, BackendJobId, ContactId};

/// External capability that performs discovery work.
///
/// Every submit method returns as soon as the backend has accepted the
/// work; the job runs on the backend's side.
#[async_trait]
pub trait DiscoveryBackend: Send + Sync {
    /// Start discovering contacts on one target.
    async fn scrape_target(&self, url: &str, tenant_id: &str) -> BackendResult<BackendJobId>;

    /// Start verifying a group of contacts.
    async fn verify(&self, contact_ids: &[ContactId], tenant_id: &str)
        -> BackendResult<BackendJobId>;

    /// Start categorizing a group of contacts.
    async fn categorize(
        &self,
        contact_ids: &[ContactId],
        tenant_id: &str,
    ) -> BackendResult<BackendJobId>;

    /// Start ongoing monitoring for a tenant.
    async fn monitor(&self, tenant_id: &str) -> BackendResult<BackendJobId>;

    /// Current state of a submitted job. `None` when the backend no longer
    /// knows the id.
    async fn job_status(&self, job_id: &str) -> BackendResult<Option<BackendJob>>;

    /// Best-effort cancellation. Returns whether the backend accepted it.
    async fn cancel(&self, _job_id: &str) -> BackendResult<bool> {
        Ok(false)
    }

    /// Backend name for logging.
    fn name(&self) -> &str {
        "discovery"
    }
}

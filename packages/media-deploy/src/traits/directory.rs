//! Read access to the contacts a tenant has accumulated.

use async_trait::async_trait;

use crate::error::BackendResult;
use crate::types::progress::ContactCounts;

/// Source of aggregate contact counts, used for deployment statistics.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    async fn contact_counts(&self, tenant_id: &str) -> BackendResult<ContactCounts>;
}

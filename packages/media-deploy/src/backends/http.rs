//! HTTP client for a hosted discovery service.
//!
//! Endpoints, relative to the base url:
//!
//! | Method | Path                              | Body / result           |
//! |--------|-----------------------------------|-------------------------|
//! | POST   | `scrape`, `verify`, `categorize`, `monitor` | job request -> `{ "job_id" }` |
//! | GET    | `jobs/{id}`                       | job state, 404 if unknown |
//! | POST   | `jobs/{id}/cancel`                | 2xx if cancelled        |
//! | GET    | `tenants/{tenant}/contacts/stats` | contact counts          |

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::debug;
use url::Url;

use crate::error::{BackendError, BackendResult};
use crate::traits::backend::DiscoveryBackend;
use crate::traits::directory::ContactDirectory;
use crate::types::job::{BackendJob, BackendJobId, ContactId, JobRequest};
use crate::types::progress::ContactCounts;

/// Response to a work submission
#[derive(Debug, Deserialize, Serialize)]
struct SubmitResponse {
    job_id: BackendJobId,
}

/// Discovery backend reached over HTTP with JSON bodies.
pub struct HttpDiscoveryBackend {
    base_url: Url,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpDiscoveryBackend {
    pub fn new(base_url: &str, api_key: Option<String>) -> BackendResult<Self> {
        Self::with_timeout(base_url, api_key, Duration::from_secs(30))
    }

    pub fn with_timeout(
        base_url: &str,
        api_key: Option<String>,
        timeout: Duration,
    ) -> BackendResult<Self> {
        let base_url = Url::parse(base_url).map_err(|e| BackendError::InvalidUrl(e.to_string()))?;
        if base_url.cannot_be_a_base() {
            return Err(BackendError::InvalidUrl(base_url.to_string()));
        }

        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BackendError::Transport(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            base_url,
            api_key,
            client,
        })
    }

    /// Base url with `segments` appended, each one percent-encoded.
    fn endpoint(&self, segments: &[&str]) -> BackendResult<Url> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| BackendError::InvalidUrl(self.base_url.to_string()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }

    async fn submit(&self, path: &str, request: &JobRequest) -> BackendResult<BackendJobId> {
        let url = self.endpoint(&[path])?;
        let response = self
            .authorize(self.client.post(url))
            .json(request)
            .send()
            .await
            .map_err(transport)?;

        let submitted: SubmitResponse = read_json(response).await?;
        debug!(kind = %request.kind(), backend_job_id = %submitted.job_id, "backend accepted job");
        Ok(submitted.job_id)
    }
}

fn transport(e: reqwest::Error) -> BackendError {
    BackendError::Transport(e.to_string())
}

async fn read_json<T: DeserializeOwned>(response: reqwest::Response) -> BackendResult<T> {
    let status = response.status();
    if !status.is_success() {
        let reason = response.text().await.unwrap_or_default();
        return Err(BackendError::Rejected {
            status: status.as_u16(),
            reason,
        });
    }

    let body = response.bytes().await.map_err(transport)?;
    serde_json::from_slice(&body).map_err(|e| BackendError::InvalidResponse(e.to_string()))
}

#[async_trait]
impl DiscoveryBackend for HttpDiscoveryBackend {
    async fn scrape_target(&self, url: &str, tenant_id: &str) -> BackendResult<BackendJobId> {
        let request = JobRequest::Scrape {
            url: url.to_string(),
            tenant_id: tenant_id.to_string(),
        };
        self.submit("scrape", &request).await
    }

    async fn verify(&self, contact_ids: &[ContactId], tenant_id: &str) -> BackendResult<BackendJobId> {
        let request = JobRequest::Verify {
            contact_ids: contact_ids.to_vec(),
            tenant_id: tenant_id.to_string(),
        };
        self.submit("verify", &request).await
    }

    async fn categorize(
        &self,
        contact_ids: &[ContactId],
        tenant_id: &str,
    ) -> BackendResult<BackendJobId> {
        let request = JobRequest::Categorize {
            contact_ids: contact_ids.to_vec(),
            tenant_id: tenant_id.to_string(),
        };
        self.submit("categorize", &request).await
    }

    async fn monitor(&self, tenant_id: &str) -> BackendResult<BackendJobId> {
        let request = JobRequest::Monitor {
            tenant_id: tenant_id.to_string(),
        };
        self.submit("monitor", &request).await
    }

    async fn job_status(&self, job_id: &str) -> BackendResult<Option<BackendJob>> {
        let url = self.endpoint(&["jobs", job_id])?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport)?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        read_json(response).await.map(Some)
    }

    async fn cancel(&self, job_id: &str) -> BackendResult<bool> {
        let url = self.endpoint(&["jobs", job_id, "cancel"])?;
        let response = self
            .authorize(self.client.post(url))
            .send()
            .await
            .map_err(transport)?;

        match response.status() {
            status if status.is_success() => Ok(true),
            StatusCode::NOT_FOUND | StatusCode::METHOD_NOT_ALLOWED | StatusCode::NOT_IMPLEMENTED => {
                Ok(false)
            }
            status => Err(BackendError::Rejected {
                status: status.as_u16(),
                reason: response.text().await.unwrap_or_default(),
            }),
        }
    }

    fn name(&self) -> &str {
        "http"
    }
}

#[async_trait]
impl ContactDirectory for HttpDiscoveryBackend {
    async fn contact_counts(&self, tenant_id: &str) -> BackendResult<ContactCounts> {
        let url = self.endpoint(&["tenants", tenant_id, "contacts", "stats"])?;
        let response = self
            .authorize(self.client.get(url))
            .send()
            .await
            .map_err(transport)?;
        read_json(response).await
    }
}

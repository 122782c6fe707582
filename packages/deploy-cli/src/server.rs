//! HTTP API for UI callers.
//!
//! POST /deployments              start a deployment (preset or full config)
//! GET  /deployments?tenant_id=   list progress records
//! GET  /deployments/:id          current progress
//! DELETE /deployments/:id        cancel a running deployment, or forget a finished one
//! GET  /deployments/:id/stream   SSE of progress snapshots until completion
//! GET  /tenants/:tenant_id/statistics
//! GET  /health

use std::collections::HashMap;
use std::convert::Infallible;
use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Json, Router,
};
use futures::{future, Stream, StreamExt};
use media_deploy::{
    DeployError, DeploymentConfig, DeploymentId, DeploymentOrchestrator, DeploymentPreset,
    DeploymentProgress, DeploymentStatistics,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

#[derive(Clone)]
pub struct AppState {
    orchestrator: DeploymentOrchestrator,
    running: Arc<Mutex<HashMap<DeploymentId, CancellationToken>>>,
}

impl AppState {
    pub fn new(orchestrator: DeploymentOrchestrator) -> Self {
        Self {
            orchestrator,
            running: Arc::default(),
        }
    }

    fn running(&self) -> MutexGuard<'_, HashMap<DeploymentId, CancellationToken>> {
        self.running.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub fn router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/deployments", get(list_deployments).post(create_deployment))
        .route(
            "/deployments/:id",
            get(get_deployment).delete(delete_deployment),
        )
        .route("/deployments/:id/stream", get(stream_deployment))
        .route("/tenants/:tenant_id/statistics", get(tenant_statistics))
        .route("/health", get(health_handler))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

// ============================================================================
// Errors
// ============================================================================

#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct ApiError(#[from] DeployError);

type ApiResult<T> = Result<T, ApiError>;

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self.0 {
            DeployError::Config(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
            DeployError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            DeployError::Backend(_) => (StatusCode::BAD_GATEWAY, "BACKEND_ERROR"),
            DeployError::Phase(_) | DeployError::Task(_) => {
                tracing::error!(error = %self.0, "deployment error");
                (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR")
            }
        };

        let body = json!({
            "error": self.0.to_string(),
            "code": code,
        });

        (status, Json(body)).into_response()
    }
}

// ============================================================================
// Handlers
// ============================================================================

/// Either a named profile or a complete config.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum DeploymentRequest {
    Preset {
        preset: DeploymentPreset,
        tenant_id: String,
    },
    Custom(DeploymentConfig),
}

impl DeploymentRequest {
    fn into_config(self) -> DeploymentConfig {
        match self {
            DeploymentRequest::Preset { preset, tenant_id } => preset.config(tenant_id),
            DeploymentRequest::Custom(config) => config,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct DeploymentCreated {
    deployment_id: DeploymentId,
}

async fn create_deployment(
    State(state): State<AppState>,
    Json(request): Json<DeploymentRequest>,
) -> ApiResult<(StatusCode, Json<DeploymentCreated>)> {
    let handle = state.orchestrator.deploy(request.into_config(), None)?;
    let id = handle.id();
    state.running().insert(id, handle.cancellation_token());

    let waiter = state.clone();
    tokio::spawn(async move {
        match handle.wait().await {
            Ok(progress) => info!(
                deployment_id = %id,
                contacts = progress.contacts_discovered,
                "deployment finished"
            ),
            Err(e) => warn!(deployment_id = %id, error = %e, "deployment failed"),
        }
        waiter.running().remove(&id);
    });

    Ok((StatusCode::ACCEPTED, Json(DeploymentCreated { deployment_id: id })))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    tenant_id: Option<String>,
}

async fn list_deployments(
    State(state): State<AppState>,
    Query(query): Query<ListQuery>,
) -> Json<Vec<DeploymentProgress>> {
    Json(state.orchestrator.list_deployments(query.tenant_id.as_deref()))
}

async fn get_deployment(
    State(state): State<AppState>,
    Path(id): Path<DeploymentId>,
) -> ApiResult<Json<DeploymentProgress>> {
    state
        .orchestrator
        .get_deployment_progress(id)
        .map(Json)
        .ok_or(ApiError(DeployError::NotFound(id)))
}

async fn delete_deployment(
    State(state): State<AppState>,
    Path(id): Path<DeploymentId>,
) -> ApiResult<StatusCode> {
    let progress = state
        .orchestrator
        .get_deployment_progress(id)
        .ok_or(ApiError(DeployError::NotFound(id)))?;

    if !progress.is_completed() {
        if let Some(token) = state.running().get(&id) {
            info!(deployment_id = %id, "cancelling deployment");
            token.cancel();
            return Ok(StatusCode::ACCEPTED);
        }
    }

    state.orchestrator.discard_deployment(id);
    Ok(StatusCode::NO_CONTENT)
}

/// SSE of progress snapshots. Ends after the completed snapshot.
async fn stream_deployment(
    State(state): State<AppState>,
    Path(id): Path<DeploymentId>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let rx = state
        .orchestrator
        .subscribe(id)
        .ok_or(ApiError(DeployError::NotFound(id)))?;

    let events = WatchStream::new(rx)
        .scan(false, |finished, progress| {
            let next = (!*finished).then(|| {
                *finished = progress.is_completed();
                progress
            });
            future::ready(next)
        })
        .filter_map(|progress| async move {
            let name = if progress.is_completed() {
                "completed"
            } else {
                "progress"
            };
            Event::default()
                .event(name)
                .json_data(&progress)
                .ok()
                .map(Ok::<_, Infallible>)
        });

    Ok(Sse::new(events).keep_alive(KeepAlive::default()))
}

async fn tenant_statistics(
    State(state): State<AppState>,
    Path(tenant_id): Path<String>,
) -> ApiResult<Json<DeploymentStatistics>> {
    let stats = state.orchestrator.get_deployment_statistics(&tenant_id).await?;
    Ok(Json(stats))
}

#[derive(Serialize)]
pub struct HealthResponse {
    status: String,
    deployments: usize,
    running: usize,
    tracked_jobs: usize,
    catalog_size: usize,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        deployments: state.orchestrator.list_deployments(None).len(),
        running: state.running().len(),
        tracked_jobs: state.orchestrator.registry().len(),
        catalog_size: state.orchestrator.catalog().len(),
    })
}

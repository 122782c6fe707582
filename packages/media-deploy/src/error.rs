//! Typed errors for the deployment pipeline.
//!
//! Uses `thiserror` for library errors (not `anyhow`) so callers can tell an
//! isolated item failure from a pipeline-level failure.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

use crate::types::job::{JobId, JobStatus};
use crate::types::progress::PhaseKind;

/// Errors reported by a discovery backend.
#[derive(Debug, Clone, Error)]
pub enum BackendError {
    /// Request never reached the backend or the connection dropped
    #[error("backend transport error: {0}")]
    Transport(String),

    /// Backend refused the work request
    #[error("backend rejected request ({status}): {reason}")]
    Rejected { status: u16, reason: String },

    /// Backend answered with something we could not read
    #[error("invalid backend response: {0}")]
    InvalidResponse(String),

    /// Backend address could not be used
    #[error("invalid backend url: {0}")]
    InvalidUrl(String),
}

/// Errors from the job registry.
#[derive(Debug, Clone, Error)]
pub enum JobError {
    /// No job with this id was ever dispatched through the registry
    #[error("job not found: {0}")]
    NotFound(JobId),

    /// Job did not reach a terminal state in time. The job itself is left
    /// in whatever state it was in.
    #[error("job {job_id} still {status} after {waited:?}")]
    Timeout {
        job_id: JobId,
        status: JobStatus,
        waited: Duration,
    },

    /// Compare-and-set transition did not match the stored status
    #[error("job {job_id}: cannot move from {actual} (expected {expected}) to {next}")]
    InvalidTransition {
        job_id: JobId,
        expected: JobStatus,
        actual: JobStatus,
        next: JobStatus,
    },
}

/// Invalid deployment configuration. Raised before any batch is dispatched.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("tenant id must not be empty")]
    EmptyTenant,

    #[error("batch size must be at least 1")]
    ZeroBatchSize,

    #[error("max concurrent jobs must be at least 1")]
    ZeroConcurrency,

    #[error("priority order must name at least one tier")]
    EmptyPriorityOrder,

    #[error("duplicate entry in {field}: {value}")]
    Duplicate { field: &'static str, value: String },

    #[error("invalid catalog: {0}")]
    Catalog(String),
}

/// An unexpected failure while orchestrating a phase (not one item failing).
#[derive(Debug, Clone, Error)]
pub enum PhaseError {
    /// A job vanished from the registry mid-phase
    #[error("{phase} phase lost track of a job: {source}")]
    Registry {
        phase: PhaseKind,
        #[source]
        source: JobError,
    },

    /// The phase task panicked
    #[error("{phase} phase crashed: {message}")]
    Crashed { phase: PhaseKind, message: String },

    /// The deployment was cancelled while the phase was running
    #[error("{phase} phase cancelled")]
    Cancelled { phase: PhaseKind },
}

impl PhaseError {
    pub fn phase(&self) -> PhaseKind {
        match self {
            PhaseError::Registry { phase, .. }
            | PhaseError::Crashed { phase, .. }
            | PhaseError::Cancelled { phase } => *phase,
        }
    }
}

/// Errors surfaced by the deployment orchestrator.
#[derive(Debug, Clone, Error)]
pub enum DeployError {
    #[error("invalid deployment config: {0}")]
    Config(#[from] ConfigError),

    #[error("deployment aborted: {0}")]
    Phase(#[from] PhaseError),

    #[error("deployment not found: {0}")]
    NotFound(Uuid),

    #[error("deployment task failed: {0}")]
    Task(String),

    #[error(transparent)]
    Backend(#[from] BackendError),
}

/// Result type alias for backend operations.
pub type BackendResult<T> = std::result::Result<T, BackendError>;

/// Result type alias for deployment operations.
pub type Result<T> = std::result::Result<T, DeployError>;

//! Job model for delegated discovery work.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Local id of a job tracked by the registry.
pub type JobId = Uuid;

/// Id the discovery backend assigned to a submitted job.
pub type BackendJobId = String;

/// Id of a discovered contact record (owned by the backend).
pub type ContactId = String;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    Scrape,
    Verify,
    Categorize,
    Monitor,
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobKind::Scrape => "scrape",
            JobKind::Verify => "verify",
            JobKind::Categorize => "categorize",
            JobKind::Monitor => "monitor",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
}

impl JobStatus {
    /// Completed and failed jobs never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Transitions only move forward along pending -> running -> {completed, failed}.
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        matches!(
            (self, next),
            (JobStatus::Pending, JobStatus::Running)
                | (JobStatus::Pending, JobStatus::Failed)
                | (JobStatus::Running, JobStatus::Completed)
                | (JobStatus::Running, JobStatus::Failed)
        )
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Completed => "completed",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

// ============================================================================
// Requests
// ============================================================================

/// A unit of work handed to the discovery backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobRequest {
    Scrape {
        url: String,
        tenant_id: String,
    },
    Verify {
        contact_ids: Vec<ContactId>,
        tenant_id: String,
    },
    Categorize {
        contact_ids: Vec<ContactId>,
        tenant_id: String,
    },
    Monitor {
        tenant_id: String,
    },
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Scrape { .. } => JobKind::Scrape,
            JobRequest::Verify { .. } => JobKind::Verify,
            JobRequest::Categorize { .. } => JobKind::Categorize,
            JobRequest::Monitor { .. } => JobKind::Monitor,
        }
    }

    pub fn tenant_id(&self) -> &str {
        match self {
            JobRequest::Scrape { tenant_id, .. }
            | JobRequest::Verify { tenant_id, .. }
            | JobRequest::Categorize { tenant_id, .. }
            | JobRequest::Monitor { tenant_id } => tenant_id,
        }
    }
}

// ============================================================================
// Job Model
// ============================================================================

/// Local record of one delegated unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub kind: JobKind,
    pub status: JobStatus,
    /// 0-100
    pub progress: u8,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job.
    pub fn new(kind: JobKind) -> Self {
        Self {
            id: Uuid::now_v7(),
            kind,
            status: JobStatus::Pending,
            progress: 0,
            result: None,
            error: None,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    /// Move to `next` if the transition is allowed. Returns whether it applied.
    pub fn transition(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        if next.is_terminal() {
            self.completed_at = Some(Utc::now());
        }
        true
    }

    /// Record a successful outcome. No-op once terminal.
    pub fn complete(&mut self, result: Option<serde_json::Value>) -> bool {
        if !self.transition(JobStatus::Completed) {
            return false;
        }
        self.progress = 100;
        self.result = result;
        true
    }

    /// Record a failed outcome. No-op once terminal.
    pub fn fail(&mut self, error: impl Into<String>) -> bool {
        if !self.transition(JobStatus::Failed) {
            return false;
        }
        self.error = Some(error.into());
        true
    }

    /// Update reported progress while the job is still live.
    pub fn set_progress(&mut self, progress: u8) -> bool {
        if self.status.is_terminal() {
            return false;
        }
        self.progress = progress.min(100);
        true
    }
}

/// The backend's view of a job, as returned by a status poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackendJob {
    pub id: BackendJobId,
    pub status: JobStatus,
    #[serde(default)]
    pub progress: u8,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// Payload shape shared by scrape, verify and categorize results.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactBatchResult {
    #[serde(default)]
    pub contact_ids: Vec<ContactId>,
}

impl ContactBatchResult {
    /// Read the contact ids out of a job result. An absent result is an empty batch.
    pub fn from_job(job: &Job) -> Result<Self, serde_json::Error> {
        match &job.result {
            Some(value) => serde_json::from_value(value.clone()),
            None => Ok(Self::default()),
        }
    }
}

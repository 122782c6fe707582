//! Progress reporting for running deployments.
//!
//! Every deployment has one stored [`DeploymentProgress`]. Updates go
//! through [`ProgressReporter::update`], which enforces the record's
//! invariants and then publishes an immutable snapshot two ways:
//!
//! - to the deployment's observer callback, invoked synchronously after
//!   the store lock is released
//! - to a `tokio::sync::watch` channel for streaming consumers
//!
//! Records stay in memory until discarded.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tracing::debug;

use crate::types::progress::{DeploymentId, DeploymentPhase, DeploymentProgress};

/// Receives a snapshot after every progress update.
pub trait ProgressObserver: Send + Sync {
    fn on_progress(&self, progress: &DeploymentProgress);
}

impl<F> ProgressObserver for F
where
    F: Fn(&DeploymentProgress) + Send + Sync,
{
    fn on_progress(&self, progress: &DeploymentProgress) {
        self(progress)
    }
}

struct Entry {
    progress: DeploymentProgress,
    observer: Option<Arc<dyn ProgressObserver>>,
    sender: watch::Sender<DeploymentProgress>,
}

/// In-memory store of deployment progress records.
#[derive(Clone, Default)]
pub struct ProgressReporter {
    entries: Arc<RwLock<HashMap<DeploymentId, Entry>>>,
}

impl ProgressReporter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start tracking a deployment and publish its initial state.
    pub fn register(
        &self,
        progress: DeploymentProgress,
        observer: Option<Arc<dyn ProgressObserver>>,
    ) -> DeploymentProgress {
        let snapshot = progress.clone();
        let (sender, _) = watch::channel(progress.clone());

        self.write().insert(
            progress.deployment_id,
            Entry {
                progress,
                observer: observer.clone(),
                sender,
            },
        );

        if let Some(observer) = observer {
            observer.on_progress(&snapshot);
        }
        snapshot
    }

    pub fn get(&self, id: DeploymentId) -> Option<DeploymentProgress> {
        self.read().get(&id).map(|entry| entry.progress.clone())
    }

    /// Stream of snapshots, starting with the current one.
    pub fn subscribe(&self, id: DeploymentId) -> Option<watch::Receiver<DeploymentProgress>> {
        self.read().get(&id).map(|entry| entry.sender.subscribe())
    }

    /// Apply `f` to the record and publish the result.
    ///
    /// Ignored (returns `None`) for unknown or completed deployments. The
    /// phase never moves backward and `completed + failed` never exceeds the
    /// target total, whatever `f` does.
    pub fn update(
        &self,
        id: DeploymentId,
        f: impl FnOnce(&mut DeploymentProgress),
    ) -> Option<DeploymentProgress> {
        let (snapshot, observer) = {
            let mut entries = self.write();
            let entry = entries.get_mut(&id)?;
            if entry.progress.is_completed() {
                return None;
            }

            let previous_phase = entry.progress.current_phase;
            let mut next = entry.progress.clone();
            f(&mut next);

            next.current_phase = next.current_phase.max(previous_phase);
            next.completed_targets = next.completed_targets.min(next.total_targets);
            next.failed_targets = next
                .failed_targets
                .min(next.total_targets - next.completed_targets);
            next.phase_progress = next.phase_progress.min(100);
            next.last_update = Utc::now();

            entry.progress = next.clone();
            entry.sender.send_replace(next.clone());
            (next, entry.observer.clone())
        };

        if let Some(observer) = observer {
            observer.on_progress(&snapshot);
        }
        Some(snapshot)
    }

    /// Move to `phase` with a fresh phase progress counter.
    pub fn enter_phase(&self, id: DeploymentId, phase: DeploymentPhase) -> Option<DeploymentProgress> {
        debug!(deployment_id = %id, phase = %phase, "entering phase");
        self.update(id, |p| {
            p.current_phase = phase;
            p.phase_progress = 0;
            p.active_jobs = 0;
        })
    }

    /// Mark the deployment completed. An aborted deployment keeps the
    /// phase progress it had reached.
    pub fn complete(&self, id: DeploymentId, aborted: bool) -> Option<DeploymentProgress> {
        self.update(id, |p| {
            p.current_phase = DeploymentPhase::Completed;
            p.active_jobs = 0;
            p.estimated_completion_time = Utc::now();
            if !aborted {
                p.phase_progress = 100;
            }
        })
    }

    /// Drop a deployment's record. Returns the last snapshot.
    pub fn discard(&self, id: DeploymentId) -> Option<DeploymentProgress> {
        self.write().remove(&id).map(|entry| entry.progress)
    }

    /// Snapshots of every tracked deployment, oldest first, optionally for
    /// one tenant.
    pub fn list(&self, tenant_id: Option<&str>) -> Vec<DeploymentProgress> {
        let mut list: Vec<DeploymentProgress> = self
            .read()
            .values()
            .filter(|entry| tenant_id.map_or(true, |t| entry.progress.tenant_id == t))
            .map(|entry| entry.progress.clone())
            .collect();
        list.sort_by_key(|p| p.start_time);
        list
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<DeploymentId, Entry>> {
        self.entries.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<DeploymentId, Entry>> {
        self.entries.write().unwrap_or_else(|e| e.into_inner())
    }
}

/// Estimate when scraping finishes.
///
/// Before any batch has settled the estimate is `per_batch` for every
/// batch. Afterwards the observed average batch time is extrapolated over
/// the remaining batches. Estimates past the representable range saturate
/// at [`DateTime::<Utc>::MAX_UTC`].
pub fn estimate_completion(
    start: DateTime<Utc>,
    now: DateTime<Utc>,
    batches_done: usize,
    total_batches: usize,
    per_batch: Duration,
) -> DateTime<Utc> {
    let remaining = u32::try_from(total_batches.saturating_sub(batches_done)).unwrap_or(u32::MAX);

    let average = if batches_done == 0 {
        per_batch
    } else {
        let elapsed = (now - start).to_std().unwrap_or_default();
        elapsed / u32::try_from(batches_done).unwrap_or(u32::MAX)
    };

    average
        .checked_mul(remaining)
        .and_then(|left| chrono::Duration::from_std(left).ok())
        .and_then(|left| now.checked_add_signed(left))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}

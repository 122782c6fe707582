//! Batch scheduling with inter-batch throttling.
//!
//! Items are processed one batch at a time. Inside a batch every item runs
//! concurrently (capped by `max_in_flight`) and the batch settles when all
//! of its items have an outcome. Between batches the scheduler sleeps for
//! the configured delay, never after the last batch.
//!
//! A failing item is recorded and the rest of its batch carries on. A
//! panicking action is not caught here: it unwinds into the caller.

use std::future::Future;
use std::time::Duration;

use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// An item that could not be processed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFailure {
    /// Label of the failed item (url, sub-batch name, ...)
    pub item: String,
    pub error: String,
}

impl ItemFailure {
    pub fn new(item: impl Into<String>, error: impl ToString) -> Self {
        Self {
            item: item.into(),
            error: error.to_string(),
        }
    }
}

/// Outcome of one settled batch.
#[derive(Debug)]
pub struct BatchOutcome<O> {
    /// Zero-based batch index
    pub index: usize,
    pub total_batches: usize,
    /// Items settled so far, this batch included
    pub processed: usize,
    pub total_items: usize,
    pub outputs: Vec<O>,
    pub failures: Vec<ItemFailure>,
}

/// Scheduler notifications, delivered in order on the scheduling task.
#[derive(Debug)]
pub enum BatchEvent<'a, O> {
    Started {
        index: usize,
        total_batches: usize,
        size: usize,
    },
    Settled(&'a BatchOutcome<O>),
}

/// Everything a scheduler run produced.
#[derive(Debug)]
pub struct BatchReport<O> {
    pub outputs: Vec<O>,
    pub failures: Vec<ItemFailure>,
    /// Batches that were dispatched
    pub batches: usize,
    /// Stopped early by the cancellation token
    pub cancelled: bool,
}

impl<O> Default for BatchReport<O> {
    fn default() -> Self {
        Self {
            outputs: Vec::new(),
            failures: Vec::new(),
            batches: 0,
            cancelled: false,
        }
    }
}

impl<O> BatchReport<O> {
    pub fn successes(&self) -> usize {
        self.outputs.len()
    }

    pub fn processed(&self) -> usize {
        self.outputs.len() + self.failures.len()
    }
}

/// Split `items` into consecutive groups of `batch_size` (the last may be
/// shorter). A zero batch size is treated as one.
pub fn partition<T>(items: Vec<T>, batch_size: usize) -> Vec<Vec<T>> {
    let batch_size = batch_size.max(1);
    let mut batches = Vec::with_capacity(items.len().div_ceil(batch_size));
    let mut iter = items.into_iter().peekable();

    while iter.peek().is_some() {
        batches.push(iter.by_ref().take(batch_size).collect());
    }

    batches
}

/// Runs items batch by batch.
#[derive(Debug, Clone)]
pub struct BatchScheduler {
    batch_size: usize,
    delay: Duration,
    max_in_flight: usize,
    cancel: Option<CancellationToken>,
}

impl BatchScheduler {
    pub fn new(batch_size: usize, delay: Duration) -> Self {
        Self {
            batch_size: batch_size.max(1),
            delay,
            max_in_flight: usize::MAX,
            cancel: None,
        }
    }

    /// Cap how many items of one batch run at the same time.
    pub fn with_max_in_flight(mut self, max: usize) -> Self {
        self.max_in_flight = max.max(1);
        self
    }

    /// Stop scheduling new batches once `token` is cancelled. Work already
    /// started is allowed to finish.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Partition `items` by the configured batch size and run them.
    pub async fn run<T, O, F, Fut, E>(&self, items: Vec<T>, action: F, on_event: E) -> BatchReport<O>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<O, ItemFailure>>,
        E: FnMut(BatchEvent<'_, O>),
    {
        self.run_batches(partition(items, self.batch_size), action, on_event)
            .await
    }

    /// Run an already grouped batch plan.
    pub async fn run_batches<T, O, F, Fut, E>(
        &self,
        batches: Vec<Vec<T>>,
        action: F,
        mut on_event: E,
    ) -> BatchReport<O>
    where
        F: Fn(T) -> Fut,
        Fut: Future<Output = Result<O, ItemFailure>>,
        E: FnMut(BatchEvent<'_, O>),
    {
        let total_batches = batches.len();
        let total_items = batches.iter().map(Vec::len).sum();
        let mut report = BatchReport::default();
        let mut processed = 0;

        for (index, batch) in batches.into_iter().enumerate() {
            if self.is_cancelled() {
                debug!(batch = index, "scheduler cancelled before batch");
                report.cancelled = true;
                break;
            }

            let size = batch.len();
            on_event(BatchEvent::Started {
                index,
                total_batches,
                size,
            });

            let width = size.min(self.max_in_flight).max(1);
            let results: Vec<Result<O, ItemFailure>> = stream::iter(batch.into_iter().map(&action))
                .buffer_unordered(width)
                .collect()
                .await;

            let mut outcome = BatchOutcome {
                index,
                total_batches,
                processed: 0,
                total_items,
                outputs: Vec::with_capacity(size),
                failures: Vec::new(),
            };
            for result in results {
                match result {
                    Ok(output) => outcome.outputs.push(output),
                    Err(failure) => outcome.failures.push(failure),
                }
            }
            processed += size;
            outcome.processed = processed;
            report.batches += 1;

            debug!(
                batch = index + 1,
                total_batches,
                succeeded = outcome.outputs.len(),
                failed = outcome.failures.len(),
                "batch settled"
            );
            on_event(BatchEvent::Settled(&outcome));

            report.outputs.append(&mut outcome.outputs);
            report.failures.append(&mut outcome.failures);

            if index + 1 < total_batches && !self.pause().await {
                report.cancelled = true;
                break;
            }
        }

        report
    }

    /// Sleep for the inter-batch delay. Returns false if cancelled meanwhile.
    async fn pause(&self) -> bool {
        if self.delay.is_zero() {
            return !self.is_cancelled();
        }

        match &self.cancel {
            Some(token) => {
                tokio::select! {
                    _ = token.cancelled() => false,
                    _ = tokio::time::sleep(self.delay) => true,
                }
            }
            None => {
                tokio::time::sleep(self.delay).await;
                true
            }
        }
    }

    fn is_cancelled(&self) -> bool {
        self.cancel.as_ref().is_some_and(|t| t.is_cancelled())
    }
}

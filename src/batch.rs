//! Per-image bookkeeping for running many independent engine invocations.
//!
//! Each image is processed on tokio's blocking pool (the engine is synchronous
//! CPU work) with at most `jobs` images in flight. Only images still pending are
//! picked up by [`Batch::run`], so [`Batch::retry_failed`] re-invokes the engine
//! for failed images alone.

use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{self, JoinError, JoinSet};
use tracing::{debug, info, warn};

use crate::error::MorphoResult;
use crate::models::ProcessingOutcome;
use crate::pipeline::{Engine, ProcessingRequest};

/// Item index, engine result from the blocking pool, elapsed seconds
type Finished = (usize, Result<MorphoResult<ProcessingOutcome>, JoinError>, f64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ImageStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

/// Aggregate state of a whole batch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Failed,
    /// Finished with both successes and failures
    Partial,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchItem {
    pub label: String,
    pub order_index: usize,
    pub status: ImageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub outcome: Option<ProcessingOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time_seconds: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct BatchProgress {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
    pub pending: usize,
    pub status: BatchStatus,
    /// Finished images over total, 0-100
    pub progress_percentage: f64,
    /// Completed over finished images, 0-100
    pub success_rate: f64,
}

pub struct Batch {
    items: Vec<BatchItem>,
    requests: Vec<Arc<ProcessingRequest>>,
}

impl Batch {
    pub fn new(requests: impl IntoIterator<Item = (String, ProcessingRequest)>) -> Self {
        let (items, requests) = requests
            .into_iter()
            .enumerate()
            .map(|(order_index, (label, request))| {
                let item = BatchItem {
                    label,
                    order_index,
                    status: ImageStatus::Pending,
                    outcome: None,
                    error_message: None,
                    processing_time_seconds: None,
                };
                (item, Arc::new(request))
            })
            .unzip();
        Self { items, requests }
    }

    pub fn items(&self) -> &[BatchItem] {
        &self.items
    }

    pub fn into_items(self) -> Vec<BatchItem> {
        self.items
    }

    pub fn progress(&self) -> BatchProgress {
        let total = self.items.len();
        let count = |status| self.items.iter().filter(|i| i.status == status).count();
        let completed = count(ImageStatus::Completed);
        let failed = count(ImageStatus::Failed);
        let pending = total - completed - failed;
        let finished = completed + failed;

        let status = if total == 0 || (finished == 0 && pending == total && count(ImageStatus::Processing) == 0) {
            BatchStatus::Pending
        } else if pending > 0 {
            BatchStatus::Processing
        } else if failed == 0 {
            BatchStatus::Completed
        } else if completed == 0 {
            BatchStatus::Failed
        } else {
            BatchStatus::Partial
        };

        BatchProgress {
            total,
            completed,
            failed,
            pending,
            status,
            progress_percentage: percentage(finished, total),
            success_rate: percentage(completed, finished),
        }
    }

    /// Process every pending image with at most `jobs` running at once
    pub async fn run(&mut self, engine: Arc<Engine>, jobs: usize) -> BatchProgress {
        let permits = Arc::new(Semaphore::new(jobs.max(1)));
        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let mut indices = HashMap::new();

        for (index, item) in self.items.iter_mut().enumerate() {
            if item.status != ImageStatus::Pending {
                continue;
            }
            item.status = ImageStatus::Processing;
            let engine = Arc::clone(&engine);
            let request = Arc::clone(&self.requests[index]);
            let permits = Arc::clone(&permits);

            let handle = tasks.spawn(async move {
                let _permit = permits.acquire_owned().await;
                let started = Instant::now();
                let result = task::spawn_blocking(move || engine.process(&request)).await;
                (index, result, started.elapsed().as_secs_f64())
            });
            indices.insert(handle.id(), index);
        }

        while let Some(joined) = tasks.join_next_with_id().await {
            self.settle(joined, &indices);
        }

        let progress = self.progress();
        info!(
            total = progress.total,
            completed = progress.completed,
            failed = progress.failed,
            success_rate = progress.success_rate,
            "batch finished"
        );
        progress
    }

    fn settle(&mut self, joined: Result<(task::Id, Finished), JoinError>, indices: &HashMap<task::Id, usize>) {
        let (index, result, elapsed) = match joined {
            Ok((_, finished)) => finished,
            Err(join_error) => {
                // the outer task itself was lost; its item must not stay in flight
                let Some(item) = indices.get(&join_error.id()).and_then(|&i| self.items.get_mut(i)) else {
                    warn!(error = %join_error, "batch task lost with unknown item");
                    return;
                };
                warn!(label = %item.label, error = %join_error, "batch task lost");
                item.status = ImageStatus::Failed;
                item.error_message = Some(format!("processing task failed: {join_error}"));
                return;
            }
        };

        let item = &mut self.items[index];
        item.processing_time_seconds = Some(elapsed);
        match result {
            Ok(outcome) => record(item, outcome),
            Err(join_error) => {
                item.status = ImageStatus::Failed;
                item.error_message = Some(format!("processing task failed: {join_error}"));
            }
        }
        debug!(label = %item.label, status = ?item.status, elapsed, "image finished");
    }

    /// Reset failed images to pending and run them again
    pub async fn retry_failed(&mut self, engine: Arc<Engine>, jobs: usize) -> BatchProgress {
        let mut retried = 0usize;
        for item in self.items.iter_mut().filter(|i| i.status == ImageStatus::Failed) {
            item.status = ImageStatus::Pending;
            item.outcome = None;
            item.error_message = None;
            item.processing_time_seconds = None;
            retried += 1;
        }
        info!(retried, "retrying failed images");
        self.run(engine, jobs).await
    }
}

fn record(item: &mut BatchItem, result: MorphoResult<ProcessingOutcome>) {
    match result {
        Ok(outcome) if outcome.success => {
            item.status = ImageStatus::Completed;
            item.outcome = Some(outcome);
        }
        Ok(outcome) => {
            item.status = ImageStatus::Failed;
            item.error_message = outcome.error.as_ref().map(ToString::to_string);
            item.outcome = Some(outcome);
        }
        Err(err) => {
            item.status = ImageStatus::Failed;
            item.error_message = Some(err.to_string());
        }
    }
}

fn percentage(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::DynamicImage;

    #[tokio::test]
    async fn test_lost_task_marks_item_failed() {
        let mut batch = Batch::new(vec![(
            "goat.png".to_string(),
            ProcessingRequest::from_image(DynamicImage::new_rgb8(8, 8)),
        )]);
        batch.items[0].status = ImageStatus::Processing;

        let mut tasks: JoinSet<Finished> = JoinSet::new();
        let handle = tasks.spawn(std::future::pending::<Finished>());
        let indices = HashMap::from([(handle.id(), 0usize)]);
        handle.abort();

        while let Some(joined) = tasks.join_next_with_id().await {
            assert!(joined.is_err());
            batch.settle(joined, &indices);
        }

        assert_eq!(batch.items()[0].status, ImageStatus::Failed);
        assert!(batch.items()[0].error_message.is_some());
        let progress = batch.progress();
        assert_eq!(progress.failed, 1);
        assert_eq!(progress.pending, 0);
        assert_eq!(progress.status, BatchStatus::Failed);
    }

    #[test]
    fn test_progress_of_untouched_batch_is_pending() {
        let batch = Batch::new(vec![(
            "goat.png".to_string(),
            ProcessingRequest::from_image(DynamicImage::new_rgb8(8, 8)),
        )]);
        let progress = batch.progress();
        assert_eq!(progress.status, BatchStatus::Pending);
        assert_eq!(progress.pending, 1);
        assert_eq!(progress.progress_percentage, 0.0);
    }
}

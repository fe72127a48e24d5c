//! Batch scheduling over retry-eligible documents.
//!
//! One batch run selects a bounded set of documents whose status allows a
//! retry (`pending`, `text_extraction_failed`, `indexing_failed`), oldest
//! first, and advances each concurrently and independently: one document's
//! failure never fails the batch for the others. Documents past their
//! attempt budget are left alone until someone triggers them explicitly.
//!
//! `run_scheduled` wires the same batch run onto a cron expression for the
//! long-running `shikin schedule` command; deployments that prefer an
//! external cron hit the HTTP trigger instead.

use anyhow::Result;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_cron_scheduler::{Job, JobScheduler};
use tracing::{error, info};

use crate::models::{DocumentStatus, ItemOutcome};
use crate::pipeline::{AdvanceOptions, Pipeline};

#[derive(Debug, Serialize)]
pub struct BatchSummary {
    pub selected: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<ItemOutcome>,
}

/// Select and process one batch. Returns a summary even when every item
/// fails; only a selection-query error propagates.
pub async fn run_batch(pipeline: Arc<Pipeline>) -> Result<BatchSummary> {
    let scheduler = &pipeline.config().scheduler;

    let ids: Vec<String> = sqlx::query_scalar(
        "SELECT id FROM documents WHERE status IN (?, ?, ?) AND attempt_count < ? \
         ORDER BY uploaded_at ASC LIMIT ?",
    )
    .bind(DocumentStatus::Pending.as_str())
    .bind(DocumentStatus::TextExtractionFailed.as_str())
    .bind(DocumentStatus::IndexingFailed.as_str())
    .bind(scheduler.max_attempts)
    .bind(scheduler.batch_size as i64)
    .fetch_all(pipeline.pool())
    .await?;

    if ids.is_empty() {
        info!("no documents to process in the queue");
        return Ok(BatchSummary {
            selected: 0,
            succeeded: 0,
            failed: 0,
            outcomes: Vec::new(),
        });
    }

    info!(count = ids.len(), "processing document batch");

    let mut tasks = JoinSet::new();
    for id in ids.iter().cloned() {
        let pipeline = pipeline.clone();
        tasks.spawn(async move { pipeline.advance(&id, AdvanceOptions::default()).await });
    }

    let selected = ids.len();
    let mut outcomes = Vec::with_capacity(selected);
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(outcome) => outcomes.push(outcome),
            // A panicked task still must not sink the batch.
            Err(e) => {
                error!(error = %e, "batch worker task failed");
                outcomes.push(ItemOutcome::failed("unknown", e.to_string()));
            }
        }
    }

    let succeeded = outcomes.iter().filter(|o| o.success).count();
    let failed = outcomes.len() - succeeded;
    info!(selected, succeeded, failed, "batch finished");

    Ok(BatchSummary {
        selected,
        succeeded,
        failed,
        outcomes,
    })
}

/// Run batches on the configured cron expression until ctrl-c.
pub async fn run_scheduled(pipeline: Arc<Pipeline>) -> Result<()> {
    let cron = pipeline.config().scheduler.cron.clone();
    let scheduler = JobScheduler::new().await?;

    let job_pipeline = pipeline.clone();
    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pipeline = job_pipeline.clone();
        Box::pin(async move {
            if let Err(e) = run_batch(pipeline).await {
                error!(error = %e, "scheduled batch run failed");
            }
        })
    })?;

    scheduler.add(job).await?;
    scheduler.start().await?;
    info!(cron = %cron, "batch scheduler started");

    tokio::signal::ctrl_c().await?;
    info!("shutting down batch scheduler");
    Ok(())
}

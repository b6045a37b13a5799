use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use futures::FutureExt;
use metrics::counter;
use serde::Serialize;
use std::any::Any;
use std::io::{Read, Write};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio::time::Instant;
use uuid::Uuid;

use crate::config::BatchConfig;
use crate::engine::Classifier;
use crate::types::{OUTPUT_HEADER, OutputRecord};
use crate::validator::UrlValidator;

#[derive(Debug)]
struct Job {
    index: usize,
    url: String,
}

#[derive(Debug)]
struct Completion {
    index: usize,
    url: String,
    outcome: std::result::Result<OutputRecord, String>,
}

/// Counters for one `run`.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub elapsed_ms: u64,
    pub rows_read: usize,
    pub rows_skipped: usize,
    pub rows_written: usize,
    pub invalid_urls: usize,
    pub classification_failures: usize,
    pub task_failures: usize,
}

impl RunSummary {
    fn new() -> Self {
        Self {
            run_id: Uuid::new_v4(),
            started_at: Utc::now(),
            elapsed_ms: 0,
            rows_read: 0,
            rows_skipped: 0,
            rows_written: 0,
            invalid_urls: 0,
            classification_failures: 0,
            task_failures: 0,
        }
    }
}

/// Drives a batch: reads URLs, fans them out to a worker pool and writes
/// one output row per submitted URL as results come back.
#[derive(Clone)]
pub struct BatchProcessor {
    config: BatchConfig,
    classifier: Arc<dyn Classifier>,
    validator: Arc<dyn UrlValidator>,
}

impl BatchProcessor {
    pub fn new(
        config: BatchConfig,
        classifier: Arc<dyn Classifier>,
        validator: Arc<dyn UrlValidator>,
    ) -> Self {
        Self {
            config,
            classifier,
            validator,
        }
    }

    pub async fn validate_reachable(&self, url: &str) -> bool {
        self.validator.is_reachable(url).await
    }

    #[tracing::instrument(skip(self))]
    pub async fn process_one(&self, url: &str) -> OutputRecord {
        if self.config.validate_urls && !self.validate_reachable(url).await {
            counter!("invalid_urls_total").increment(1);
            return OutputRecord::invalid_url(url);
        }

        let classification = self.classifier.classify(url).await;
        OutputRecord::from_classification(url, &classification)
    }

    /// Classifies every URL in `input` and writes the results to `output`.
    ///
    /// Only I/O errors on the two streams abort the run; every other failure
    /// ends up as a row in the output.
    #[tracing::instrument(skip_all, fields(workers = self.config.workers))]
    pub async fn run<R: Read, W: Write>(&self, input: R, output: W) -> Result<RunSummary> {
        let started = Instant::now();
        let mut summary = RunSummary::new();
        tracing::info!(run_id = %summary.run_id, "Starting batch run");

        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(output);
        writer
            .write_record(OUTPUT_HEADER)
            .context("Failed to write output header")?;

        let jobs = self.read_jobs(input, &mut summary)?;
        let submitted = jobs.len();
        counter!("images_submitted_total").increment(submitted as u64);
        tracing::info!(rows = submitted, "Submitting rows for classification");

        let (job_tx, job_rx) = flume::unbounded::<Job>();
        for job in jobs {
            // The receiver is held right here, so the queue cannot be closed.
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        let (done_tx, done_rx) = flume::unbounded::<Completion>();
        let mut workers = JoinSet::new();
        for worker in 0..self.config.workers.max(1) {
            let processor = self.clone();
            let jobs = job_rx.clone();
            let done = done_tx.clone();
            workers.spawn(async move {
                while let Ok(job) = jobs.recv_async().await {
                    tracing::debug!(worker, index = job.index, url = %job.url, "Worker picked up row");
                    let outcome = AssertUnwindSafe(processor.process_one(&job.url))
                        .catch_unwind()
                        .await
                        .map_err(panic_message);
                    let completion = Completion {
                        index: job.index,
                        url: job.url,
                        outcome,
                    };
                    if done.send_async(completion).await.is_err() {
                        break;
                    }
                }
            });
        }
        drop(done_tx);
        drop(job_rx);

        // Rows are written synchronously on the driver. Each write is one short
        // buffered CSV line, and only the driver touches the writer.
        while let Ok(completion) = done_rx.recv_async().await {
            let record = match completion.outcome {
                Ok(record) => record,
                Err(reason) => {
                    counter!("worker_task_failures_total").increment(1);
                    tracing::error!(
                        url = %completion.url,
                        index = completion.index,
                        error = %reason,
                        "Error processing row"
                    );
                    summary.task_failures += 1;
                    OutputRecord::processing_error(&completion.url)
                }
            };

            if record.is_invalid_url() {
                summary.invalid_urls += 1;
            } else if record.is_classification_failure() {
                summary.classification_failures += 1;
            }

            writer
                .write_record(record.as_row())
                .with_context(|| format!("Failed to write output row for {}", record.image_url))?;
            summary.rows_written += 1;
            counter!("images_processed_total").increment(1);
            tracing::info!(url = %record.image_url, "Processed image");
        }

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                tracing::error!(error = %e, "Worker task ended abnormally");
            }
        }

        writer.flush().context("Failed to flush output")?;

        summary.elapsed_ms = started.elapsed().as_millis() as u64;
        if summary.rows_written != submitted {
            tracing::warn!(
                submitted,
                written = summary.rows_written,
                "Output row count differs from submitted rows"
            );
        }
        tracing::info!(
            rows_written = summary.rows_written,
            elapsed_ms = summary.elapsed_ms,
            "Batch run finished"
        );
        Ok(summary)
    }

    fn read_jobs<R: Read>(&self, input: R, summary: &mut RunSummary) -> Result<Vec<Job>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_reader(input);

        let mut jobs = Vec::new();
        for (index, row) in reader.records().enumerate() {
            summary.rows_read += 1;
            let row = match row {
                Ok(row) => row,
                Err(e) if e.is_io_error() => {
                    return Err(e).context("Failed to read input");
                }
                Err(e) => {
                    tracing::warn!(index, error = %e, "Skipping unreadable row");
                    summary.rows_skipped += 1;
                    continue;
                }
            };

            // Blank lines never get here: the reader drops them before they
            // become records, so they count neither as read nor as skipped.
            match row.get(0) {
                Some(url) if !url.is_empty() => jobs.push(Job {
                    index,
                    url: url.to_string(),
                }),
                _ => {
                    tracing::warn!(index, "Found empty URL, skipping");
                    summary.rows_skipped += 1;
                }
            }
        }

        Ok(jobs)
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "task panicked".to_string()
    }
}

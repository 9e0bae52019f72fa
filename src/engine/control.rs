//! Control plane: one batch of queue work per invocation.
//!
//! Reap stale claims, then claim and run ready jobs oldest first until the
//! queue is empty or the per-run cap is reached. Each job ends in done or
//! error; one job failing never stops the batch.

use opentelemetry::KeyValue;
use std::sync::Arc;
use std::time::Instant;
use tracing::{Instrument, debug, error, info, warn};

use crate::error::Result;
use crate::model::Job;
use crate::queue::{JobRef, Outcome, QueueState, QueueStore, ReapAction};
use crate::telemetry::metrics;
use crate::telemetry::work::{record_state_transition, start_job_span};

use super::pipeline::{Delivery, Pipeline};

/// Batch limits and reaper policy.
#[derive(Debug, Clone)]
pub struct ControlConfig {
    /// Upper bound on jobs attempted per run.
    pub max_per_run: usize,
    /// Zero or less disables the reaper.
    pub stale_processing_minutes: i64,
    pub stale_processing_action: ReapAction,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            max_per_run: 5,
            stale_processing_minutes: 0,
            stale_processing_action: ReapAction::Requeue,
        }
    }
}

/// Counts for one batch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub reaped: usize,
    /// Jobs successfully claimed by this run.
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
    /// Claims lost to another consumer.
    pub skipped: usize,
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "reaped={} attempted={} succeeded={} failed={} skipped={}",
            self.reaped, self.attempted, self.succeeded, self.failed, self.skipped
        )
    }
}

pub struct ControlPlane {
    queue: Arc<dyn QueueStore>,
    pipeline: Pipeline,
    config: ControlConfig,
}

impl ControlPlane {
    pub fn new(queue: Arc<dyn QueueStore>, pipeline: Pipeline, config: ControlConfig) -> Self {
        Self {
            queue,
            pipeline,
            config,
        }
    }

    /// Run one batch.
    ///
    /// Only queue-level failures (reaping, listing) are returned;
    /// per-job failures are recorded by moving the job to `error`.
    pub async fn run_once(&self) -> Result<RunSummary> {
        let mut summary = RunSummary {
            reaped: self
                .queue
                .reap_stale(
                    self.config.stale_processing_minutes,
                    self.config.stale_processing_action,
                )
                .await?,
            ..RunSummary::default()
        };
        if summary.reaped > 0 {
            info!(reaped = summary.reaped, "moved stale jobs out of processing");
        }

        let ready = self.queue.list_ready().await?;
        info!(ready = ready.len(), max_per_run = self.config.max_per_run, "consume start");

        for job in ready {
            if summary.attempted >= self.config.max_per_run {
                break;
            }

            let claimed = match self.queue.claim(&job).await {
                Ok(claimed) => claimed,
                Err(e) if e.is_not_found() => {
                    debug!(job = %job.name, "claim lost to another consumer");
                    summary.skipped += 1;
                    continue;
                }
                Err(e) => {
                    warn!(job = %job.name, error = %e, "claim failed");
                    summary.skipped += 1;
                    continue;
                }
            };
            summary.attempted += 1;

            if self.process(&claimed).await {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
        }

        info!(%summary, "consume end");
        Ok(summary)
    }

    /// Run a claimed job and finish it. Returns whether it succeeded.
    async fn process(&self, claimed: &JobRef) -> bool {
        let text = self.queue.read(claimed).await;
        let job = text.and_then(|text| Job::parse(&claimed.name, &text));
        let app = job.as_ref().map(|j| j.app.as_str()).unwrap_or("unknown");

        let span = start_job_span(app, claimed.name.as_str());
        async {
            record_state_transition(&span, "incoming", "processing");
            let started = Instant::now();

            let result: Result<Delivery> = match job {
                Ok(job) => {
                    info!(job = %claimed.name, url = %job.url, category = %job.category, "processing");
                    self.pipeline.run(&job).await
                }
                Err(e) => Err(e),
            };

            let outcome = Outcome::from_ok(result.is_ok());
            match &result {
                Ok(delivery) => info!(
                    job = %claimed.name,
                    dest = %delivery.final_dir.display(),
                    used_fallback = delivery.used_fallback,
                    "job done"
                ),
                Err(e) => error!(job = %claimed.name, error = %e, "job failed"),
            }

            // A job that cannot be finished stays in processing for the reaper.
            let finished = match self.queue.finish(claimed, outcome).await {
                Ok(finished) => finished,
                Err(e) => {
                    error!(job = %claimed.name, error = %e, "could not finish job");
                    return false;
                }
            };
            record_state_transition(&span, "processing", finished.state.dir_name());

            let label = [KeyValue::new("outcome", finished.state.dir_name())];
            metrics::jobs_finished().add(1, &label);
            metrics::job_duration_ms().record(started.elapsed().as_secs_f64() * 1000.0, &label);

            finished.state == QueueState::Done
        }
        .instrument(span.clone())
        .await
    }
}

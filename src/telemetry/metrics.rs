//! Metric instrument factories for ondl-rs.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! Without an exporter configured these are no-ops.

use opentelemetry::metrics::{Counter, Histogram, Meter};

fn meter() -> Meter {
    opentelemetry::global::meter("ondl-rs")
}

/// Counter: ingestion requests.
/// Labels: `result` ("queued" | "already_queued" | "already_downloaded" |
/// "invalid" | "error").
pub fn jobs_ingested() -> Counter<u64> {
    meter()
        .u64_counter("ondl.jobs.ingested")
        .with_description("Number of ingestion requests by result")
        .build()
}

/// Counter: jobs finished by the run loop.
/// Labels: `outcome` ("done" | "error").
pub fn jobs_finished() -> Counter<u64> {
    meter()
        .u64_counter("ondl.jobs.finished")
        .with_description("Number of jobs moved to a terminal state")
        .build()
}

/// Counter: stale jobs recovered from processing.
/// Labels: `action`.
pub fn jobs_reaped() -> Counter<u64> {
    meter()
        .u64_counter("ondl.jobs.reaped")
        .with_description("Number of stale processing jobs reaped")
        .build()
}

/// Counter: queue moves (enqueue, claim, finish, requeue).
/// Labels: `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("ondl.queue.operations")
        .with_description("Number of queue operations")
        .build()
}

/// Histogram: wall time of one job from claim to finish.
/// Labels: `outcome`.
pub fn job_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("ondl.job.duration_ms")
        .with_description("Job duration in milliseconds")
        .with_unit("ms")
        .build()
}

//! Job execution span helpers.

use tracing::Span;

/// Start a span covering one job from claim to finish.
///
/// `job.state` is declared empty and updated by [`record_state_transition`].
pub fn start_job_span(app: &str, job: &str) -> Span {
    tracing::info_span!(
        "job.execute",
        "job.app" = app,
        "job.name" = job,
        "job.state" = tracing::field::Empty,
    )
}

/// Record a queue state transition on the given span.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("job.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}

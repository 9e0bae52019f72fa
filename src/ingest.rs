//! Ingestion gate: decides whether a submitted request becomes a new job.
//!
//! A request is decoded, validated, checked against jobs already waiting or
//! running, checked against the archive of finished downloads, and only then
//! written into `incoming`. Every path produces exactly one [`IngestOutcome`].

use base64::Engine as _;
use chrono::Local;
use opentelemetry::KeyValue;
use tracing::{debug, info, warn};

use crate::archive::Archive;
use crate::error::{Error, Result};
use crate::model::{Job, JobName};
use crate::queue::{QueueState, QueueStore};
use crate::telemetry::metrics;
use crate::tools::MediaResolver;

/// Name collisions are astronomically unlikely; retry a couple of times anyway.
const ENQUEUE_ATTEMPTS: usize = 3;

/// What the gate decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    AlreadyQueued,
    AlreadyDownloaded,
    Queued(JobName),
    InvalidPayload(String),
    InternalError(String),
}

impl IngestOutcome {
    /// The single line printed for the caller.
    pub fn status_line(&self) -> String {
        match self {
            IngestOutcome::AlreadyQueued => "ALREADY_QUEUED".to_string(),
            IngestOutcome::AlreadyDownloaded => "ALREADY_DOWNLOADED".to_string(),
            IngestOutcome::Queued(name) => format!("QUEUED {name}"),
            IngestOutcome::InvalidPayload(reason) => format!("ERROR {reason}"),
            IngestOutcome::InternalError(reason) => format!("ERROR internal: {reason}"),
        }
    }

    /// 0 for any success, 2 for bad input, 3 for internal failure.
    pub fn exit_code(&self) -> i32 {
        match self {
            IngestOutcome::AlreadyQueued
            | IngestOutcome::AlreadyDownloaded
            | IngestOutcome::Queued(_) => 0,
            IngestOutcome::InvalidPayload(_) => 2,
            IngestOutcome::InternalError(_) => 3,
        }
    }

    fn metric_label(&self) -> &'static str {
        match self {
            IngestOutcome::AlreadyQueued => "already_queued",
            IngestOutcome::AlreadyDownloaded => "already_downloaded",
            IngestOutcome::Queued(_) => "queued",
            IngestOutcome::InvalidPayload(_) => "invalid",
            IngestOutcome::InternalError(_) => "error",
        }
    }
}

impl From<Error> for IngestOutcome {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidPayload(reason) => IngestOutcome::InvalidPayload(reason),
            Error::Json(e) => IngestOutcome::InvalidPayload(format!("invalid JSON: {e}")),
            other => IngestOutcome::InternalError(other.to_string()),
        }
    }
}

/// Turn raw request text into JSON text.
///
/// Input that does not look like a JSON object is tried as standard base64
/// (missing padding tolerated). When decoding fails the raw text is used and
/// JSON parsing reports the problem.
pub fn decode_request(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(Error::InvalidPayload("empty input".to_string()));
    }
    if trimmed.starts_with('{') {
        return Ok(trimmed.to_string());
    }

    let mut compact: String = trimmed.chars().filter(|c| !c.is_whitespace()).collect();
    while compact.len() % 4 != 0 {
        compact.push('=');
    }
    match base64::engine::general_purpose::STANDARD.decode(compact.as_bytes()) {
        Ok(bytes) => match String::from_utf8(bytes) {
            Ok(text) => Ok(text.trim().to_string()),
            Err(_) => Ok(trimmed.to_string()),
        },
        Err(_) => Ok(trimmed.to_string()),
    }
}

/// Decode and validate a request into a job.
pub fn parse_request(raw: &str) -> Result<Job> {
    let text = decode_request(raw)?;
    let value: serde_json::Value = serde_json::from_str(&text)
        .map_err(|e| Error::InvalidPayload(format!("payload is not valid JSON: {e}")))?;
    Job::from_value(value)
}

/// The gate itself. Borrows its collaborators for one request.
///
/// The resolver is optional: without one the archive check is skipped and
/// new requests are queued, leaving dedup to the downloader's own archive.
pub struct IngestGate<'a> {
    queue: &'a dyn QueueStore,
    archive: &'a Archive,
    resolver: Option<&'a dyn MediaResolver>,
}

impl<'a> IngestGate<'a> {
    pub fn new(queue: &'a dyn QueueStore, archive: &'a Archive, resolver: &'a dyn MediaResolver) -> Self {
        Self {
            queue,
            archive,
            resolver: Some(resolver),
        }
    }

    /// A gate that cannot look up archive keys, e.g. when the resolver tool
    /// is not installed.
    pub fn without_resolver(queue: &'a dyn QueueStore, archive: &'a Archive) -> Self {
        Self {
            queue,
            archive,
            resolver: None,
        }
    }

    /// Run one request through the gate.
    pub async fn ingest(&self, raw: &str) -> IngestOutcome {
        let outcome = match self.try_ingest(raw).await {
            Ok(outcome) => outcome,
            Err(e) => IngestOutcome::from(e),
        };

        metrics::jobs_ingested().add(1, &[KeyValue::new("result", outcome.metric_label())]);
        match &outcome {
            IngestOutcome::Queued(name) => info!(job = %name, "queued"),
            IngestOutcome::InternalError(reason) => warn!(reason = %reason, "ingest failed"),
            other => info!(status = %other.status_line(), "ingest"),
        }
        outcome
    }

    async fn try_ingest(&self, raw: &str) -> Result<IngestOutcome> {
        let job = parse_request(raw)?;

        if self.already_queued(&job.url).await? {
            return Ok(IngestOutcome::AlreadyQueued);
        }

        match self.resolver {
            Some(resolver) => match resolver.archive_key(&job.url).await {
                Ok(key) => {
                    if self.archive.contains(&key).await? {
                        debug!(key = %key, "archive hit");
                        return Ok(IngestOutcome::AlreadyDownloaded);
                    }
                }
                Err(e) => warn!(url = %job.url, error = %e, "archive key lookup failed, queueing anyway"),
            },
            None => debug!(url = %job.url, "no resolver, skipping archive check"),
        }

        let mut last_err = None;
        for _ in 0..ENQUEUE_ATTEMPTS {
            let name = JobName::generate(Local::now());
            match self.queue.enqueue(&name, &job).await {
                Ok(job_ref) => return Ok(IngestOutcome::Queued(job_ref.name)),
                Err(Error::AlreadyExists(existing)) => {
                    debug!(job = %existing, "name collision, regenerating");
                    last_err = Some(Error::AlreadyExists(existing));
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Other("enqueue failed".to_string())))
    }

    /// Whether a job with exactly this locator sits in incoming or processing.
    /// Unreadable or unparseable job files are ignored.
    async fn already_queued(&self, url: &str) -> Result<bool> {
        for state in [QueueState::Incoming, QueueState::Processing] {
            for job_ref in self.queue.list(state).await? {
                let Ok(text) = self.queue.read(&job_ref).await else {
                    continue;
                };
                match Job::parse(&job_ref.name, &text) {
                    Ok(existing) if existing.url == url => return Ok(true),
                    Ok(_) => {}
                    Err(e) => debug!(job = %job_ref, error = %e, "skipping unparseable job"),
                }
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base64_requests_are_decoded() {
        let encoded = base64::engine::general_purpose::STANDARD
            .encode(r#"{"url":"https://youtu.be/x","category":"music"}"#);
        let unpadded = encoded.trim_end_matches('=');
        let job = parse_request(unpadded).unwrap();
        assert_eq!(job.url, "https://youtu.be/x");
        assert_eq!(job.category, "music");
        assert_eq!(job.app, "YouTube");
    }

    #[test]
    fn bad_requests_are_invalid_payloads() {
        assert!(matches!(decode_request("   "), Err(Error::InvalidPayload(_))));
        assert!(matches!(parse_request("not json at all!"), Err(Error::InvalidPayload(_))));
        assert!(matches!(parse_request(r#"{"category":"x"}"#), Err(Error::InvalidPayload(_))));
        assert!(matches!(parse_request(r#"{"url":"ftp://x/y"}"#), Err(Error::InvalidPayload(_))));
        assert!(matches!(parse_request("[1,2]"), Err(Error::InvalidPayload(_))));
    }

    #[test]
    fn status_lines_and_exit_codes() {
        let name = JobName::parse("a.dljob").unwrap();
        assert_eq!(IngestOutcome::Queued(name).status_line(), "QUEUED a.dljob");
        assert_eq!(IngestOutcome::AlreadyQueued.exit_code(), 0);
        assert_eq!(IngestOutcome::InvalidPayload("x".into()).status_line(), "ERROR x");
        assert_eq!(IngestOutcome::InvalidPayload("x".into()).exit_code(), 2);
        assert_eq!(
            IngestOutcome::InternalError("disk".into()).status_line(),
            "ERROR internal: disk"
        );
        assert_eq!(IngestOutcome::InternalError("disk".into()).exit_code(), 3);
    }
}

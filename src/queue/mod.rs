//! Directory-backed job queue.
//!
//! Each queue state is a directory. A job moves between states by a single
//! atomic rename, so a job file exists in exactly one state at a time and a
//! claim race between two consumers has exactly one winner.

pub mod fs;
pub mod memory;

use async_trait::async_trait;
use std::str::FromStr;
use std::time::{Duration, SystemTime};

use crate::error::{Error, Result};
use crate::model::{Job, JobName};

pub use fs::FsQueue;
pub use memory::MemoryQueue;

/// Default pattern selecting job files inside a state directory.
pub const DEFAULT_JOB_GLOB: &str = "*.dljob";

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Queue state of a job, one directory each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum QueueState {
    /// Ready, waiting for a consumer.
    Incoming,
    /// Claimed by a consumer, in flight.
    Processing,
    /// Finished successfully. Terminal.
    Done,
    /// Finished with a failure. Terminal.
    Error,
}

impl QueueState {
    pub const ALL: [QueueState; 4] = [
        QueueState::Incoming,
        QueueState::Processing,
        QueueState::Done,
        QueueState::Error,
    ];

    /// Can a job move from self to `to`?
    pub fn can_transition_to(self, to: QueueState) -> bool {
        use QueueState::*;
        matches!(
            (self, to),
            (Incoming, Processing)
                | (Processing, Done)
                | (Processing, Error)
                | (Processing, Incoming) // reaper requeue
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, QueueState::Done | QueueState::Error)
    }

    /// Directory name under the state root.
    pub fn dir_name(self) -> &'static str {
        match self {
            QueueState::Incoming => "incoming",
            QueueState::Processing => "processing",
            QueueState::Done => "done",
            QueueState::Error => "error",
        }
    }
}

impl std::fmt::Display for QueueState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

impl FromStr for QueueState {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "incoming" => Ok(QueueState::Incoming),
            "processing" => Ok(QueueState::Processing),
            "done" => Ok(QueueState::Done),
            "error" => Ok(QueueState::Error),
            other => Err(Error::Other(format!("unknown queue state: {other}"))),
        }
    }
}

// ---------------------------------------------------------------------------
// Outcome / reap action
// ---------------------------------------------------------------------------

/// How a claimed job ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
}

impl Outcome {
    pub fn from_ok(ok: bool) -> Self {
        if ok { Outcome::Success } else { Outcome::Failure }
    }

    pub fn target(self) -> QueueState {
        match self {
            Outcome::Success => QueueState::Done,
            Outcome::Failure => QueueState::Error,
        }
    }
}

/// Where the reaper sends jobs stuck in processing.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ReapAction {
    /// Back to incoming, as if never claimed.
    #[default]
    Requeue,
    /// Straight to the error state.
    Error,
}

impl ReapAction {
    pub fn target(self) -> QueueState {
        match self {
            ReapAction::Requeue => QueueState::Incoming,
            ReapAction::Error => QueueState::Error,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ReapAction::Requeue => "requeue",
            ReapAction::Error => "error",
        }
    }
}

impl FromStr for ReapAction {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "" | "requeue" => Ok(ReapAction::Requeue),
            "error" => Ok(ReapAction::Error),
            other => Err(Error::Config(format!(
                "invalid queue.stale_processing_action={other:?}; expected 'requeue' or 'error'"
            ))),
        }
    }
}

// ---------------------------------------------------------------------------
// Job reference
// ---------------------------------------------------------------------------

/// A job as seen in one state directory.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct JobRef {
    pub name: JobName,
    pub state: QueueState,
}

impl JobRef {
    pub fn new(name: JobName, state: QueueState) -> Self {
        Self { name, state }
    }
}

impl std::fmt::Display for JobRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.state, self.name)
    }
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// The queue operations. All state changes are single moves.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Write a new job into incoming. The job is visible complete or not at all.
    async fn enqueue(&self, name: &JobName, job: &Job) -> Result<JobRef>;

    /// Jobs in `state`, oldest modification first.
    async fn list(&self, state: QueueState) -> Result<Vec<JobRef>>;

    async fn list_ready(&self) -> Result<Vec<JobRef>> {
        self.list(QueueState::Incoming).await
    }

    /// Raw text of a job file.
    async fn read(&self, job: &JobRef) -> Result<String>;

    /// Move a job from incoming to processing. `NotFound` if someone else got
    /// there first.
    async fn claim(&self, job: &JobRef) -> Result<JobRef>;

    /// Move a claimed job to done or error.
    async fn finish(&self, job: &JobRef, outcome: Outcome) -> Result<JobRef>;

    /// Recover jobs left in processing for longer than `threshold_minutes`.
    /// A threshold of zero or less disables reaping. Returns how many moved.
    async fn reap_stale(&self, threshold_minutes: i64, action: ReapAction) -> Result<usize>;
}

/// Jobs last touched before the returned instant are stale. `None` when the
/// threshold disables reaping. Saturates at the epoch for huge thresholds.
pub fn stale_cutoff(threshold_minutes: i64, now: SystemTime) -> Option<SystemTime> {
    if threshold_minutes <= 0 {
        return None;
    }
    let threshold = Duration::from_secs((threshold_minutes as u64).saturating_mul(60));
    Some(now.checked_sub(threshold).unwrap_or(SystemTime::UNIX_EPOCH))
}

/// Match a file name against a glob with `*` and `?` wildcards.
pub fn glob_match(pattern: &str, name: &str) -> bool {
    let p: Vec<char> = pattern.chars().collect();
    let n: Vec<char> = name.chars().collect();
    let (mut pi, mut ni) = (0, 0);
    let mut star: Option<(usize, usize)> = None;

    while ni < n.len() {
        if pi < p.len() && (p[pi] == '?' || p[pi] == n[ni]) {
            pi += 1;
            ni += 1;
        } else if pi < p.len() && p[pi] == '*' {
            star = Some((pi, ni));
            pi += 1;
        } else if let Some((sp, sn)) = star {
            pi = sp + 1;
            ni = sn + 1;
            star = Some((sp, sn + 1));
        } else {
            return false;
        }
    }
    while pi < p.len() && p[pi] == '*' {
        pi += 1;
    }
    pi == p.len()
}

/// True when `name` is a job file under `glob`. Hidden and temp files never are.
pub fn is_job_file(glob: &str, name: &str) -> bool {
    !name.starts_with('.') && glob_match(glob, name)
}

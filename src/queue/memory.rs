//! In-memory queue with the same move semantics as [`FsQueue`](super::FsQueue).
//!
//! Used by unit tests that exercise the run loop or the ingestion gate without
//! touching the disk.

use async_trait::async_trait;
use chrono::Local;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, SystemTime};

use super::{JobRef, Outcome, QueueState, QueueStore, ReapAction, stale_cutoff};
use crate::error::{Error, Result};
use crate::model::{Job, JobName};

#[derive(Debug, Clone)]
struct Entry {
    state: QueueState,
    text: String,
    modified: SystemTime,
}

#[derive(Debug, Default)]
pub struct MemoryQueue {
    // Keyed like a path: directory, then filename.
    jobs: Mutex<HashMap<(QueueState, JobName), Entry>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop raw text into a state, bypassing validation. For seeding corrupt
    /// or legacy jobs.
    pub fn insert_raw(&self, state: QueueState, name: JobName, text: impl Into<String>) -> JobRef {
        let mut jobs = self.lock();
        jobs.insert(
            (state, name.clone()),
            Entry {
                state,
                text: text.into(),
                modified: SystemTime::now(),
            },
        );
        JobRef::new(name, state)
    }

    /// Pretend a job was last touched `age` ago.
    pub fn backdate(&self, job: &JobRef, age: Duration) {
        let mut jobs = self.lock();
        if let Some(entry) = jobs.get_mut(&(job.state, job.name.clone())) {
            entry.modified = SystemTime::now()
                .checked_sub(age)
                .unwrap_or(SystemTime::UNIX_EPOCH);
        }
    }

    pub fn count(&self, state: QueueState) -> usize {
        self.lock().keys().filter(|(s, _)| *s == state).count()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<(QueueState, JobName), Entry>> {
        // A panic while holding the lock leaves plain data behind; keep going.
        self.jobs.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn move_job(&self, job: &JobRef, to: QueueState, name: JobName) -> Result<JobRef> {
        if !job.state.can_transition_to(to) {
            return Err(Error::Other(format!(
                "illegal queue transition {} -> {to} for {}",
                job.state, job.name
            )));
        }
        let mut jobs = self.lock();
        let mut entry = jobs
            .remove(&(job.state, job.name.clone()))
            .ok_or_else(|| Error::NotFound(job.to_string()))?;
        entry.state = to;
        jobs.insert((to, name.clone()), entry);
        Ok(JobRef::new(name, to))
    }
}

#[async_trait]
impl QueueStore for MemoryQueue {
    async fn enqueue(&self, name: &JobName, job: &Job) -> Result<JobRef> {
        let text = job.to_text()?;
        let key = (QueueState::Incoming, name.clone());
        let mut jobs = self.lock();
        if jobs.contains_key(&key) {
            return Err(Error::AlreadyExists(name.to_string()));
        }
        jobs.insert(
            key,
            Entry {
                state: QueueState::Incoming,
                text,
                modified: SystemTime::now(),
            },
        );
        Ok(JobRef::new(name.clone(), QueueState::Incoming))
    }

    async fn list(&self, state: QueueState) -> Result<Vec<JobRef>> {
        let jobs = self.lock();
        let mut found: Vec<(SystemTime, JobName)> = jobs
            .iter()
            .filter(|(_, entry)| entry.state == state)
            .map(|((_, name), entry)| (entry.modified, name.clone()))
            .collect();
        found.sort();
        Ok(found
            .into_iter()
            .map(|(_, name)| JobRef::new(name, state))
            .collect())
    }

    async fn read(&self, job: &JobRef) -> Result<String> {
        self.lock()
            .get(&(job.state, job.name.clone()))
            .map(|entry| entry.text.clone())
            .ok_or_else(|| Error::NotFound(job.to_string()))
    }

    async fn claim(&self, job: &JobRef) -> Result<JobRef> {
        let claimed = self.move_job(job, QueueState::Processing, job.name.clone())?;
        if let Some(entry) = self.lock().get_mut(&(claimed.state, claimed.name.clone())) {
            entry.modified = SystemTime::now();
        }
        Ok(claimed)
    }

    async fn finish(&self, job: &JobRef, outcome: Outcome) -> Result<JobRef> {
        self.move_job(job, outcome.target(), job.name.clone())
    }

    async fn reap_stale(&self, threshold_minutes: i64, action: ReapAction) -> Result<usize> {
        let Some(cutoff) = stale_cutoff(threshold_minutes, SystemTime::now()) else {
            return Ok(0);
        };
        let to = action.target();

        let stale: Vec<JobRef> = {
            let jobs = self.lock();
            jobs.iter()
                .filter(|(_, e)| e.state == QueueState::Processing && e.modified < cutoff)
                .map(|((state, name), _)| JobRef::new(name.clone(), *state))
                .collect()
        };

        let mut reaped = 0;
        for job in stale {
            let taken = self.lock().contains_key(&(to, job.name.clone()));
            let name = if taken {
                job.name.reaped(Local::now())
            } else {
                job.name.clone()
            };
            if self.move_job(&job, to, name).is_ok() {
                reaped += 1;
            }
        }
        Ok(reaped)
    }
}

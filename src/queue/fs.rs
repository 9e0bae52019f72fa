//! Filesystem queue: one directory per state, moves by `rename(2)`.

use async_trait::async_trait;
use chrono::Local;
use opentelemetry::KeyValue;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{JobRef, Outcome, QueueState, QueueStore, ReapAction, is_job_file, stale_cutoff};
use crate::error::{Error, Result};
use crate::model::{Job, JobName};
use crate::paths::Layout;
use crate::telemetry::metrics;

/// Queue over the state directories of a [`Layout`].
#[derive(Debug, Clone)]
pub struct FsQueue {
    layout: Layout,
    job_glob: String,
}

impl FsQueue {
    pub fn new(layout: Layout, job_glob: impl Into<String>) -> Self {
        Self {
            layout,
            job_glob: job_glob.into(),
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    pub fn dir(&self, state: QueueState) -> &Path {
        match state {
            QueueState::Incoming => &self.layout.incoming,
            QueueState::Processing => &self.layout.processing,
            QueueState::Done => &self.layout.done,
            QueueState::Error => &self.layout.error,
        }
    }

    /// Where a job lives on disk.
    pub fn path_of(&self, job: &JobRef) -> PathBuf {
        self.dir(job.state).join(job.name.as_str())
    }

    /// Rename `job` into `to` under `name`. Maps a vanished source to
    /// `NotFound`.
    async fn move_job(&self, job: &JobRef, to: QueueState, name: JobName) -> Result<JobRef> {
        if !job.state.can_transition_to(to) {
            return Err(Error::Other(format!(
                "illegal queue transition {} -> {to} for {}",
                job.state, job.name
            )));
        }

        let from = self.path_of(job);
        let target = JobRef::new(name, to);
        let dest = self.path_of(&target);

        match tokio::fs::rename(&from, &dest).await {
            Ok(()) => {
                record_op(match to {
                    QueueState::Processing => "claim",
                    QueueState::Incoming => "requeue",
                    _ => "finish",
                });
                Ok(target)
            }
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(Error::NotFound(format!("{job}")))
            }
            Err(e) => Err(e.into()),
        }
    }
}

fn record_op(operation: &'static str) {
    metrics::queue_operations().add(1, &[KeyValue::new("operation", operation)]);
}

#[async_trait]
impl QueueStore for FsQueue {
    async fn enqueue(&self, name: &JobName, job: &Job) -> Result<JobRef> {
        let dir = self.dir(QueueState::Incoming);
        tokio::fs::create_dir_all(dir).await?;

        let target = JobRef::new(name.clone(), QueueState::Incoming);
        let dest = self.path_of(&target);

        let text = job.to_text()?;
        let tmp = dir.join(format!(".tmp-{name}-{}", Uuid::new_v4().simple()));

        let written = async {
            let mut file = tokio::fs::File::create(&tmp).await?;
            tokio::io::AsyncWriteExt::write_all(&mut file, text.as_bytes()).await?;
            file.sync_all().await?;
            drop(file);
            // link(2) refuses an existing destination, unlike rename(2).
            tokio::fs::hard_link(&tmp, &dest).await
        }
        .await;
        let _ = tokio::fs::remove_file(&tmp).await;

        match written {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                return Err(Error::AlreadyExists(name.to_string()));
            }
            Err(e) => return Err(e.into()),
        }

        fsync_dir(dir).await;
        record_op("enqueue");
        debug!(job = %name, "enqueued");
        Ok(target)
    }

    async fn list(&self, state: QueueState) -> Result<Vec<JobRef>> {
        let mut entries = match tokio::fs::read_dir(self.dir(state)).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut found: Vec<(SystemTime, JobName)> = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if !is_job_file(&self.job_glob, file_name) {
                continue;
            }
            // A concurrent consumer may move the file between read_dir and stat.
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let Ok(name) = JobName::parse(file_name) else {
                continue;
            };
            let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
            found.push((modified, name));
        }

        found.sort();
        Ok(found
            .into_iter()
            .map(|(_, name)| JobRef::new(name, state))
            .collect())
    }

    async fn read(&self, job: &JobRef) -> Result<String> {
        let bytes = match tokio::fs::read(self.path_of(job)).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                return Err(Error::NotFound(job.to_string()));
            }
            Err(e) => return Err(e.into()),
        };
        Ok(String::from_utf8_lossy(&bytes).into_owned())
    }

    async fn claim(&self, job: &JobRef) -> Result<JobRef> {
        tokio::fs::create_dir_all(self.dir(QueueState::Processing)).await?;
        let claimed = self
            .move_job(job, QueueState::Processing, job.name.clone())
            .await?;

        // rename keeps the ingest mtime; staleness is measured from the claim.
        if let Err(e) = touch(&self.path_of(&claimed)).await {
            debug!(job = %claimed.name, error = %e, "could not refresh claim time");
        }
        Ok(claimed)
    }

    async fn finish(&self, job: &JobRef, outcome: Outcome) -> Result<JobRef> {
        let to = outcome.target();
        tokio::fs::create_dir_all(self.dir(to)).await?;
        self.move_job(job, to, job.name.clone()).await
    }

    async fn reap_stale(&self, threshold_minutes: i64, action: ReapAction) -> Result<usize> {
        let Some(cutoff) = stale_cutoff(threshold_minutes, SystemTime::now()) else {
            return Ok(0);
        };

        let to = action.target();
        tokio::fs::create_dir_all(self.dir(to)).await?;

        let mut reaped = 0;
        for job in self.list(QueueState::Processing).await? {
            let modified = match tokio::fs::metadata(self.path_of(&job)).await {
                Ok(meta) => meta.modified().unwrap_or(SystemTime::UNIX_EPOCH),
                Err(_) => continue,
            };
            if modified >= cutoff {
                continue;
            }

            let mut name = job.name.clone();
            let plain = JobRef::new(name.clone(), to);
            if tokio::fs::try_exists(self.path_of(&plain)).await.unwrap_or(false) {
                name = job.name.reaped(Local::now());
            }

            match self.move_job(&job, to, name).await {
                Ok(moved) => {
                    reaped += 1;
                    metrics::jobs_reaped().add(1, &[KeyValue::new("action", action.as_str())]);
                    info!(job = %job.name, to = %moved, "reaped stale processing job");
                }
                Err(e) if e.is_not_found() => continue,
                Err(e) => {
                    warn!(job = %job.name, error = %e, "failed to reap stale job");
                }
            }
        }

        Ok(reaped)
    }
}

/// Set a file's modification time to now.
async fn touch(path: &Path) -> std::io::Result<()> {
    let file = tokio::fs::OpenOptions::new().append(true).open(path).await?;
    let file = file.into_std().await;
    tokio::task::spawn_blocking(move || file.set_modified(SystemTime::now()))
        .await
        .map_err(std::io::Error::other)?
}

/// Persist directory entries after a rename. Best-effort; not every platform
/// lets you open a directory.
async fn fsync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = tokio::fs::File::open(dir).await {
        let _ = handle.sync_all().await;
    }
    #[cfg(not(unix))]
    let _ = dir;
}

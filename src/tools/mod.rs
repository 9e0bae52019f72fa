//! Collaborators the run loop and the ingestion gate call out to.
//!
//! Each concern is a trait with one method per operation. The concrete
//! adapters shell out to external tools (`yt-dlp`, `ffmpeg`) or talk HTTP
//! (Discord); tests swap in doubles that return canned results.

pub mod discord;
pub mod ffmpeg;
pub mod process;
pub mod relocate;
pub mod resolve;
pub mod ytdlp;

use async_trait::async_trait;
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::model::{ArchiveKey, MediaMeta};

pub use discord::Discord;
pub use ffmpeg::Ffmpeg;
pub use relocate::FsRelocator;
pub use ytdlp::YtDlp;

/// Looks up facts about a locator without downloading it.
#[async_trait]
pub trait MediaResolver: Send + Sync {
    /// Full metadata. Fails with `Error::Resolution`.
    async fn resolve(&self, url: &str) -> Result<MediaMeta>;

    /// Stable `(source type, id)` pair for dedup against the archive.
    async fn archive_key(&self, url: &str) -> Result<ArchiveKey>;
}

/// Downloads content.
#[async_trait]
pub trait ContentFetcher: Send + Sync {
    /// Fetch `url` into exactly `dest_dir` and return the main file.
    /// Fails with `Error::Fetch`.
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf>;
}

/// Size and quality limits for a preview clip.
#[derive(Debug, Clone, PartialEq)]
pub struct PreviewSpec {
    pub seconds: f64,
    pub fps: u32,
    pub width: u32,
    pub max_bytes: u64,
}

/// Renders short preview clips.
#[async_trait]
pub trait PreviewRenderer: Send + Sync {
    /// Media duration in seconds, if it can be determined.
    async fn probe(&self, file: &Path) -> Option<f64>;

    /// Render a clip starting at `start` seconds into `out`.
    ///
    /// Degrades quality until the result fits `spec.max_bytes` or a floor is
    /// reached. Never fails because of size; returns the best it achieved.
    async fn render(&self, file: &Path, start: f64, spec: &PreviewSpec, out: &Path)
    -> Result<PathBuf>;
}

/// Moves a finished download into its final home.
#[async_trait]
pub trait Relocator: Send + Sync {
    /// Recursively merge `src_dir` into `dest_dir`, overwriting files that
    /// already exist, and remove the emptied source directories.
    async fn relocate(&self, src_dir: &Path, dest_dir: &Path) -> Result<()>;
}

/// Everything a notifier needs to announce a finished job.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Notification {
    pub title: String,
    pub url: String,
    pub channel: String,
    pub duration: Option<f64>,
    pub file_size_bytes: Option<u64>,
    pub saved_to: PathBuf,
    pub preview_start: Option<f64>,
    pub used_fallback: bool,
    pub thumbnail: Option<String>,
}

/// What a notifier did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyStatus {
    Sent,
    /// Notifications are not configured.
    Skipped,
}

/// Callers log this and carry on; a failed notification never fails a job.
pub type NotifyResult = Result<NotifyStatus>;

/// Best-effort announcements.
#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, message: &Notification, attachment: Option<&Path>) -> NotifyResult;
}

/// The full set of collaborators a pipeline run needs.
pub struct Collaborators {
    pub resolver: Box<dyn MediaResolver>,
    pub fetcher: Box<dyn ContentFetcher>,
    pub renderer: Box<dyn PreviewRenderer>,
    pub relocator: Box<dyn Relocator>,
    pub notifier: Box<dyn Notifier>,
}

/// `m:ss` or `h:mm:ss`; "unknown" when absent.
pub fn format_duration(seconds: Option<f64>) -> String {
    let Some(seconds) = seconds.filter(|s| *s > 0.0) else {
        return "unknown".to_string();
    };
    let total = seconds as u64;
    let (h, rest) = (total / 3600, total % 3600);
    let (m, s) = (rest / 60, rest % 60);
    if h > 0 {
        format!("{h}:{m:02}:{s:02}")
    } else {
        format!("{m}:{s:02}")
    }
}

//! Per-job pipeline: resolve → fetch → preview → relocate → notify.

use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, info, warn};

use crate::config::PreviewConfig;
use crate::error::{Error, Result};
use crate::model::{Job, MediaMeta};
use crate::paths::{Layout, sanitize_segment};
use crate::tools::ffmpeg::pick_preview_start;
use crate::tools::{Collaborators, Notification, NotifyStatus, PreviewSpec};

/// Fallback path segment for a blank category or uploader.
const UNKNOWN_SEGMENT: &str = "unknown";

/// Apps the pipeline knows how to handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppKind {
    YouTube,
    Instagram,
}

impl AppKind {
    /// Case-insensitive dispatch on a job's `app` field.
    pub fn from_app(app: &str) -> Result<Self> {
        match app.trim().to_lowercase().as_str() {
            "youtube" | "yt" => Ok(AppKind::YouTube),
            "instagram" | "ig" => Ok(AppKind::Instagram),
            _ => Err(Error::Unsupported(app.to_string())),
        }
    }
}

/// What a successful run produced.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub meta: MediaMeta,
    pub file: PathBuf,
    pub final_dir: PathBuf,
    pub used_fallback: bool,
    /// Preview left on disk. `None` once a notification carried it away.
    pub preview: Option<PathBuf>,
    pub notified: bool,
}

/// Runs one job through every collaborator.
pub struct Pipeline {
    layout: Layout,
    preview: PreviewConfig,
    tools: Collaborators,
}

impl Pipeline {
    pub fn new(layout: Layout, preview: PreviewConfig, tools: Collaborators) -> Self {
        Self {
            layout,
            preview,
            tools,
        }
    }

    pub fn layout(&self) -> &Layout {
        &self.layout
    }

    /// Run the job. Any error fails the job; notification failures never do.
    pub async fn run(&self, job: &Job) -> Result<Delivery> {
        match AppKind::from_app(&job.app)? {
            AppKind::YouTube => self.run_media(job).await,
            AppKind::Instagram => Err(Error::Unsupported(format!("{}: not implemented", job.app))),
        }
    }

    async fn run_media(&self, job: &Job) -> Result<Delivery> {
        let started = Instant::now();

        let phase = Instant::now();
        let meta = self.tools.resolver.resolve(&job.url).await?;
        phase_done("resolve", phase);

        let category = sanitize_segment(&job.category, UNKNOWN_SEGMENT);
        let uploader = sanitize_segment(&meta.uploader, UNKNOWN_SEGMENT);
        let staging_dir = self.layout.staging.join(&category).join(&uploader);

        let phase = Instant::now();
        let file = self.tools.fetcher.fetch(&job.url, &staging_dir).await?;
        let file_size_bytes = tokio::fs::metadata(&file).await.ok().map(|m| m.len());
        phase_done("fetch", phase);
        debug!(file = %file.display(), size = ?file_size_bytes, "fetched");

        let (preview, preview_start) = if self.preview.enabled {
            let phase = Instant::now();
            let (path, start) = self.render_preview(&file, meta.duration).await?;
            phase_done("preview", phase);
            (Some(path), Some(start))
        } else {
            (None, None)
        };

        let phase = Instant::now();
        let primary = self.layout.download_root.join(&category).join(&uploader);
        let (final_dir, used_fallback) = match self.tools.relocator.relocate(&staging_dir, &primary).await {
            Ok(()) => (primary, false),
            Err(e) => {
                let fallback = self
                    .layout
                    .fallback_download_root
                    .join(&category)
                    .join(&uploader);
                warn!(
                    primary = %primary.display(),
                    fallback = %fallback.display(),
                    error = %e,
                    "download root unavailable, using local fallback"
                );
                self.tools.relocator.relocate(&staging_dir, &fallback).await?;
                (fallback, true)
            }
        };
        phase_done("relocate", phase);

        let file = file
            .file_name()
            .map(|name| final_dir.join(name))
            .unwrap_or_else(|| final_dir.clone());

        let message = Notification {
            title: meta.title.clone(),
            url: meta.webpage_url.clone(),
            channel: meta.publisher().to_string(),
            duration: meta.duration,
            file_size_bytes,
            saved_to: final_dir.clone(),
            preview_start,
            used_fallback,
            thumbnail: meta.thumbnail.clone(),
        };

        let notified = match self.tools.notifier.notify(&message, preview.as_deref()).await {
            Ok(NotifyStatus::Sent) => true,
            Ok(NotifyStatus::Skipped) => false,
            Err(e) => {
                warn!(error = %e, "notification failed");
                false
            }
        };

        let preview = match preview {
            Some(path) if notified => {
                if let Err(e) = tokio::fs::remove_file(&path).await {
                    debug!(preview = %path.display(), error = %e, "could not delete preview");
                    Some(path)
                } else {
                    None
                }
            }
            other => other,
        };

        info!(
            title = %meta.title,
            dest = %final_dir.display(),
            used_fallback,
            notified,
            duration_ms = started.elapsed().as_millis() as u64,
            "delivered"
        );

        Ok(Delivery {
            meta,
            file,
            final_dir,
            used_fallback,
            preview,
            notified,
        })
    }

    async fn render_preview(&self, file: &Path, known_duration: Option<f64>) -> Result<(PathBuf, f64)> {
        let duration = match known_duration.filter(|d| *d > 0.0) {
            Some(d) => Some(d),
            None => self.tools.renderer.probe(file).await,
        };
        let start = pick_preview_start(duration, self.preview.gif_seconds);

        let stem = file
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "preview".to_string());
        let out = self.layout.previews.join(format!("{stem}.gif"));

        let spec = PreviewSpec {
            seconds: self.preview.gif_seconds,
            fps: self.preview.gif_fps,
            width: self.preview.gif_width,
            max_bytes: self.preview.gif_max_bytes,
        };
        let path = self.tools.renderer.render(file, start, &spec, &out).await?;
        Ok((path, start))
    }
}

fn phase_done(phase: &str, started: Instant) {
    debug!(phase, duration_ms = started.elapsed().as_millis() as u64, "phase completed");
}

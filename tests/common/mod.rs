//! Shared fixtures and collaborator doubles for integration tests.
#![allow(dead_code)]

use async_trait::async_trait;
use ondl_rs::config::PreviewConfig;
use ondl_rs::engine::Pipeline;
use ondl_rs::error::{Error, Result};
use ondl_rs::model::{ArchiveKey, MediaMeta};
use ondl_rs::paths::Layout;
use ondl_rs::queue::{DEFAULT_JOB_GLOB, FsQueue};
use ondl_rs::tools::{
    Collaborators, ContentFetcher, FsRelocator, MediaResolver, Notification, Notifier,
    NotifyResult, NotifyStatus, PreviewRenderer, PreviewSpec, Relocator,
};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub fn fs_queue(root: &Path) -> FsQueue {
    FsQueue::new(Layout::for_queue(root), DEFAULT_JOB_GLOB)
}

pub fn sample_meta() -> MediaMeta {
    MediaMeta {
        id: "abc123".to_string(),
        title: "Sample Clip".to_string(),
        uploader: "Some Uploader".to_string(),
        channel: "Some Channel".to_string(),
        webpage_url: "https://www.youtube.com/watch?v=abc123".to_string(),
        duration: Some(200.0),
        thumbnail: Some("https://i.ytimg.com/vi/abc123/hq.jpg".to_string()),
    }
}

// ---------------------------------------------------------------------------
// Resolver
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct FakeResolver {
    pub meta: MediaMeta,
    pub key: Option<ArchiveKey>,
    pub fail_resolve: bool,
    pub key_calls: Arc<AtomicUsize>,
}

impl FakeResolver {
    pub fn new() -> Self {
        Self {
            meta: sample_meta(),
            key: Some(ArchiveKey::new("Youtube", "abc123")),
            fail_resolve: false,
            key_calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn key_calls(&self) -> usize {
        self.key_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MediaResolver for FakeResolver {
    async fn resolve(&self, url: &str) -> Result<MediaMeta> {
        if self.fail_resolve {
            return Err(Error::Resolution(format!("canned failure for {url}")));
        }
        Ok(self.meta.clone())
    }

    async fn archive_key(&self, url: &str) -> Result<ArchiveKey> {
        self.key_calls.fetch_add(1, Ordering::SeqCst);
        self.key
            .clone()
            .ok_or_else(|| Error::Resolution(format!("no key for {url}")))
    }
}

// ---------------------------------------------------------------------------
// Fetcher / renderer
// ---------------------------------------------------------------------------

/// Writes a small fake media file plus a poster into the staging dir.
#[derive(Clone, Default)]
pub struct FakeFetcher {
    pub fail: bool,
}

#[async_trait]
impl ContentFetcher for FakeFetcher {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        if self.fail {
            return Err(Error::Fetch(format!("canned failure for {url}")));
        }
        tokio::fs::create_dir_all(dest_dir).await?;
        let file = dest_dir.join("Sample Clip.mp4");
        tokio::fs::write(&file, vec![0u8; 2048]).await?;
        tokio::fs::write(dest_dir.join("Sample Clip-poster.jpg"), b"jpg").await?;
        Ok(file)
    }
}

#[derive(Clone, Default)]
pub struct FakeRenderer {
    pub renders: Arc<Mutex<Vec<(f64, PreviewSpec)>>>,
}

#[async_trait]
impl PreviewRenderer for FakeRenderer {
    async fn probe(&self, _file: &Path) -> Option<f64> {
        Some(60.0)
    }

    async fn render(&self, _file: &Path, start: f64, spec: &PreviewSpec, out: &Path) -> Result<PathBuf> {
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(out, b"GIF89a").await?;
        self.renders
            .lock()
            .unwrap()
            .push((start, spec.clone()));
        Ok(out.to_path_buf())
    }
}

// ---------------------------------------------------------------------------
// Relocator
// ---------------------------------------------------------------------------

/// Real filesystem relocation, except destinations under `unreachable`
/// fail like an unmounted share.
#[derive(Clone)]
pub struct FlakyRelocator {
    pub unreachable: Option<PathBuf>,
}

#[async_trait]
impl Relocator for FlakyRelocator {
    async fn relocate(&self, src_dir: &Path, dest_dir: &Path) -> Result<()> {
        if let Some(root) = &self.unreachable {
            if dest_dir.starts_with(root) {
                return Err(Error::Io(std::io::Error::new(
                    std::io::ErrorKind::PermissionDenied,
                    "share not mounted",
                )));
            }
        }
        FsRelocator.relocate(src_dir, dest_dir).await
    }
}

// ---------------------------------------------------------------------------
// Notifier
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<(Notification, Option<PathBuf>)>>>,
    pub fail: bool,
}

impl RecordingNotifier {
    pub fn messages(&self) -> Vec<Notification> {
        self.sent.lock().unwrap().iter().map(|(n, _)| n.clone()).collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, message: &Notification, attachment: Option<&Path>) -> NotifyResult {
        self.sent
            .lock()
            .unwrap()
            .push((message.clone(), attachment.map(Path::to_path_buf)));
        if self.fail {
            Err(Error::Notify("HTTP 500".to_string()))
        } else {
            Ok(NotifyStatus::Sent)
        }
    }
}

// ---------------------------------------------------------------------------
// Pipeline assembly
// ---------------------------------------------------------------------------

pub struct Doubles {
    pub resolver: FakeResolver,
    pub fetcher: FakeFetcher,
    pub renderer: FakeRenderer,
    pub relocator: FlakyRelocator,
    pub notifier: RecordingNotifier,
}

impl Doubles {
    pub fn new() -> Self {
        Self {
            resolver: FakeResolver::new(),
            fetcher: FakeFetcher::default(),
            renderer: FakeRenderer::default(),
            relocator: FlakyRelocator { unreachable: None },
            notifier: RecordingNotifier::default(),
        }
    }

    pub fn pipeline(&self, layout: Layout) -> Pipeline {
        Pipeline::new(
            layout,
            PreviewConfig::default(),
            Collaborators {
                resolver: Box::new(self.resolver.clone()),
                fetcher: Box::new(self.fetcher.clone()),
                renderer: Box::new(self.renderer.clone()),
                relocator: Box::new(self.relocator.clone()),
                notifier: Box::new(self.notifier.clone()),
            },
        )
    }
}

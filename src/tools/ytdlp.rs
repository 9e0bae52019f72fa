//! `yt-dlp` as resolver and fetcher.

use async_trait::async_trait;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::{debug, warn};

use super::process::{self, CmdOutput};
use super::{ContentFetcher, MediaResolver};
use crate::error::{Error, Result};
use crate::model::{ArchiveKey, MediaMeta};

/// Extensions that are never the main downloaded file.
const SIDECAR_EXTENSIONS: &[&str] = &["jpg", "json", "part", "tmp", "webp"];

/// Runs `yt-dlp` (with `ffmpeg` for merging and thumbnail conversion).
#[derive(Debug, Clone)]
pub struct YtDlp {
    ytdlp: PathBuf,
    ffmpeg: PathBuf,
    archive: PathBuf,
}

impl YtDlp {
    pub fn new(ytdlp: impl Into<PathBuf>, ffmpeg: impl Into<PathBuf>, archive: impl Into<PathBuf>) -> Self {
        Self {
            ytdlp: ytdlp.into(),
            ffmpeg: ffmpeg.into(),
            archive: archive.into(),
        }
    }

    fn download_args(&self, url: &str, dest_dir: &Path) -> Vec<String> {
        let template = dest_dir.join("%(title)s.%(ext)s");
        vec![
            "--no-playlist".into(),
            "--ignore-errors".into(),
            "--continue".into(),
            "--write-thumbnail".into(),
            "--convert-thumbnails".into(),
            "jpg".into(),
            "--download-archive".into(),
            self.archive.display().to_string(),
            "--ffmpeg-location".into(),
            self.ffmpeg.display().to_string(),
            // Keep stdout down to the printed final path.
            "-q".into(),
            "--no-warnings".into(),
            "--print".into(),
            "after_move:filepath".into(),
            "--windows-filenames".into(),
            "-o".into(),
            template.display().to_string(),
            url.into(),
        ]
    }
}

/// Subset of `yt-dlp -J` output.
#[derive(Debug, Deserialize)]
struct InfoJson {
    #[serde(default)]
    id: Option<serde_json::Value>,
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    uploader: Option<String>,
    #[serde(default)]
    channel: Option<String>,
    #[serde(default)]
    webpage_url: Option<String>,
    #[serde(default)]
    duration: Option<f64>,
    #[serde(default)]
    thumbnail: Option<String>,
}

impl InfoJson {
    fn into_meta(self, url: &str) -> MediaMeta {
        let id = match self.id {
            Some(serde_json::Value::String(s)) => s,
            Some(serde_json::Value::Null) | None => String::new(),
            Some(other) => other.to_string(),
        };
        MediaMeta {
            id,
            title: self.title.unwrap_or_default(),
            uploader: self.uploader.unwrap_or_default(),
            channel: self.channel.unwrap_or_default(),
            webpage_url: self.webpage_url.filter(|u| !u.is_empty()).unwrap_or_else(|| url.to_string()),
            duration: self.duration,
            thumbnail: self.thumbnail.filter(|t| !t.is_empty()),
        }
    }
}

/// Parse `yt-dlp -J` JSON into [`MediaMeta`].
pub fn parse_info_json(text: &str, url: &str) -> Result<MediaMeta> {
    let info: InfoJson = serde_json::from_str(text)
        .map_err(|e| Error::Resolution(format!("unreadable yt-dlp metadata for {url}: {e}")))?;
    Ok(info.into_meta(url))
}

/// Parse the first line of `--print "%(extractor_key)s %(id)s"`.
pub fn parse_key_line(stdout: &str) -> Option<ArchiveKey> {
    stdout.lines().next().and_then(ArchiveKey::parse)
}

#[async_trait]
impl MediaResolver for YtDlp {
    async fn resolve(&self, url: &str) -> Result<MediaMeta> {
        let out = process::run(&self.ytdlp, ["-J", "--no-playlist", url])
            .await
            .map_err(|e| Error::Resolution(format!("cannot run yt-dlp: {e}")))?;
        if !out.success() {
            return Err(Error::Resolution(out.describe("yt-dlp")));
        }
        parse_info_json(&out.stdout, url)
    }

    async fn archive_key(&self, url: &str) -> Result<ArchiveKey> {
        let out = process::run(
            &self.ytdlp,
            ["-s", "--no-playlist", "--print", "%(extractor_key)s %(id)s", url],
        )
        .await
        .map_err(|e| Error::Resolution(format!("cannot run yt-dlp: {e}")))?;
        if !out.success() {
            return Err(Error::Resolution(out.describe("yt-dlp")));
        }
        parse_key_line(&out.stdout)
            .ok_or_else(|| Error::Resolution(format!("no archive key printed for {url}")))
    }
}

#[async_trait]
impl ContentFetcher for YtDlp {
    async fn fetch(&self, url: &str, dest_dir: &Path) -> Result<PathBuf> {
        tokio::fs::create_dir_all(dest_dir).await?;

        let out = process::run(&self.ytdlp, self.download_args(url, dest_dir))
            .await
            .map_err(|e| Error::Fetch(format!("cannot run yt-dlp: {e}")))?;
        if !out.success() {
            return Err(Error::Fetch(out.describe("yt-dlp")));
        }

        let file = match printed_path(&out, dest_dir).await {
            Some(path) => path,
            None => {
                debug!(dir = %dest_dir.display(), "yt-dlp printed no usable path, scanning");
                newest_media_file(dest_dir).await?.ok_or_else(|| {
                    Error::Fetch(format!(
                        "yt-dlp succeeded but no output file was found\n{}",
                        out.describe("yt-dlp")
                    ))
                })?
            }
        };

        rename_poster(&file).await;
        Ok(file)
    }
}

/// The last non-empty stdout line, if it names an existing file.
async fn printed_path(out: &CmdOutput, dest_dir: &Path) -> Option<PathBuf> {
    let line = out.stdout.lines().map(str::trim).filter(|l| !l.is_empty()).last()?;
    let path = PathBuf::from(line);
    let path = if path.is_absolute() { path } else { dest_dir.join(path) };
    match tokio::fs::try_exists(&path).await {
        Ok(true) => Some(path),
        _ => None,
    }
}

/// Newest non-sidecar file in `dir`.
async fn newest_media_file(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    let mut best: Option<(SystemTime, PathBuf)> = None;

    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        if is_sidecar(&path) {
            continue;
        }
        let Ok(meta) = entry.metadata().await else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        let modified = meta.modified().unwrap_or(SystemTime::UNIX_EPOCH);
        if best.as_ref().is_none_or(|(t, _)| modified > *t) {
            best = Some((modified, path));
        }
    }
    Ok(best.map(|(_, p)| p))
}

fn is_sidecar(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| SIDECAR_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// `<stem>-poster.jpg` beside the media file.
pub fn poster_path(file: &Path) -> Option<PathBuf> {
    let stem = file.file_stem()?.to_str()?;
    Some(file.with_file_name(format!("{stem}-poster.jpg")))
}

/// Rename the `<stem>.jpg` thumbnail sidecar to `<stem>-poster.jpg`.
async fn rename_poster(file: &Path) {
    let thumb = file.with_extension("jpg");
    if thumb == file {
        return;
    }
    let Some(poster) = poster_path(file) else {
        return;
    };
    match tokio::fs::rename(&thumb, &poster).await {
        Ok(()) => debug!(poster = %poster.display(), "renamed thumbnail"),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => warn!(thumb = %thumb.display(), error = %e, "failed to rename thumbnail"),
    }
}

//! `ffmpeg`/`ffprobe` as preview renderer.
//!
//! GIFs are rendered in two passes (palettegen, then paletteuse) and shrunk
//! step by step until they fit the byte budget.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::process;
use super::{PreviewRenderer, PreviewSpec};
use crate::error::{Error, Result};

/// Upper bound on render attempts per preview.
pub const MAX_RENDER_ATTEMPTS: usize = 12;
pub const MIN_WIDTH: u32 = 240;
pub const MIN_FPS: u32 = 8;

pub struct Ffmpeg {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
}

impl Ffmpeg {
    pub fn new(ffmpeg: impl Into<PathBuf>, ffprobe: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.into(),
            ffprobe: ffprobe.into(),
        }
    }

    async fn ffmpeg(&self, args: Vec<String>) -> Result<()> {
        let out = process::run(&self.ffmpeg, args)
            .await
            .map_err(|e| Error::Preview(format!("cannot run ffmpeg: {e}")))?;
        if out.success() {
            Ok(())
        } else {
            Err(Error::Preview(out.describe("ffmpeg")))
        }
    }
}

/// Where a preview clip of `clip_len` seconds should start.
///
/// Roughly 10% in, clamped to 12..=30 seconds, pulled back so the clip ends
/// before the media does. Short media start near the beginning.
pub fn pick_preview_start(duration: Option<f64>, clip_len: f64) -> f64 {
    let Some(duration) = duration.filter(|d| *d > 0.0) else {
        return 12.0;
    };
    if duration < clip_len + 2.0 {
        return round2((duration * 0.2).clamp(0.0, 2.0));
    }
    let mut start = (duration * 0.10).clamp(12.0, 30.0);
    if start + clip_len > duration {
        start = (duration - clip_len - 1.0).max(0.0);
    }
    round2(start)
}

fn round2(v: f64) -> f64 {
    (v * 100.0).round() / 100.0
}

/// Next smaller `(width, fps)`, or `None` once both floors are reached.
pub fn degrade(width: u32, fps: u32) -> Option<(u32, u32)> {
    let next_width = ((width as f64 * 0.85) as u32).max(MIN_WIDTH);
    let next_fps = ((fps as f64 * 0.90).floor() as u32).max(MIN_FPS);
    if next_width == width && next_fps == fps {
        None
    } else {
        Some((next_width, next_fps))
    }
}

/// Parse `ffprobe -show_entries format=duration` output.
pub fn parse_duration(stdout: &str) -> Option<f64> {
    stdout
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|d| d.is_finite() && *d > 0.0)
}

#[async_trait]
impl PreviewRenderer for Ffmpeg {
    async fn probe(&self, file: &Path) -> Option<f64> {
        let file_arg = file.display().to_string();
        let args = [
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
            file_arg.as_str(),
        ];
        match process::run(&self.ffprobe, args).await {
            Ok(out) if out.success() => parse_duration(&out.stdout),
            Ok(out) => {
                debug!(file = %file.display(), "{}", out.describe("ffprobe"));
                None
            }
            Err(e) => {
                warn!(error = %e, "cannot run ffprobe");
                None
            }
        }
    }

    async fn render(
        &self,
        file: &Path,
        start: f64,
        spec: &PreviewSpec,
        out: &Path,
    ) -> Result<PathBuf> {
        if let Some(parent) = out.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let palette = out.with_extension("palette.png");
        let input = file.display().to_string();
        let start_arg = format!("{start:.3}");
        let seconds_arg = format!("{:.3}", spec.seconds);

        let (mut width, mut fps) = (spec.width, spec.fps);
        let mut result = Ok(());

        for attempt in 1..=MAX_RENDER_ATTEMPTS {
            let common = |extra: &[String]| -> Vec<String> {
                let mut args: Vec<String> = vec![
                    "-hide_banner".into(),
                    "-y".into(),
                    "-ss".into(),
                    start_arg.clone(),
                    "-t".into(),
                    seconds_arg.clone(),
                    "-i".into(),
                    input.clone(),
                ];
                args.extend_from_slice(extra);
                args
            };

            let palettegen = common(&[
                "-vf".into(),
                format!("fps={fps},scale={width}:-1:flags=lanczos,palettegen"),
                palette.display().to_string(),
            ]);
            let paletteuse = common(&[
                "-i".into(),
                palette.display().to_string(),
                "-lavfi".into(),
                format!(
                    "fps={fps},scale={width}:-1:flags=lanczos [x]; [x][1:v] paletteuse=dither=bayer:bayer_scale=3"
                ),
                out.display().to_string(),
            ]);

            result = async {
                self.ffmpeg(palettegen).await?;
                self.ffmpeg(paletteuse).await
            }
            .await;
            if result.is_err() {
                break;
            }

            let size = tokio::fs::metadata(out).await?.len();
            debug!(attempt, width, fps, size, "rendered preview");
            if size <= spec.max_bytes {
                break;
            }
            match degrade(width, fps) {
                Some((w, f)) => (width, fps) = (w, f),
                None => {
                    warn!(size, max = spec.max_bytes, "preview still over budget at minimum quality");
                    break;
                }
            }
        }

        let _ = tokio::fs::remove_file(&palette).await;
        result.map(|()| out.to_path_buf())
    }
}

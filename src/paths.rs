//! Directory layout derived from the state root.
//!
//! Every queue state is a directory under the state root. Content downloads
//! go to a separate, user-visible download root which may be a network share.

use crate::error::Result;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Name of the dedup archive file inside the state root.
pub const ARCHIVE_FILENAME: &str = "ytdlp-archive.txt";

/// Every path the queue and its collaborators touch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Layout {
    pub state_root: PathBuf,
    pub incoming: PathBuf,
    pub processing: PathBuf,
    pub done: PathBuf,
    pub error: PathBuf,
    pub logs: PathBuf,
    pub previews: PathBuf,
    /// Local scratch area; content is always fetched here first.
    pub staging: PathBuf,
    pub archive: PathBuf,
    /// Configured final destination.
    pub download_root: PathBuf,
    /// Always-local destination used when `download_root` is unreachable.
    pub fallback_download_root: PathBuf,
}

impl Layout {
    pub fn new(state_root: impl Into<PathBuf>, download_root: impl Into<PathBuf>) -> Self {
        Self::with_fallback(state_root, download_root, default_download_root())
    }

    pub fn with_fallback(
        state_root: impl Into<PathBuf>,
        download_root: impl Into<PathBuf>,
        fallback_download_root: impl Into<PathBuf>,
    ) -> Self {
        let state_root = state_root.into();
        Self {
            incoming: state_root.join("incoming"),
            processing: state_root.join("processing"),
            done: state_root.join("done"),
            error: state_root.join("error"),
            logs: state_root.join("logs"),
            previews: state_root.join("previews"),
            staging: state_root.join("staging-downloads"),
            archive: state_root.join(ARCHIVE_FILENAME),
            download_root: download_root.into(),
            fallback_download_root: fallback_download_root.into(),
            state_root,
        }
    }

    /// Everything under one root. Handy for tests and throwaway queues.
    pub fn for_queue(root: impl AsRef<Path>) -> Self {
        let root = root.as_ref();
        Self::with_fallback(
            root.join("state"),
            root.join("downloads"),
            root.join("fallback-downloads"),
        )
    }

    /// Create the local state directories.
    ///
    /// `create_dir_all` already treats an existing directory as success, which
    /// also covers another process creating it concurrently.
    pub async fn ensure_dirs(&self) -> Result<()> {
        for dir in [
            &self.incoming,
            &self.processing,
            &self.done,
            &self.error,
            &self.logs,
            &self.previews,
            &self.staging,
        ] {
            tokio::fs::create_dir_all(dir).await?;
        }
        Ok(())
    }

    /// Best-effort creation of the final download root. Returns whether it is
    /// usable right now.
    pub async fn ensure_download_root(&self) -> bool {
        match probe_writable(&self.download_root).await {
            Ok(()) => true,
            Err(e) => {
                warn!(
                    download_root = %self.download_root.display(),
                    error = %e,
                    "download root not writable right now"
                );
                false
            }
        }
    }
}

/// Create `dir` if needed and prove it is writable with a probe file.
pub async fn probe_writable(dir: &Path) -> Result<()> {
    tokio::fs::create_dir_all(dir).await?;
    let probe = dir.join(".ondl_write_test");
    tokio::fs::write(&probe, b"ok").await?;
    tokio::fs::remove_file(&probe).await?;
    Ok(())
}

fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Per-user state directory for the queue, logs, previews and archive.
pub fn default_state_root() -> PathBuf {
    let home = home_dir();
    if cfg!(target_os = "macos") {
        return home.join("Library/Application Support/OnDL");
    }
    if cfg!(windows) {
        let base = std::env::var_os("LOCALAPPDATA")
            .or_else(|| std::env::var_os("APPDATA"))
            .map(PathBuf::from)
            .unwrap_or(home);
        return base.join("OnDL");
    }
    match std::env::var_os("XDG_STATE_HOME").or_else(|| std::env::var_os("XDG_DATA_HOME")) {
        Some(xdg) if !xdg.is_empty() => PathBuf::from(xdg).join("OnDL"),
        _ => home.join(".local/share/OnDL"),
    }
}

/// User-visible default downloads directory.
pub fn default_download_root() -> PathBuf {
    home_dir().join("Downloads").join("OnDL")
}

/// Expand a leading `~` and `$VAR` / `${VAR}` references. Unknown variables
/// are left as written.
pub fn expand_user(raw: &str) -> PathBuf {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;

    if rest == "~" || rest.starts_with("~/") {
        out.push_str(&home_dir().to_string_lossy());
        rest = &rest[1..];
    }

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];
        let (name, consumed) = if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => (&braced[..end], end + 2),
                None => ("", 0),
            }
        } else {
            let end = after
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
                .unwrap_or(after.len());
            (&after[..end], end)
        };

        match std::env::var(name) {
            Ok(value) if !name.is_empty() => out.push_str(&value),
            _ => out.push_str(&rest[pos..pos + 1 + consumed]),
        }
        rest = &after[consumed..];
    }
    out.push_str(rest);
    PathBuf::from(out)
}

/// Resolve a configured path: expand it, then anchor relative paths at `base`.
pub fn resolve_path(raw: &str, base: &Path) -> PathBuf {
    let p = expand_user(raw.trim());
    if p.is_absolute() { p } else { base.join(p) }
}

/// Longest path segment produced by [`sanitize_segment`], in characters.
pub const MAX_SEGMENT_CHARS: usize = 120;

/// Make `raw` safe as a single directory name on any platform.
///
/// Replaces `/\:*?"<>|` and control characters with `-`, collapses runs of
/// whitespace, trims trailing dots, and caps the length. Falls back to
/// `fallback` when nothing usable remains.
pub fn sanitize_segment(raw: &str, fallback: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_space = false;
    for c in raw.trim().chars() {
        if c.is_whitespace() {
            pending_space = !out.is_empty();
            continue;
        }
        if pending_space {
            out.push(' ');
            pending_space = false;
        }
        match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => out.push('-'),
            c if c.is_control() => out.push('-'),
            c => out.push(c),
        }
    }

    let capped: String = out.chars().take(MAX_SEGMENT_CHARS).collect();
    let cleaned = capped.trim_end_matches(['.', ' ']);
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '-' || c == '.') {
        fallback.to_string()
    } else {
        cleaned.to_string()
    }
}

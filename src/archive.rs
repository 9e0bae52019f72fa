//! Dedup archive: the append-only list of resources already fetched.
//!
//! The downloader appends one `<source-type> <source-id>` line per completed
//! fetch. The queue only ever reads it.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncBufReadExt;

use crate::error::Result;
use crate::model::ArchiveKey;

#[derive(Debug, Clone)]
pub struct Archive {
    path: PathBuf,
}

impl Archive {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Exact line membership. A missing archive contains nothing.
    pub async fn contains(&self, key: &ArchiveKey) -> Result<bool> {
        let file = match tokio::fs::File::open(&self.path).await {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let wanted = key.to_string();
        let mut lines = tokio::io::BufReader::new(file).split(b'\n');
        while let Some(line) = lines.next_segment().await? {
            let line = String::from_utf8_lossy(&line);
            if line.trim_end_matches('\r') == wanted {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

//! Merge-moving a staged download into its final directory.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::Relocator;
use crate::error::Result;

/// Filesystem relocator. Same-device moves are renames; cross-device moves
/// copy into a temp file beside the destination, rename it into place, then
/// unlink the source.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsRelocator;

#[async_trait]
impl Relocator for FsRelocator {
    async fn relocate(&self, src_dir: &Path, dest_dir: &Path) -> Result<()> {
        move_merge(src_dir.to_path_buf(), dest_dir.to_path_buf()).await
    }
}

/// Move `src` (file or directory) to `dest`, merging directories and
/// overwriting existing files.
pub async fn move_merge(src: PathBuf, dest: PathBuf) -> Result<()> {
    // Iterative walk; each entry is (source, destination).
    let mut stack = vec![(src.clone(), dest)];
    let mut visited_dirs = Vec::new();

    while let Some((from, to)) = stack.pop() {
        let meta = tokio::fs::symlink_metadata(&from).await?;
        if meta.is_dir() {
            tokio::fs::create_dir_all(&to).await?;
            let mut entries = tokio::fs::read_dir(&from).await?;
            while let Some(entry) = entries.next_entry().await? {
                stack.push((entry.path(), to.join(entry.file_name())));
            }
            visited_dirs.push(from);
        } else {
            move_file(&from, &to).await?;
        }
    }

    // Children were pushed after their parents, so reverse order empties
    // the deepest directories first.
    for dir in visited_dirs.into_iter().rev() {
        if let Err(e) = tokio::fs::remove_dir(&dir).await {
            debug!(dir = %dir.display(), error = %e, "left source directory in place");
        }
    }
    Ok(())
}

async fn move_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }

    match tokio::fs::rename(src, dest).await {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::CrossesDevices => {}
        Err(e) => return Err(e.into()),
    }

    let file_name = dest
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp = dest.with_file_name(format!(".{file_name}.tmp-{}", uuid::Uuid::new_v4().simple()));

    let copied = async {
        tokio::fs::copy(src, &tmp).await?;
        tokio::fs::File::open(&tmp).await?.sync_all().await?;
        tokio::fs::rename(&tmp, dest).await
    }
    .await;
    if let Err(e) = copied {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(e.into());
    }

    debug!(src = %src.display(), dest = %dest.display(), "copied across devices");
    match tokio::fs::remove_file(src).await {
        Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
        _ => Ok(()),
    }
}

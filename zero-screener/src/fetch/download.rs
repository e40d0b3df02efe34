//! Waiting for the exported CSV to land in the download directory.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

use crate::error::{Result, ScreenerError};

/// Suffix Chrome uses for in-progress downloads.
const PARTIAL_SUFFIX: &str = ".crdownload";

/// A completed download, deleted when dropped.
#[derive(Debug)]
pub struct DownloadedFile {
    path: PathBuf,
}

impl DownloadedFile {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub async fn read(&self) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(&self.path).await?)
    }
}

impl Drop for DownloadedFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                debug!(path = %self.path.display(), error = %e, "Failed to remove export file");
            }
        }
    }
}

/// First finished, non-empty `.csv` in `dir`, if any.
async fn find_csv(dir: &Path) -> Result<Option<PathBuf>> {
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let name = entry.file_name().to_string_lossy().to_lowercase();
        if !name.ends_with(".csv") || name.ends_with(PARTIAL_SUFFIX) {
            continue;
        }
        let meta = entry.metadata().await?;
        if meta.is_file() && meta.len() > 0 {
            return Ok(Some(path));
        }
    }
    Ok(None)
}

/// Poll `dir` until a CSV appears or `timeout` elapses.
///
/// `dir` is private to one fetch, so any CSV found there is ours.
pub async fn wait_for_csv(dir: &Path, timeout: Duration, poll: Duration) -> Result<DownloadedFile> {
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(path) = find_csv(dir).await? {
            debug!(path = %path.display(), "Export download complete");
            return Ok(DownloadedFile { path });
        }
        if Instant::now() >= deadline {
            return Err(ScreenerError::ExportFailure(format!(
                "no CSV downloaded within {}s",
                timeout.as_secs()
            )));
        }
        tokio::time::sleep(poll).await;
    }
}

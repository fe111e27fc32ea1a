// src/fetch/downloads.rs
use anyhow::{Context, Result};
use chrono::Utc;
use glob::{glob, Pattern};
use std::{
    fs::{self, File},
    path::{Path, PathBuf},
    time::Duration,
};
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};
use zip::ZipArchive;

use crate::error::ReportError;
use crate::process::Division;

/// Suffix Chromium gives a download while it is still being written.
const PARTIAL_SUFFIX: &str = "crdownload";

/// Move leftover portal downloads and unfinished `*.crdownload` files from an
/// earlier run out of the way, so the browser assigns the expected names again
/// and nothing old looks like a download in progress. Returns where each
/// leftover went.
pub fn set_aside_stale(download_dir: &Path) -> Result<Vec<PathBuf>> {
    let stamp = Utc::now().format("%Y%m%dT%H%M%S");
    let mut moved = Vec::new();
    for division in Division::ALL {
        let path = download_dir.join(division.download_name());
        if !path.exists() {
            continue;
        }
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_default();
        let aside = download_dir.join(format!("{stem}.stale-{stamp}.xlsx"));
        fs::rename(&path, &aside)
            .with_context(|| format!("moving stale {} aside", path.display()))?;
        warn!(from = %path.display(), to = %aside.display(), "set aside stale download");
        moved.push(aside);
    }
    for partial in partial_downloads(download_dir)? {
        let name = partial
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        let aside = download_dir.join(format!("{name}.stale-{stamp}"));
        fs::rename(&partial, &aside)
            .with_context(|| format!("moving unfinished {} aside", partial.display()))?;
        warn!(from = %partial.display(), to = %aside.display(), "set aside unfinished download");
        moved.push(aside);
    }
    Ok(moved)
}

/// Any in-progress browser download in `dir`.
fn partial_downloads(dir: &Path) -> Result<Vec<PathBuf>> {
    let pattern = format!(
        "{}/*.{}",
        Pattern::escape(&dir.to_string_lossy()),
        PARTIAL_SUFFIX
    );
    Ok(glob(&pattern)
        .with_context(|| format!("bad glob pattern {pattern}"))?
        .filter_map(Result::ok)
        .collect())
}

/// An xlsx is a zip container; a truncated file fails to open its central directory.
fn is_complete_archive(path: &Path) -> bool {
    File::open(path)
        .ok()
        .and_then(|f| ZipArchive::new(f).ok())
        .is_some()
}

/// Size of `path` if it exists and nothing in its directory is still downloading.
fn observe(path: &Path) -> Result<Option<u64>> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let partials = partial_downloads(dir)?;
    if !partials.is_empty() {
        debug!(count = partials.len(), "download still in progress");
        return Ok(None);
    }
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
        _ => Ok(None),
    }
}

/// Wait until `path` exists, no partial download remains, its size is unchanged
/// across two polls, and it opens as a zip archive. Returns the final size.
pub async fn wait_for_download(path: &Path, timeout: Duration, poll: Duration) -> Result<u64> {
    let start = Instant::now();
    let mut previous: Option<u64> = None;

    loop {
        let current = observe(path)?;
        if let (Some(prev), Some(now)) = (previous, current) {
            if prev == now && now > 0 && is_complete_archive(path) {
                info!(
                    path = %path.display(),
                    size_bytes = now,
                    elapsed = ?start.elapsed(),
                    "download complete"
                );
                return Ok(now);
            }
        }
        previous = current;

        if start.elapsed() >= timeout {
            return Err(ReportError::DownloadTimeout {
                path: path.to_path_buf(),
                timeout,
            }
            .into());
        }
        sleep(poll).await;
    }
}

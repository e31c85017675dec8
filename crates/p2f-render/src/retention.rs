//! Retention sweep over retained render directories.
//!
//! Best-effort housekeeping, independent of any single render: directories
//! older than the age bound are removed, then the oldest remaining ones are
//! removed while the total retained size is above the size bound.

use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use metrics::counter;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::error::RenderResult;
use crate::names;

/// Retention bounds.
#[derive(Debug, Clone)]
pub struct RetentionPolicy {
    pub max_age: Duration,
    pub max_total_bytes: u64,
}

impl RetentionPolicy {
    pub fn new(max_age_hours: u64, max_total_gb: f64) -> Self {
        Self {
            max_age: Duration::from_secs(max_age_hours.saturating_mul(3600)),
            max_total_bytes: (max_total_gb.max(0.0) * 1024.0 * 1024.0 * 1024.0) as u64,
        }
    }
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self::new(24, 5.0)
    }
}

/// Outcome of a sweep.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub scanned: usize,
    pub removed_expired: usize,
    pub removed_for_size: usize,
    pub freed_bytes: u64,
    pub retained_bytes: u64,
}

impl RetentionReport {
    pub fn removed(&self) -> usize {
        self.removed_expired + self.removed_for_size
    }
}

struct RenderDir {
    path: PathBuf,
    size: u64,
    newest: SystemTime,
}

/// Sweep the direct subdirectories of `media_root`.
pub async fn cleanup_old_renders(media_root: &Path, policy: &RetentionPolicy) -> RenderResult<RetentionReport> {
    cleanup_old_renders_at(media_root, policy, SystemTime::now()).await
}

pub(crate) async fn cleanup_old_renders_at(
    media_root: &Path,
    policy: &RetentionPolicy,
    now: SystemTime,
) -> RenderResult<RetentionReport> {
    let mut dirs = Vec::new();

    let mut entries = match tokio::fs::read_dir(media_root).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(RetentionReport::default()),
        Err(e) => return Err(e.into()),
    };
    while let Some(entry) = entries.next_entry().await? {
        if !entry.file_type().await?.is_dir() {
            continue;
        }
        let path = entry.path();
        match dir_usage(&path).await {
            Ok((size, newest)) => dirs.push(RenderDir { path, size, newest }),
            Err(e) => warn!(path = %path.display(), error = %e, "Skipping unreadable render directory"),
        }
    }

    dirs.sort_by(|a, b| a.newest.cmp(&b.newest).then_with(|| a.path.cmp(&b.path)));

    let mut report = RetentionReport {
        scanned: dirs.len(),
        ..Default::default()
    };
    let mut total: u64 = dirs.iter().map(|d| d.size).sum();

    for dir in dirs {
        let age = now.duration_since(dir.newest).unwrap_or_default();
        let expired = age > policy.max_age;
        let over_budget = total > policy.max_total_bytes;
        if !expired && !over_budget {
            continue;
        }

        match tokio::fs::remove_dir_all(&dir.path).await {
            Ok(()) => {
                total = total.saturating_sub(dir.size);
                report.freed_bytes += dir.size;
                if expired {
                    report.removed_expired += 1;
                } else {
                    report.removed_for_size += 1;
                }
                debug!(
                    path = %dir.path.display(),
                    size_bytes = dir.size,
                    age_secs = age.as_secs(),
                    reason = if expired { "age" } else { "size" },
                    "Removed render directory"
                );
            }
            Err(e) => warn!(path = %dir.path.display(), error = %e, "Failed to remove render directory"),
        }
    }

    report.retained_bytes = total;
    if report.removed() > 0 {
        counter!(names::RETENTION_REMOVED_TOTAL).increment(report.removed() as u64);
        info!(
            removed_expired = report.removed_expired,
            removed_for_size = report.removed_for_size,
            freed_bytes = report.freed_bytes,
            retained_bytes = report.retained_bytes,
            "Retention sweep finished"
        );
    }

    Ok(report)
}

/// Total size and newest modification time under `dir`.
async fn dir_usage(dir: &Path) -> std::io::Result<(u64, SystemTime)> {
    let mut size = 0u64;
    let mut newest = tokio::fs::metadata(dir).await?.modified()?;
    let mut pending = vec![dir.to_path_buf()];

    while let Some(current) = pending.pop() {
        let mut entries = tokio::fs::read_dir(&current).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = entry.metadata().await?;
            if let Ok(modified) = meta.modified() {
                newest = newest.max(modified);
            }
            if meta.is_dir() {
                pending.push(entry.path());
            } else {
                size += meta.len();
            }
        }
    }

    Ok((size, newest))
}

//! Collection of raw renderer output.

use std::path::{Path, PathBuf};
use std::time::SystemTime;

use crate::error::RenderResult;

/// Directory the renderer uses for per-segment intermediates; never final clips.
const PARTIAL_DIR: &str = "partial_movie_files";

/// All files under `root` with `extension`, oldest modification first.
///
/// Ties on modification time are broken by path so the order is stable.
pub async fn collect_videos(root: &Path, extension: &str) -> RenderResult<Vec<PathBuf>> {
    let mut found: Vec<(SystemTime, PathBuf)> = Vec::new();
    let mut pending = vec![root.to_path_buf()];

    while let Some(dir) = pending.pop() {
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e.into()),
        };

        while let Some(entry) = entries.next_entry().await? {
            let file_type = entry.file_type().await?;
            let path = entry.path();

            if file_type.is_dir() {
                if entry.file_name() != PARTIAL_DIR {
                    pending.push(path);
                }
                continue;
            }

            let matches = path
                .extension()
                .map(|ext| ext.eq_ignore_ascii_case(extension))
                .unwrap_or(false);
            if file_type.is_file() && matches {
                let modified = entry.metadata().await?.modified()?;
                found.push((modified, path));
            }
        }
    }

    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_collects_recursively_in_mtime_order() {
        let dir = TempDir::new().unwrap();
        let nested = dir.path().join("videos/scene/720p30");
        tokio::fs::create_dir_all(nested.join(PARTIAL_DIR)).await.unwrap();

        tokio::fs::write(nested.join("Zeta.mp4"), b"z").await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        tokio::fs::write(nested.join("Alpha.MP4"), b"a").await.unwrap();
        tokio::fs::write(nested.join("notes.txt"), b"n").await.unwrap();
        tokio::fs::write(nested.join(PARTIAL_DIR).join("0001.mp4"), b"p").await.unwrap();

        let videos = collect_videos(dir.path(), "mp4").await.unwrap();
        let names: Vec<_> = videos
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().to_string())
            .collect();
        assert_eq!(names, vec!["Zeta.mp4", "Alpha.MP4"]);
    }

    #[tokio::test]
    async fn test_missing_root_is_empty() {
        let dir = TempDir::new().unwrap();
        let videos = collect_videos(&dir.path().join("absent"), "mp4").await.unwrap();
        assert!(videos.is_empty());
    }
}

//! Duration probing.

use std::path::Path;

use crate::command::ProcessRunner;
use crate::error::{RenderError, RenderResult};

/// Probe the duration of a media file, in seconds.
pub async fn probe_duration(runner: &ProcessRunner, ffprobe: &Path, file: &Path) -> RenderResult<f64> {
    let args = vec![
        "-v".to_string(),
        "error".to_string(),
        "-show_entries".to_string(),
        "format=duration".to_string(),
        "-of".to_string(),
        "default=noprint_wrappers=1:nokey=1".to_string(),
        file.to_string_lossy().to_string(),
    ];

    let output = runner.run("ffprobe", ffprobe, &args).await?;
    if !output.success() {
        return Err(RenderError::ProbeFailed(format!(
            "ffprobe exited with {}: {}",
            output.status,
            output.stderr.trim()
        )));
    }

    parse_duration(&output.stdout)
}

fn parse_duration(stdout: &str) -> RenderResult<f64> {
    let line = stdout
        .lines()
        .map(str::trim)
        .find(|l| !l.is_empty())
        .ok_or_else(|| RenderError::ProbeFailed("ffprobe reported no duration".to_string()))?;

    let duration: f64 = line
        .parse()
        .map_err(|_| RenderError::ProbeFailed(format!("unparseable duration '{line}'")))?;

    if !duration.is_finite() || duration < 0.0 {
        return Err(RenderError::ProbeFailed(format!("invalid duration {duration}")));
    }
    Ok(duration)
}

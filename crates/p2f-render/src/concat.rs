//! Clip concatenation.
//!
//! Tries a lossless stream copy first and falls back to re-encoding when the
//! clips' codec parameters do not line up.

use std::path::{Path, PathBuf};

use tracing::{info, warn};

use crate::command::ProcessRunner;
use crate::error::{RenderError, RenderResult};

/// How the final artifact was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcatStrategy {
    /// Only one usable clip; it was copied.
    Single,
    StreamCopy,
    Reencode,
}

impl ConcatStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ConcatStrategy::Single => "single",
            ConcatStrategy::StreamCopy => "stream_copy",
            ConcatStrategy::Reencode => "reencode",
        }
    }
}

/// Join `inputs` in order into `output`.
///
/// Zero-byte inputs are skipped. The concat list file is written to
/// `list_dir`.
pub async fn concat_videos(
    runner: &ProcessRunner,
    ffmpeg: &Path,
    inputs: &[PathBuf],
    output: &Path,
    list_dir: &Path,
) -> RenderResult<ConcatStrategy> {
    let mut usable = Vec::with_capacity(inputs.len());
    for input in inputs {
        match tokio::fs::metadata(input).await {
            Ok(meta) if meta.len() > 0 => usable.push(input.clone()),
            Ok(_) => warn!(path = %input.display(), "Skipping empty clip"),
            Err(e) => warn!(path = %input.display(), error = %e, "Skipping unreadable clip"),
        }
    }

    match usable.as_slice() {
        [] => return Err(RenderError::ConcatFailed("no non-empty clips to concatenate".to_string())),
        [only] => {
            tokio::fs::copy(only, output).await?;
            return Ok(ConcatStrategy::Single);
        }
        _ => {}
    }

    let list_path = list_dir.join("concat_list.txt");
    tokio::fs::write(&list_path, concat_list(&usable)).await?;

    let copy_args = ffmpeg_args(&list_path, output, &["-c", "copy"]);
    let copy_error = match run_ffmpeg(runner, ffmpeg, &copy_args, output).await {
        Ok(()) => {
            info!(clips = usable.len(), "Concatenated clips with stream copy");
            return Ok(ConcatStrategy::StreamCopy);
        }
        Err(e) => e,
    };
    if copy_error.is_timeout() {
        let _ = tokio::fs::remove_file(output).await;
        return Err(copy_error);
    }

    warn!(error = %copy_error, "Stream copy concatenation failed, re-encoding");
    let _ = tokio::fs::remove_file(output).await;

    let reencode_args = ffmpeg_args(
        &list_path,
        output,
        &["-c:v", "libx264", "-preset", "fast", "-crf", "23", "-c:a", "aac"],
    );
    match run_ffmpeg(runner, ffmpeg, &reencode_args, output).await {
        Ok(()) => {
            info!(clips = usable.len(), "Concatenated clips with re-encode");
            Ok(ConcatStrategy::Reencode)
        }
        Err(e) => {
            let _ = tokio::fs::remove_file(output).await;
            if e.is_timeout() {
                return Err(e);
            }
            Err(RenderError::ConcatFailed(e.to_string()))
        }
    }
}

async fn run_ffmpeg(runner: &ProcessRunner, ffmpeg: &Path, args: &[String], output: &Path) -> RenderResult<()> {
    runner.run("ffmpeg", ffmpeg, args).await?.check("ffmpeg")?;

    match tokio::fs::metadata(output).await {
        Ok(meta) if meta.len() > 0 => Ok(()),
        _ => Err(RenderError::tool_failed(
            "ffmpeg",
            "produced no output",
            None,
            None,
            None,
        )),
    }
}

fn ffmpeg_args(list: &Path, output: &Path, codec_args: &[&str]) -> Vec<String> {
    let mut args: Vec<String> = ["-y", "-v", "error", "-f", "concat", "-safe", "0", "-i"]
        .iter()
        .map(|s| s.to_string())
        .collect();
    args.push(list.to_string_lossy().to_string());
    args.extend(codec_args.iter().map(|s| s.to_string()));
    args.push(output.to_string_lossy().to_string());
    args
}

/// Concat demuxer list: one `file '<path>'` line per clip.
fn concat_list(inputs: &[PathBuf]) -> String {
    inputs
        .iter()
        .map(|p| format!("file '{}'\n", p.to_string_lossy().replace('\'', r"'\''")))
        .collect()
}

//! Renderer command builder and supervised process runner.

use std::path::{Path, PathBuf};
use std::process::{ExitStatus, Stdio};
use std::time::{Duration, Instant};

use metrics::counter;
use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use p2f_models::QualityTier;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::error::{RenderError, RenderResult};
use crate::names;

/// Bytes of stdout/stderr kept for diagnostics.
const CAPTURE_TAIL_BYTES: usize = 4000;

/// Builder for scene renderer invocations.
///
/// Produces `<script> <Scene>... -q<tier> --media_dir <dir> -v <level>`.
#[derive(Debug, Clone)]
pub struct RenderCommand {
    script: PathBuf,
    scenes: Vec<String>,
    quality: QualityTier,
    media_dir: PathBuf,
    verbosity: String,
}

impl RenderCommand {
    pub fn new(script: impl AsRef<Path>, media_dir: impl AsRef<Path>) -> Self {
        Self {
            script: script.as_ref().to_path_buf(),
            scenes: Vec::new(),
            quality: QualityTier::default(),
            media_dir: media_dir.as_ref().to_path_buf(),
            verbosity: "WARNING".to_string(),
        }
    }

    /// Add scene entry points to render.
    pub fn scenes<I, S>(mut self, scenes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scenes.extend(scenes.into_iter().map(Into::into));
        self
    }

    pub fn quality(mut self, quality: QualityTier) -> Self {
        self.quality = quality;
        self
    }

    pub fn verbosity(mut self, level: impl Into<String>) -> Self {
        self.verbosity = level.into();
        self
    }

    /// Build the command arguments.
    pub fn build_args(&self) -> Vec<String> {
        let mut args = Vec::with_capacity(self.scenes.len() + 6);

        args.push(self.script.to_string_lossy().to_string());
        args.extend(self.scenes.iter().cloned());
        args.push(self.quality.renderer_flag().to_string());
        args.push("--media_dir".to_string());
        args.push(self.media_dir.to_string_lossy().to_string());
        args.push("-v".to_string());
        args.push(self.verbosity.clone());

        args
    }
}

/// Captured result of a finished process.
#[derive(Debug)]
pub struct ProcessOutput {
    pub status: ExitStatus,
    /// Tail of stdout, redacted
    pub stdout: String,
    /// Tail of stderr, redacted
    pub stderr: String,
}

impl ProcessOutput {
    pub fn success(&self) -> bool {
        self.status.success()
    }

    /// Convert a non-zero exit into [`RenderError::ToolFailed`].
    pub fn check(self, tool: &str) -> RenderResult<Self> {
        if self.success() {
            return Ok(self);
        }

        Err(RenderError::tool_failed(
            tool,
            format!("exited with {}", self.status),
            non_empty(&self.stdout),
            non_empty(&self.stderr),
            self.status.code(),
        ))
    }
}

/// Runner for external tools with a hard wall-clock timeout.
///
/// Each child runs in its own process group. On timeout the whole group gets
/// SIGTERM, then SIGKILL if it has not exited after the grace period. The
/// limit covers draining the output pipes as well as the leader's exit.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    timeout: Option<Duration>,
    deadline: Option<Instant>,
    kill_grace: Duration,
    working_dir: Option<PathBuf>,
    redactions: Vec<(String, String)>,
}

impl Default for ProcessRunner {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessRunner {
    pub fn new() -> Self {
        Self {
            timeout: None,
            deadline: None,
            kill_grace: Duration::from_secs(5),
            working_dir: None,
            redactions: Vec::new(),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Shared wall-clock deadline. Every run through this runner (and its
    /// clones) gets only the time left until `deadline`.
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    pub fn with_working_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.working_dir = Some(dir.as_ref().to_path_buf());
        self
    }

    /// Replace `path` with `label` in captured output.
    pub fn with_redaction(mut self, path: impl AsRef<Path>, label: impl Into<String>) -> Self {
        let path = path.as_ref().to_string_lossy().to_string();
        if !path.is_empty() {
            self.redactions.push((path, label.into()));
        }
        self
    }

    /// Time allowed for the next run: the smaller of the per-run timeout and
    /// whatever is left before the deadline.
    fn limit(&self) -> Option<Duration> {
        let remaining = self
            .deadline
            .map(|deadline| deadline.saturating_duration_since(Instant::now()));
        match (self.timeout, remaining) {
            (Some(timeout), Some(remaining)) => Some(timeout.min(remaining)),
            (timeout, remaining) => timeout.or(remaining),
        }
    }

    /// Run `program` to completion.
    ///
    /// A non-zero exit is returned as `Ok`; use [`ProcessOutput::check`] to
    /// turn it into an error. Spawn failures and timeouts are errors.
    pub async fn run(&self, tool: &str, program: &Path, args: &[String]) -> RenderResult<ProcessOutput> {
        let resolved = which::which(program).map_err(|_| RenderError::ToolNotFound {
            tool: tool.to_string(),
            program: program.to_path_buf(),
        })?;

        let limit = self.limit();
        if limit.is_some_and(|limit| limit.is_zero()) {
            counter!(names::PROCESS_TIMEOUTS_TOTAL, "tool" => tool.to_string()).increment(1);
            warn!(tool, "Deadline already passed, not starting tool");
            return Err(RenderError::Timeout {
                tool: tool.to_string(),
                secs: 0,
            });
        }

        debug!(tool, program = %resolved.display(), args = %self.redact(&args.join(" ")), "Running tool");

        let mut command = Command::new(&resolved);
        command
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .process_group(0);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }

        let mut child = command.spawn()?;
        let pgid = child.id().and_then(|p| i32::try_from(p).ok()).map(Pid::from_raw);
        let mut group = GroupGuard::new(pgid);

        let mut stdout_task = child.stdout.take().map(|out| tokio::spawn(read_tail(out)));
        let mut stderr_task = child.stderr.take().map(|err| tokio::spawn(read_tail(err)));

        let collect = async {
            let status = child.wait().await;
            // Background children still in the group would hold the pipes open.
            group.sweep();
            let stdout = join_reader(&mut stdout_task).await;
            let stderr = join_reader(&mut stderr_task).await;
            (status, stdout, stderr)
        };

        let finished = match limit {
            Some(limit) => tokio::time::timeout(limit, collect).await.ok(),
            None => Some(collect.await),
        };

        let Some((status, stdout, stderr)) = finished else {
            let limit = limit.unwrap_or_default();
            counter!(names::PROCESS_TIMEOUTS_TOTAL, "tool" => tool.to_string()).increment(1);
            warn!(tool, timeout_secs = limit.as_secs(), "Tool timed out, terminating process group");
            self.terminate(&mut child, pgid).await;
            group.disarm();
            abort_reader(stdout_task);
            abort_reader(stderr_task);
            return Err(RenderError::Timeout {
                tool: tool.to_string(),
                secs: limit.as_secs_f64().ceil() as u64,
            });
        };
        group.disarm();

        Ok(ProcessOutput {
            status: status?,
            stdout: self.redact(&stdout),
            stderr: self.redact(&stderr),
        })
    }

    /// SIGTERM the process group, then SIGKILL after the grace period.
    async fn terminate(&self, child: &mut Child, pgid: Option<Pid>) {
        let Some(pgid) = pgid else {
            let _ = child.kill().await;
            return;
        };

        if let Err(e) = killpg(pgid, Signal::SIGTERM) {
            debug!(error = %e, "SIGTERM to process group failed");
        }

        match tokio::time::timeout(self.kill_grace, child.wait()).await {
            Ok(_) => {
                // Leader is gone; sweep any stragglers left in its group.
                let _ = killpg(pgid, Signal::SIGKILL);
            }
            Err(_) => {
                warn!(pid = pgid.as_raw(), "Process ignored SIGTERM, sending SIGKILL");
                let _ = killpg(pgid, Signal::SIGKILL);
                let _ = child.kill().await;
            }
        }
    }

    fn redact(&self, text: &str) -> String {
        self.redactions
            .iter()
            .fold(text.to_string(), |acc, (path, label)| acc.replace(path.as_str(), label))
    }
}

/// Kills a child's process group when a run is abandoned before it finished.
///
/// `kill_on_drop` only reaches the leader; this reaches its descendants too.
struct GroupGuard {
    pgid: Option<Pid>,
    armed: bool,
}

impl GroupGuard {
    fn new(pgid: Option<Pid>) -> Self {
        Self { pgid, armed: true }
    }

    /// SIGKILL whatever is left in the group.
    fn sweep(&self) {
        if let Some(pgid) = self.pgid {
            let _ = killpg(pgid, Signal::SIGKILL);
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for GroupGuard {
    fn drop(&mut self) {
        if self.armed {
            self.sweep();
        }
    }
}

/// Keep a rolling tail of the stream so memory stays bounded however much
/// the tool writes.
async fn read_tail<R: AsyncRead + Unpin>(mut reader: R) -> String {
    let mut tail: Vec<u8> = Vec::with_capacity(CAPTURE_TAIL_BYTES * 2);
    let mut chunk = [0u8; 8192];
    loop {
        match reader.read(&mut chunk).await {
            Ok(0) | Err(_) => break,
            Ok(n) => {
                tail.extend_from_slice(&chunk[..n]);
                if tail.len() > CAPTURE_TAIL_BYTES * 2 {
                    let excess = tail.len() - CAPTURE_TAIL_BYTES;
                    tail.drain(..excess);
                }
            }
        }
    }
    let start = tail.len().saturating_sub(CAPTURE_TAIL_BYTES);
    String::from_utf8_lossy(&tail[start..]).to_string()
}

async fn join_reader(task: &mut Option<tokio::task::JoinHandle<String>>) -> String {
    match task.as_mut() {
        Some(handle) => handle.await.unwrap_or_default(),
        None => String::new(),
    }
}

fn abort_reader(task: Option<tokio::task::JoinHandle<String>>) {
    if let Some(handle) = task {
        handle.abort();
    }
}

fn non_empty(text: &str) -> Option<String> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_builder() {
        let cmd = RenderCommand::new("/work/script/scene.py", "/work/media")
            .scenes(["Intro", "Outro"])
            .quality(QualityTier::High);

        assert_eq!(
            cmd.build_args(),
            vec![
                "/work/script/scene.py",
                "Intro",
                "Outro",
                "-qh",
                "--media_dir",
                "/work/media",
                "-v",
                "WARNING",
            ]
        );
    }

    #[tokio::test]
    async fn test_run_captures_output_and_exit_code() {
        let runner = ProcessRunner::new().with_redaction("/secret/workdir", "<workdir>");
        let output = runner
            .run(
                "shell",
                Path::new("/bin/sh"),
                &["-c".to_string(), "echo out; echo /secret/workdir/x >&2; exit 3".to_string()],
            )
            .await
            .unwrap();

        assert!(!output.success());
        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "<workdir>/x");

        let err = output.check("shell").unwrap_err();
        match err {
            RenderError::ToolFailed { exit_code, stderr, .. } => {
                assert_eq!(exit_code, Some(3));
                assert_eq!(stderr.as_deref(), Some("<workdir>/x"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_missing_tool() {
        let err = ProcessRunner::new()
            .run("renderer", Path::new("/nonexistent/p2f-renderer"), &[])
            .await
            .unwrap_err();
        assert!(matches!(err, RenderError::ToolNotFound { .. }));
    }

    #[tokio::test]
    async fn test_timeout_kills_process() {
        let runner = ProcessRunner::new()
            .with_timeout(Duration::from_millis(300))
            .with_kill_grace(Duration::from_millis(300));

        let started = std::time::Instant::now();
        let err = runner
            .run("shell", Path::new("/bin/sh"), &["-c".to_string(), "sleep 30".to_string()])
            .await
            .unwrap_err();

        assert!(err.is_timeout());
        assert!(started.elapsed() < Duration::from_secs(10));
    }

    #[tokio::test]
    async fn test_background_child_does_not_outlive_leader() {
        let runner = ProcessRunner::new().with_timeout(Duration::from_secs(5));

        let started = std::time::Instant::now();
        let output = runner
            .run(
                "shell",
                Path::new("/bin/sh"),
                &["-c".to_string(), "sleep 8 & echo started; exit 0".to_string()],
            )
            .await
            .unwrap();

        assert!(output.success());
        assert_eq!(output.stdout.trim(), "started");
        assert!(started.elapsed() < Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_timeout_covers_pipe_drain() {
        // The leader exits at once but a child in another session keeps
        // stdout open; the run must still end at the limit.
        let runner = ProcessRunner::new()
            .with_timeout(Duration::from_secs(1))
            .with_kill_grace(Duration::from_millis(200));

        let started = std::time::Instant::now();
        let result = runner
            .run(
                "shell",
                Path::new("/bin/sh"),
                &["-c".to_string(), "setsid sleep 8 & exit 0".to_string()],
            )
            .await;

        assert!(started.elapsed() < Duration::from_secs(5));
        if let Err(err) = result {
            assert!(err.is_timeout());
        }
    }

    #[tokio::test]
    async fn test_deadline_is_shared_across_runs() {
        let runner = ProcessRunner::new()
            .with_deadline(Instant::now() + Duration::from_millis(500))
            .with_kill_grace(Duration::from_millis(200));

        let first = runner
            .run("shell", Path::new("/bin/sh"), &["-c".to_string(), "sleep 1".to_string()])
            .await
            .unwrap_err();
        assert!(first.is_timeout());

        let started = std::time::Instant::now();
        let second = runner
            .run("shell", Path::new("/bin/sh"), &["-c".to_string(), "sleep 1".to_string()])
            .await
            .unwrap_err();
        assert!(second.is_timeout());
        assert!(started.elapsed() < Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_read_tail_keeps_last_bytes_only() {
        let mut data = vec![b'a'; 100_000];
        data.extend_from_slice(b"\nlast line\n");

        let tail = read_tail(&data[..]).await;

        assert_eq!(tail.len(), CAPTURE_TAIL_BYTES);
        assert!(tail.ends_with("last line\n"));
    }
}

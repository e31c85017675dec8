//! Render pipeline tests against shell stand-ins for the external tools.

use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::kill;
use nix::unistd::Pid;
use p2f_models::QualityTier;
use p2f_render::{RenderConfig, RenderError, RenderErrorKind, RenderOrchestrator, FINAL_ARTIFACT_NAME};
use tempfile::TempDir;

/// Shared preamble: sets `$media` and `$scenes` from renderer arguments.
const PARSE_RENDERER_ARGS: &str = r#"#!/bin/sh
shift
scenes=""
media=""
while [ $# -gt 0 ]; do
  case "$1" in
    --media_dir) media="$2"; shift 2 ;;
    -v) shift 2 ;;
    -q*) shift ;;
    *) scenes="$scenes $1"; shift ;;
  esac
done
out="$media/videos/scene/720p30"
mkdir -p "$out"
"#;

const FAKE_FFMPEG: &str = r#"#!/bin/sh
list=""
prev=""
out=""
for arg in "$@"; do
  if [ "$prev" = "-i" ]; then list="$arg"; fi
  prev="$arg"
  out="$arg"
done
: > "$out"
while IFS= read -r line; do
  f="${line#file \'}"
  f="${f%\'}"
  cat "$f" >> "$out"
done < "$list"
"#;

/// Executable stand-ins, written once before any test spawns a process.
struct Fakes {
    dir: TempDir,
}

impl Fakes {
    fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

fn fakes() -> &'static Fakes {
    static FAKES: OnceLock<Fakes> = OnceLock::new();
    FAKES.get_or_init(|| {
        let dir = TempDir::new().unwrap();
        let pidfile = dir.path().join("renderer.pid");

        let scripts: Vec<(&str, String)> = vec![
            (
                "renderer",
                format!(
                    "{PARSE_RENDERER_ARGS}for s in $scenes; do\n  printf 'clip-%s;' \"$s\" > \"$out/$s.mp4\"\n  sleep 1\ndone\n"
                ),
            ),
            (
                "renderer_three_clips",
                format!(
                    "{PARSE_RENDERER_ARGS}for i in 1 2 3; do\n  printf 'clip-%s;' \"$i\" > \"$out/part$i.mp4\"\ndone\n"
                ),
            ),
            ("renderer_no_output", format!("{PARSE_RENDERER_ARGS}exit 0\n")),
            (
                "renderer_failing",
                format!("{PARSE_RENDERER_ARGS}echo \"Traceback: $out is broken\" >&2\nexit 1\n"),
            ),
            (
                "renderer_hanging",
                format!("#!/bin/sh\necho $$ > '{}'\nexec sleep 30\n", pidfile.display()),
            ),
            ("renderer_stalled", "#!/bin/sh\nexec sleep 30\n".to_string()),
            (
                "renderer_marker",
                format!("#!/bin/sh\ntouch '{}'\n", dir.path().join("renderer.invoked").display()),
            ),
            ("ffmpeg", FAKE_FFMPEG.to_string()),
            (
                "ffmpeg_no_copy",
                FAKE_FFMPEG.replacen(
                    "#!/bin/sh\n",
                    "#!/bin/sh\ncase \" $* \" in *\" copy \"*) echo 'copy unsupported' >&2; exit 1 ;; esac\n",
                    1,
                ),
            ),
            ("ffprobe", "#!/bin/sh\necho 4.5\n".to_string()),
            ("ffprobe_long", "#!/bin/sh\necho 120.0\n".to_string()),
            ("ffprobe_hanging", "#!/bin/sh\nsleep 20\necho 1.0\n".to_string()),
        ];

        for (name, body) in scripts {
            let path = dir.path().join(name);
            std::fs::write(&path, body).unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        }

        Fakes { dir }
    })
}

struct Harness {
    root: TempDir,
    orchestrator: RenderOrchestrator,
}

impl Harness {
    fn new(renderer: &str, ffmpeg: &str, ffprobe: &str) -> Self {
        let fakes = fakes();
        let root = TempDir::new().unwrap();
        let config = RenderConfig {
            media_root: root.path().join("media"),
            work_root: root.path().join("work"),
            renderer_bin: fakes.path(renderer),
            ffmpeg_bin: fakes.path(ffmpeg),
            ffprobe_bin: fakes.path(ffprobe),
            max_clips: 2,
            min_video_bytes: 1,
            kill_grace: Duration::from_secs(1),
            ..Default::default()
        };

        Self {
            root,
            orchestrator: RenderOrchestrator::new(config),
        }
    }

    fn media_root(&self) -> PathBuf {
        self.root.path().join("media")
    }

    fn work_root(&self) -> PathBuf {
        self.root.path().join("work")
    }
}

fn dir_entries(path: &Path) -> usize {
    std::fs::read_dir(path).map(|entries| entries.count()).unwrap_or(0)
}

const TWO_SCENES: &str = "from manim import *\n\nclass Zeta(Scene):\n    def construct(self):\n        self.wait(1)\n\nclass Alpha(Scene):\n    def construct(self):\n        self.wait(1)\n";

const ONE_SCENE: &str = "from manim import *\n\nclass Only(Scene):\n    def construct(self):\n        self.wait(1)\n";

#[tokio::test]
async fn test_two_scenes_concatenated_in_mtime_order() {
    let harness = Harness::new("renderer", "ffmpeg", "ffprobe");

    let summary = harness
        .orchestrator
        .render(TWO_SCENES, QualityTier::Medium, Duration::from_secs(30))
        .await
        .unwrap();

    assert_eq!(summary.scenes, vec!["Zeta", "Alpha"]);
    assert_eq!(summary.clip_count, 2);
    assert!((summary.duration_secs - 4.5).abs() < 1e-9);
    assert_eq!(summary.file_name().as_deref(), Some(FINAL_ARTIFACT_NAME));
    assert_eq!(
        summary.artifact_path,
        harness.media_root().join(&summary.run_id).join(FINAL_ARTIFACT_NAME)
    );

    let content = std::fs::read_to_string(&summary.artifact_path).unwrap();
    assert_eq!(content, "clip-Zeta;clip-Alpha;");
    assert_eq!(dir_entries(&harness.work_root()), 0, "work directory must be removed");
}

#[tokio::test]
async fn test_reencode_fallback_when_stream_copy_fails() {
    let harness = Harness::new("renderer", "ffmpeg_no_copy", "ffprobe");

    let summary = harness
        .orchestrator
        .render(TWO_SCENES, QualityTier::Low, Duration::from_secs(30))
        .await
        .unwrap();

    let content = std::fs::read_to_string(&summary.artifact_path).unwrap();
    assert_eq!(content, "clip-Zeta;clip-Alpha;");
}

#[tokio::test]
async fn test_zero_scenes_fails_before_any_subprocess() {
    let harness = Harness::new("renderer_marker", "ffmpeg", "ffprobe");
    let source = "from manim import *\n\nclass Helper:\n    pass\n";

    let err = harness
        .orchestrator
        .render(source, QualityTier::Medium, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::NoScenes));
    assert_eq!(err.kind(), RenderErrorKind::ValidationFailed);
    assert!(!fakes().path("renderer.invoked").exists());
    assert_eq!(dir_entries(&harness.media_root()), 0);
}

#[tokio::test]
async fn test_unsafe_source_is_rejected() {
    let harness = Harness::new("renderer_marker", "ffmpeg", "ffprobe");
    let source = "from manim import *\nimport subprocess\n\nclass Evil(Scene):\n    def construct(self):\n        subprocess.run(['ls'])\n";

    let err = harness
        .orchestrator
        .render(source, QualityTier::Medium, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), RenderErrorKind::ValidationFailed);
    assert!(!fakes().path("renderer.invoked").exists());
}

#[tokio::test]
async fn test_too_many_clips_leaves_no_output_directory() {
    let harness = Harness::new("renderer_three_clips", "ffmpeg", "ffprobe");

    let err = harness
        .orchestrator
        .render(ONE_SCENE, QualityTier::Medium, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::TooManyClips { count: 3, max: 2 }));
    assert_eq!(err.kind(), RenderErrorKind::ResourceBoundExceeded);
    assert_eq!(dir_entries(&harness.media_root()), 0);
    assert_eq!(dir_entries(&harness.work_root()), 0);
}

#[tokio::test]
async fn test_duration_over_limit_is_rejected() {
    let harness = Harness::new("renderer", "ffmpeg", "ffprobe_long");

    let err = harness
        .orchestrator
        .render(ONE_SCENE, QualityTier::Medium, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::DurationExceeded { .. }));
    assert_eq!(dir_entries(&harness.media_root()), 0);
}

#[tokio::test]
async fn test_undersized_artifact_is_rejected() {
    let fakes = fakes();
    let root = TempDir::new().unwrap();
    let orchestrator = RenderOrchestrator::new(RenderConfig {
        media_root: root.path().join("media"),
        work_root: root.path().join("work"),
        renderer_bin: fakes.path("renderer"),
        ffmpeg_bin: fakes.path("ffmpeg"),
        ffprobe_bin: fakes.path("ffprobe"),
        min_video_bytes: 1024,
        ..Default::default()
    });

    let err = orchestrator
        .render(ONE_SCENE, QualityTier::Medium, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::ArtifactTooSmall { min: 1024, .. }));
    assert_eq!(dir_entries(&root.path().join("media")), 0);
}

#[tokio::test]
async fn test_missing_output_is_a_tool_failure() {
    let harness = Harness::new("renderer_no_output", "ffmpeg", "ffprobe");

    let err = harness
        .orchestrator
        .render(ONE_SCENE, QualityTier::Medium, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert!(matches!(err, RenderError::MissingOutput));
    assert_eq!(err.kind(), RenderErrorKind::ExternalToolFailure);
}

#[tokio::test]
async fn test_nonzero_exit_surfaces_redacted_diagnostics() {
    let harness = Harness::new("renderer_failing", "ffmpeg", "ffprobe");

    let err = harness
        .orchestrator
        .render(ONE_SCENE, QualityTier::Medium, Duration::from_secs(30))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), RenderErrorKind::ExternalToolFailure);
    let stderr = err.stderr().unwrap();
    assert!(stderr.contains("Traceback"));
    assert!(stderr.contains("<workdir>"));
    assert!(!stderr.contains(harness.work_root().to_string_lossy().as_ref()));
}

#[tokio::test]
async fn test_timeout_terminates_renderer() {
    let harness = Harness::new("renderer_hanging", "ffmpeg", "ffprobe");

    let err = harness
        .orchestrator
        .render(ONE_SCENE, QualityTier::Medium, Duration::from_secs(1))
        .await
        .unwrap_err();

    assert!(err.is_timeout());
    assert_eq!(err.kind(), RenderErrorKind::ExternalToolFailure);
    assert_eq!(dir_entries(&harness.media_root()), 0);
    assert_eq!(dir_entries(&harness.work_root()), 0);

    let pid: i32 = std::fs::read_to_string(fakes().path("renderer.pid"))
        .unwrap()
        .trim()
        .parse()
        .unwrap();
    assert_eq!(kill(Pid::from_raw(pid), None), Err(Errno::ESRCH));
}

#[tokio::test]
async fn test_timeout_budget_covers_tools_after_renderer() {
    let harness = Harness::new("renderer", "ffmpeg", "ffprobe_hanging");

    let started = Instant::now();
    let err = harness
        .orchestrator
        .render(ONE_SCENE, QualityTier::Medium, Duration::from_secs(3))
        .await
        .unwrap_err();

    assert!(err.is_timeout(), "unexpected error: {err:?}");
    assert!(started.elapsed() < Duration::from_secs(8));
    assert_eq!(dir_entries(&harness.media_root()), 0);
    assert_eq!(dir_entries(&harness.work_root()), 0);
}

#[tokio::test]
async fn test_abandoned_render_still_cleans_up() {
    let harness = Harness::new("renderer_stalled", "ffmpeg", "ffprobe");

    let abandoned = tokio::time::timeout(
        Duration::from_millis(500),
        harness
            .orchestrator
            .render(ONE_SCENE, QualityTier::Medium, Duration::from_secs(2)),
    )
    .await;
    assert!(abandoned.is_err());
    assert_eq!(dir_entries(&harness.media_root()), 1, "render keeps running without its caller");

    let give_up = Instant::now() + Duration::from_secs(10);
    while (dir_entries(&harness.media_root()) > 0 || dir_entries(&harness.work_root()) > 0)
        && Instant::now() < give_up
    {
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert_eq!(dir_entries(&harness.media_root()), 0);
    assert_eq!(dir_entries(&harness.work_root()), 0);
}

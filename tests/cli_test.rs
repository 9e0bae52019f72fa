//! End-to-end tests of the `ondl` binary.

use ondl_rs::config::Config;
use ondl_rs::queue::{FsQueue, QueueState, QueueStore};
use std::io::Write as _;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

const MISSING_TOOL: &str = "/nonexistent/ondl-test/tool";

/// Write a config rooted in `dir` and return its path.
fn write_config(dir: &Path, extra: &str) -> PathBuf {
    let path = dir.join("config.toml");
    let text = format!(
        "[ondl]\nstate_root = \"state\"\ndownload_root = \"downloads\"\n\n{extra}\n"
    );
    std::fs::write(&path, text).unwrap();
    path
}

fn ondl(config: &Path, args: &[&str], env: &[(&str, &str)], stdin: &str) -> Output {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_ondl"));
    cmd.arg("--config")
        .arg(config)
        .args(args)
        .current_dir(config.parent().unwrap())
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped());
    for var in [
        "ONDL_CONFIG",
        "ONDL_YTDLP",
        "ONDL_FFMPEG",
        "ONDL_FFPROBE",
        "ONDL_DISCORD_WEBHOOK_URL",
        "OTEL_ENDPOINT",
        "RUST_LOG",
    ] {
        cmd.env_remove(var);
    }
    cmd.envs(env.iter().copied());

    let mut child = cmd.spawn().unwrap();
    child
        .stdin
        .take()
        .unwrap()
        .write_all(stdin.as_bytes())
        .unwrap();
    child.wait_with_output().unwrap()
}

fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).into_owned()
}

async fn incoming(config: &Path) -> usize {
    let config = Config::from_file(config).unwrap();
    let queue = FsQueue::new(config.layout(), config.queue.job_glob.clone());
    queue.list(QueueState::Incoming).await.unwrap().len()
}

// ---------------------------------------------------------------------------
// ingest
// ---------------------------------------------------------------------------

#[tokio::test]
async fn ingest_queues_when_ytdlp_is_unavailable() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");
    let env = [("ONDL_YTDLP", MISSING_TOOL)];
    let request = r#"{"url":"https://youtu.be/abc"}"#;

    let first = ondl(&config, &["ingest"], &env, request);
    assert_eq!(first.status.code(), Some(0), "stderr: {}", String::from_utf8_lossy(&first.stderr));
    let line = stdout(&first);
    assert!(line.starts_with("QUEUED ") && line.trim_end().ends_with(".dljob"), "{line:?}");
    assert_eq!(line.lines().count(), 1);
    assert_eq!(incoming(&config).await, 1);

    let second = ondl(&config, &["ingest"], &env, request);
    assert_eq!(second.status.code(), Some(0));
    assert_eq!(stdout(&second), "ALREADY_QUEUED\n");
    assert_eq!(incoming(&config).await, 1);
}

#[tokio::test]
async fn ingest_rejects_request_without_url() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "");

    let output = ondl(&config, &["ingest"], &[("ONDL_YTDLP", MISSING_TOOL)], r#"{"category":"music"}"#);

    assert_eq!(output.status.code(), Some(2));
    assert_eq!(stdout(&output), "ERROR payload missing 'url'\n");
    assert_eq!(incoming(&config).await, 0);
}

#[test]
fn ingest_reports_broken_config_as_internal_error() {
    let tmp = tempfile::tempdir().unwrap();
    let config = write_config(tmp.path(), "[queue]\nstale_processing_action = \"explode\"");

    let output = ondl(&config, &["ingest"], &[], r#"{"url":"https://youtu.be/abc"}"#);

    assert_eq!(output.status.code(), Some(3));
    let line = stdout(&output);
    assert!(line.starts_with("ERROR internal: "), "{line:?}");
    assert_eq!(line.lines().count(), 1);
}

// ---------------------------------------------------------------------------
// consume
// ---------------------------------------------------------------------------

#[test]
fn consume_without_previews_does_not_need_ffmpeg() {
    let tmp = tempfile::tempdir().unwrap();
    // Only has to exist; an empty queue never runs it.
    let ytdlp = tmp.path().join("yt-dlp");
    std::fs::write(&ytdlp, "").unwrap();
    let ytdlp = ytdlp.to_str().unwrap();
    let env = [
        ("ONDL_YTDLP", ytdlp),
        ("ONDL_FFMPEG", MISSING_TOOL),
        ("ONDL_FFPROBE", MISSING_TOOL),
    ];

    let disabled = write_config(tmp.path(), "[preview]\nenabled = false");
    let output = ondl(&disabled, &["consume"], &env, "");
    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));

    let enabled = write_config(tmp.path(), "[preview]\nenabled = true");
    let output = ondl(&enabled, &["consume"], &env, "");
    assert!(!output.status.success());
    assert!(String::from_utf8_lossy(&output.stderr).contains("ffmpeg"));
}

//! ondl CLI: ingest requests, consume the queue, inspect jobs.

use anyhow::Context as _;
use chrono::Local;
use clap::{Parser, Subcommand};
use ondl_rs::archive::Archive;
use ondl_rs::config::Config;
use ondl_rs::engine::{ControlConfig, ControlPlane, Pipeline};
use ondl_rs::ingest::{IngestGate, IngestOutcome};
use ondl_rs::model::{Job, JobName};
use ondl_rs::paths::{self, Layout};
use ondl_rs::queue::{FsQueue, JobRef, QueueState, QueueStore};
use ondl_rs::telemetry::{TelemetryConfig, TelemetryGuard, init_telemetry};
use ondl_rs::tools::resolve::{FFMPEG, FFPROBE, YTDLP, resolve_tool};
use ondl_rs::tools::{Collaborators, Discord, Ffmpeg, FsRelocator, YtDlp};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncReadExt as _;
use tracing::{info, warn};

#[derive(Parser)]
#[command(name = "ondl", about = "Filesystem-backed download queue")]
struct Cli {
    /// Config file (default: $ONDL_CONFIG, then ./config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run one batch over the ready queue
    Consume,
    /// Read a request from stdin and queue it; prints one status line
    Ingest,
    /// List queued jobs
    List {
        /// Only this state (incoming, processing, done, error)
        #[arg(long)]
        state: Option<String>,
    },
    /// Show a job
    Show {
        /// Job filename
        name: String,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    match cli.command {
        Command::Consume => cmd_consume(config_path).await,
        Command::Ingest => {
            let code = cmd_ingest(config_path).await;
            std::process::exit(code);
        }
        Command::List { state } => {
            let config = Config::load(config_path)?;
            cmd_list(&queue_for(&config), state).await
        }
        Command::Show { name } => {
            let config = Config::load(config_path)?;
            cmd_show(&queue_for(&config), name).await
        }
    }
}

fn queue_for(config: &Config) -> FsQueue {
    FsQueue::new(config.layout(), config.queue.job_glob.clone())
}

fn telemetry(config: &Config, log_file: Option<PathBuf>) -> anyhow::Result<TelemetryGuard> {
    Ok(init_telemetry(TelemetryConfig {
        endpoint: config.telemetry.otel_endpoint.clone(),
        service_name: "ondl".to_string(),
        log_level: config.telemetry.log_level.clone(),
        log_file,
    })?)
}

async fn cmd_consume(config_path: Option<&Path>) -> anyhow::Result<()> {
    let config = Config::load(config_path)?;
    let layout = config.layout();
    layout
        .ensure_dirs()
        .await
        .with_context(|| format!("cannot create state dirs under {}", layout.state_root.display()))?;

    let log_file = layout
        .logs
        .join(format!("consume-{}.log", Local::now().format("%Y%m%d-%H%M%S")));
    let _guard = telemetry(&config, Some(log_file))?;

    preflight(&layout).await?;

    let ytdlp = resolve_tool(YTDLP, &config.tools.ytdlp)?;
    // Previews need both binaries; otherwise ffmpeg is only a hint for yt-dlp.
    let (ffmpeg, ffprobe) = if config.preview.enabled {
        (
            resolve_tool(FFMPEG, &config.tools.ffmpeg)?,
            resolve_tool(FFPROBE, &config.tools.ffprobe)?,
        )
    } else {
        (
            best_effort_ffmpeg(&config),
            resolve_tool(FFPROBE, &config.tools.ffprobe).unwrap_or_else(|_| PathBuf::from("ffprobe")),
        )
    };
    info!(
        ytdlp = %ytdlp.display(),
        ffmpeg = %ffmpeg.display(),
        ffprobe = %ffprobe.display(),
        previews = config.preview.enabled,
        "tools resolved"
    );

    let ytdlp = YtDlp::new(ytdlp, &ffmpeg, &layout.archive);
    let tools = Collaborators {
        resolver: Box::new(ytdlp.clone()),
        fetcher: Box::new(ytdlp),
        renderer: Box::new(Ffmpeg::new(&ffmpeg, &ffprobe)),
        relocator: Box::new(FsRelocator),
        notifier: Box::new(Discord::from_config(&config.discord)?),
    };

    let control = ControlPlane::new(
        Arc::new(queue_for(&config)),
        Pipeline::new(layout, config.preview.clone(), tools),
        ControlConfig {
            max_per_run: config.queue.max_per_run,
            stale_processing_minutes: config.queue.stale_processing_minutes,
            stale_processing_action: config.queue.reap_action()?,
        },
    );

    let summary = control.run_once().await?;
    info!(%summary, "batch finished");
    Ok(())
}

/// Staging must be writable; the download root only gets a warning since
/// the pipeline falls back to local storage.
async fn preflight(layout: &Layout) -> anyhow::Result<()> {
    paths::probe_writable(&layout.staging)
        .await
        .with_context(|| format!("staging root not writable: {}", layout.staging.display()))?;
    layout.ensure_download_root().await;
    Ok(())
}

/// Returns the process exit code. The status line is the only stdout output.
async fn cmd_ingest(config_path: Option<&Path>) -> i32 {
    let outcome = match ingest(config_path).await {
        Ok(outcome) => outcome,
        Err(e) => IngestOutcome::InternalError(format!("{e:#}")),
    };
    println!("{}", outcome.status_line());
    outcome.exit_code()
}

async fn ingest(config_path: Option<&Path>) -> anyhow::Result<IngestOutcome> {
    let mut raw = String::new();
    tokio::io::stdin()
        .read_to_string(&mut raw)
        .await
        .context("cannot read stdin")?;

    let config = Config::load(config_path)?;
    let _guard = telemetry(&config, None)?;

    let layout = config.layout();
    tokio::fs::create_dir_all(&layout.incoming).await?;
    tokio::fs::create_dir_all(&layout.processing).await?;

    let archive = Archive::new(&layout.archive);
    let queue = queue_for(&config);

    // The archive check is optional; a missing yt-dlp must not block queueing.
    let resolver = match resolve_tool(YTDLP, &config.tools.ytdlp) {
        Ok(ytdlp) => Some(YtDlp::new(ytdlp, best_effort_ffmpeg(&config), &layout.archive)),
        Err(e) => {
            warn!(error = %e, "yt-dlp unavailable, skipping archive check");
            None
        }
    };
    let gate = match &resolver {
        Some(resolver) => IngestGate::new(&queue, &archive, resolver),
        None => IngestGate::without_resolver(&queue, &archive),
    };

    Ok(gate.ingest(&raw).await)
}

/// yt-dlp wants ffmpeg for merging, but can run without a configured one.
fn best_effort_ffmpeg(config: &Config) -> PathBuf {
    resolve_tool(FFMPEG, &config.tools.ffmpeg).unwrap_or_else(|e| {
        warn!(error = %e, "ffmpeg not resolved, leaving it to yt-dlp");
        PathBuf::from("ffmpeg")
    })
}

async fn cmd_list(queue: &FsQueue, state: Option<String>) -> anyhow::Result<()> {
    let states: Vec<QueueState> = match state {
        Some(s) => vec![s.parse().map_err(|_| anyhow::anyhow!("invalid state: {s}"))?],
        None => QueueState::ALL.to_vec(),
    };

    let mut total = 0;
    for state in states {
        let jobs = queue.list(state).await?;
        if jobs.is_empty() {
            continue;
        }
        println!("{state} ({})", jobs.len());
        for job in &jobs {
            println!("  {}", job.name);
        }
        total += jobs.len();
    }

    if total == 0 {
        println!("No jobs found.");
    } else {
        println!("\n{total} job(s)");
    }
    Ok(())
}

async fn cmd_show(queue: &FsQueue, name: String) -> anyhow::Result<()> {
    let name = JobName::parse(&name)?;

    for state in QueueState::ALL {
        let job_ref = JobRef::new(name.clone(), state);
        let text = match queue.read(&job_ref).await {
            Ok(text) => text,
            Err(e) if e.is_not_found() => continue,
            Err(e) => return Err(e.into()),
        };

        println!("Name:      {name}");
        println!("State:     {state}");
        println!("Path:      {}", queue.path_of(&job_ref).display());
        match Job::parse(&name, &text) {
            Ok(job) => {
                println!("URL:       {}", job.url);
                println!("Category:  {}", job.category);
                println!("App:       {}", job.app);
                if !job.extra.is_empty() {
                    println!("Extra:     {}", serde_json::to_string_pretty(&job.extra)?);
                }
            }
            Err(e) => println!("Invalid:   {e}"),
        }
        return Ok(());
    }

    anyhow::bail!("no job named '{name}'")
}

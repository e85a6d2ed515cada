//! Command-line front end for the download core

use std::path::PathBuf;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::sync::broadcast::{self, error::RecvError, error::TryRecvError};
use tokio_util::sync::CancellationToken;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use media_downloader::config::AppConfig;
use media_downloader::downloader::errors::DownloadError;
use media_downloader::downloader::format_selector::FormatSelector;
use media_downloader::downloader::models::{ClipRange, JobRequest, JobStatus, OutputKind};
use media_downloader::downloader::orchestrator::OrchestratorEvent;
use media_downloader::downloader::tools::ToolManager;
use media_downloader::downloader::utils::get_network_status_info;
use media_downloader::AppContext;

#[derive(Parser)]
#[command(name = "media-downloader", version, about = "Queue, throttle and retry media downloads")]
struct Cli {
    /// Config file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Download one or more URLs and wait for every job to finish
    Get(GetArgs),
    /// Describe a URL without downloading it
    Info {
        url: String,
        /// Treat the URL as a playlist / set / channel
        #[arg(long)]
        playlist: bool,
        /// Bypass the metadata cache
        #[arg(long)]
        refresh: bool,
    },
    /// Show yt-dlp and ffmpeg status
    Tools,
    /// Show proxy, link class and external IP
    Network {
        /// Skip the external IP lookup
        #[arg(long)]
        offline: bool,
    },
}

#[derive(clap::Args)]
struct GetArgs {
    #[arg(required = true)]
    urls: Vec<String>,
    /// video, audio or muxed
    #[arg(short, long, default_value = "muxed", value_parser = parse_kind)]
    kind: OutputKind,
    /// best, 2160p ... 360p
    #[arg(short, long, default_value = "best")]
    quality: String,
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// mp4, mkv, webm, mp3, m4a ...
    #[arg(long)]
    container: Option<String>,
    /// Clip start in seconds
    #[arg(long)]
    start: Option<f64>,
    /// Clip end in seconds
    #[arg(long)]
    end: Option<f64>,
    /// Concurrent downloads
    #[arg(short = 'j', long)]
    jobs: Option<usize>,
    /// Bandwidth ceiling in KiB/s
    #[arg(long)]
    limit: Option<u64>,
}

fn parse_kind(s: &str) -> Result<OutputKind, String> {
    match s.to_ascii_lowercase().as_str() {
        "video" => Ok(OutputKind::Video),
        "audio" => Ok(OutputKind::Audio),
        "muxed" | "both" => Ok(OutputKind::Muxed),
        other => Err(format!("unknown kind '{}', expected video, audio or muxed", other)),
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("media_downloader=info"));
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).init();
}

fn load_config(path: Option<&PathBuf>) -> Result<AppConfig, DownloadError> {
    match path {
        Some(path) => AppConfig::load_from(path),
        None => AppConfig::load(),
    }
}

impl GetArgs {
    fn requests(&self) -> Vec<JobRequest> {
        let clip = match (self.start, self.end) {
            (None, None) => None,
            (start, end) => Some(ClipRange::new(start.unwrap_or(0.0), end)),
        };
        self.urls
            .iter()
            .map(|url| {
                let mut request = JobRequest::new(url.as_str())
                    .with_kind(self.kind)
                    .with_quality(self.quality.as_str());
                if let Some(dir) = &self.output {
                    request = request.with_output_dir(dir.clone());
                }
                if let Some(container) = &self.container {
                    request = request.with_container(container.as_str());
                }
                if let Some(clip) = clip {
                    request = request.with_clip(clip);
                }
                request
            })
            .collect()
    }

    async fn execute(&self, config: &AppConfig) -> Result<i32, DownloadError> {
        let ctx = AppContext::build(config)?;
        let orchestrator = ctx.orchestrator.clone();

        if let Some(limit) = self.limit {
            orchestrator.bandwidth().set_manual_limit(limit);
            orchestrator.bandwidth().set_enabled(true);
        }
        if let Some(jobs) = self.jobs {
            orchestrator.set_max_concurrent(jobs);
        }

        let stop_printer = CancellationToken::new();
        let printer = tokio::spawn(print_events(orchestrator.subscribe(), stop_printer.clone()));
        let maintenance = orchestrator.spawn_maintenance(
            Duration::from_secs(config.maintenance_interval_secs.max(1)),
            Some(ctx.monitor.clone()),
        );

        let mut rejected = 0;
        for (url, result) in self.urls.iter().zip(orchestrator.submit_all(self.requests())) {
            if let Err(e) = result {
                error!(url = %url, "rejected: {}", e);
                rejected += 1;
            }
        }

        tokio::select! {
            _ = orchestrator.wait_idle() => {}
            _ = tokio::signal::ctrl_c() => {
                warn!("Ctrl+C received, cancelling downloads");
                for job in orchestrator.jobs() {
                    let _ = orchestrator.cancel(job.id);
                }
                orchestrator.wait_idle().await;
            }
        }

        maintenance.abort();
        stop_printer.cancel();
        let _ = printer.await;
        ctx.shutdown();

        let completed = orchestrator.completed_total();
        let failed = orchestrator.jobs().iter().filter(|j| j.status == JobStatus::Error).count() + rejected;
        println!("{} completed, {} failed", completed, failed);

        Ok(if failed > 0 { 1 } else { 0 })
    }
}

/// Print events until `stop` fires, then drain what is already queued
async fn print_events(mut events: broadcast::Receiver<OrchestratorEvent>, stop: CancellationToken) {
    loop {
        let event = tokio::select! {
            event = events.recv() => event,
            _ = stop.cancelled() => break,
        };
        match event {
            Ok(event) => print_event(event),
            Err(RecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
            Err(RecvError::Closed) => return,
        }
    }
    loop {
        match events.try_recv() {
            Ok(event) => print_event(event),
            Err(TryRecvError::Lagged(skipped)) => warn!(skipped, "event printer lagged"),
            Err(TryRecvError::Empty) | Err(TryRecvError::Closed) => return,
        }
    }
}

fn print_event(event: OrchestratorEvent) {
    match event {
        OrchestratorEvent::Progress(p) => println!("[{}] {:>5.1}% {}", p.job_id, p.percent, p.status),
        OrchestratorEvent::Completed { job_id, output_file } => match output_file {
            Some(path) => println!("[{}] done: {}", job_id, path.display()),
            None => println!("[{}] done", job_id),
        },
        OrchestratorEvent::Failed { job_id, message, hint, .. } => {
            println!("[{}] failed: {}", job_id, message);
            if let Some(hint) = hint {
                println!("[{}] hint: {}", job_id, hint);
            }
        }
        OrchestratorEvent::Retrying { job_id, attempt, delay } => {
            println!("[{}] retry {} in {}s", job_id, attempt, delay.as_secs())
        }
        OrchestratorEvent::Cancelled(job_id) => println!("[{}] cancelled", job_id),
        OrchestratorEvent::MemoryPressure(level) => println!("memory pressure: {:?}", level),
        OrchestratorEvent::JobsChanged => {}
    }
}

async fn info(config: &AppConfig, url: &str, playlist: bool, refresh: bool) -> Result<i32, DownloadError> {
    let ctx = AppContext::build(config)?;
    if playlist {
        let info = ctx.orchestrator.describe_collection(url, refresh).await?;
        println!("{} ({} entries)", info.title, info.entries.len());
        for entry in &info.entries {
            println!("  {}  {}", entry.url, entry.title);
        }
    } else {
        let info = ctx.orchestrator.describe(url, refresh).await?;
        println!("{}", info.title);
        println!("  uploader: {}", info.uploader);
        println!("  duration: {}s", info.duration_seconds);
        println!("  formats:  {}", info.formats.len());
        println!("  suggested quality: {}", FormatSelector::recommend_quality(&info.formats));
        if info.is_live {
            println!("  live stream");
        }
    }
    ctx.shutdown();
    Ok(0)
}

async fn tools(config: &AppConfig) -> Result<i32, DownloadError> {
    let manager = ToolManager::new(config.ytdlp_path.clone(), config.ffmpeg_path.clone());
    let mut missing = false;
    for tool in manager.get_all_tools().await {
        match (&tool.path, &tool.version) {
            (Some(path), version) => println!(
                "{:<8} {} ({})",
                tool.name,
                version.as_deref().unwrap_or("unknown version"),
                path
            ),
            (None, _) => {
                missing = true;
                println!("{:<8} not found", tool.name);
            }
        }
    }
    Ok(if missing { 1 } else { 0 })
}

async fn network(config: &AppConfig, offline: bool) -> Result<i32, DownloadError> {
    let proxy = config.proxy.clone().filter(|p| !p.trim().is_empty());
    let status = get_network_status_info(proxy, !offline).await;
    println!("mode:        {}", status.mode);
    println!("proxy:       {}", status.proxy.as_deref().unwrap_or("-"));
    println!("link:        {:?}", status.class);
    println!("external ip: {}", status.external_ip.as_deref().unwrap_or("-"));
    Ok(0)
}

#[tokio::main]
async fn main() {
    init_tracing();
    let cli = Cli::parse();

    let result = match load_config(cli.config.as_ref()) {
        Ok(config) => match &cli.command {
            Commands::Get(args) => args.execute(&config).await,
            Commands::Info { url, playlist, refresh } => info(&config, url, *playlist, *refresh).await,
            Commands::Tools => tools(&config).await,
            Commands::Network { offline } => network(&config, *offline).await,
        },
        Err(e) => Err(e),
    };

    match result {
        Ok(code) => std::process::exit(code),
        Err(e) => {
            error!("Command failed: {}", e);
            std::process::exit(1);
        }
    }
}

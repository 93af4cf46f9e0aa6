//! Visor Video - a transcode worker and playback orchestrator for small LED displays.
//!
//! The worker turns source URLs into display-sized, content-addressed MP4
//! artifacts through an external downloader and FFmpeg. The orchestrator
//! requests those artifacts, mirrors them locally and plays them on the
//! display through a supervised player process.

pub mod cli;
pub mod config;
pub mod error;
pub mod job;
pub mod metrics;
pub mod playback;
pub mod remote;
pub mod server;
pub mod store;
pub mod transcode;
pub mod validation;

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use tokio::net::TcpListener;
use tracing::info;

use crate::cli::{Cli, Commands, JobsListArgs};
use crate::config::load_detected;
use crate::job::JobService;
use crate::metrics::Metrics;
use crate::playback::{
    LocalCache, PlaybackManager, PlaybackSupervisor, RenderLocks, StopPolicy, VlcLauncher,
};
use crate::remote::WorkerClient;
use crate::server::control::ControlState;
use crate::server::worker::WorkerState;
use crate::store::{ContentStore, JobStore};
use crate::transcode::{ProcessRunner, TranscodePipeline, TranscodeSettings};

/// Runs the command selected on the command line.
pub async fn run(cli: Cli) -> Result<()> {
    setup_logging(cli.log_level())?;

    match cli.command {
        Commands::Worker => run_worker(&cli.config).await,
        Commands::Player => run_player(&cli.config).await,
        Commands::ConfigValidate => validate_config(&cli.config),
        Commands::ConfigShow => show_config(&cli.config),
        Commands::JobsList(args) => list_jobs(&cli.config, args),
        Commands::CacheClear => clear_cache(&cli.config),
    }
}

/// Initializes the tracing subscriber for structured logging.
fn setup_logging(level: &str) -> Result<()> {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    fmt()
        .with_env_filter(filter)
        .json()
        .with_target(true)
        .with_file(true)
        .with_line_number(true)
        .init();

    Ok(())
}

/// Runs the worker until interrupted.
async fn run_worker(config_path: &Path) -> Result<()> {
    info!("Starting video worker");

    let (config, capabilities) = load_detected(config_path)?;
    info!(?capabilities, "Detected system capabilities");
    let worker = config.worker;

    let store = ContentStore::new(worker.storage_dir(), &worker.video_extension);
    store.ensure_root()?;
    let jobs = JobStore::open(worker.database_path())?;
    let metrics = Arc::new(Metrics::new()?);

    let pipeline = TranscodePipeline::new(
        Arc::new(ProcessRunner),
        TranscodeSettings::from_config(&worker),
        worker.temp_dir(),
        store,
    );
    pipeline.reset_temp_dir()?;

    let service = JobService::builder(jobs, pipeline)
        .metrics(metrics.clone())
        .dedup_on_flip(worker.dedup_on_flip)
        .build();
    let recovered = service.recover()?;
    info!(recovered, "Startup recovery complete");

    let state = WorkerState {
        service: service.clone(),
        metrics: Some(metrics),
        max_url_length: worker.max_url_length,
    };
    let listener = bind(worker.listen_port).await?;
    info!(port = worker.listen_port, "Worker is running. Press Ctrl+C to stop.");

    tokio::select! {
        result = server::serve(listener, move |req| server::worker::handle(state.clone(), req)) => {
            result?;
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    info!(in_flight = service.in_flight(), "Shutting down video worker");
    Ok(())
}

/// Runs the playback orchestrator until interrupted.
async fn run_player(config_path: &Path) -> Result<()> {
    info!("Starting playback orchestrator");

    let (config, capabilities) = load_detected(config_path)?;
    info!(?capabilities, "Detected system capabilities");
    let player = config.player;

    let mirror = ContentStore::new(&player.video_dir, &player.video_extension);
    mirror.ensure_root()?;
    let cache = LocalCache::open(&player.database)?;
    let client = WorkerClient::new(&player.worker_url)?;

    let supervisor = PlaybackSupervisor::new(
        Arc::new(VlcLauncher::new(&player.player_command, player.display.clone())),
        RenderLocks::new(),
        StopPolicy::from(&player.stop),
    );
    let manager = PlaybackManager::new(
        Arc::new(client),
        cache,
        mirror,
        supervisor,
        player.poll.clone(),
        Duration::from_secs(player.cache_sweep_interval_secs),
    );

    let state = ControlState {
        manager: manager.clone(),
        max_url_length: config.worker.max_url_length,
    };
    let listener = bind(player.listen_port).await?;
    info!(
        port = player.listen_port,
        worker = %player.worker_url,
        "Playback orchestrator is running. Press Ctrl+C to stop."
    );

    tokio::select! {
        result = server::serve(listener, move |req| server::control::handle(state.clone(), req)) => {
            result?;
        }
        _ = manager.run() => {}
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }

    manager.supervisor().kill_and_await().await;
    info!("Shutting down playback orchestrator");
    Ok(())
}

async fn bind(port: u16) -> Result<TcpListener> {
    let addr: SocketAddr = ([0, 0, 0, 0], port).into();
    Ok(TcpListener::bind(addr).await?)
}

/// Validates the configuration file and reports any issues.
fn validate_config(config_path: &Path) -> Result<()> {
    let (config, capabilities) = load_detected(config_path)?;

    println!("Configuration is valid.");
    println!(
        "Worker: port {}, storage {}",
        config.worker.listen_port,
        config.worker.storage_dir().display()
    );
    println!(
        "Player: port {}, worker {}, display {}x{} at {}",
        config.player.listen_port,
        config.player.worker_url,
        config.player.display.width,
        config.player.display.height,
        config.player.display.host
    );
    for tool in &capabilities.missing_tools {
        println!("  warning: '{}' not found on PATH", tool);
    }

    Ok(())
}

/// Displays the parsed configuration.
fn show_config(config_path: &Path) -> Result<()> {
    let (config, _) = load_detected(config_path)?;
    let yaml = serde_yaml::to_string(&config)?;
    println!("{}", yaml);
    Ok(())
}

/// Lists job records, newest first.
fn list_jobs(config_path: &Path, args: JobsListArgs) -> Result<()> {
    let (config, _) = load_detected(config_path)?;
    let jobs = JobStore::open(config.worker.database_path())?.list(args.limit)?;

    if jobs.is_empty() {
        println!("No jobs recorded.");
        return Ok(());
    }

    println!("Jobs ({} shown):", jobs.len());
    for job in jobs {
        println!(
            "  {} {} {} (mirror: {}, flip: {})",
            job.job_id, job.status, job.video_url, job.mirror_video, job.flip_video
        );
        if let Some(hash) = &job.output_hash {
            println!("      output: {}", hash);
        }
        if let Some(message) = &job.error_message {
            println!("      error: {}", message);
        }
    }

    Ok(())
}

/// Deletes every mirrored artifact and the cache entries that pointed at them.
fn clear_cache(config_path: &Path) -> Result<()> {
    let (config, _) = load_detected(config_path)?;
    let mirror = ContentStore::new(&config.player.video_dir, &config.player.video_extension);
    let deleted = mirror.clear()?;
    let swept = LocalCache::open(&config.player.database)?
        .sweep(|entry| mirror.contains(&entry.hash))?;

    println!("Deleted {} video(s).", deleted);
    println!("Removed {} stale cache entries.", swept);
    Ok(())
}

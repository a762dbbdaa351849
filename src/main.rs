//! MeterEye - camera meter reader
//!
//! Loads the configuration, starts the export sinks and one worker per
//! camera, then runs until Ctrl+C.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Runtime;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use metereye::camera::{CameraManager, WorkerOptions};
use metereye::capture::FfmpegOpener;
use metereye::config::{self, AppConfig};
use metereye::export::{build_sinks, BatchSettings, ExporterManager};
use metereye::shared::{ConnectionState, ReadingEvent};
use metereye::storage;

/// MeterEye - reads 7-segment meters and indicator lights from camera streams
#[derive(Parser, Debug)]
#[command(name = "metereye")]
#[command(version, about = "Reads 7-segment meters and indicator lights from camera streams")]
struct Args {
    /// Configuration file (defaults to config.toml in the platform config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Log filter, e.g. "info" or "metereye=debug"; RUST_LOG takes precedence
    #[arg(short, long, default_value = "info")]
    log_level: String,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&args.log_level))?;
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config_path = match args.config {
        Some(path) => path,
        None => storage::default_config_path()?,
    };
    let config = load_or_create_config(&config_path)?;

    info!(
        "MeterEye {} starting with {} camera(s)",
        env!("CARGO_PKG_VERSION"),
        config.cameras.len()
    );

    // Sinks hold blocking clients and must be created and dropped outside the runtime
    let exporter = Arc::new(ExporterManager::new(
        config.general.export_queue_size,
        BatchSettings::from(&config.general),
    ));
    for sink in build_sinks(&config.export) {
        exporter.add_sink(sink);
    }
    exporter.start();

    let options = WorkerOptions {
        debug_images: config.general.debug_images,
        ..WorkerOptions::default()
    };
    let cameras = CameraManager::new(
        Arc::new(FfmpegOpener::new()),
        config.general.reading_queue_size,
        options,
    );
    cameras.set_status_callback(Arc::new(|camera_id: &str, state: ConnectionState| {
        info!(camera = camera_id, %state, "Connection state changed");
    }));

    let readings = Arc::new(AtomicU64::new(0));
    {
        let exporter = exporter.clone();
        let readings = readings.clone();
        cameras.add_reading_callback(move |event| {
            readings.fetch_add(1, Ordering::Relaxed);
            match event {
                ReadingEvent::Meter(reading) => exporter.push(reading),
                ReadingEvent::Indicator(reading) => exporter.push_indicator(reading),
            };
            Ok(())
        });
    }

    for camera in config.cameras {
        let id = camera.id.clone();
        if let Err(e) = cameras.add_camera(camera) {
            error!(camera = %id, "Failed to add camera: {}", e);
        }
    }

    let runtime = Runtime::new().context("Failed to create tokio runtime")?;
    let stats_interval = Duration::from_secs(config.general.stats_interval_seconds.max(1));
    runtime.block_on(async {
        let mut ticker = tokio::time::interval(stats_interval);
        ticker.tick().await;
        loop {
            tokio::select! {
                result = tokio::signal::ctrl_c() => {
                    if let Err(e) = result {
                        error!("Failed to listen for Ctrl+C: {}", e);
                    }
                    break;
                }
                _ = ticker.tick() => log_stats(&cameras, &exporter, &readings),
            }
        }
    });
    drop(runtime);

    info!("Shutting down");
    cameras.stop();
    exporter.stop();
    info!("MeterEye stopped");

    Ok(())
}

/// Load the configuration, writing a default file when none exists
fn load_or_create_config(path: &Path) -> Result<AppConfig> {
    if path.exists() {
        let config = config::load_config(path).with_context(|| format!("Failed to load {}", path.display()))?;
        info!("Loaded configuration from {:?}", path);
        return Ok(config);
    }

    let config = AppConfig::default();
    match config::save_config(&config, path) {
        Ok(()) => warn!("No configuration found, wrote a default one to {:?}", path),
        Err(e) => warn!("No configuration found and the default could not be written: {}", e),
    }
    Ok(config)
}

fn log_stats(cameras: &CameraManager, exporter: &ExporterManager, readings: &AtomicU64) {
    let statuses = cameras.get_all_camera_status();
    let connected = statuses
        .iter()
        .filter(|s| s.state == ConnectionState::Connected)
        .count();
    let camera_drops: u64 = statuses.iter().map(|s| s.dropped_readings).sum();

    info!(
        cameras = statuses.len(),
        connected,
        readings = readings.load(Ordering::Relaxed),
        reading_queue = cameras.queue_len(),
        export_queue = exporter.queued(),
        dropped = camera_drops + exporter.dropped(),
        "Stats"
    );
    for status in statuses.iter().filter(|s| s.state != ConnectionState::Connected) {
        warn!(
            camera = %status.camera_id,
            state = %status.state,
            attempts = status.reconnect_attempts,
            "Camera not connected: {}",
            status.error_message
        );
    }
}

//! Parklane - single-lane parking gate controller
//!
//! Watches a camera feed for vehicles crossing virtual trigger lines,
//! reads their plates, keeps the parking ledger, and drives the gate
//! hardware over a serial link.
//!
//! Module structure:
//! - `domain/` - Core business types (zones, plates, records, fees)
//! - `io/` - External interfaces (camera, serial actuator, OCR, store)
//! - `services/` - Business logic (motion, crossing detection, coordinator)
//! - `infra/` - Infrastructure (config)

use clap::Parser;
use parklane::infra::Config;
use parklane::io::{JsonStore, PipeCamera, SerialLink, TesseractReader};
use parklane::services::{
    run_detection_loop, BackgroundModel, CrossingDetector, GateCoordinator,
};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Parklane - automated parking lane controller
#[derive(Parser, Debug)]
#[command(name = "parklane", version, about)]
struct Args {
    /// Path to TOML configuration file
    #[arg(short, long, default_value = "config/parklane.toml")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Structured logging, level configurable via RUST_LOG (default INFO)
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    info!("parklane starting");

    let args = Args::parse();
    let config = Config::load_from_path(&args.config);

    info!(
        config_file = %config.config_file(),
        camera = %config.camera().source,
        serial_device = %config.serial().device,
        total_slots = %config.parking().total_slots,
        hourly_rate = %config.parking().hourly_rate,
        motion_threshold = %config.detection().motion_threshold,
        data_dir = %config.storage().data_dir,
        "config_loaded"
    );

    // Shutdown signal shared by every task
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Hardware and storage come up before any detection starts; a
    // failure here is fatal
    let link = Arc::new(SerialLink::open(
        &config.serial().device,
        config.serial().baud,
        shutdown_rx.clone(),
    )?);
    let store = Arc::new(JsonStore::new(&config.storage().data_dir)?);
    let reader = Arc::new(TesseractReader::new(&config.ocr().command));
    let camera = PipeCamera::spawn(config.camera())?;

    // Crossing events flow detection -> coordinator (bounded for
    // backpressure)
    let (event_tx, event_rx) = mpsc::channel(16);

    let model = BackgroundModel::new(config.detection());
    let detector = CrossingDetector::new(config.zones(), config.detection(), event_tx);
    let warmup_frames = config.detection().warmup_frames;
    let fps = config.camera().fps;
    let detection_shutdown = shutdown_rx.clone();
    let detection = tokio::spawn(async move {
        run_detection_loop(camera, model, detector, warmup_frames, fps, detection_shutdown)
            .await;
    });

    let coordinator = GateCoordinator::new(&config, store, reader, link);

    // Handle shutdown on Ctrl+C
    let shutdown_signal = shutdown_tx;
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_signal.send(true);
    });

    // Run the coordinator - consumes crossings until shutdown
    coordinator.run(event_rx, shutdown_rx).await;

    if tokio::time::timeout(std::time::Duration::from_secs(5), detection).await.is_err() {
        warn!("detection_loop_shutdown_timeout");
    }

    info!("parklane shutdown complete");
    Ok(())
}

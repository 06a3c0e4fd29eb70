// src/main.rs

mod config;
mod overlay;
mod pipeline;
mod region_store;
mod region_subscriber;
mod shutdown;
mod snapshot;
mod types;
mod video_source;

use anyhow::Result;
use overlay::OverlayRenderer;
use pipeline::{PipelineDriver, PipelineMetrics};
use region_store::RegionStore;
use region_subscriber::RegionSubscriber;
use snapshot::{ImageDirSink, SnapshotPolicy};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use types::Config;
use video_source::{OpenCvSource, VideoSourceManager};

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.yaml".to_string());
    let config = Config::load_or_default(&config_path)?.apply_env_overrides()?;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("roi_overlay={},opencv=warn", config.logging.level))
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("🎨 Region overlay starting");
    config.validate()?;
    info!("✓ Configuration loaded from {}", config_path);
    info!(
        "MQTT: {}:{} topic={} | Video: {}",
        config.mqtt.host, config.mqtt.port, config.mqtt.topic, config.video.url
    );

    let metrics = PipelineMetrics::new();
    let store = Arc::new(RegionStore::new());
    let cancel = CancellationToken::new();

    tokio::spawn(shutdown::cancel_on_signal(
        shutdown::wait_for_shutdown_signal(),
        tokio::signal::ctrl_c(),
        cancel.clone(),
    ));

    let subscriber = RegionSubscriber::new(store.clone(), metrics.clone());
    let subscriber_task = tokio::spawn(subscriber.run(config.mqtt.clone(), cancel.clone()));
    info!("✓ Region subscriber started");

    let source = VideoSourceManager::new(
        OpenCvSource::new(
            config.video.url.clone(),
            Duration::from_millis(config.video.open_timeout_ms),
            Duration::from_millis(config.video.read_timeout_ms),
        ),
        Duration::from_millis(config.video.reconnect_delay_ms),
        metrics.clone(),
    );
    let sink = ImageDirSink::new(&config.snapshot.output_dir, config.snapshot.jpeg_quality);
    let snapshots = SnapshotPolicy::new(
        sink,
        Duration::from_secs_f64(config.snapshot.interval_secs),
        metrics.clone(),
    );
    info!(
        "✓ Snapshots every {:.1}s into {}",
        config.snapshot.interval_secs, config.snapshot.output_dir
    );

    let driver = PipelineDriver::new(
        store.clone(),
        source,
        OverlayRenderer::new(&config.overlay),
        snapshots,
        metrics,
        Duration::from_millis(config.video.frame_interval_ms),
    );

    let summary = driver.run(cancel.clone()).await;

    // The driver only returns once stopped; make sure the subscriber follows
    cancel.cancel();
    if let Err(e) = subscriber_task.await {
        warn!("Subscriber task ended abnormally: {}", e);
    }

    info!("\n========================================");
    info!("  Frames rendered: {}", summary.frames_rendered);
    info!("  Average: {:.1} FPS over {:.0}s", summary.fps, summary.elapsed_secs);
    info!(
        "  Region updates: {} accepted, {} rejected (final set v{})",
        summary.updates_accepted,
        summary.updates_rejected,
        store.version()
    );
    info!(
        "  Regions drawn: {} (skipped {})",
        summary.regions_drawn, summary.regions_skipped
    );
    info!("  Reconnect attempts: {}", summary.reconnect_attempts);
    info!(
        "  Snapshots: {} saved, {} failed",
        summary.snapshots_saved, summary.snapshot_failures
    );
    if summary.render_failures > 0 {
        warn!("  Render failures: {}", summary.render_failures);
    }
    info!("========================================");
    info!("✅ Stopped");

    Ok(())
}

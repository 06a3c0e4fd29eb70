// src/pipeline/driver.rs
//
// The acquisition loop:
//
//   acquire_frame ─▶ snapshot RegionStore ─▶ render ─▶ SnapshotPolicy ─▶ sleep
//
// Teardown always runs in this order, however the loop ends:
//   1. stop acquiring
//   2. final snapshot (if any frame was rendered)
//   3. release the video source
//
// Step 3 is backed by VideoSourceManager's Drop, so the source is released
// even if the loop unwinds.

use crate::overlay::{OverlayRenderer, StatusLine};
use crate::pipeline::{MetricsSummary, PipelineMetrics};
use crate::region_store::RegionStore;
use crate::snapshot::{SnapshotPolicy, SnapshotSink};
use crate::video_source::{Acquired, FrameSource, VideoSourceManager};
use chrono::Local;
use opencv::core::Mat;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

const SUMMARY_EVERY_FRAMES: u64 = 300;

// Tokio's clock, so a paused test runtime drives the snapshot cadence too
fn now() -> std::time::Instant {
    tokio::time::Instant::now().into_std()
}

pub struct PipelineDriver<S: FrameSource, W: SnapshotSink> {
    store: Arc<RegionStore>,
    source: VideoSourceManager<S>,
    renderer: OverlayRenderer,
    snapshots: SnapshotPolicy<W>,
    metrics: PipelineMetrics,
    frame_interval: Duration,
}

impl<S: FrameSource, W: SnapshotSink> PipelineDriver<S, W> {
    pub fn new(
        store: Arc<RegionStore>,
        source: VideoSourceManager<S>,
        renderer: OverlayRenderer,
        snapshots: SnapshotPolicy<W>,
        metrics: PipelineMetrics,
        frame_interval: Duration,
    ) -> Self {
        Self {
            store,
            source,
            renderer,
            snapshots,
            metrics,
            frame_interval,
        }
    }

    /// Run until `cancel` fires, then tear down.
    pub async fn run(mut self, cancel: CancellationToken) -> MetricsSummary {
        info!("🎬 Pipeline running");
        let mut last_frame: Option<Mat> = None;
        let mut frame_index: u64 = 0;

        loop {
            let frame = match self.source.acquire_frame(&cancel).await {
                Acquired::Frame(frame) => frame,
                Acquired::Stopped => break,
            };
            frame_index += 1;

            // One read per frame; the lock is released before compositing
            let regions = self.store.snapshot();
            let status = StatusLine {
                frame_index,
                version: regions.version,
                timestamp: Local::now().format("%Y-%m-%d %H:%M:%S").to_string(),
            };

            match self.renderer.render(&frame, &regions, &status) {
                Ok(output) => {
                    self.metrics.inc(&self.metrics.frames_rendered);
                    self.metrics
                        .add(&self.metrics.regions_drawn, output.drawn as u64);
                    self.metrics
                        .add(&self.metrics.regions_skipped, output.skipped as u64);

                    self.snapshots
                        .on_frame(&output.frame, !regions.is_empty(), now());
                    last_frame = Some(output.frame);
                }
                Err(e) => {
                    self.metrics.inc(&self.metrics.render_failures);
                    warn!("Render failed on frame {}: {:#}", frame_index, e);
                }
            }

            if frame_index % SUMMARY_EVERY_FRAMES == 0 {
                let s = self.metrics.summary();
                let size = self
                    .source
                    .frame_size()
                    .map(|f| format!("{}x{}", f.width, f.height))
                    .unwrap_or_else(|| "?".to_string());
                info!(
                    "Frames: {} ({:.1} FPS, {}) | regions v{} ({}) | reconnects: {} | snapshots: {}",
                    s.frames_rendered,
                    s.fps,
                    size,
                    regions.version,
                    regions.len(),
                    s.reconnect_attempts,
                    s.snapshots_saved
                );
            }

            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = tokio::time::sleep(self.frame_interval) => {}
            }
        }

        info!("👋 Stopping pipeline...");
        self.snapshots.finish(last_frame.as_ref());
        self.source.release();

        self.metrics.summary()
    }
}

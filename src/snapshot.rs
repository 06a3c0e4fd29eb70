// src/snapshot.rs
//
// Debounced persistence of composited frames.
//
// Periodic save: regions present AND (never saved OR interval elapsed).
// Final save:    once at shutdown if any frame was rendered, unconditionally.
// A failed write leaves the policy state untouched so the next frame retries.

use crate::pipeline::PipelineMetrics;
use anyhow::{bail, Context, Result};
use chrono::Local;
use opencv::{core::Mat, core::Vector, imgcodecs};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Where snapshots end up.
pub trait SnapshotSink {
    /// Persist `frame` under `name`, returning the written location.
    fn write(&mut self, name: &str, frame: &Mat) -> Result<PathBuf>;
}

/// JPEG files in a local directory.
pub struct ImageDirSink {
    dir: PathBuf,
    params: Vector<i32>,
}

impl ImageDirSink {
    /// A directory that cannot be created yet is not fatal: each write
    /// tries again and reports its own failure.
    pub fn new(dir: impl AsRef<Path>, jpeg_quality: i32) -> Self {
        let dir = dir.as_ref().to_path_buf();
        if let Err(e) = std::fs::create_dir_all(&dir) {
            warn!(
                "⚠️  Snapshot dir {} unavailable ({}), snapshots will fail until it is",
                dir.display(),
                e
            );
        }
        let params = Vector::from_slice(&[imgcodecs::IMWRITE_JPEG_QUALITY, jpeg_quality.clamp(1, 100)]);
        Self { dir, params }
    }
}

impl SnapshotSink for ImageDirSink {
    fn write(&mut self, name: &str, frame: &Mat) -> Result<PathBuf> {
        if !self.dir.is_dir() {
            std::fs::create_dir_all(&self.dir)
                .with_context(|| format!("creating snapshot dir {}", self.dir.display()))?;
        }
        let path = self.dir.join(format!("{}.jpg", name));
        let path_str = path.to_string_lossy();
        if !imgcodecs::imwrite(&path_str, frame, &self.params)? {
            bail!("imwrite refused {}", path_str);
        }
        Ok(path)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    Periodic,
    Final,
}

impl SnapshotKind {
    fn prefix(&self) -> &'static str {
        match self {
            Self::Periodic => "polygon_frame",
            Self::Final => "polygon_final",
        }
    }
}

fn snapshot_name(kind: SnapshotKind) -> String {
    format!(
        "{}_{}",
        kind.prefix(),
        Local::now().format("%Y%m%d_%H%M%S_%3f")
    )
}

pub struct SnapshotPolicy<W: SnapshotSink> {
    sink: W,
    interval: Duration,
    last_saved: Option<Instant>,
    metrics: PipelineMetrics,
}

impl<W: SnapshotSink> SnapshotPolicy<W> {
    pub fn new(sink: W, interval: Duration, metrics: PipelineMetrics) -> Self {
        Self {
            sink,
            interval,
            last_saved: None,
            metrics,
        }
    }

    pub fn has_saved(&self) -> bool {
        self.last_saved.is_some()
    }

    fn is_due(&self, regions_present: bool, now: Instant) -> bool {
        regions_present
            && match self.last_saved {
                None => true,
                Some(last) => now.saturating_duration_since(last) >= self.interval,
            }
    }

    /// Evaluate one rendered frame. Returns the written path when a save happened.
    pub fn on_frame(&mut self, frame: &Mat, regions_present: bool, now: Instant) -> Option<PathBuf> {
        if !self.is_due(regions_present, now) {
            return None;
        }

        let path = self.persist(SnapshotKind::Periodic, frame)?;
        self.last_saved = Some(now);
        info!("📸 Snapshot saved: {}", path.display());
        Some(path)
    }

    /// Shutdown save. `last_frame` is `None` when nothing was ever rendered.
    pub fn finish(&mut self, last_frame: Option<&Mat>) -> Option<PathBuf> {
        let Some(frame) = last_frame else {
            info!("No frame rendered, skipping final snapshot");
            return None;
        };

        if !self.has_saved() {
            info!("No periodic snapshot was taken this run");
        }
        let path = self.persist(SnapshotKind::Final, frame)?;
        info!("💾 Final snapshot saved: {}", path.display());
        Some(path)
    }

    fn persist(&mut self, kind: SnapshotKind, frame: &Mat) -> Option<PathBuf> {
        match self.sink.write(&snapshot_name(kind), frame) {
            Ok(path) => {
                self.metrics.inc(&self.metrics.snapshots_saved);
                Some(path)
            }
            Err(e) => {
                self.metrics.inc(&self.metrics.snapshot_failures);
                warn!("Snapshot write failed ({:?}): {:#}", kind, e);
                None
            }
        }
    }
}

// src/pipeline/metrics.rs
//
// Counters shared by the subscriber task and the render loop. Cloning
// shares the same atomics; every update is a relaxed increment.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

#[derive(Debug, Clone)]
pub struct PipelineMetrics {
    pub frames_rendered: Arc<AtomicU64>,
    pub render_failures: Arc<AtomicU64>,
    pub regions_drawn: Arc<AtomicU64>,
    pub regions_skipped: Arc<AtomicU64>,
    pub updates_accepted: Arc<AtomicU64>,
    pub updates_rejected: Arc<AtomicU64>,
    pub reconnect_attempts: Arc<AtomicU64>,
    pub snapshots_saved: Arc<AtomicU64>,
    pub snapshot_failures: Arc<AtomicU64>,
    pub started_at: Instant,
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            frames_rendered: Arc::new(AtomicU64::new(0)),
            render_failures: Arc::new(AtomicU64::new(0)),
            regions_drawn: Arc::new(AtomicU64::new(0)),
            regions_skipped: Arc::new(AtomicU64::new(0)),
            updates_accepted: Arc::new(AtomicU64::new(0)),
            updates_rejected: Arc::new(AtomicU64::new(0)),
            reconnect_attempts: Arc::new(AtomicU64::new(0)),
            snapshots_saved: Arc::new(AtomicU64::new(0)),
            snapshot_failures: Arc::new(AtomicU64::new(0)),
            started_at: Instant::now(),
        }
    }

    pub fn inc(&self, counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add(&self, counter: &AtomicU64, n: u64) {
        counter.fetch_add(n, Ordering::Relaxed);
    }

    pub fn get(&self, counter: &AtomicU64) -> u64 {
        counter.load(Ordering::Relaxed)
    }

    pub fn fps(&self) -> f64 {
        let frames = self.frames_rendered.load(Ordering::Relaxed);
        let elapsed = self.started_at.elapsed().as_secs_f64();
        if elapsed > 0.01 {
            frames as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn summary(&self) -> MetricsSummary {
        MetricsSummary {
            frames_rendered: self.get(&self.frames_rendered),
            fps: self.fps(),
            render_failures: self.get(&self.render_failures),
            regions_drawn: self.get(&self.regions_drawn),
            regions_skipped: self.get(&self.regions_skipped),
            updates_accepted: self.get(&self.updates_accepted),
            updates_rejected: self.get(&self.updates_rejected),
            reconnect_attempts: self.get(&self.reconnect_attempts),
            snapshots_saved: self.get(&self.snapshots_saved),
            snapshot_failures: self.get(&self.snapshot_failures),
            elapsed_secs: self.started_at.elapsed().as_secs_f64(),
        }
    }
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct MetricsSummary {
    pub frames_rendered: u64,
    pub fps: f64,
    pub render_failures: u64,
    pub regions_drawn: u64,
    pub regions_skipped: u64,
    pub updates_accepted: u64,
    pub updates_rejected: u64,
    pub reconnect_attempts: u64,
    pub snapshots_saved: u64,
    pub snapshot_failures: u64,
    pub elapsed_secs: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let metrics = PipelineMetrics::new();
        let other = metrics.clone();
        other.inc(&other.frames_rendered);
        other.add(&other.regions_drawn, 3);

        let summary = metrics.summary();
        assert_eq!(summary.frames_rendered, 1);
        assert_eq!(summary.regions_drawn, 3);
        assert_eq!(summary.snapshots_saved, 0);
    }
}

// src/video_source.rs
//
// Frame acquisition with unattended reconnect.
//
//   Disconnected ──connect──▶ Connecting ──ok──▶ Streaming
//                               ▲    │               │
//                               │   err           read fails
//                               │    ▼               │
//                               └── Failed ◀─────────┘ (after release)
//                              (wait reconnect_delay)
//
// Failed is a waiting state, never terminal: the manager keeps retrying
// until the stop token fires.
//
// Transport calls run on the blocking pool and race the stop token, so a
// hung open or read never holds up shutdown. A call abandoned that way
// still owns the source and drops it when it finally returns.

use crate::pipeline::PipelineMetrics;
use crate::types::FrameSize;
use anyhow::{bail, Context, Result};
use opencv::{
    core::{Mat, Vector},
    prelude::*,
    videoio::{self, VideoCapture, VideoCaptureTraitConst},
};
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Transport behind the manager. Calls may block.
pub trait FrameSource: Send + 'static {
    /// Open the stream and report its resolution.
    fn connect(&mut self) -> Result<FrameSize>;
    /// Next frame, `Ok(None)` when the stream yielded nothing.
    fn read(&mut self) -> Result<Option<Mat>>;
    fn release(&mut self);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    Disconnected,
    Connecting,
    Streaming,
    Failed,
}

impl SourceState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "DISCONNECTED",
            Self::Connecting => "CONNECTING",
            Self::Streaming => "STREAMING",
            Self::Failed => "FAILED",
        }
    }
}

pub enum Acquired {
    Frame(Mat),
    Stopped,
}

// ============================================================================
// OPENCV SOURCE
// ============================================================================

/// RTSP (or anything else VideoCapture understands) via OpenCV.
pub struct OpenCvSource {
    url: String,
    open_timeout_ms: i32,
    read_timeout_ms: i32,
    cap: Option<VideoCapture>,
}

impl OpenCvSource {
    pub fn new(url: impl Into<String>, open_timeout: Duration, read_timeout: Duration) -> Self {
        Self {
            url: url.into(),
            open_timeout_ms: open_timeout.as_millis().min(i32::MAX as u128) as i32,
            read_timeout_ms: read_timeout.as_millis().min(i32::MAX as u128) as i32,
            cap: None,
        }
    }
}

impl FrameSource for OpenCvSource {
    fn connect(&mut self) -> Result<FrameSize> {
        self.release();

        // Honored by the FFmpeg backend; others ignore unknown params
        let params = Vector::from_slice(&[
            videoio::CAP_PROP_OPEN_TIMEOUT_MSEC,
            self.open_timeout_ms,
            videoio::CAP_PROP_READ_TIMEOUT_MSEC,
            self.read_timeout_ms,
        ]);
        let cap = VideoCapture::from_file_with_params(&self.url, videoio::CAP_ANY, &params)
            .context("creating VideoCapture")?;
        if !cap.is_opened()? {
            bail!("stream did not open");
        }

        let width = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_WIDTH)? as i32;
        let height = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FRAME_HEIGHT)? as i32;
        let fps = VideoCaptureTraitConst::get(&cap, videoio::CAP_PROP_FPS)?;
        info!("📺 Stream info: {}x{} @ {:.1} FPS", width, height, fps);

        self.cap = Some(cap);
        Ok(FrameSize { width, height })
    }

    fn read(&mut self) -> Result<Option<Mat>> {
        let Some(cap) = self.cap.as_mut() else {
            bail!("read before connect");
        };

        let mut mat = Mat::default();
        let ok = cap.read(&mut mat)?;
        if !ok || mat.empty() {
            return Ok(None);
        }
        Ok(Some(mat))
    }

    fn release(&mut self) {
        if let Some(mut cap) = self.cap.take() {
            if let Err(e) = cap.release() {
                debug!("VideoCapture release failed: {}", e);
            }
        }
    }
}

impl Drop for OpenCvSource {
    fn drop(&mut self) {
        self.release();
    }
}

// ============================================================================
// MANAGER
// ============================================================================

pub struct VideoSourceManager<S: FrameSource> {
    // None while a call is in flight, or for good once one was abandoned
    source: Option<S>,
    state: SourceState,
    reconnect_delay: Duration,
    frame_size: Option<FrameSize>,
    metrics: PipelineMetrics,
}

impl<S: FrameSource> VideoSourceManager<S> {
    pub fn new(source: S, reconnect_delay: Duration, metrics: PipelineMetrics) -> Self {
        Self {
            source: Some(source),
            state: SourceState::Disconnected,
            reconnect_delay,
            frame_size: None,
            metrics,
        }
    }

    pub fn state(&self) -> SourceState {
        self.state
    }

    /// Resolution reported by the most recent successful connect.
    pub fn frame_size(&self) -> Option<FrameSize> {
        self.frame_size
    }

    /// Wait for the next frame, reconnecting as often as needed.
    ///
    /// Returns [`Acquired::Stopped`] once `cancel` fires; a pending
    /// reconnect delay or a blocked transport call is cut short.
    pub async fn acquire_frame(&mut self, cancel: &CancellationToken) -> Acquired {
        let mut first_attempt = self.state == SourceState::Disconnected;

        loop {
            if cancel.is_cancelled() {
                return Acquired::Stopped;
            }

            match self.state {
                SourceState::Streaming => match self.call(cancel, |s| s.read()).await {
                    None => return Acquired::Stopped,
                    Some(Ok(Some(frame))) => return Acquired::Frame(frame),
                    Some(Ok(None)) => {
                        warn!("⚠️  No frame from stream, reconnecting...");
                        self.drop_connection();
                        if !self.wait_retry(cancel).await {
                            return Acquired::Stopped;
                        }
                    }
                    Some(Err(e)) => {
                        warn!("⚠️  Frame read failed: {:#}. Reconnecting...", e);
                        self.drop_connection();
                        if !self.wait_retry(cancel).await {
                            return Acquired::Stopped;
                        }
                    }
                },
                SourceState::Disconnected | SourceState::Connecting | SourceState::Failed => {
                    if !first_attempt {
                        self.metrics.inc(&self.metrics.reconnect_attempts);
                    }
                    first_attempt = false;

                    self.state = SourceState::Connecting;
                    match self.call(cancel, |s| s.connect()).await {
                        None => return Acquired::Stopped,
                        Some(Ok(size)) => {
                            if self.frame_size.is_some_and(|prev| prev != size) {
                                info!(
                                    "Stream resolution changed to {}x{}",
                                    size.width, size.height
                                );
                            }
                            self.frame_size = Some(size);
                            self.state = SourceState::Streaming;
                            info!("✅ Video source streaming");
                        }
                        Some(Err(e)) => {
                            warn!(
                                "❌ Video connect failed: {:#} (retry in {:?})",
                                e, self.reconnect_delay
                            );
                            self.state = SourceState::Failed;
                            if !self.wait_retry(cancel).await {
                                return Acquired::Stopped;
                            }
                        }
                    }
                }
            }
        }
    }

    /// Release the transport. Safe to call more than once.
    pub fn release(&mut self) {
        if self.state != SourceState::Disconnected {
            info!("Video source released (was {})", self.state.as_str());
            if let Some(source) = self.source.as_mut() {
                source.release();
            }
            self.state = SourceState::Disconnected;
        }
    }

    fn drop_connection(&mut self) {
        if let Some(source) = self.source.as_mut() {
            source.release();
        }
        self.state = SourceState::Connecting;
    }

    /// Run one transport call on the blocking pool. `None` if stopped
    /// first, or if the source is gone.
    async fn call<T, F>(&mut self, cancel: &CancellationToken, op: F) -> Option<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut S) -> T + Send + 'static,
    {
        let mut source = self.source.take()?;
        let mut task = tokio::task::spawn_blocking(move || {
            let out = op(&mut source);
            (source, out)
        });

        tokio::select! {
            biased;
            joined = &mut task => match joined {
                Ok((source, out)) => {
                    self.source = Some(source);
                    Some(out)
                }
                Err(e) => {
                    error!("Video source call panicked: {}", e);
                    None
                }
            },
            _ = cancel.cancelled() => {
                warn!("Stop requested during a blocked video call, abandoning it");
                None
            }
        }
    }

    /// Sleep the reconnect delay. `false` if stopped meanwhile.
    async fn wait_retry(&self, cancel: &CancellationToken) -> bool {
        tokio::select! {
            _ = cancel.cancelled() => false,
            _ = tokio::time::sleep(self.reconnect_delay) => true,
        }
    }
}

impl<S: FrameSource> Drop for VideoSourceManager<S> {
    fn drop(&mut self) {
        self.release();
    }
}

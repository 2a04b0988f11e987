//! Throughput reporting.
//!
//! The pipeline reports decode progress through [`ProgressCallback`] every
//! [`batch_size`](crate::PipelineOptions::with_batch_size) decoded frames.
//! Each [`ProgressInfo`] carries the running frames-per-second figure, which
//! is what a hardware decode benchmark mostly cares about.
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use hwsnap::{PipelineOptions, ProgressCallback, ProgressInfo};
//!
//! struct PrintFps;
//!
//! impl ProgressCallback for PrintFps {
//!     fn on_progress(&self, info: &ProgressInfo) {
//!         println!("FPS {:.1} ({} frames)", info.frames_per_second, info.current);
//!     }
//! }
//!
//! let options = PipelineOptions::new()
//!     .with_progress(Arc::new(PrintFps))
//!     .with_batch_size(30);
//! ```

use std::sync::Arc;
use std::time::{Duration, Instant};

/// A snapshot of decode progress.
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Frames decoded so far.
    pub current: u64,
    /// Expected frame count, when the container reports one.
    pub total: Option<u64>,
    /// Completion percentage (0.0 – 100.0), if `total` is known.
    pub percentage: Option<f32>,
    /// Packets handed to the decoder so far.
    pub packets_submitted: u64,
    /// Wall-clock time since the run started.
    pub elapsed: Duration,
    /// Estimated time remaining, based on current throughput.
    pub estimated_remaining: Option<Duration>,
    /// Average decoded frames per second since the start of the run.
    pub frames_per_second: f64,
    /// Presentation time of the most recent frame, if known.
    pub current_timestamp: Option<Duration>,
}

/// Trait for receiving progress updates during a run.
///
/// Callbacks observe; they cannot stop the pipeline.
pub trait ProgressCallback: Send + Sync {
    /// Called at regular intervals while frames are decoded.
    fn on_progress(&self, info: &ProgressInfo);
}

/// Discards all progress notifications. The default.
pub(crate) struct NoOpProgress;

impl ProgressCallback for NoOpProgress {
    fn on_progress(&self, _info: &ProgressInfo) {}
}

/// Frames per second over `elapsed`, or zero before any time has passed.
pub(crate) fn frames_per_second(frames: u64, elapsed: Duration) -> f64 {
    let seconds = elapsed.as_secs_f64();
    if seconds > 0.0 {
        frames as f64 / seconds
    } else {
        0.0
    }
}

/// Tracks timing and emits batched callbacks.
pub(crate) struct ProgressTracker {
    callback: Arc<dyn ProgressCallback>,
    total: Option<u64>,
    current: u64,
    batch_size: u64,
    start_time: Instant,
    items_since_last_report: u64,
}

impl ProgressTracker {
    pub(crate) fn new(callback: Arc<dyn ProgressCallback>, total: Option<u64>, batch_size: u64) -> Self {
        Self {
            callback,
            total,
            current: 0,
            batch_size: batch_size.max(1),
            start_time: Instant::now(),
            items_since_last_report: 0,
        }
    }

    /// Record one decoded frame and fire the callback if the batch
    /// threshold is reached.
    pub(crate) fn advance(&mut self, packets_submitted: u64, timestamp: Option<Duration>) {
        self.current += 1;
        self.items_since_last_report += 1;

        if self.items_since_last_report >= self.batch_size {
            self.report(packets_submitted, timestamp);
            self.items_since_last_report = 0;
        }
    }

    /// Unconditionally emit a final report.
    pub(crate) fn finish(&mut self, packets_submitted: u64) {
        self.report(packets_submitted, None);
    }

    pub(crate) fn elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    fn report(&self, packets_submitted: u64, timestamp: Option<Duration>) {
        let elapsed = self.start_time.elapsed();

        let percentage = self
            .total
            .filter(|&t| t > 0)
            .map(|t| (self.current as f32 / t as f32) * 100.0);

        let estimated_remaining = if self.current > 0 {
            self.total.map(|t| {
                let remaining = t.saturating_sub(self.current);
                elapsed.mul_f64(remaining as f64 / self.current as f64)
            })
        } else {
            None
        };

        let info = ProgressInfo {
            current: self.current,
            total: self.total,
            percentage,
            packets_submitted,
            elapsed,
            estimated_remaining,
            frames_per_second: frames_per_second(self.current, elapsed),
            current_timestamp: timestamp,
        };

        self.callback.on_progress(&info);
    }
}

//! Pipeline configuration.
//!
//! [`PipelineOptions`] is a builder that threads the hardware backend,
//! processing mode, output format, sampling interval, snapshot naming, and
//! progress reporting through [`Pipeline::setup`](crate::Pipeline::setup)
//! without a long argument list.
//!
//! # Example
//!
//! ```no_run
//! use hwsnap::{GraphSpec, PipelineOptions, PixelFormat, ProcessingMode};
//!
//! let options = PipelineOptions::new()
//!     .with_hardware("vaapi", Some("/dev/dri/renderD128"))
//!     .with_processing(ProcessingMode::FilterGraph(
//!         GraphSpec::parse("scale_vaapi=800:600:format=nv12,hwdownload,format=nv12").unwrap(),
//!     ))
//!     .with_pixel_format(PixelFormat::Rgb8)
//!     .with_sample_every(100)
//!     .with_snapshot_directory("/tmp");
//! ```

use std::fmt::{Debug, Formatter, Result as FmtResult};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use ffmpeg_next::{format::Pixel, software::scaling::Flags as ScalingFlags};

use crate::error::HwsnapError;
use crate::filter_graph::GraphSpec;
use crate::progress::{NoOpProgress, ProgressCallback};

/// Default sampling interval: one snapshot per hundred output frames.
pub const DEFAULT_SAMPLE_EVERY: u64 = 100;

/// Output pixel format for converted frames.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PixelFormat {
    /// 8-bit RGB (24 bpp). This is the default.
    #[default]
    Rgb8,
    /// 8-bit RGBA (32 bpp).
    Rgba8,
    /// 8-bit grayscale (8 bpp).
    Gray8,
}

impl PixelFormat {
    /// Map to the corresponding FFmpeg pixel format constant.
    pub(crate) fn to_ffmpeg_pixel(self) -> Pixel {
        match self {
            PixelFormat::Rgb8 => Pixel::RGB24,
            PixelFormat::Rgba8 => Pixel::RGBA,
            PixelFormat::Gray8 => Pixel::GRAY8,
        }
    }

    /// Bytes per packed pixel.
    pub fn bytes_per_pixel(self) -> usize {
        match self {
            PixelFormat::Rgb8 => 3,
            PixelFormat::Rgba8 => 4,
            PixelFormat::Gray8 => 1,
        }
    }

    /// Parse a command-line name (`rgb8`, `rgba8`, `gray8` and aliases).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "rgb8" | "rgb" | "rgb24" => Some(PixelFormat::Rgb8),
            "rgba8" | "rgba" => Some(PixelFormat::Rgba8),
            "gray8" | "gray" | "grey" | "grayscale" => Some(PixelFormat::Gray8),
            _ => None,
        }
    }
}

/// Interpolation used when the converter rescales.
///
/// Chosen explicitly; the converter never infers it from the geometry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ScalingPolicy {
    /// Nearest-neighbour sampling.
    Nearest,
    /// FFmpeg's fast bilinear approximation.
    FastBilinear,
    /// Bilinear interpolation. This is the default.
    #[default]
    Bilinear,
    /// Bicubic interpolation.
    Bicubic,
}

impl ScalingPolicy {
    pub(crate) fn to_flags(self) -> ScalingFlags {
        match self {
            ScalingPolicy::Nearest => ScalingFlags::POINT,
            ScalingPolicy::FastBilinear => ScalingFlags::FAST_BILINEAR,
            ScalingPolicy::Bilinear => ScalingFlags::BILINEAR,
            ScalingPolicy::Bicubic => ScalingFlags::BICUBIC,
        }
    }

    /// Parse a command-line name.
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "nearest" | "point" => Some(ScalingPolicy::Nearest),
            "fast-bilinear" | "fast_bilinear" => Some(ScalingPolicy::FastBilinear),
            "bilinear" => Some(ScalingPolicy::Bilinear),
            "bicubic" => Some(ScalingPolicy::Bicubic),
            _ => None,
        }
    }
}

/// Converter output settings.
///
/// When no dimensions are set the incoming frame's size is kept. Setting one
/// dimension together with
/// [`maintain_aspect_ratio`](FrameOutputOptions::maintain_aspect_ratio)
/// computes the other.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FrameOutputOptions {
    /// Output pixel format.
    pub pixel_format: PixelFormat,
    /// Target width. `None` keeps the source width.
    pub width: Option<u32>,
    /// Target height. `None` keeps the source height.
    pub height: Option<u32>,
    /// Derive the missing dimension from the source aspect ratio.
    pub maintain_aspect_ratio: bool,
    /// Interpolation used when resizing.
    pub scaling: ScalingPolicy,
}

impl Default for FrameOutputOptions {
    fn default() -> Self {
        Self {
            pixel_format: PixelFormat::Rgb8,
            width: None,
            height: None,
            maintain_aspect_ratio: true,
            scaling: ScalingPolicy::Bilinear,
        }
    }
}

impl FrameOutputOptions {
    /// Resolve the final output dimensions given the source size.
    ///
    /// Returns `(width, height)`.
    pub fn resolve_dimensions(&self, source_width: u32, source_height: u32) -> (u32, u32) {
        match (self.width, self.height) {
            (Some(w), Some(h)) => (w, h),
            (Some(w), None) if self.maintain_aspect_ratio && source_width > 0 => {
                let ratio = w as f64 / source_width as f64;
                let h = (source_height as f64 * ratio).round() as u32;
                (w, h.max(1))
            }
            (Some(w), None) => (w, source_height),
            (None, Some(h)) if self.maintain_aspect_ratio && source_height > 0 => {
                let ratio = h as f64 / source_height as f64;
                let w = (source_width as f64 * ratio).round() as u32;
                (w.max(1), h)
            }
            (None, Some(h)) => (source_width, h),
            (None, None) => (source_width, source_height),
        }
    }

    /// Reject a zero target width or height.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::InvalidResolution`] naming the requested size.
    pub fn validate(&self) -> Result<(), HwsnapError> {
        if self.width == Some(0) || self.height == Some(0) {
            return Err(HwsnapError::InvalidResolution {
                width: self.width,
                height: self.height,
            });
        }
        Ok(())
    }
}

/// How decoded frames are processed before conversion.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum ProcessingMode {
    /// Download (if needed) and convert each decoded frame directly.
    #[default]
    DirectConvert,
    /// Route frames through a filter graph built on the first frame.
    FilterGraph(GraphSpec),
}

/// Where and how sampled frames are written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotOptions {
    /// Output directory.
    pub directory: PathBuf,
    /// File name prefix.
    pub prefix: String,
    /// File extension; selects the image encoder.
    pub extension: String,
}

impl Default for SnapshotOptions {
    fn default() -> Self {
        Self {
            directory: std::env::temp_dir(),
            prefix: "hwsnap".to_string(),
            extension: "ppm".to_string(),
        }
    }
}

impl SnapshotOptions {
    /// Path for the snapshot of output frame `index`.
    ///
    /// `{directory}/{prefix}_{index:03}.{extension}`
    pub fn path_for(&self, index: u64) -> PathBuf {
        self.directory
            .join(format!("{}_{index:03}.{}", self.prefix, self.extension))
    }
}

/// Configuration for one pipeline run.
///
/// All fields have defaults: software decoding, direct conversion to RGB8 at
/// the source size, one snapshot every [`DEFAULT_SAMPLE_EVERY`] frames into
/// the system temp directory.
#[derive(Clone)]
pub struct PipelineOptions {
    /// Hardware backend name; `None` decodes in software.
    pub(crate) hardware_backend: Option<String>,
    /// Device path for the backend; `None` uses the backend default.
    pub(crate) device_path: Option<String>,
    pub(crate) processing: ProcessingMode,
    pub(crate) frame_output: FrameOutputOptions,
    pub(crate) sample_every: u64,
    pub(crate) snapshot: SnapshotOptions,
    pub(crate) progress: Arc<dyn ProgressCallback>,
    /// How often to fire the progress callback (every N decoded frames).
    pub(crate) batch_size: u64,
}

impl Debug for PipelineOptions {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("PipelineOptions")
            .field("hardware_backend", &self.hardware_backend)
            .field("device_path", &self.device_path)
            .field("processing", &self.processing)
            .field("frame_output", &self.frame_output)
            .field("sample_every", &self.sample_every)
            .field("snapshot", &self.snapshot)
            .field("batch_size", &self.batch_size)
            .finish_non_exhaustive()
    }
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineOptions {
    /// Create options with default settings.
    pub fn new() -> Self {
        Self {
            hardware_backend: None,
            device_path: None,
            processing: ProcessingMode::DirectConvert,
            frame_output: FrameOutputOptions::default(),
            sample_every: DEFAULT_SAMPLE_EVERY,
            snapshot: SnapshotOptions::default(),
            progress: Arc::new(NoOpProgress),
            batch_size: 30,
        }
    }

    /// Decode through a hardware backend (`vaapi`, `cuda`, ...).
    ///
    /// The name is resolved during setup, before the decoder is opened.
    #[must_use]
    pub fn with_hardware(mut self, backend: impl Into<String>, device: Option<&str>) -> Self {
        self.hardware_backend = Some(backend.into());
        self.device_path = device.map(str::to_string);
        self
    }

    /// Select direct conversion or a filter graph.
    #[must_use]
    pub fn with_processing(mut self, mode: ProcessingMode) -> Self {
        self.processing = mode;
        self
    }

    /// Set the output pixel format.
    #[must_use]
    pub fn with_pixel_format(mut self, format: PixelFormat) -> Self {
        self.frame_output.pixel_format = format;
        self
    }

    /// Set a custom output resolution.
    ///
    /// Pass `None` for either dimension to keep the source value. Zero is
    /// rejected at setup with
    /// [`HwsnapError::InvalidResolution`](crate::HwsnapError::InvalidResolution).
    #[must_use]
    pub fn with_resolution(mut self, width: Option<u32>, height: Option<u32>) -> Self {
        self.frame_output.width = width;
        self.frame_output.height = height;
        self
    }

    /// Control aspect-ratio preservation when only one dimension is set.
    #[must_use]
    pub fn with_maintain_aspect_ratio(mut self, maintain: bool) -> Self {
        self.frame_output.maintain_aspect_ratio = maintain;
        self
    }

    /// Set the interpolation used by the converter.
    #[must_use]
    pub fn with_scaling(mut self, policy: ScalingPolicy) -> Self {
        self.frame_output.scaling = policy;
        self
    }

    /// Replace the complete converter output configuration.
    #[must_use]
    pub fn with_frame_output(mut self, options: FrameOutputOptions) -> Self {
        self.frame_output = options;
        self
    }

    /// Snapshot every `n`th output frame.
    ///
    /// Zero is rejected at setup with
    /// [`HwsnapError::InvalidInterval`](crate::HwsnapError::InvalidInterval).
    #[must_use]
    pub fn with_sample_every(mut self, n: u64) -> Self {
        self.sample_every = n;
        self
    }

    /// Write snapshots into `directory`.
    #[must_use]
    pub fn with_snapshot_directory(mut self, directory: impl AsRef<Path>) -> Self {
        self.snapshot.directory = directory.as_ref().to_path_buf();
        self
    }

    /// Set the snapshot file name prefix.
    #[must_use]
    pub fn with_snapshot_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.snapshot.prefix = prefix.into();
        self
    }

    /// Set the snapshot file extension (`ppm`, `png`, `jpg`, ...).
    #[must_use]
    pub fn with_snapshot_extension(mut self, extension: impl Into<String>) -> Self {
        self.snapshot.extension = extension.into().trim_start_matches('.').to_string();
        self
    }

    /// Attach a progress callback.
    #[must_use]
    pub fn with_progress(mut self, callback: Arc<dyn ProgressCallback>) -> Self {
        self.progress = callback;
        self
    }

    /// Fire the progress callback every `size` decoded frames (minimum 1).
    #[must_use]
    pub fn with_batch_size(mut self, size: u64) -> Self {
        self.batch_size = size.max(1);
        self
    }

    /// The configured backend name, if any.
    pub fn hardware_backend(&self) -> Option<&str> {
        self.hardware_backend.as_deref()
    }

    /// The configured processing mode.
    pub fn processing(&self) -> &ProcessingMode {
        &self.processing
    }

    /// The configured converter output.
    pub fn frame_output(&self) -> &FrameOutputOptions {
        &self.frame_output
    }

    /// The configured sampling interval.
    pub fn sample_every(&self) -> u64 {
        self.sample_every
    }

    /// The configured snapshot naming.
    pub fn snapshot(&self) -> &SnapshotOptions {
        &self.snapshot
    }
}

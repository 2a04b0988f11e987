//! Error types for the `hwsnap` crate.
//!
//! This module defines [`HwsnapError`], the unified error type returned by
//! every fallible operation in the crate. Variants are grouped by the stage
//! that raises them: device setup, decoding, filter-graph construction, and
//! per-frame transfer/conversion.
//!
//! Only [`TransferError`](HwsnapError::TransferError) and
//! [`ConvertError`](HwsnapError::ConvertError) are local to a single frame;
//! the pipeline drops the frame and keeps going. Everything else aborts the
//! run.

use std::{io::Error as IoError, path::PathBuf};

use ffmpeg_next::Error as FfmpegError;
use image::ImageError;
use thiserror::Error;

/// The unified error type for all `hwsnap` operations.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum HwsnapError {
    /// The requested hardware backend name is not recognised.
    #[error("Unknown hardware backend '{name}' (available: {})", supported.join(", "))]
    UnknownBackend {
        /// The name that was passed in.
        name: String,
        /// Backend names supported by the linked FFmpeg build.
        supported: Vec<String>,
    },

    /// The hardware device could not be opened.
    #[error("Failed to open {backend} device {device}: {reason}")]
    DeviceUnavailable {
        /// Backend name.
        backend: String,
        /// Device path, or `default` when none was given.
        device: String,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The media file could not be opened.
    #[error("Failed to open media file at {path}: {reason}")]
    FileOpen {
        /// Path that was passed to [`crate::MediaSource::open`].
        path: PathBuf,
        /// Underlying reason the open failed.
        reason: String,
    },

    /// The file does not contain a video stream.
    #[error("No video stream found in file")]
    NoVideoStream,

    /// The bitstream could not be decoded.
    #[error("Failed to decode video: {0}")]
    DecodeError(String),

    /// None of the formats offered by the decoder matches the backend.
    #[error("Decoder offers no {backend} surface format (candidates: {offered:?})")]
    UnsupportedFormat {
        /// Backend whose preferred format was requested.
        backend: String,
        /// Formats the decoder offered, in rank order.
        offered: Vec<String>,
    },

    /// Filter graph specification, linking, or processing failed.
    #[error("Filter graph error{}: {reason}", stage.as_ref().map(|s| format!(" at stage '{s}'")).unwrap_or_default())]
    GraphError {
        /// The offending stage, when known.
        stage: Option<String>,
        /// What went wrong.
        reason: String,
    },

    /// A hardware frame could not be copied to system memory.
    #[error("Hardware frame transfer failed: {0}")]
    TransferError(String),

    /// A frame could not be converted to the output format.
    #[error("Frame conversion failed: {0}")]
    ConvertError(String),

    /// A sampling interval of zero was provided.
    #[error("Sampling interval must be greater than zero")]
    InvalidInterval,

    /// A requested output width or height was zero.
    #[error("Invalid output resolution: {width:?}x{height:?} (dimensions must be greater than zero)")]
    InvalidResolution {
        /// Requested width.
        width: Option<u32>,
        /// Requested height.
        height: Option<u32>,
    },

    /// The scaler for the first frame could not be created.
    ///
    /// Later frames would hit the same configuration, so this ends the run.
    #[error("Failed to set up frame conversion: {0}")]
    ScalerSetup(String),

    /// A snapshot could not be written.
    #[error("Failed to write snapshot {path}: {reason}")]
    SnapshotError {
        /// Destination path.
        path: PathBuf,
        /// Underlying reason.
        reason: String,
    },

    /// An error originating from the FFmpeg libraries.
    #[error("FFmpeg error: {0}")]
    FfmpegError(String),

    /// An I/O error occurred while reading or writing files.
    #[error("I/O error: {0}")]
    IoError(#[from] IoError),

    /// An error from the `image` crate.
    #[error("Image processing error: {0}")]
    ImageError(#[from] ImageError),
}

impl HwsnapError {
    /// Shorthand for a [`GraphError`](HwsnapError::GraphError) tied to a stage.
    pub(crate) fn graph(stage: impl Into<String>, reason: impl Into<String>) -> Self {
        HwsnapError::GraphError {
            stage: Some(stage.into()),
            reason: reason.into(),
        }
    }

    /// Returns `true` for errors that only affect the current frame.
    ///
    /// The pipeline drops the frame and continues with the next one.
    pub fn is_frame_local(&self) -> bool {
        matches!(
            self,
            HwsnapError::TransferError(_) | HwsnapError::ConvertError(_)
        )
    }
}

impl From<FfmpegError> for HwsnapError {
    fn from(error: FfmpegError) -> Self {
        HwsnapError::FfmpegError(error.to_string())
    }
}

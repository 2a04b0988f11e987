//! Device download plus pixel-format and resolution conversion.
//!
//! [`FrameConverter`] turns any [`DecodedFrame`] into a packed
//! [`OutputFrame`]. Hardware-resident frames are downloaded first. The
//! swscale context is created from the first frame and reused for the whole
//! run; frames that no longer match it are rejected rather than triggering
//! a rebuild. A scaler that cannot be built at all is a setup failure and is
//! never retried.

use ffmpeg_next::{
    format::Pixel,
    frame::Video as VideoFrame,
    software::scaling::Context as ScalingContext,
};

use crate::configuration::FrameOutputOptions;
use crate::conversion::frame_to_buffer;
use crate::error::HwsnapError;
use crate::frame::{DecodedFrame, OutputFrame};
use crate::hardware_acceleration::transfer_hardware_frame;

/// Settings for a [`FrameConverter`].
pub type ConvertOptions = FrameOutputOptions;

/// Converts decoded frames to host-resident output frames.
pub trait FrameConvert {
    /// Convert one frame, consuming it.
    ///
    /// [`TransferError`](HwsnapError::TransferError) and
    /// [`ConvertError`](HwsnapError::ConvertError) only concern this frame;
    /// [`ScalerSetup`](HwsnapError::ScalerSetup) ends the run.
    fn convert(&mut self, frame: DecodedFrame) -> Result<OutputFrame, HwsnapError>;
}

struct Scaler {
    context: ScalingContext,
    source_format: Pixel,
    source_width: u32,
    source_height: u32,
    target_width: u32,
    target_height: u32,
}

/// swscale-backed [`FrameConvert`].
pub struct FrameConverter {
    options: ConvertOptions,
    scaler: Option<Scaler>,
    setup_failure: Option<String>,
    converted: u64,
    downloaded: u64,
}

impl FrameConverter {
    /// Create a converter; the scaler is built on the first frame.
    pub fn new(options: ConvertOptions) -> Self {
        Self {
            options,
            scaler: None,
            setup_failure: None,
            converted: 0,
            downloaded: 0,
        }
    }

    /// The output settings.
    pub fn options(&self) -> &ConvertOptions {
        &self.options
    }

    /// Output size, once the first frame has fixed it.
    pub fn target_dimensions(&self) -> Option<(u32, u32)> {
        self.scaler
            .as_ref()
            .map(|scaler| (scaler.target_width, scaler.target_height))
    }

    /// Frames converted successfully.
    pub fn converted(&self) -> u64 {
        self.converted
    }

    /// Frames downloaded from device memory.
    pub fn downloaded(&self) -> u64 {
        self.downloaded
    }

    fn scaler_for(&mut self, frame: &DecodedFrame) -> Result<&mut Scaler, HwsnapError> {
        let source_format = frame.format().pixel();
        let (source_width, source_height) = (frame.width(), frame.height());

        if let Some(reason) = &self.setup_failure {
            return Err(HwsnapError::ScalerSetup(reason.clone()));
        }

        if self.scaler.is_none() {
            let (target_width, target_height) =
                self.options.resolve_dimensions(source_width, source_height);
            let output_pixel = self.options.pixel_format.to_ffmpeg_pixel();

            let context = match ScalingContext::get(
                source_format,
                source_width,
                source_height,
                output_pixel,
                target_width,
                target_height,
                self.options.scaling.to_flags(),
            ) {
                Ok(context) => context,
                Err(error) => {
                    let reason = format!(
                        "cannot scale {source_format:?} {source_width}x{source_height} to \
                         {output_pixel:?} {target_width}x{target_height}: {error}"
                    );
                    self.setup_failure = Some(reason.clone());
                    return Err(HwsnapError::ScalerSetup(reason));
                }
            };

            log::debug!(
                "Scaler ready: {source_format:?} {source_width}x{source_height} -> \
                 {output_pixel:?} {target_width}x{target_height} ({:?})",
                self.options.scaling
            );

            self.scaler = Some(Scaler {
                context,
                source_format,
                source_width,
                source_height,
                target_width,
                target_height,
            });
        }

        let scaler = self
            .scaler
            .as_mut()
            .ok_or_else(|| HwsnapError::ConvertError("scaler unavailable".to_string()))?;

        if (scaler.source_format, scaler.source_width, scaler.source_height)
            != (source_format, source_width, source_height)
        {
            return Err(HwsnapError::ConvertError(format!(
                "frame changed from {:?} {}x{} to {source_format:?} {source_width}x{source_height}",
                scaler.source_format, scaler.source_width, scaler.source_height
            )));
        }

        Ok(scaler)
    }
}

impl FrameConvert for FrameConverter {
    fn convert(&mut self, frame: DecodedFrame) -> Result<OutputFrame, HwsnapError> {
        let frame = if frame.is_hardware_resident() {
            let software = transfer_hardware_frame(&frame)?;
            self.downloaded += 1;
            software
        } else {
            frame
        };

        let pixel_format = self.options.pixel_format;
        let scaler = self.scaler_for(&frame)?;
        let (width, height) = (scaler.target_width, scaler.target_height);

        let mut scaled = VideoFrame::empty();
        scaler
            .context
            .run(frame.as_ffmpeg(), &mut scaled)
            .map_err(|error| HwsnapError::ConvertError(error.to_string()))?;

        let data = frame_to_buffer(&scaled, width, height, pixel_format.bytes_per_pixel());
        let mut output = OutputFrame::from_packed(width, height, pixel_format, data)?;
        output.pts = frame.pts();

        self.converted += 1;
        Ok(output)
    }
}

//! Frame types flowing through the pipeline.
//!
//! [`DecodedFrame`] is what the decoder and the filter graph hand around:
//! an owned FFmpeg frame that may still live in device memory.
//! [`OutputFrame`] is the converter's product: packed, host-resident pixels
//! ready for a snapshot. [`Pull`] is the poll result shared by every stage
//! with a receive side.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use ffmpeg_next::{Rational, format::Pixel, frame::Video as VideoFrame};
use ffmpeg_sys_next::AVPixelFormat;
use image::{DynamicImage, GrayImage, RgbImage, RgbaImage};

use crate::configuration::PixelFormat;
use crate::error::HwsnapError;
use crate::hardware_acceleration::FramePool;

// AV_PIX_FMT_FLAG_HWACCEL from libavutil/pixdesc.h.
const PIX_FMT_FLAG_HWACCEL: u64 = 1 << 3;

/// Result of polling a stage for output.
///
/// `NeedMoreInput` and `EndOfStream` are control signals, not failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pull<T> {
    /// The stage produced an item.
    Ready(T),
    /// Feed the stage more input before polling again.
    NeedMoreInput,
    /// The stage is drained and will produce nothing more.
    EndOfStream,
}

impl<T> Pull<T> {
    /// `true` for [`Pull::EndOfStream`].
    pub fn is_end_of_stream(&self) -> bool {
        matches!(self, Pull::EndOfStream)
    }
}

/// Where a frame's pixels live, plus its pixel format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PixelFormatTag {
    /// Directly addressable host memory.
    Software(Pixel),
    /// A device surface (VAAPI, CUDA, ...) that must be downloaded first.
    HardwareResident(Pixel),
}

impl PixelFormatTag {
    /// Classify an FFmpeg pixel format.
    pub fn of(pixel: Pixel) -> Self {
        if is_hardware_format(pixel) {
            PixelFormatTag::HardwareResident(pixel)
        } else {
            PixelFormatTag::Software(pixel)
        }
    }

    /// The underlying FFmpeg pixel format.
    pub fn pixel(self) -> Pixel {
        match self {
            PixelFormatTag::Software(pixel) | PixelFormatTag::HardwareResident(pixel) => pixel,
        }
    }

    /// `true` for device-memory formats.
    pub fn is_hardware_resident(self) -> bool {
        matches!(self, PixelFormatTag::HardwareResident(_))
    }
}

/// Returns `true` if FFmpeg describes `pixel` as a hardware surface format.
pub(crate) fn is_hardware_format(pixel: Pixel) -> bool {
    let raw = AVPixelFormat::from(pixel);
    if raw == AVPixelFormat::AV_PIX_FMT_NONE {
        return false;
    }
    let descriptor = unsafe { ffmpeg_sys_next::av_pix_fmt_desc_get(raw) };
    !descriptor.is_null() && unsafe { (*descriptor).flags } & PIX_FMT_FLAG_HWACCEL != 0
}

/// Opaque handle to the device surface backing a hardware frame.
///
/// Only meaningful to the backend that produced it (a VA surface id, a CUDA
/// device pointer, ...).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeviceSurface(usize);

impl DeviceSurface {
    /// The raw handle value.
    pub fn raw(self) -> usize {
        self.0
    }
}

/// A decoded video frame owned by exactly one stage at a time.
///
/// The FFmpeg frame (and any device surface it references) is released
/// when the value is dropped, on every path.
pub struct DecodedFrame {
    inner: VideoFrame,
}

impl DecodedFrame {
    /// Allocate a host-memory frame with the given format and size.
    pub fn new(format: Pixel, width: u32, height: u32) -> Self {
        Self {
            inner: VideoFrame::new(format, width, height),
        }
    }

    pub(crate) fn from_ffmpeg(inner: VideoFrame) -> Self {
        Self { inner }
    }

    pub(crate) fn as_ffmpeg(&self) -> &VideoFrame {
        &self.inner
    }

    /// Frame width in pixels.
    pub fn width(&self) -> u32 {
        self.inner.width()
    }

    /// Frame height in pixels.
    pub fn height(&self) -> u32 {
        self.inner.height()
    }

    /// Pixel format and memory domain.
    pub fn format(&self) -> PixelFormatTag {
        PixelFormatTag::of(self.inner.format())
    }

    /// `true` if the pixels live in device memory.
    pub fn is_hardware_resident(&self) -> bool {
        self.format().is_hardware_resident()
    }

    /// Presentation timestamp in stream time base units.
    pub fn pts(&self) -> Option<i64> {
        self.inner.pts()
    }

    /// Set the presentation timestamp.
    pub fn set_pts(&mut self, pts: Option<i64>) {
        self.inner.set_pts(pts);
    }

    /// Bytes per row of `plane`, including padding.
    pub fn stride(&self, plane: usize) -> usize {
        if self.is_hardware_resident() || plane >= self.inner.planes() {
            return 0;
        }
        self.inner.stride(plane)
    }

    /// Pixel data of `plane`. Empty for device surfaces.
    pub fn data(&self, plane: usize) -> &[u8] {
        if self.is_hardware_resident() || plane >= self.inner.planes() {
            return &[];
        }
        self.inner.data(plane)
    }

    /// Mutable pixel data of `plane`. Empty for device surfaces.
    pub fn data_mut(&mut self, plane: usize) -> &mut [u8] {
        if self.is_hardware_resident() || plane >= self.inner.planes() {
            return &mut [];
        }
        self.inner.data_mut(plane)
    }

    /// Sample (pixel) aspect ratio; `0/1` when unknown.
    pub fn sample_aspect_ratio(&self) -> Rational {
        self.inner.aspect_ratio()
    }

    /// The device frame pool this frame was allocated from.
    ///
    /// `None` for host-memory frames.
    pub fn frame_pool(&self) -> Option<FramePool> {
        unsafe { FramePool::from_borrowed((*self.inner.as_ptr()).hw_frames_ctx) }
    }

    /// The device surface handle, for hardware-resident frames.
    pub fn device_surface(&self) -> Option<DeviceSurface> {
        if !self.is_hardware_resident() {
            return None;
        }
        let data = unsafe { (*self.inner.as_ptr()).data };
        let handle = if data[3].is_null() { data[0] } else { data[3] };
        if handle.is_null() {
            None
        } else {
            Some(DeviceSurface(handle as usize))
        }
    }
}

impl Debug for DecodedFrame {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("DecodedFrame")
            .field("width", &self.width())
            .field("height", &self.height())
            .field("format", &self.format())
            .field("pts", &self.pts())
            .finish_non_exhaustive()
    }
}

/// Parameters of the implicit filter-graph source stage.
///
/// Taken from the first decoded frame; the time base comes from the stream.
#[derive(Debug, Clone)]
pub struct FrameGeometry {
    /// Frame width in pixels.
    pub width: u32,
    /// Frame height in pixels.
    pub height: u32,
    /// Pixel format of incoming frames (a surface format for hardware frames).
    pub format: Pixel,
    /// Stream time base.
    pub time_base: Rational,
    /// Sample aspect ratio, normalised so the numerator is never zero.
    pub sample_aspect_ratio: Rational,
    /// Device frame pool of hardware frames.
    pub frame_pool: Option<FramePool>,
}

impl FrameGeometry {
    /// Describe `frame` as a source-stage configuration.
    pub fn of(frame: &DecodedFrame, time_base: Rational) -> Self {
        let aspect = frame.sample_aspect_ratio();
        let sample_aspect_ratio = if aspect.numerator() <= 0 || aspect.denominator() <= 0 {
            Rational::new(1, 1)
        } else {
            aspect
        };

        Self {
            width: frame.width(),
            height: frame.height(),
            format: frame.as_ffmpeg().format(),
            time_base,
            sample_aspect_ratio,
            frame_pool: frame.frame_pool(),
        }
    }

    /// `true` when incoming frames are device surfaces.
    pub fn is_hardware(&self) -> bool {
        is_hardware_format(self.format)
    }
}

impl PartialEq for FrameGeometry {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.format == other.format
            && self.time_base == other.time_base
            && self.sample_aspect_ratio == other.sample_aspect_ratio
    }
}

/// A converted, host-resident frame ready to be sampled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputFrame {
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) format: PixelFormat,
    pub(crate) data: Vec<u8>,
    pub(crate) pts: Option<i64>,
    pub(crate) index: u64,
}

impl OutputFrame {
    /// Wrap tightly packed pixel data.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::ConvertError`] if `data` does not hold exactly
    /// `width * height` pixels of `format`.
    pub fn from_packed(
        width: u32,
        height: u32,
        format: PixelFormat,
        data: Vec<u8>,
    ) -> Result<Self, HwsnapError> {
        let expected = width as usize * height as usize * format.bytes_per_pixel();
        if data.len() != expected {
            return Err(HwsnapError::ConvertError(format!(
                "expected {expected} bytes for {width}x{height} {format:?}, got {}",
                data.len()
            )));
        }
        Ok(Self {
            width,
            height,
            format,
            data,
            pts: None,
            index: 0,
        })
    }

    /// Width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Pixel layout of [`data`](OutputFrame::data).
    pub fn format(&self) -> PixelFormat {
        self.format
    }

    /// Packed pixel rows, no padding.
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Presentation timestamp carried over from the decoded frame.
    pub fn pts(&self) -> Option<i64> {
        self.pts
    }

    /// 1-based position among all frames that reached the output stage.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Read one pixel's channels.
    pub fn pixel(&self, x: u32, y: u32) -> Option<&[u8]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let bytes_per_pixel = self.format.bytes_per_pixel();
        let offset = (y as usize * self.width as usize + x as usize) * bytes_per_pixel;
        self.data.get(offset..offset + bytes_per_pixel)
    }

    /// Copy into an [`image::DynamicImage`].
    pub fn to_image(&self) -> Result<DynamicImage, HwsnapError> {
        let (width, height) = (self.width, self.height);
        let buffer = self.data.clone();
        let image = match self.format {
            PixelFormat::Rgb8 => RgbImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgb8),
            PixelFormat::Rgba8 => {
                RgbaImage::from_raw(width, height, buffer).map(DynamicImage::ImageRgba8)
            }
            PixelFormat::Gray8 => {
                GrayImage::from_raw(width, height, buffer).map(DynamicImage::ImageLuma8)
            }
        };
        image.ok_or_else(|| {
            HwsnapError::ConvertError(format!(
                "Failed to construct {:?} image from frame data",
                self.format
            ))
        })
    }
}

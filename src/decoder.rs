//! Send-packet / receive-frame decoding.
//!
//! [`FrameDecoder`] is the contract the pipeline drives. [`VideoDecoderAdapter`]
//! implements it with an FFmpeg video decoder, optionally bound to a
//! hardware [`DeviceContext`] so frames come out as device surfaces.

use std::sync::Arc;

use ffmpeg_next::{
    Error as FfmpegError, codec::Id, codec::Parameters, codec::context::Context as CodecContext,
    decoder::Video as VideoDecoder, format::Pixel, frame::Video as VideoFrame,
};
use ffmpeg_sys_next::{AVCodecContext, AVPixelFormat};

use crate::error::HwsnapError;
use crate::frame::{DecodedFrame, Pull};
use crate::hardware_acceleration::{DeviceContext, hardware_candidates, negotiate_format};
use crate::packet::CompressedPacket;

/// A decoder driven by the send/receive protocol.
///
/// `receive` yields at most one frame per call and never blocks. After
/// `submit(None)` the decoder must be drained until
/// [`Pull::EndOfStream`].
pub trait FrameDecoder {
    /// Hand over a packet, or `None` to flush.
    fn submit(&mut self, packet: Option<CompressedPacket>) -> Result<(), HwsnapError>;

    /// Poll for the next decoded frame.
    fn receive(&mut self) -> Result<Pull<DecodedFrame>, HwsnapError>;
}

/// An FFmpeg video decoder, optionally hardware accelerated.
pub struct VideoDecoderAdapter {
    decoder: VideoDecoder,
    device: Option<Arc<DeviceContext>>,
    hardware_format: Option<Pixel>,
    // Read by `select_hardware_format` through `AVCodecContext::opaque`;
    // must outlive `decoder`, which is dropped first.
    _negotiated: Option<Box<AVPixelFormat>>,
    flushed: bool,
}

impl VideoDecoderAdapter {
    /// Open a decoder for the stream described by `parameters`.
    ///
    /// With a `device`, the codec's hardware configurations for the device's
    /// backend are ranked and the first equal to the backend's preferred
    /// surface format is selected. The device is bound to the codec context
    /// for the decoder's lifetime.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::UnsupportedFormat`] if the codec cannot produce the
    /// backend's surface format, [`HwsnapError::DecodeError`] if the decoder
    /// cannot be opened.
    pub fn open(
        parameters: Parameters,
        device: Option<&Arc<DeviceContext>>,
    ) -> Result<Self, HwsnapError> {
        Self::from_context(CodecContext::from_parameters(parameters)?, device)
    }

    /// Open a decoder for `codec` without stream parameters.
    ///
    /// Dimensions and extradata are taken from the bitstream.
    ///
    /// # Errors
    ///
    /// As [`VideoDecoderAdapter::open`], plus
    /// [`HwsnapError::DecodeError`] when FFmpeg has no decoder for `codec`.
    pub fn for_codec(codec: Id, device: Option<&Arc<DeviceContext>>) -> Result<Self, HwsnapError> {
        let decoder = ffmpeg_next::decoder::find(codec)
            .ok_or_else(|| HwsnapError::DecodeError(format!("no decoder for codec {codec:?}")))?;
        Self::from_context(CodecContext::new_with_codec(decoder), device)
    }

    fn from_context(
        mut context: CodecContext,
        device: Option<&Arc<DeviceContext>>,
    ) -> Result<Self, HwsnapError> {
        unsafe {
            let raw = context.as_mut_ptr();
            (*raw).thread_count = 0;
            (*raw).thread_type =
                (ffmpeg_sys_next::FF_THREAD_FRAME | ffmpeg_sys_next::FF_THREAD_SLICE) as i32;
        }

        let mut negotiated = None;
        let mut hardware_format = None;

        if let Some(device) = device {
            let backend = device.backend();
            let codec = ffmpeg_next::decoder::find(context.id()).ok_or_else(|| {
                HwsnapError::DecodeError(format!("no decoder for codec {:?}", context.id()))
            })?;

            let candidates = unsafe { hardware_candidates(codec.as_ptr(), backend) };
            log::debug!(
                "{} offers {backend} surface formats {candidates:?}",
                codec.name()
            );

            let selected = negotiate_format(&candidates, backend.preferred_format()).ok_or_else(
                || HwsnapError::UnsupportedFormat {
                    backend: backend.name().to_string(),
                    offered: candidates.iter().map(|format| format!("{format:?}")).collect(),
                },
            )?;

            let mut wanted = Box::new(AVPixelFormat::from(selected));
            unsafe {
                let raw = context.as_mut_ptr();
                (*raw).opaque = (&mut *wanted as *mut AVPixelFormat).cast();
                (*raw).get_format = Some(select_hardware_format);
                (*raw).hw_device_ctx = device.new_ref();
            }

            log::debug!("Decoding into {selected:?} surfaces on {backend}");
            negotiated = Some(wanted);
            hardware_format = Some(selected);
        }

        let decoder = context
            .decoder()
            .video()
            .map_err(|error| HwsnapError::DecodeError(format!("failed to open decoder: {error}")))?;

        Ok(Self {
            decoder,
            device: device.cloned(),
            hardware_format,
            _negotiated: negotiated,
            flushed: false,
        })
    }

    /// The device the decoder is bound to.
    pub fn device(&self) -> Option<&Arc<DeviceContext>> {
        self.device.as_ref()
    }

    /// The negotiated surface format, for hardware decoders.
    pub fn hardware_format(&self) -> Option<Pixel> {
        self.hardware_format
    }

    /// `true` once a flush has been submitted.
    pub fn is_flushed(&self) -> bool {
        self.flushed
    }
}

impl FrameDecoder for VideoDecoderAdapter {
    fn submit(&mut self, packet: Option<CompressedPacket>) -> Result<(), HwsnapError> {
        let result = match packet {
            Some(packet) => self.decoder.send_packet(packet.as_ffmpeg()),
            None => {
                if self.flushed {
                    return Ok(());
                }
                self.flushed = true;
                self.decoder.send_eof()
            }
        };

        match result {
            Ok(()) | Err(FfmpegError::Eof) => Ok(()),
            Err(error) => Err(HwsnapError::DecodeError(error.to_string())),
        }
    }

    fn receive(&mut self) -> Result<Pull<DecodedFrame>, HwsnapError> {
        let mut frame = VideoFrame::empty();
        match self.decoder.receive_frame(&mut frame) {
            Ok(()) => Ok(Pull::Ready(DecodedFrame::from_ffmpeg(frame))),
            Err(FfmpegError::Other { errno }) if errno == ffmpeg_sys_next::EAGAIN as i32 => {
                Ok(Pull::NeedMoreInput)
            }
            Err(FfmpegError::Eof) => Ok(Pull::EndOfStream),
            Err(error) => Err(HwsnapError::DecodeError(error.to_string())),
        }
    }
}

/// `get_format` callback: accept only the negotiated surface format.
unsafe extern "C" fn select_hardware_format(
    context: *mut AVCodecContext,
    offered: *const AVPixelFormat,
) -> AVPixelFormat {
    unsafe {
        let wanted = *((*context).opaque as *const AVPixelFormat);
        let mut cursor = offered;
        while *cursor != AVPixelFormat::AV_PIX_FMT_NONE {
            if *cursor == wanted {
                return wanted;
            }
            cursor = cursor.add(1);
        }
    }
    log::error!("Decoder did not offer the negotiated hardware surface format");
    AVPixelFormat::AV_PIX_FMT_NONE
}

//! Demultiplexing of the selected video stream.
//!
//! [`PacketSource`] is what the pipeline pulls compressed packets from.
//! [`MediaSource`] implements it on top of an FFmpeg input context: the best
//! video stream is chosen once at open time and only its packets are
//! returned.

use std::path::{Path, PathBuf};

use ffmpeg_next::{
    Error as FfmpegError, Packet, Rational, codec::Id, codec::Parameters,
    format::context::Input, media::Type,
};

use crate::error::HwsnapError;
use crate::packet::CompressedPacket;

// Consecutive read failures tolerated before the input is treated as broken.
const MAX_CONSECUTIVE_READ_ERRORS: u32 = 32;

/// Properties of the selected video stream, read once at open time.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StreamGeometry {
    /// Codec of the stream.
    pub codec_id: Id,
    /// Coded width in pixels (0 if the container does not say).
    pub width: u32,
    /// Coded height in pixels (0 if the container does not say).
    pub height: u32,
    /// Stream time base; frame timestamps are in these units.
    pub time_base: Rational,
    /// Sample aspect ratio; `0/1` when unknown.
    pub sample_aspect_ratio: Rational,
    /// Average frame rate; `0/1` when unknown.
    pub frame_rate: Rational,
    /// Frame count reported by the container, if any.
    pub estimated_frames: Option<u64>,
}

impl StreamGeometry {
    /// Geometry for a stream known only by its size and time base.
    pub fn new(width: u32, height: u32, time_base: Rational) -> Self {
        Self {
            codec_id: Id::None,
            width,
            height,
            time_base,
            sample_aspect_ratio: Rational::new(0, 1),
            frame_rate: Rational::new(0, 1),
            estimated_frames: None,
        }
    }

    /// Average frames per second, or `None` when the rate is unknown.
    pub fn frames_per_second(&self) -> Option<f64> {
        (self.frame_rate.numerator() > 0 && self.frame_rate.denominator() > 0)
            .then(|| f64::from(self.frame_rate))
    }
}

/// A supplier of compressed packets for one video stream.
pub trait PacketSource {
    /// The next packet, or `None` at end of input.
    fn next_packet(&mut self) -> Result<Option<CompressedPacket>, HwsnapError>;

    /// Properties of the stream the packets belong to.
    fn stream_geometry(&self) -> StreamGeometry;
}

/// A media file opened for reading its best video stream.
pub struct MediaSource {
    input_context: Input,
    video_stream_index: usize,
    geometry: StreamGeometry,
    path: PathBuf,
    packets_read: u64,
}

impl MediaSource {
    /// Open a media file and select its best video stream.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::FileOpen`] if FFmpeg cannot open or probe the file,
    /// [`HwsnapError::NoVideoStream`] if it has no video stream.
    ///
    /// # Example
    ///
    /// ```no_run
    /// use hwsnap::{HwsnapError, MediaSource, PacketSource};
    ///
    /// let mut source = MediaSource::open("input.mp4")?;
    /// while let Some(packet) = source.next_packet()? {
    ///     println!("{} bytes", packet.len());
    /// }
    /// # Ok::<(), HwsnapError>(())
    /// ```
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, HwsnapError> {
        let path = path.as_ref().to_path_buf();

        log::debug!("Opening media file: {}", path.display());

        crate::initialize().map_err(|error| HwsnapError::FileOpen {
            path: path.clone(),
            reason: error.to_string(),
        })?;

        let input_context =
            ffmpeg_next::format::input(&path).map_err(|error| HwsnapError::FileOpen {
                path: path.clone(),
                reason: error.to_string(),
            })?;

        let stream = input_context
            .streams()
            .best(Type::Video)
            .ok_or(HwsnapError::NoVideoStream)?;

        let video_stream_index = stream.index();
        let parameters = stream.parameters();
        let (width, height, sample_aspect_ratio) = unsafe {
            let raw = parameters.as_ptr();
            (
                (*raw).width.max(0) as u32,
                (*raw).height.max(0) as u32,
                Rational::from((*raw).sample_aspect_ratio),
            )
        };

        let frame_rate = match stream.avg_frame_rate() {
            rate if rate.denominator() != 0 && rate.numerator() != 0 => rate,
            _ => stream.rate(),
        };

        let geometry = StreamGeometry {
            codec_id: parameters.id(),
            width,
            height,
            time_base: stream.time_base(),
            sample_aspect_ratio,
            frame_rate,
            estimated_frames: u64::try_from(stream.frames()).ok().filter(|&n| n > 0),
        };

        log::debug!(
            "Selected video stream {video_stream_index}: {:?} {width}x{height}, time base {}",
            geometry.codec_id,
            geometry.time_base,
        );

        Ok(Self {
            input_context,
            video_stream_index,
            geometry,
            path,
            packets_read: 0,
        })
    }

    /// Codec parameters of the selected stream, for opening a decoder.
    pub fn parameters(&self) -> Result<Parameters, HwsnapError> {
        self.input_context
            .stream(self.video_stream_index)
            .map(|stream| stream.parameters())
            .ok_or(HwsnapError::NoVideoStream)
    }

    /// Index of the selected stream within the container.
    pub fn video_stream_index(&self) -> usize {
        self.video_stream_index
    }

    /// Path the source was opened from.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Video packets returned so far.
    pub fn packets_read(&self) -> u64 {
        self.packets_read
    }
}

impl PacketSource for MediaSource {
    fn next_packet(&mut self) -> Result<Option<CompressedPacket>, HwsnapError> {
        let mut consecutive_errors = 0;

        loop {
            let mut packet = Packet::empty();
            match packet.read(&mut self.input_context) {
                Ok(()) => {
                    consecutive_errors = 0;
                    if packet.stream() != self.video_stream_index {
                        continue;
                    }
                    self.packets_read += 1;
                    return Ok(Some(CompressedPacket::from_ffmpeg(packet)));
                }
                Err(FfmpegError::Eof) => {
                    log::debug!(
                        "End of input after {} video packets",
                        self.packets_read
                    );
                    return Ok(None);
                }
                Err(error) => {
                    consecutive_errors += 1;
                    if consecutive_errors >= MAX_CONSECUTIVE_READ_ERRORS {
                        return Err(HwsnapError::FfmpegError(format!(
                            "reading {} failed repeatedly: {error}",
                            self.path.display()
                        )));
                    }
                    log::debug!("Skipping unreadable packet: {error}");
                }
            }
        }
    }

    fn stream_geometry(&self) -> StreamGeometry {
        self.geometry
    }
}

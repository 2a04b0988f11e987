//! Compressed packets handed from the source to the decoder.

use std::fmt::{Debug, Formatter, Result as FmtResult};

use ffmpeg_next::Packet;

/// One demultiplexed, still-compressed packet of the selected video stream.
///
/// Wraps an FFmpeg packet. Packets are moved into the decoder on
/// [`submit`](crate::FrameDecoder::submit) and released there.
pub struct CompressedPacket {
    inner: Packet,
}

impl CompressedPacket {
    /// Build a packet by copying `payload`.
    ///
    /// `pts` is used for both presentation and decode timestamps.
    pub fn new(payload: &[u8], stream_index: usize, pts: Option<i64>) -> Self {
        let mut inner = Packet::copy(payload);
        inner.set_stream(stream_index);
        inner.set_pts(pts);
        inner.set_dts(pts);
        Self { inner }
    }

    pub(crate) fn from_ffmpeg(inner: Packet) -> Self {
        Self { inner }
    }

    pub(crate) fn as_ffmpeg(&self) -> &Packet {
        &self.inner
    }

    /// The compressed payload.
    pub fn data(&self) -> &[u8] {
        self.inner.data().unwrap_or(&[])
    }

    /// Payload size in bytes.
    pub fn len(&self) -> usize {
        self.inner.size()
    }

    /// `true` when the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.inner.size() == 0
    }

    /// Index of the stream this packet belongs to.
    pub fn stream_index(&self) -> usize {
        self.inner.stream()
    }

    /// Presentation timestamp in stream time base units.
    pub fn pts(&self) -> Option<i64> {
        self.inner.pts()
    }

    /// Decode timestamp in stream time base units.
    pub fn dts(&self) -> Option<i64> {
        self.inner.dts()
    }

    /// Whether the packet starts with a keyframe.
    pub fn is_key(&self) -> bool {
        self.inner.is_key()
    }
}

impl Debug for CompressedPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        f.debug_struct("CompressedPacket")
            .field("stream_index", &self.stream_index())
            .field("len", &self.len())
            .field("pts", &self.pts())
            .field("dts", &self.dts())
            .field("is_key", &self.is_key())
            .finish()
    }
}

//! # hwsnap
//!
//! Decode video with or without hardware acceleration, run it through an
//! FFmpeg filter graph, and sample the result to still images.
//!
//! `hwsnap` exists to check hardware decode paths and filter-graph
//! configurations against real input files: does VAAPI actually produce
//! surfaces for this stream, does `scale_vaapi` accept them, and does the
//! downloaded image look right? It is built on FFmpeg through the
//! [`ffmpeg-next`](https://crates.io/crates/ffmpeg-next) crate.
//!
//! ## Quick Start
//!
//! ### Software decode, one snapshot every 100 frames
//!
//! ```no_run
//! use hwsnap::{Pipeline, PipelineOptions};
//!
//! let report = Pipeline::open("input.mp4", PipelineOptions::new())
//!     .unwrap()
//!     .run()
//!     .unwrap();
//! println!("{} frames, {} snapshots", report.frames_decoded, report.snapshots_written);
//! ```
//!
//! ### VAAPI decode with a device-side scale
//!
//! ```no_run
//! use hwsnap::{GraphSpec, Pipeline, PipelineOptions, ProcessingMode};
//!
//! let options = PipelineOptions::new()
//!     .with_hardware("vaapi", Some("/dev/dri/renderD128"))
//!     .with_processing(ProcessingMode::FilterGraph(
//!         GraphSpec::parse("scale_vaapi=800:600:format=nv12,hwdownload,format=nv12").unwrap(),
//!     ))
//!     .with_snapshot_directory("/tmp/hwsnap");
//!
//! let report = Pipeline::open("input.mp4", options).unwrap().run().unwrap();
//! println!("{:.1} FPS", report.average_fps);
//! ```
//!
//! ## Stages
//!
//! - [`MediaSource`]: demuxes the best video stream ([`PacketSource`])
//! - [`VideoDecoderAdapter`]: send/receive decoding ([`FrameDecoder`])
//! - [`DeviceContext`]: the shared hardware device
//! - [`FilterGraph`]: lazily built libavfilter graph ([`FrameFilter`])
//! - [`FrameConverter`]: download, scale and pack ([`FrameConvert`])
//! - [`Sampler`] and [`ImageSnapshotSink`]: every-Nth-frame stills
//!
//! Each stage sits behind a trait so [`Pipeline::setup`] can be driven with
//! test doubles.
//!
//! ## Requirements
//!
//! FFmpeg development libraries must be installed. Hardware backends
//! additionally need FFmpeg built with them and a working driver;
//! [`available_backends`] lists what the linked build supports.

pub mod configuration;
mod conversion;
pub mod converter;
pub mod decoder;
pub mod error;
pub mod ffmpeg;
pub mod filter_graph;
pub mod frame;
pub mod hardware_acceleration;
pub mod packet;
pub mod pipeline;
pub mod progress;
pub mod sampling;
pub mod snapshot;
pub mod source;

pub use configuration::{
    DEFAULT_SAMPLE_EVERY, FrameOutputOptions, PipelineOptions, PixelFormat, ProcessingMode,
    ScalingPolicy, SnapshotOptions,
};
pub use converter::{ConvertOptions, FrameConvert, FrameConverter};
pub use decoder::{FrameDecoder, VideoDecoderAdapter};
pub use error::HwsnapError;
pub use ffmpeg::{FfmpegLogLevel, get_ffmpeg_log_level, initialize, set_ffmpeg_log_level};
pub use filter_graph::{
    FfmpegGraphBuilder, FilterGraph, FilterGraphBuilder, FrameFilter, GraphSpec, GraphTopology,
    PadLink, StageSpec, TopologyStage,
};
pub use frame::{DecodedFrame, DeviceSurface, FrameGeometry, OutputFrame, PixelFormatTag, Pull};
pub use hardware_acceleration::{
    DeviceContext, FramePool, HardwareBackend, available_backends, negotiate_format,
    transfer_hardware_frame,
};
pub use packet::CompressedPacket;
pub use pipeline::{Pipeline, PipelineReport, PipelineState};
pub use progress::{ProgressCallback, ProgressInfo};
pub use sampling::Sampler;
pub use snapshot::{ImageSnapshotSink, SnapshotSink};
pub use source::{MediaSource, PacketSource, StreamGeometry};

//! The decode → filter → convert → sample state machine.
//!
//! A [`Pipeline`] owns every stage of one run. It is assembled by
//! [`Pipeline::setup`] in dependency order (device, decoder, then the rest)
//! and driven to completion by [`Pipeline::run`].
//!
//! The loop is receive-first: the decoder is polled, and only when it asks
//! for input is the next packet read and submitted. In filter-graph mode the
//! graph is built from the first decoded frame, because a hardware source
//! stage needs the decoder's frame pool, which does not exist earlier.
//!
//! # Example
//!
//! ```no_run
//! use hwsnap::{GraphSpec, HwsnapError, Pipeline, PipelineOptions, ProcessingMode};
//!
//! let options = PipelineOptions::new()
//!     .with_hardware("vaapi", None)
//!     .with_processing(ProcessingMode::FilterGraph(GraphSpec::parse(
//!         "scale_vaapi=800:600:format=nv12,hwdownload,format=nv12",
//!     )?))
//!     .with_sample_every(100)
//!     .with_snapshot_directory("/tmp");
//!
//! let report = Pipeline::open("input.mp4", options)?.run()?;
//! println!("{} snapshots at {:.1} FPS", report.snapshots_written, report.average_fps);
//! # Ok::<(), HwsnapError>(())
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use ffmpeg_next::Rational;

use crate::configuration::{PipelineOptions, ProcessingMode, SnapshotOptions};
use crate::conversion::pts_to_duration;
use crate::converter::{FrameConvert, FrameConverter};
use crate::decoder::{FrameDecoder, VideoDecoderAdapter};
use crate::error::HwsnapError;
use crate::filter_graph::{FfmpegGraphBuilder, FilterGraphBuilder, FrameFilter, GraphSpec, GraphTopology};
use crate::frame::{DecodedFrame, FrameGeometry, Pull};
use crate::hardware_acceleration::{DeviceContext, HardwareBackend};
use crate::progress::{ProgressTracker, frames_per_second};
use crate::sampling::Sampler;
use crate::snapshot::{ImageSnapshotSink, SnapshotSink};
use crate::source::{MediaSource, PacketSource};

/// Where the pipeline is in its one-way lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    /// Stages are being assembled.
    Uninitialized,
    /// Decoder is open; no filter graph exists yet.
    ///
    /// Direct-convert runs stay here.
    AwaitingFirstFrame,
    /// The filter graph was built from the first frame.
    GraphReady,
}

/// Statistics of a finished run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PipelineReport {
    /// Packets handed to the decoder (flush not included).
    pub packets_submitted: u64,
    /// Frames received from the decoder.
    pub frames_decoded: u64,
    /// Frames pushed into the filter graph.
    pub frames_pushed: u64,
    /// Frames pulled out of the filter graph.
    pub frames_filtered: u64,
    /// Frames converted to the output format.
    pub frames_converted: u64,
    /// Frames dropped by a transfer or conversion error.
    pub frames_dropped: u64,
    /// Snapshots written.
    pub snapshots_written: u64,
    /// Snapshots that failed to write.
    pub snapshots_failed: u64,
    /// Paths of the written snapshots, in order.
    pub snapshot_paths: Vec<PathBuf>,
    /// Wall-clock duration of the run.
    pub elapsed: Duration,
    /// Decoded frames per second over the run.
    pub average_fps: f64,
    /// Whether decoding went through a hardware device.
    pub hardware_active: bool,
    /// The hardware backend in use.
    pub backend: Option<HardwareBackend>,
    /// Shape of the filter graph, if one was built.
    pub topology: Option<GraphTopology>,
}

/// One decode session.
pub struct Pipeline {
    state: PipelineState,
    graph: Option<Box<dyn FrameFilter>>,
    graph_spec: Option<GraphSpec>,
    graph_builder: Box<dyn FilterGraphBuilder>,
    converter: Box<dyn FrameConvert>,
    sampler: Sampler,
    sink: Box<dyn SnapshotSink>,
    snapshot: SnapshotOptions,
    decoder: Box<dyn FrameDecoder>,
    source: Box<dyn PacketSource>,
    device: Option<Arc<DeviceContext>>,
    time_base: Rational,
    progress: ProgressTracker,
    report: PipelineReport,
    finished: bool,
}

impl Pipeline {
    /// Assemble a pipeline from its stages.
    ///
    /// The hardware backend is resolved and its device opened before
    /// `decoder_factory` runs; if either fails the factory is never called.
    /// The factory receives the shared device so the decoder can bind it.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::InvalidInterval`], [`HwsnapError::InvalidResolution`],
    /// [`HwsnapError::UnknownBackend`],
    /// [`HwsnapError::DeviceUnavailable`], or whatever the factory returns.
    pub fn setup<F>(
        options: PipelineOptions,
        source: Box<dyn PacketSource>,
        decoder_factory: F,
        graph_builder: Box<dyn FilterGraphBuilder>,
        converter: Box<dyn FrameConvert>,
        sink: Box<dyn SnapshotSink>,
    ) -> Result<Self, HwsnapError>
    where
        F: FnOnce(Option<&Arc<DeviceContext>>) -> Result<Box<dyn FrameDecoder>, HwsnapError>,
    {
        let sampler = Sampler::new(options.sample_every)?;
        options.frame_output.validate()?;

        let device = match options.hardware_backend.as_deref() {
            Some(name) => {
                let backend = HardwareBackend::from_name(name)?;
                Some(DeviceContext::create(backend, options.device_path.as_deref())?)
            }
            None => None,
        };

        let decoder = decoder_factory(device.as_ref())?;

        let geometry = source.stream_geometry();
        let graph_spec = match options.processing {
            ProcessingMode::DirectConvert => None,
            ProcessingMode::FilterGraph(spec) => Some(spec),
        };

        let mut pipeline = Self {
            state: PipelineState::Uninitialized,
            graph: None,
            graph_spec,
            graph_builder,
            converter,
            sampler,
            sink,
            snapshot: options.snapshot,
            decoder,
            source,
            report: PipelineReport {
                hardware_active: device.is_some(),
                backend: device.as_ref().map(|device| device.backend()),
                ..PipelineReport::default()
            },
            device,
            time_base: geometry.time_base,
            progress: ProgressTracker::new(
                options.progress,
                geometry.estimated_frames,
                options.batch_size,
            ),
            finished: false,
        };
        pipeline.transition(PipelineState::AwaitingFirstFrame);
        Ok(pipeline)
    }

    /// Open `path` with the FFmpeg-backed stages.
    ///
    /// # Errors
    ///
    /// Everything [`MediaSource::open`], [`VideoDecoderAdapter::open`] and
    /// [`Pipeline::setup`] can return.
    pub fn open<P: AsRef<Path>>(path: P, options: PipelineOptions) -> Result<Self, HwsnapError> {
        let source = MediaSource::open(path)?;
        let parameters = source.parameters()?;
        let converter = FrameConverter::new(options.frame_output.clone());

        Self::setup(
            options,
            Box::new(source),
            move |device| {
                let decoder = VideoDecoderAdapter::open(parameters, device)?;
                Ok(Box::new(decoder) as Box<dyn FrameDecoder>)
            },
            Box::new(FfmpegGraphBuilder),
            Box::new(converter),
            Box::new(ImageSnapshotSink::new().with_create_directories(true)),
        )
    }

    /// Current lifecycle state.
    pub fn state(&self) -> PipelineState {
        self.state
    }

    /// The shared device, if decoding is hardware accelerated.
    pub fn device(&self) -> Option<&Arc<DeviceContext>> {
        self.device.as_ref()
    }

    /// The device the filter graph's device stages run on, once built.
    pub fn graph_device(&self) -> Option<&Arc<DeviceContext>> {
        self.graph.as_ref().and_then(|graph| graph.device())
    }

    /// Topology of the filter graph, once built.
    pub fn topology(&self) -> Option<&GraphTopology> {
        self.graph.as_ref().map(|graph| graph.topology())
    }

    /// Decode the whole input.
    ///
    /// Transfer and conversion failures drop the affected frame; snapshot
    /// failures are logged. Anything else stops the run.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::DecodeError`], [`HwsnapError::GraphError`],
    /// [`HwsnapError::ScalerSetup`], source read errors.
    pub fn run(&mut self) -> Result<PipelineReport, HwsnapError> {
        if self.finished {
            return Ok(self.report.clone());
        }

        let mut input_exhausted = false;
        loop {
            match self.decoder.receive()? {
                Pull::Ready(frame) => self.on_decoded(frame)?,
                Pull::NeedMoreInput if input_exhausted => {
                    return Err(HwsnapError::DecodeError(
                        "decoder requested input after flush".to_string(),
                    ));
                }
                Pull::NeedMoreInput => match self.source.next_packet()? {
                    Some(packet) => {
                        self.decoder.submit(Some(packet))?;
                        self.report.packets_submitted += 1;
                    }
                    None => {
                        log::debug!(
                            "Input exhausted after {} packets, flushing decoder",
                            self.report.packets_submitted
                        );
                        self.decoder.submit(None)?;
                        input_exhausted = true;
                    }
                },
                Pull::EndOfStream => break,
            }
        }

        self.drain_graph_to_end()?;
        self.finished = true;

        self.progress.finish(self.report.packets_submitted);
        self.report.elapsed = self.progress.elapsed();
        self.report.average_fps = frames_per_second(self.report.frames_decoded, self.report.elapsed);
        self.report.topology = self.topology().cloned();

        log::info!(
            "Decoded {} frames from {} packets in {:.2?} ({:.1} FPS), {} snapshots",
            self.report.frames_decoded,
            self.report.packets_submitted,
            self.report.elapsed,
            self.report.average_fps,
            self.report.snapshots_written,
        );

        Ok(self.report.clone())
    }

    fn transition(&mut self, next: PipelineState) {
        log::debug!("Pipeline state {:?} -> {next:?}", self.state);
        self.state = next;
    }

    fn on_decoded(&mut self, frame: DecodedFrame) -> Result<(), HwsnapError> {
        self.report.frames_decoded += 1;
        let timestamp = frame.pts().map(|pts| pts_to_duration(pts, self.time_base));
        self.progress.advance(self.report.packets_submitted, timestamp);

        if self.graph_spec.is_none() {
            return self.emit(frame);
        }

        if self.graph.is_none() {
            self.build_graph(&frame)?;
        }
        let Some(graph) = self.graph.as_mut() else {
            return Ok(());
        };
        graph.push(frame)?;
        self.report.frames_pushed += 1;

        self.drain_graph()
    }

    fn build_graph(&mut self, first_frame: &DecodedFrame) -> Result<(), HwsnapError> {
        let Some(spec) = self.graph_spec.as_ref() else {
            return Ok(());
        };
        let geometry = FrameGeometry::of(first_frame, self.time_base);
        log::debug!(
            "Building filter graph '{spec}' for {}x{} {:?}",
            geometry.width,
            geometry.height,
            geometry.format
        );

        let graph = self
            .graph_builder
            .build(spec, self.device.as_ref(), &geometry)?;
        self.graph = Some(graph);
        self.transition(PipelineState::GraphReady);
        Ok(())
    }

    fn drain_graph(&mut self) -> Result<(), HwsnapError> {
        while let Some(graph) = self.graph.as_mut() {
            match graph.pull() {
                Ok(Pull::Ready(frame)) => {
                    self.report.frames_filtered += 1;
                    self.emit(frame)?;
                }
                Ok(Pull::NeedMoreInput | Pull::EndOfStream) => break,
                Err(error) if error.is_frame_local() => self.drop_filtered(&error),
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    fn drain_graph_to_end(&mut self) -> Result<(), HwsnapError> {
        let Some(graph) = self.graph.as_mut() else {
            return Ok(());
        };
        graph.flush()?;

        while let Some(graph) = self.graph.as_mut() {
            match graph.pull() {
                Ok(Pull::Ready(frame)) => {
                    self.report.frames_filtered += 1;
                    self.emit(frame)?;
                }
                Ok(Pull::EndOfStream) => break,
                Ok(Pull::NeedMoreInput) => {
                    return Err(HwsnapError::GraphError {
                        stage: None,
                        reason: "graph requested input after flush".to_string(),
                    });
                }
                Err(error) if error.is_frame_local() => self.drop_filtered(&error),
                Err(error) => return Err(error),
            }
        }
        Ok(())
    }

    // A frame that left the graph but could not be downloaded keeps its index.
    fn drop_filtered(&mut self, error: &HwsnapError) {
        let index = self.sampler.advance();
        log::warn!("Dropping frame {index}: {error}");
        self.report.frames_filtered += 1;
        self.report.frames_dropped += 1;
    }

    fn emit(&mut self, frame: DecodedFrame) -> Result<(), HwsnapError> {
        let index = self.sampler.advance();

        let mut output = match self.converter.convert(frame) {
            Ok(output) => output,
            Err(error) if error.is_frame_local() => {
                log::warn!("Dropping frame {index}: {error}");
                self.report.frames_dropped += 1;
                return Ok(());
            }
            Err(error) => return Err(error),
        };
        self.report.frames_converted += 1;

        output.index = index;
        let Some(output) = self.sampler.sample(output) else {
            return Ok(());
        };

        let path = self.snapshot.path_for(index);
        match self.sink.save(&output, &path) {
            Ok(()) => {
                self.report.snapshots_written += 1;
                self.report.snapshot_paths.push(path);
            }
            Err(error) => {
                log::warn!("Snapshot {} not written: {error}", path.display());
                self.report.snapshots_failed += 1;
            }
        }
        Ok(())
    }
}

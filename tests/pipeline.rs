//! Pipeline state-machine tests.
//!
//! Every stage is replaced by an in-process double so the push/pull
//! protocol, lazy graph construction and sampling can be checked without
//! media files or hardware. Frames are real (software) FFmpeg frames.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use ffmpeg_next::{Rational, format::Pixel};
use hwsnap::{
    CompressedPacket, DecodedFrame, DeviceContext, FilterGraphBuilder, FrameConvert,
    FrameDecoder, FrameFilter, FrameGeometry, GraphSpec, GraphTopology, HwsnapError,
    OutputFrame, PacketSource, Pipeline, PipelineOptions, PipelineState, PixelFormat,
    ProcessingMode, ProgressCallback, ProgressInfo, Pull, SnapshotSink, StreamGeometry,
};

// ── Test doubles ───────────────────────────────────────────────────

struct MockSource {
    remaining: u64,
    next_pts: i64,
}

impl MockSource {
    fn boxed(packets: u64) -> Box<dyn PacketSource> {
        Box::new(Self {
            remaining: packets,
            next_pts: 0,
        })
    }
}

impl PacketSource for MockSource {
    fn next_packet(&mut self) -> Result<Option<CompressedPacket>, HwsnapError> {
        if self.remaining == 0 {
            return Ok(None);
        }
        self.remaining -= 1;
        let pts = self.next_pts;
        self.next_pts += 1;
        Ok(Some(CompressedPacket::new(&[0, 0, 0, 1], 0, Some(pts))))
    }

    fn stream_geometry(&self) -> StreamGeometry {
        StreamGeometry::new(16, 16, Rational::new(1, 25))
    }
}

/// Holds frames back until `delay` packets have arrived, then emits one
/// frame per packet.
struct MockDecoder {
    delay: u64,
    held: u64,
    pending: VecDeque<DecodedFrame>,
    flushed: bool,
    submitted: Rc<Cell<u64>>,
}

impl MockDecoder {
    fn boxed(delay: u64, submitted: Rc<Cell<u64>>) -> Box<dyn FrameDecoder> {
        Box::new(Self {
            delay,
            held: 0,
            pending: VecDeque::new(),
            flushed: false,
            submitted,
        })
    }

    fn release_held(&mut self) {
        for _ in 0..self.held {
            let mut frame = DecodedFrame::new(Pixel::YUV420P, 16, 16);
            frame.set_pts(Some(self.submitted.get() as i64));
            self.pending.push_back(frame);
        }
        self.held = 0;
    }
}

impl FrameDecoder for MockDecoder {
    fn submit(&mut self, packet: Option<CompressedPacket>) -> Result<(), HwsnapError> {
        match packet {
            Some(_) => {
                self.submitted.set(self.submitted.get() + 1);
                self.held += 1;
                if self.submitted.get() >= self.delay {
                    self.release_held();
                }
            }
            None => {
                self.flushed = true;
                self.release_held();
            }
        }
        Ok(())
    }

    fn receive(&mut self) -> Result<Pull<DecodedFrame>, HwsnapError> {
        Ok(match self.pending.pop_front() {
            Some(frame) => Pull::Ready(frame),
            None if self.flushed => Pull::EndOfStream,
            None => Pull::NeedMoreInput,
        })
    }
}

/// Never produces anything, even after a flush.
struct StuckDecoder;

impl FrameDecoder for StuckDecoder {
    fn submit(&mut self, _packet: Option<CompressedPacket>) -> Result<(), HwsnapError> {
        Ok(())
    }

    fn receive(&mut self) -> Result<Pull<DecodedFrame>, HwsnapError> {
        Ok(Pull::NeedMoreInput)
    }
}

#[derive(Default)]
struct GraphCounters {
    builds: Cell<u32>,
    built_with_device: Cell<Option<bool>>,
    pushes: Cell<u64>,
    pulled: Cell<u64>,
    submitted_at_first_push: Cell<Option<u64>>,
}

struct MockGraphBuilder {
    counters: Rc<GraphCounters>,
    submitted: Rc<Cell<u64>>,
    fail: bool,
    fail_pull_on: Vec<u64>,
}

impl FilterGraphBuilder for MockGraphBuilder {
    fn build(
        &self,
        spec: &GraphSpec,
        device: Option<&Arc<DeviceContext>>,
        geometry: &FrameGeometry,
    ) -> Result<Box<dyn FrameFilter>, HwsnapError> {
        self.counters.builds.set(self.counters.builds.get() + 1);
        self.counters.built_with_device.set(Some(device.is_some()));
        if self.fail {
            return Err(HwsnapError::GraphError {
                stage: Some("scale".to_string()),
                reason: "rejected".to_string(),
            });
        }
        assert_eq!(geometry.width, 16);
        assert_eq!(geometry.time_base, Rational::new(1, 25));
        Ok(Box::new(MockFilter {
            queue: VecDeque::new(),
            flushed: false,
            topology: GraphTopology::from_spec(spec),
            counters: Rc::clone(&self.counters),
            submitted: Rc::clone(&self.submitted),
            fail_pull_on: self.fail_pull_on.clone(),
        }))
    }
}

/// One frame out per frame in; the listed pulls lose their frame in a
/// failed download.
struct MockFilter {
    queue: VecDeque<DecodedFrame>,
    flushed: bool,
    topology: GraphTopology,
    counters: Rc<GraphCounters>,
    submitted: Rc<Cell<u64>>,
    fail_pull_on: Vec<u64>,
}

impl FrameFilter for MockFilter {
    fn push(&mut self, frame: DecodedFrame) -> Result<(), HwsnapError> {
        if self.counters.submitted_at_first_push.get().is_none() {
            self.counters
                .submitted_at_first_push
                .set(Some(self.submitted.get()));
        }
        self.counters.pushes.set(self.counters.pushes.get() + 1);
        self.queue.push_back(frame);
        Ok(())
    }

    fn flush(&mut self) -> Result<(), HwsnapError> {
        self.flushed = true;
        Ok(())
    }

    fn pull(&mut self) -> Result<Pull<DecodedFrame>, HwsnapError> {
        Ok(match self.queue.pop_front() {
            Some(frame) => {
                self.counters.pulled.set(self.counters.pulled.get() + 1);
                if self.fail_pull_on.contains(&self.counters.pulled.get()) {
                    return Err(HwsnapError::TransferError("surface lost".to_string()));
                }
                Pull::Ready(frame)
            }
            None if self.flushed => Pull::EndOfStream,
            None => Pull::NeedMoreInput,
        })
    }

    fn topology(&self) -> &GraphTopology {
        &self.topology
    }
}

/// Converts everything to a 1x1 black pixel; fails on the listed calls.
struct MockConverter {
    calls: u64,
    fail_on: Vec<u64>,
}

impl MockConverter {
    fn boxed(fail_on: Vec<u64>) -> Box<dyn FrameConvert> {
        Box::new(Self { calls: 0, fail_on })
    }
}

impl FrameConvert for MockConverter {
    fn convert(&mut self, _frame: DecodedFrame) -> Result<OutputFrame, HwsnapError> {
        self.calls += 1;
        if self.fail_on.contains(&self.calls) {
            return Err(HwsnapError::TransferError("surface lost".to_string()));
        }
        OutputFrame::from_packed(1, 1, PixelFormat::Rgb8, vec![0, 0, 0])
    }
}

/// Cannot build its scaler for any frame.
struct UnbuildableConverter {
    attempts: Rc<Cell<u64>>,
}

impl FrameConvert for UnbuildableConverter {
    fn convert(&mut self, _frame: DecodedFrame) -> Result<OutputFrame, HwsnapError> {
        self.attempts.set(self.attempts.get() + 1);
        Err(HwsnapError::ScalerSetup("cannot scale to 0x16".to_string()))
    }
}

struct RecordingSink {
    saved: Rc<RefCell<Vec<(u64, PathBuf)>>>,
    fail: bool,
}

impl SnapshotSink for RecordingSink {
    fn save(&mut self, frame: &OutputFrame, path: &Path) -> Result<(), HwsnapError> {
        if self.fail {
            return Err(HwsnapError::SnapshotError {
                path: path.to_path_buf(),
                reason: "disk full".to_string(),
            });
        }
        self.saved
            .borrow_mut()
            .push((frame.index(), path.to_path_buf()));
        Ok(())
    }
}

struct Harness {
    submitted: Rc<Cell<u64>>,
    counters: Rc<GraphCounters>,
    saved: Rc<RefCell<Vec<(u64, PathBuf)>>>,
}

impl Harness {
    fn new() -> Self {
        Self {
            submitted: Rc::new(Cell::new(0)),
            counters: Rc::new(GraphCounters::default()),
            saved: Rc::new(RefCell::new(Vec::new())),
        }
    }

    fn pipeline(
        &self,
        options: PipelineOptions,
        packets: u64,
        decoder_delay: u64,
        fail_converts: Vec<u64>,
    ) -> Result<Pipeline, HwsnapError> {
        let submitted = Rc::clone(&self.submitted);
        Pipeline::setup(
            options,
            MockSource::boxed(packets),
            move |_device| Ok(MockDecoder::boxed(decoder_delay, submitted)),
            Box::new(MockGraphBuilder {
                counters: Rc::clone(&self.counters),
                submitted: Rc::clone(&self.submitted),
                fail: false,
                fail_pull_on: Vec::new(),
            }),
            MockConverter::boxed(fail_converts),
            Box::new(RecordingSink {
                saved: Rc::clone(&self.saved),
                fail: false,
            }),
        )
    }

    fn saved_indices(&self) -> Vec<u64> {
        self.saved.borrow().iter().map(|(index, _)| *index).collect()
    }
}

fn graph_mode() -> ProcessingMode {
    ProcessingMode::FilterGraph(GraphSpec::parse("scale=8:8,format=rgb24").unwrap())
}

// ── Sampling ───────────────────────────────────────────────────────

#[test]
fn three_hundred_one_frames_every_hundred_gives_three_snapshots() {
    let harness = Harness::new();
    let options = PipelineOptions::new()
        .with_sample_every(100)
        .with_snapshot_directory("/snapshots");

    let report = harness
        .pipeline(options, 301, 1, Vec::new())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.frames_decoded, 301);
    assert_eq!(report.frames_converted, 301);
    assert_eq!(report.snapshots_written, 3);
    assert_eq!(harness.saved_indices(), vec![100, 200, 300]);

    let names: Vec<String> = harness
        .saved
        .borrow()
        .iter()
        .map(|(_, path)| path.file_name().unwrap().to_string_lossy().into_owned())
        .collect();
    assert_eq!(names, ["hwsnap_100.ppm", "hwsnap_200.ppm", "hwsnap_300.ppm"]);
    assert_eq!(report.snapshot_paths[0], Path::new("/snapshots/hwsnap_100.ppm"));
}

#[test]
fn dropped_frames_still_advance_the_index() {
    let harness = Harness::new();
    let options = PipelineOptions::new().with_sample_every(2);

    let report = harness
        .pipeline(options, 4, 1, vec![2])
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(report.frames_decoded, 4);
    assert_eq!(report.frames_dropped, 1);
    assert_eq!(report.frames_converted, 3);
    assert_eq!(harness.saved_indices(), vec![4]);
}

#[test]
fn snapshot_failures_are_counted_not_fatal() {
    let submitted = Rc::new(Cell::new(0));
    let saved = Rc::new(RefCell::new(Vec::new()));
    let mut pipeline = Pipeline::setup(
        PipelineOptions::new().with_sample_every(5),
        MockSource::boxed(20),
        move |_device| Ok(MockDecoder::boxed(1, submitted)),
        Box::new(MockGraphBuilder {
            counters: Rc::new(GraphCounters::default()),
            submitted: Rc::new(Cell::new(0)),
            fail: false,
            fail_pull_on: Vec::new(),
        }),
        MockConverter::boxed(Vec::new()),
        Box::new(RecordingSink {
            saved: Rc::clone(&saved),
            fail: true,
        }),
    )
    .unwrap();

    let report = pipeline.run().unwrap();
    assert_eq!(report.snapshots_failed, 4);
    assert_eq!(report.snapshots_written, 0);
    assert_eq!(report.frames_converted, 20);
}

// ── Filter graph protocol ──────────────────────────────────────────

#[test]
fn graph_pushes_match_decoded_frames_and_pulls_match_pushes() {
    let harness = Harness::new();
    let options = PipelineOptions::new()
        .with_processing(graph_mode())
        .with_sample_every(100);

    let mut pipeline = harness.pipeline(options, 250, 1, Vec::new()).unwrap();
    assert_eq!(pipeline.state(), PipelineState::AwaitingFirstFrame);

    let report = pipeline.run().unwrap();

    assert_eq!(pipeline.state(), PipelineState::GraphReady);
    assert!(pipeline.graph_device().is_none());
    assert_eq!(harness.counters.builds.get(), 1);
    assert_eq!(harness.counters.built_with_device.get(), Some(false));
    assert_eq!(report.frames_decoded, 250);
    assert_eq!(report.frames_pushed, 250);
    assert_eq!(harness.counters.pushes.get(), 250);
    assert_eq!(report.frames_filtered, 250);
    assert_eq!(harness.counters.pulled.get(), 250);
    assert_eq!(report.snapshots_written, 2);
    assert_eq!(
        report.topology.as_ref().map(GraphTopology::stage_count),
        Some(4)
    );
}

#[test]
fn five_packets_reach_the_decoder_before_the_first_push() {
    let harness = Harness::new();
    let options = PipelineOptions::new().with_processing(graph_mode());

    let report = harness
        .pipeline(options, 12, 5, Vec::new())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(harness.counters.submitted_at_first_push.get(), Some(5));
    assert_eq!(report.packets_submitted, 12);
    assert_eq!(report.frames_pushed, 12);
}

#[test]
fn direct_mode_never_builds_a_graph() {
    let harness = Harness::new();
    let mut pipeline = harness
        .pipeline(PipelineOptions::new(), 10, 1, Vec::new())
        .unwrap();

    let report = pipeline.run().unwrap();

    assert_eq!(pipeline.state(), PipelineState::AwaitingFirstFrame);
    assert_eq!(harness.counters.builds.get(), 0);
    assert_eq!(report.frames_pushed, 0);
    assert_eq!(report.frames_converted, 10);
    assert!(report.topology.is_none());
}

#[test]
fn empty_input_produces_no_frames() {
    let harness = Harness::new();
    let options = PipelineOptions::new().with_processing(graph_mode());
    let mut pipeline = harness.pipeline(options, 0, 1, Vec::new()).unwrap();

    let report = pipeline.run().unwrap();

    assert_eq!(report.packets_submitted, 0);
    assert_eq!(report.frames_decoded, 0);
    assert_eq!(harness.counters.builds.get(), 0);
    assert_eq!(pipeline.state(), PipelineState::AwaitingFirstFrame);
}

#[test]
fn graph_build_failure_aborts_the_run() {
    let counters = Rc::new(GraphCounters::default());
    let submitted = Rc::new(Cell::new(0));
    let decoder_submitted = Rc::clone(&submitted);
    let mut pipeline = Pipeline::setup(
        PipelineOptions::new().with_processing(graph_mode()),
        MockSource::boxed(10),
        move |_device| Ok(MockDecoder::boxed(1, decoder_submitted)),
        Box::new(MockGraphBuilder {
            counters: Rc::clone(&counters),
            submitted,
            fail: true,
            fail_pull_on: Vec::new(),
        }),
        MockConverter::boxed(Vec::new()),
        Box::new(RecordingSink {
            saved: Rc::new(RefCell::new(Vec::new())),
            fail: false,
        }),
    )
    .unwrap();

    let error = pipeline.run().unwrap_err();
    assert!(matches!(error, HwsnapError::GraphError { .. }));
    assert_eq!(counters.builds.get(), 1);
}

#[test]
fn failed_download_at_the_sink_drops_only_that_frame() {
    let counters = Rc::new(GraphCounters::default());
    let submitted = Rc::new(Cell::new(0));
    let decoder_submitted = Rc::clone(&submitted);
    let saved = Rc::new(RefCell::new(Vec::new()));
    let mut pipeline = Pipeline::setup(
        PipelineOptions::new()
            .with_processing(graph_mode())
            .with_sample_every(2),
        MockSource::boxed(6),
        move |_device| Ok(MockDecoder::boxed(1, decoder_submitted)),
        Box::new(MockGraphBuilder {
            counters: Rc::clone(&counters),
            submitted,
            fail: false,
            fail_pull_on: vec![2, 5],
        }),
        MockConverter::boxed(Vec::new()),
        Box::new(RecordingSink {
            saved: Rc::clone(&saved),
            fail: false,
        }),
    )
    .unwrap();

    let report = pipeline.run().unwrap();

    assert_eq!(report.frames_pushed, 6);
    assert_eq!(report.frames_filtered, 6);
    assert_eq!(report.frames_dropped, 2);
    assert_eq!(report.frames_converted, 4);
    let indices: Vec<u64> = saved.borrow().iter().map(|(index, _)| *index).collect();
    assert_eq!(indices, vec![4, 6]);
    assert_eq!(counters.built_with_device.get(), Some(false));
}

#[test]
fn scaler_setup_failure_ends_the_run() {
    let attempts = Rc::new(Cell::new(0));
    let mut pipeline = Pipeline::setup(
        PipelineOptions::new().with_sample_every(1),
        MockSource::boxed(10),
        |_device| Ok(MockDecoder::boxed(1, Rc::new(Cell::new(0)))),
        Box::new(MockGraphBuilder {
            counters: Rc::new(GraphCounters::default()),
            submitted: Rc::new(Cell::new(0)),
            fail: false,
            fail_pull_on: Vec::new(),
        }),
        Box::new(UnbuildableConverter {
            attempts: Rc::clone(&attempts),
        }),
        Box::new(RecordingSink {
            saved: Rc::new(RefCell::new(Vec::new())),
            fail: false,
        }),
    )
    .unwrap();

    let error = pipeline.run().unwrap_err();
    assert!(matches!(error, HwsnapError::ScalerSetup(_)));
    assert!(!error.is_frame_local());
    assert_eq!(attempts.get(), 1);
}

#[test]
fn decoder_asking_for_input_after_flush_is_a_decode_error() {
    let mut pipeline = Pipeline::setup(
        PipelineOptions::new(),
        MockSource::boxed(3),
        |_device| Ok(Box::new(StuckDecoder) as Box<dyn FrameDecoder>),
        Box::new(MockGraphBuilder {
            counters: Rc::new(GraphCounters::default()),
            submitted: Rc::new(Cell::new(0)),
            fail: false,
            fail_pull_on: Vec::new(),
        }),
        MockConverter::boxed(Vec::new()),
        Box::new(RecordingSink {
            saved: Rc::new(RefCell::new(Vec::new())),
            fail: false,
        }),
    )
    .unwrap();

    assert!(matches!(pipeline.run(), Err(HwsnapError::DecodeError(_))));
}

#[test]
fn run_twice_returns_the_same_report() {
    let harness = Harness::new();
    let mut pipeline = harness
        .pipeline(PipelineOptions::new().with_sample_every(3), 9, 1, Vec::new())
        .unwrap();

    let first = pipeline.run().unwrap();
    let second = pipeline.run().unwrap();
    assert_eq!(first, second);
    assert_eq!(harness.saved_indices(), vec![3, 6, 9]);
}

// ── Setup ordering ─────────────────────────────────────────────────

fn setup_watching_factory(options: PipelineOptions) -> (Result<Pipeline, HwsnapError>, bool) {
    let called = Rc::new(Cell::new(false));
    let factory_called = Rc::clone(&called);
    let result = Pipeline::setup(
        options,
        MockSource::boxed(1),
        move |_device| {
            factory_called.set(true);
            Ok(MockDecoder::boxed(1, Rc::new(Cell::new(0))))
        },
        Box::new(MockGraphBuilder {
            counters: Rc::new(GraphCounters::default()),
            submitted: Rc::new(Cell::new(0)),
            fail: false,
            fail_pull_on: Vec::new(),
        }),
        MockConverter::boxed(Vec::new()),
        Box::new(RecordingSink {
            saved: Rc::new(RefCell::new(Vec::new())),
            fail: false,
        }),
    );
    (result, called.get())
}

#[test]
fn unknown_backend_never_opens_the_decoder() {
    let (result, factory_called) =
        setup_watching_factory(PipelineOptions::new().with_hardware("quantum", None));

    match result {
        Err(HwsnapError::UnknownBackend { name, .. }) => assert_eq!(name, "quantum"),
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("unknown backend accepted"),
    }
    assert!(!factory_called);
}

#[test]
fn zero_interval_never_opens_the_decoder() {
    let (result, factory_called) =
        setup_watching_factory(PipelineOptions::new().with_sample_every(0));

    assert!(matches!(result, Err(HwsnapError::InvalidInterval)));
    assert!(!factory_called);
}

#[test]
fn zero_width_never_opens_the_decoder() {
    let (result, factory_called) =
        setup_watching_factory(PipelineOptions::new().with_resolution(Some(0), None));

    match result {
        Err(HwsnapError::InvalidResolution { width, height }) => {
            assert_eq!((width, height), (Some(0), None));
        }
        Err(other) => panic!("unexpected error: {other}"),
        Ok(_) => panic!("zero width accepted"),
    }
    assert!(!factory_called);
}

#[test]
fn software_setup_passes_no_device() {
    let saw_device = Rc::new(Cell::new(None));
    let factory_saw_device = Rc::clone(&saw_device);
    let pipeline = Pipeline::setup(
        PipelineOptions::new(),
        MockSource::boxed(1),
        move |device| {
            factory_saw_device.set(Some(device.is_some()));
            Ok(MockDecoder::boxed(1, Rc::new(Cell::new(0))))
        },
        Box::new(MockGraphBuilder {
            counters: Rc::new(GraphCounters::default()),
            submitted: Rc::new(Cell::new(0)),
            fail: false,
            fail_pull_on: Vec::new(),
        }),
        MockConverter::boxed(Vec::new()),
        Box::new(RecordingSink {
            saved: Rc::new(RefCell::new(Vec::new())),
            fail: false,
        }),
    )
    .unwrap();

    assert_eq!(saw_device.get(), Some(false));
    assert!(pipeline.device().is_none());
}

// ── Progress ───────────────────────────────────────────────────────

struct CountingProgress {
    calls: AtomicU64,
    last_current: AtomicU64,
}

impl ProgressCallback for CountingProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.last_current.store(info.current, Ordering::SeqCst);
    }
}

#[test]
fn progress_fires_every_batch_and_once_at_the_end() {
    let progress = Arc::new(CountingProgress {
        calls: AtomicU64::new(0),
        last_current: AtomicU64::new(0),
    });
    let harness = Harness::new();
    let options = PipelineOptions::new()
        .with_progress(progress.clone())
        .with_batch_size(10);

    harness
        .pipeline(options, 35, 1, Vec::new())
        .unwrap()
        .run()
        .unwrap();

    assert_eq!(progress.calls.load(Ordering::SeqCst), 4);
    assert_eq!(progress.last_current.load(Ordering::SeqCst), 35);
}

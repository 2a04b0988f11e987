//! Textual filter-graph specs and their FFmpeg realisation.
//!
//! A [`GraphSpec`] is a comma-separated chain of `name[=args]` stages, the
//! same syntax FFmpeg's `-vf` accepts for simple chains:
//!
//! ```text
//! scale_vaapi=800:600:format=nv12,hwdownload,format=nv12
//! ```
//!
//! [`FfmpegGraphBuilder`] turns a spec into a running [`FilterGraph`]. The
//! graph cannot be built up front: a hardware source stage needs the frame
//! pool of the decoder, which only exists once the first frame is out. The
//! pipeline therefore builds it lazily from that frame's [`FrameGeometry`].
//!
//! Stages that run on the device (see [`StageSpec::requires_device`]) get
//! the shared [`DeviceContext`] attached before the graph is configured.

use std::ffi::CStr;
use std::fmt::{Display, Formatter, Result as FmtResult};
use std::str::FromStr;
use std::sync::Arc;

use ffmpeg_next::{Error as FfmpegError, filter::Graph, frame::Video as VideoFrame};
use ffmpeg_sys_next::{AVFilterContext, AVPixelFormat};

use crate::error::HwsnapError;
use crate::frame::{DecodedFrame, FrameGeometry, Pull};
use crate::hardware_acceleration::{DeviceContext, HardwareBackend, transfer_hardware_frame};

const DEVICE_SUFFIXES: [&str; 8] = [
    "_vaapi",
    "_cuda",
    "_npp",
    "_qsv",
    "_opencl",
    "_vulkan",
    "_videotoolbox",
    "_vt",
];

const DEVICE_FILTERS: [&str; 3] = ["hwupload", "hwupload_cuda", "hwmap"];

const SOURCE_STAGE: &str = "in";
const SINK_STAGE: &str = "out";

/// `true` if FFmpeg's filter `name` must run with a hardware device context.
pub fn filter_requires_device(name: &str) -> bool {
    DEVICE_FILTERS.contains(&name) || DEVICE_SUFFIXES.iter().any(|suffix| name.ends_with(suffix))
}

/// One `name[=args]` element of a [`GraphSpec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageSpec {
    name: String,
    arguments: Option<String>,
}

impl StageSpec {
    /// FFmpeg filter name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Filter arguments, verbatim.
    pub fn arguments(&self) -> Option<&str> {
        self.arguments.as_deref()
    }

    /// `true` if the stage needs the shared device context.
    pub fn requires_device(&self) -> bool {
        filter_requires_device(&self.name)
    }
}

impl Display for StageSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match &self.arguments {
            Some(arguments) => write!(f, "{}={arguments}", self.name),
            None => f.write_str(&self.name),
        }
    }
}

/// A parsed, validated filter chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphSpec {
    stages: Vec<StageSpec>,
}

impl GraphSpec {
    /// Parse a comma-separated chain of `name[=args]` stages.
    ///
    /// Commas inside single quotes or escaped with `\` belong to the
    /// arguments.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::GraphError`] for an empty spec, an empty stage name,
    /// or a name containing anything other than ASCII letters, digits and
    /// `_`.
    ///
    /// # Example
    ///
    /// ```
    /// use hwsnap::GraphSpec;
    ///
    /// let spec = GraphSpec::parse("scale_vaapi=800:600,hwdownload,format=nv12").unwrap();
    /// assert_eq!(spec.stages().len(), 3);
    /// assert!(spec.requires_device());
    /// ```
    pub fn parse(text: &str) -> Result<Self, HwsnapError> {
        if text.trim().is_empty() {
            return Err(HwsnapError::GraphError {
                stage: None,
                reason: "filter graph spec is empty".to_string(),
            });
        }

        let stages = split_stages(text)
            .into_iter()
            .enumerate()
            .map(|(position, element)| parse_stage(position, element.trim()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self { stages })
    }

    /// Device-side scale to `width`x`height`, then download as NV12.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::GraphError`] if `backend` has no scaling filter.
    pub fn device_scale_download(
        backend: HardwareBackend,
        width: u32,
        height: u32,
    ) -> Result<Self, HwsnapError> {
        let scale = backend.scale_filter().ok_or_else(|| HwsnapError::GraphError {
            stage: None,
            reason: format!("{backend} has no device-side scaling filter"),
        })?;
        Self::parse(&format!(
            "{scale}={width}:{height}:format=nv12,hwdownload,format=nv12"
        ))
    }

    /// Stages in chain order.
    pub fn stages(&self) -> &[StageSpec] {
        &self.stages
    }

    /// `true` if any stage needs a device context.
    pub fn requires_device(&self) -> bool {
        self.stages.iter().any(StageSpec::requires_device)
    }

    fn first_device_stage(&self) -> Option<&StageSpec> {
        self.stages.iter().find(|stage| stage.requires_device())
    }
}

impl Display for GraphSpec {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        for (position, stage) in self.stages.iter().enumerate() {
            if position > 0 {
                f.write_str(",")?;
            }
            write!(f, "{stage}")?;
        }
        Ok(())
    }
}

impl FromStr for GraphSpec {
    type Err = HwsnapError;

    fn from_str(text: &str) -> Result<Self, Self::Err> {
        Self::parse(text)
    }
}

fn split_stages(text: &str) -> Vec<&str> {
    let mut elements = Vec::new();
    let mut start = 0;
    let mut quoted = false;
    let mut escaped = false;

    for (offset, character) in text.char_indices() {
        match character {
            _ if escaped => escaped = false,
            '\\' => escaped = true,
            '\'' => quoted = !quoted,
            ',' if !quoted => {
                elements.push(&text[start..offset]);
                start = offset + 1;
            }
            _ => {}
        }
    }
    elements.push(&text[start..]);
    elements
}

fn parse_stage(position: usize, element: &str) -> Result<StageSpec, HwsnapError> {
    let (name, arguments) = match element.split_once('=') {
        Some((name, arguments)) => (name.trim(), Some(arguments.trim().to_string())),
        None => (element, None),
    };

    if name.is_empty() {
        return Err(HwsnapError::GraphError {
            stage: None,
            reason: format!("stage {} has an empty name", position + 1),
        });
    }

    if !name
        .chars()
        .all(|character| character.is_ascii_alphanumeric() || character == '_')
    {
        return Err(HwsnapError::graph(
            name,
            "stage names may only contain ASCII letters, digits and '_'",
        ));
    }

    Ok(StageSpec {
        name: name.to_string(),
        arguments: arguments.filter(|arguments| !arguments.is_empty()),
    })
}

/// One filter instance in a configured graph.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopologyStage {
    /// Instance name (`in`, `out`, `Parsed_scale_0`, ...).
    pub name: String,
    /// FFmpeg filter the instance runs.
    pub filter: String,
    /// Whether the shared device context is attached.
    pub uses_device: bool,
}

/// A connection from an output pad to an input pad.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PadLink {
    /// Index of the producing stage in [`GraphTopology::stages`].
    pub from: usize,
    /// Output pad on the producing stage.
    pub from_pad: u32,
    /// Index of the consuming stage.
    pub to: usize,
    /// Input pad on the consuming stage.
    pub to_pad: u32,
}

/// Stages and pad connectivity of a built graph.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct GraphTopology {
    stages: Vec<TopologyStage>,
    links: Vec<PadLink>,
}

impl GraphTopology {
    /// The linear chain `in -> stages... -> out` a spec describes.
    ///
    /// FFmpeg may insert conversion stages when configuring, so a built
    /// graph can have more stages than this.
    pub fn from_spec(spec: &GraphSpec) -> Self {
        let mut stages = Vec::with_capacity(spec.stages().len() + 2);
        stages.push(TopologyStage {
            name: SOURCE_STAGE.to_string(),
            filter: "buffer".to_string(),
            uses_device: false,
        });
        for (position, stage) in spec.stages().iter().enumerate() {
            stages.push(TopologyStage {
                name: format!("Parsed_{}_{position}", stage.name()),
                filter: stage.name().to_string(),
                uses_device: stage.requires_device(),
            });
        }
        stages.push(TopologyStage {
            name: SINK_STAGE.to_string(),
            filter: "buffersink".to_string(),
            uses_device: false,
        });

        let links = (1..stages.len())
            .map(|to| PadLink {
                from: to - 1,
                from_pad: 0,
                to,
                to_pad: 0,
            })
            .collect();

        Self { stages, links }
    }

    /// Read the configured topology out of an FFmpeg graph.
    fn of_graph(graph: &mut Graph) -> Self {
        let contexts = filter_contexts(graph);
        let mut stages = Vec::with_capacity(contexts.len());
        let mut links = Vec::new();

        for &context in &contexts {
            unsafe {
                stages.push(TopologyStage {
                    name: c_string((*context).name),
                    filter: c_string((*(*context).filter).name),
                    uses_device: !(*context).hw_device_ctx.is_null(),
                });
            }
        }

        for (from, &context) in contexts.iter().enumerate() {
            let outputs = unsafe { (*context).nb_outputs };
            for from_pad in 0..outputs {
                let link = unsafe { *(*context).outputs.add(from_pad as usize) };
                if link.is_null() {
                    continue;
                }
                let destination = unsafe { (*link).dst };
                let Some(to) = contexts.iter().position(|&c| c == destination) else {
                    continue;
                };
                let inputs = unsafe { (*destination).nb_inputs };
                let to_pad = (0..inputs)
                    .find(|&pad| unsafe { *(*destination).inputs.add(pad as usize) } == link)
                    .unwrap_or(0);
                links.push(PadLink {
                    from,
                    from_pad,
                    to,
                    to_pad,
                });
            }
        }

        Self { stages, links }
    }

    /// Filter instances, in graph order.
    pub fn stages(&self) -> &[TopologyStage] {
        &self.stages
    }

    /// Pad connections.
    pub fn links(&self) -> &[PadLink] {
        &self.links
    }

    /// Number of filter instances, including `in` and `out`.
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// `true` if some instance runs `filter`.
    pub fn contains_filter(&self, filter: &str) -> bool {
        self.stages.iter().any(|stage| stage.filter == filter)
    }

    /// Instances with the device context attached.
    pub fn device_stages(&self) -> impl Iterator<Item = &TopologyStage> {
        self.stages.iter().filter(|stage| stage.uses_device)
    }
}

impl Display for GraphTopology {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        let names: Vec<&str> = self.stages.iter().map(|stage| stage.filter.as_str()).collect();
        write!(f, "{} ({} links)", names.join(" -> "), self.links.len())
    }
}

/// A running filter graph.
///
/// Frames come out in the order they went in; nothing is reordered or
/// dropped here.
pub trait FrameFilter {
    /// Feed a frame into the source stage.
    fn push(&mut self, frame: DecodedFrame) -> Result<(), HwsnapError>;

    /// Signal end of input. Further pulls drain to [`Pull::EndOfStream`].
    fn flush(&mut self) -> Result<(), HwsnapError>;

    /// Poll the sink stage for a filtered frame.
    ///
    /// Frames leaving the sink are host-resident. A
    /// [`TransferError`](HwsnapError::TransferError) only concerns the frame
    /// that failed to download; the next pull continues with the rest.
    fn pull(&mut self) -> Result<Pull<DecodedFrame>, HwsnapError>;

    /// Shape of the graph.
    fn topology(&self) -> &GraphTopology;

    /// The device attached to the graph's device stages.
    fn device(&self) -> Option<&Arc<DeviceContext>> {
        None
    }
}

/// Builds a [`FrameFilter`] once the first frame is known.
pub trait FilterGraphBuilder {
    /// Realise `spec` with a source stage configured from `geometry`.
    ///
    /// `device` is attached to every stage that requires it.
    fn build(
        &self,
        spec: &GraphSpec,
        device: Option<&Arc<DeviceContext>>,
        geometry: &FrameGeometry,
    ) -> Result<Box<dyn FrameFilter>, HwsnapError>;
}

/// [`FilterGraphBuilder`] backed by libavfilter.
#[derive(Debug, Clone, Copy, Default)]
pub struct FfmpegGraphBuilder;

impl FilterGraphBuilder for FfmpegGraphBuilder {
    fn build(
        &self,
        spec: &GraphSpec,
        device: Option<&Arc<DeviceContext>>,
        geometry: &FrameGeometry,
    ) -> Result<Box<dyn FrameFilter>, HwsnapError> {
        Ok(Box::new(FilterGraph::build(spec, device, geometry)?))
    }
}

/// A libavfilter graph `in -> spec -> out`.
pub struct FilterGraph {
    graph: Graph,
    topology: GraphTopology,
    device: Option<Arc<DeviceContext>>,
    flushed: bool,
}

impl FilterGraph {
    /// Build and configure the graph.
    ///
    /// # Errors
    ///
    /// [`HwsnapError::GraphError`] when a device stage has no device, a
    /// filter does not exist, or FFmpeg rejects the graph.
    pub fn build(
        spec: &GraphSpec,
        device: Option<&Arc<DeviceContext>>,
        geometry: &FrameGeometry,
    ) -> Result<Self, HwsnapError> {
        if device.is_none() {
            if let Some(stage) = spec.first_device_stage() {
                return Err(HwsnapError::graph(
                    stage.name(),
                    "stage runs on a hardware device but no device context is configured",
                ));
            }
        }

        if let Some(stage) = spec
            .stages()
            .iter()
            .find(|stage| ffmpeg_next::filter::find(stage.name()).is_none())
        {
            return Err(HwsnapError::graph(stage.name(), "no such filter"));
        }

        if geometry.is_hardware() && geometry.frame_pool.is_none() {
            return Err(HwsnapError::graph(
                SOURCE_STAGE,
                "hardware frames arrived without a device frame pool",
            ));
        }
        if let (Some(pool), Some(device)) = (&geometry.frame_pool, device) {
            if !pool.shares_device(device) {
                return Err(HwsnapError::graph(
                    SOURCE_STAGE,
                    format!(
                        "decoder frame pool was not allocated on the shared {} device",
                        device.backend()
                    ),
                ));
            }
        }

        let mut graph = Graph::new();
        add_source_stage(&mut graph, geometry)?;

        let buffersink = ffmpeg_next::filter::find("buffersink")
            .ok_or_else(|| HwsnapError::graph(SINK_STAGE, "FFmpeg 'buffersink' filter not found"))?;
        graph
            .add(&buffersink, SINK_STAGE, "")
            .map_err(|error| HwsnapError::graph(SINK_STAGE, error.to_string()))?;

        let description = spec.to_string();
        graph
            .output(SOURCE_STAGE, 0)
            .and_then(|parser| parser.input(SINK_STAGE, 0))
            .and_then(|parser| parser.parse(&description))
            .map_err(|error| HwsnapError::GraphError {
                stage: None,
                reason: format!("failed to link '{description}': {error}"),
            })?;

        if let Some(device) = device {
            attach_device(&mut graph, device);
        }

        graph.validate().map_err(|error| HwsnapError::GraphError {
            stage: None,
            reason: format!("failed to configure '{description}': {error}"),
        })?;

        let topology = GraphTopology::of_graph(&mut graph);
        log::debug!("Filter graph ready: {topology}");

        Ok(Self {
            graph,
            topology,
            device: device.cloned(),
            flushed: false,
        })
    }
}

impl FrameFilter for FilterGraph {
    fn push(&mut self, frame: DecodedFrame) -> Result<(), HwsnapError> {
        if self.flushed {
            return Err(HwsnapError::graph(SOURCE_STAGE, "frame pushed after flush"));
        }
        let mut source = self
            .graph
            .get(SOURCE_STAGE)
            .ok_or_else(|| HwsnapError::graph(SOURCE_STAGE, "source stage missing"))?;
        source
            .source()
            .add(frame.as_ffmpeg())
            .map_err(|error| HwsnapError::graph(SOURCE_STAGE, format!("push failed: {error}")))
    }

    fn flush(&mut self) -> Result<(), HwsnapError> {
        if self.flushed {
            return Ok(());
        }
        self.flushed = true;
        let mut source = self
            .graph
            .get(SOURCE_STAGE)
            .ok_or_else(|| HwsnapError::graph(SOURCE_STAGE, "source stage missing"))?;
        source
            .source()
            .flush()
            .map_err(|error| HwsnapError::graph(SOURCE_STAGE, format!("flush failed: {error}")))
    }

    fn pull(&mut self) -> Result<Pull<DecodedFrame>, HwsnapError> {
        let mut sink = self
            .graph
            .get(SINK_STAGE)
            .ok_or_else(|| HwsnapError::graph(SINK_STAGE, "sink stage missing"))?;
        let mut frame = VideoFrame::empty();
        match sink.sink().frame(&mut frame) {
            Ok(()) => {
                let frame = DecodedFrame::from_ffmpeg(frame);
                if frame.is_hardware_resident() {
                    return transfer_hardware_frame(&frame).map(Pull::Ready);
                }
                Ok(Pull::Ready(frame))
            }
            Err(FfmpegError::Other { errno }) if errno == ffmpeg_sys_next::EAGAIN as i32 => {
                Ok(Pull::NeedMoreInput)
            }
            Err(FfmpegError::Eof) => Ok(Pull::EndOfStream),
            Err(error) => Err(HwsnapError::graph(SINK_STAGE, format!("pull failed: {error}"))),
        }
    }

    fn topology(&self) -> &GraphTopology {
        &self.topology
    }

    fn device(&self) -> Option<&Arc<DeviceContext>> {
        self.device.as_ref()
    }
}

fn add_source_stage(graph: &mut Graph, geometry: &FrameGeometry) -> Result<(), HwsnapError> {
    let time_base = geometry.time_base;
    if time_base.numerator() <= 0 || time_base.denominator() <= 0 {
        return Err(HwsnapError::graph(
            SOURCE_STAGE,
            format!("invalid time base {time_base}"),
        ));
    }

    let arguments = format!(
        "video_size={}x{}:pix_fmt={}:time_base={}/{}:pixel_aspect={}/{}",
        geometry.width,
        geometry.height,
        AVPixelFormat::from(geometry.format) as i32,
        time_base.numerator(),
        time_base.denominator(),
        geometry.sample_aspect_ratio.numerator(),
        geometry.sample_aspect_ratio.denominator(),
    );

    let buffer = ffmpeg_next::filter::find("buffer")
        .ok_or_else(|| HwsnapError::graph(SOURCE_STAGE, "FFmpeg 'buffer' filter not found"))?;
    graph
        .add(&buffer, SOURCE_STAGE, &arguments)
        .map_err(|error| HwsnapError::graph(SOURCE_STAGE, format!("{error} ({arguments})")))?;

    let Some(pool) = &geometry.frame_pool else {
        return Ok(());
    };

    let mut source = graph
        .get(SOURCE_STAGE)
        .ok_or_else(|| HwsnapError::graph(SOURCE_STAGE, "source stage missing"))?;
    let result = unsafe {
        let parameters = ffmpeg_sys_next::av_buffersrc_parameters_alloc();
        if parameters.is_null() {
            return Err(HwsnapError::graph(SOURCE_STAGE, "out of memory"));
        }
        (*parameters).hw_frames_ctx = pool.as_ptr();
        let result = ffmpeg_sys_next::av_buffersrc_parameters_set(source.as_mut_ptr(), parameters);
        ffmpeg_sys_next::av_free(parameters.cast());
        result
    };

    if result < 0 {
        return Err(HwsnapError::graph(
            SOURCE_STAGE,
            format!(
                "attaching the frame pool failed: {}",
                FfmpegError::from(result)
            ),
        ));
    }
    Ok(())
}

fn attach_device(graph: &mut Graph, device: &DeviceContext) {
    for context in filter_contexts(graph) {
        unsafe {
            let filter_name = c_string((*(*context).filter).name);
            if !filter_requires_device(&filter_name) || !(*context).hw_device_ctx.is_null() {
                continue;
            }
            (*context).hw_device_ctx = device.new_ref();
            log::debug!("Attached {} device to {}", device.backend(), c_string((*context).name));
        }
    }
}

fn filter_contexts(graph: &mut Graph) -> Vec<*mut AVFilterContext> {
    unsafe {
        let raw = graph.as_mut_ptr();
        (0..(*raw).nb_filters as usize)
            .map(|index| *(*raw).filters.add(index))
            .filter(|context| !context.is_null())
            .collect()
    }
}

fn c_string(pointer: *const std::os::raw::c_char) -> String {
    if pointer.is_null() {
        return String::new();
    }
    unsafe { CStr::from_ptr(pointer) }.to_string_lossy().into_owned()
}

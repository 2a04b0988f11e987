//! Filter graph spec parsing and libavfilter graph tests.
//!
//! Only software filters are built here; device stages are covered by the
//! checks that run before FFmpeg is involved.

use ffmpeg_next::{Rational, format::Pixel};
use hwsnap::{
    DecodedFrame, FfmpegGraphBuilder, FilterGraph, FilterGraphBuilder, FrameFilter,
    FrameGeometry, GraphSpec, GraphTopology, HardwareBackend, HwsnapError, Pull,
};

fn geometry(width: u32, height: u32) -> FrameGeometry {
    FrameGeometry::of(
        &DecodedFrame::new(Pixel::YUV420P, width, height),
        Rational::new(1, 25),
    )
}

fn stage_of(error: HwsnapError) -> Option<String> {
    match error {
        HwsnapError::GraphError { stage, .. } => stage,
        other => panic!("expected a graph error, got {other}"),
    }
}

// ── Parsing ────────────────────────────────────────────────────────

#[test]
fn parse_chain_with_arguments() {
    let spec = GraphSpec::parse("scale_vaapi=800:600:format=nv12, hwdownload ,format=nv12").unwrap();
    let names: Vec<&str> = spec.stages().iter().map(|stage| stage.name()).collect();

    assert_eq!(names, ["scale_vaapi", "hwdownload", "format"]);
    assert_eq!(spec.stages()[0].arguments(), Some("800:600:format=nv12"));
    assert_eq!(spec.stages()[1].arguments(), None);
    assert_eq!(spec.to_string(), "scale_vaapi=800:600:format=nv12,hwdownload,format=nv12");
}

#[test]
fn quoted_and_escaped_commas_stay_in_arguments() {
    let spec = GraphSpec::parse("drawtext=text='a,b',select=eq(n\\,0),format=rgb24").unwrap();
    assert_eq!(spec.stages().len(), 3);
    assert_eq!(spec.stages()[0].arguments(), Some("text='a,b'"));
    assert_eq!(spec.stages()[1].arguments(), Some("eq(n\\,0)"));
}

#[test]
fn parse_via_from_str() {
    let spec: GraphSpec = "scale=320:240".parse().unwrap();
    assert_eq!(spec.stages().len(), 1);
}

#[test]
fn empty_spec_is_rejected() {
    assert_eq!(stage_of(GraphSpec::parse("").unwrap_err()), None);
    assert_eq!(stage_of(GraphSpec::parse("   ").unwrap_err()), None);
}

#[test]
fn empty_stage_name_is_rejected() {
    assert!(GraphSpec::parse("scale=1:1,,format=rgb24").is_err());
    assert!(GraphSpec::parse("=800:600").is_err());
}

#[test]
fn invalid_stage_name_names_the_stage() {
    let error = GraphSpec::parse("scale=1:1,[tmp]format=rgb24").unwrap_err();
    assert_eq!(stage_of(error), Some("[tmp]format".to_string()));
}

// ── Device declarations ────────────────────────────────────────────

#[test]
fn device_stages_are_recognised() {
    for name in [
        "scale_vaapi",
        "scale_cuda",
        "scale_npp",
        "vpp_qsv",
        "tonemap_opencl",
        "scale_vulkan",
        "scale_vt",
        "hwupload",
        "hwupload_cuda",
        "hwmap",
    ] {
        assert!(hwsnap::filter_graph::filter_requires_device(name), "{name}");
    }

    for name in ["scale", "format", "hwdownload", "fps"] {
        assert!(!hwsnap::filter_graph::filter_requires_device(name), "{name}");
    }
}

#[test]
fn spec_reports_device_requirement() {
    assert!(GraphSpec::parse("scale_cuda=640:360,hwdownload").unwrap().requires_device());
    assert!(!GraphSpec::parse("scale=640:360,format=rgb24").unwrap().requires_device());
}

#[test]
fn device_scale_download_uses_the_backend_scaler() {
    let spec = GraphSpec::device_scale_download(HardwareBackend::Vaapi, 800, 600).unwrap();
    assert_eq!(
        spec.to_string(),
        "scale_vaapi=800:600:format=nv12,hwdownload,format=nv12"
    );
    assert!(GraphSpec::device_scale_download(HardwareBackend::Vdpau, 800, 600).is_err());
}

#[test]
fn device_stage_without_device_fails_before_building() {
    let spec = GraphSpec::parse("scale_vaapi=320:240,hwdownload,format=nv12").unwrap();
    let error = FfmpegGraphBuilder
        .build(&spec, None, &geometry(64, 48))
        .err()
        .unwrap();
    assert_eq!(stage_of(error), Some("scale_vaapi".to_string()));
}

// ── Building ───────────────────────────────────────────────────────

#[test]
fn unknown_filter_names_the_stage() {
    hwsnap::initialize().unwrap();
    let spec = GraphSpec::parse("scale=32:16,definitely_not_a_filter").unwrap();
    let error = FfmpegGraphBuilder
        .build(&spec, None, &geometry(64, 48))
        .err()
        .unwrap();
    assert_eq!(stage_of(error), Some("definitely_not_a_filter".to_string()));
}

#[test]
fn invalid_time_base_is_rejected() {
    hwsnap::initialize().unwrap();
    let spec = GraphSpec::parse("scale=32:16").unwrap();
    let mut geometry = geometry(64, 48);
    geometry.time_base = Rational::new(0, 1);

    let error = FilterGraph::build(&spec, None, &geometry).err().unwrap();
    assert_eq!(stage_of(error), Some("in".to_string()));
}

#[test]
fn building_twice_gives_the_same_topology() {
    hwsnap::initialize().unwrap();
    let spec = GraphSpec::parse("scale=32:16,format=rgb24").unwrap();

    let first = FfmpegGraphBuilder.build(&spec, None, &geometry(64, 48)).unwrap();
    let second = FfmpegGraphBuilder.build(&spec, None, &geometry(64, 48)).unwrap();

    assert_eq!(first.topology(), second.topology());
    let topology = first.topology();
    assert!(topology.stage_count() >= 4);
    assert!(topology.contains_filter("buffer"));
    assert!(topology.contains_filter("scale"));
    assert!(topology.contains_filter("buffersink"));
    assert!(topology.links().len() >= 3);
    assert_eq!(topology.device_stages().count(), 0);
}

#[test]
fn topology_from_spec_is_a_linear_chain() {
    let spec = GraphSpec::parse("scale=32:16,format=rgb24").unwrap();
    let topology = GraphTopology::from_spec(&spec);

    assert_eq!(topology.stage_count(), 4);
    assert_eq!(topology.links().len(), 3);
    assert!(topology.links().iter().all(|link| link.to == link.from + 1));
    assert_eq!(topology.stages()[0].name, "in");
    assert_eq!(topology.stages()[3].name, "out");
}

// ── Push / pull ────────────────────────────────────────────────────

#[test]
fn frames_come_out_one_per_push_in_order() {
    hwsnap::initialize().unwrap();
    let spec = GraphSpec::parse("scale=32:16,format=rgb24").unwrap();
    let mut graph = FilterGraph::build(&spec, None, &geometry(64, 48)).unwrap();

    let mut seen = Vec::new();
    for pts in 0..5 {
        let mut frame = DecodedFrame::new(Pixel::YUV420P, 64, 48);
        frame.set_pts(Some(pts));
        graph.push(frame).unwrap();

        while let Pull::Ready(filtered) = graph.pull().unwrap() {
            assert_eq!((filtered.width(), filtered.height()), (32, 16));
            assert_eq!(filtered.format().pixel(), Pixel::RGB24);
            seen.push(filtered.pts());
        }
    }

    graph.flush().unwrap();
    loop {
        match graph.pull().unwrap() {
            Pull::Ready(filtered) => seen.push(filtered.pts()),
            Pull::EndOfStream => break,
            Pull::NeedMoreInput => panic!("graph asked for input after flush"),
        }
    }

    assert_eq!(seen, (0..5).map(Some).collect::<Vec<_>>());
}

#[test]
fn push_after_flush_is_rejected() {
    hwsnap::initialize().unwrap();
    let spec = GraphSpec::parse("format=rgb24").unwrap();
    let mut graph = FilterGraph::build(&spec, None, &geometry(16, 16)).unwrap();

    graph.flush().unwrap();
    graph.flush().unwrap();
    let error = graph
        .push(DecodedFrame::new(Pixel::YUV420P, 16, 16))
        .unwrap_err();
    assert!(matches!(error, HwsnapError::GraphError { .. }));
}

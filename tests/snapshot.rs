//! Snapshot sink tests.

use hwsnap::{HwsnapError, ImageSnapshotSink, OutputFrame, PixelFormat, SnapshotSink};

fn gradient(width: u32, height: u32, format: PixelFormat) -> OutputFrame {
    let channels = format.bytes_per_pixel();
    let data = (0..width * height)
        .flat_map(|position| std::iter::repeat_n((position % 256) as u8, channels))
        .collect();
    OutputFrame::from_packed(width, height, format, data).expect("Bad test frame")
}

#[test]
fn ppm_snapshot_round_trips() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("hwsnap_100.ppm");
    let frame = gradient(20, 10, PixelFormat::Rgb8);

    let mut sink = ImageSnapshotSink::new();
    sink.save(&frame, &path).expect("Failed to write snapshot");
    assert_eq!(sink.written(), 1);

    let image = image::open(&path).expect("Failed to read snapshot").into_rgb8();
    assert_eq!(image.dimensions(), (20, 10));
    assert_eq!(image.as_raw(), frame.data());
}

#[test]
fn png_snapshot_keeps_alpha() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("hwsnap_001.png");
    let frame = gradient(8, 8, PixelFormat::Rgba8);

    ImageSnapshotSink::new()
        .save(&frame, &path)
        .expect("Failed to write snapshot");

    let image = image::open(&path).expect("Failed to read snapshot");
    assert!(image.color().has_alpha());
    assert_eq!(image.into_rgba8().as_raw(), frame.data());
}

#[test]
fn gray_frames_are_written_as_ppm() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("gray.ppm");
    let frame = gradient(4, 4, PixelFormat::Gray8);

    ImageSnapshotSink::new()
        .save(&frame, &path)
        .expect("Failed to write snapshot");

    let image = image::open(&path).expect("Failed to read snapshot").into_rgb8();
    let pixel = image.get_pixel(3, 0).0;
    assert_eq!(pixel, [3, 3, 3]);
}

#[test]
fn missing_directory_is_a_snapshot_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("missing").join("hwsnap_100.ppm");

    let mut sink = ImageSnapshotSink::new();
    let error = sink
        .save(&gradient(2, 2, PixelFormat::Rgb8), &path)
        .unwrap_err();

    match error {
        HwsnapError::SnapshotError { path: failed, .. } => assert_eq!(failed, path),
        other => panic!("expected SnapshotError, got {other}"),
    }
    assert_eq!(sink.written(), 0);
}

#[test]
fn missing_directory_can_be_created() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("a").join("b").join("hwsnap_200.png");

    let mut sink = ImageSnapshotSink::new().with_create_directories(true);
    sink.save(&gradient(2, 2, PixelFormat::Rgb8), &path)
        .expect("Failed to write snapshot");
    assert!(path.exists());
}

#[test]
fn unknown_extension_is_a_snapshot_error() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let path = directory.path().join("hwsnap_100.notanimage");

    let error = ImageSnapshotSink::new()
        .save(&gradient(2, 2, PixelFormat::Rgb8), &path)
        .unwrap_err();
    assert!(matches!(error, HwsnapError::SnapshotError { .. }));
}

#[test]
fn packed_size_is_checked() {
    let error = OutputFrame::from_packed(4, 4, PixelFormat::Rgb8, vec![0; 10]).unwrap_err();
    assert!(matches!(error, HwsnapError::ConvertError(_)));
}

//! Still-image output for sampled frames.

use std::fs;
use std::path::Path;

use crate::error::HwsnapError;
use crate::frame::OutputFrame;

/// Destination for sampled frames.
///
/// The pipeline logs and counts failures and keeps going.
pub trait SnapshotSink {
    /// Write `frame` to `path`.
    fn save(&mut self, frame: &OutputFrame, path: &Path) -> Result<(), HwsnapError>;
}

/// Writes snapshots with the `image` crate.
///
/// The encoder is picked from the file extension (`ppm`, `png`, `jpg`, ...).
#[derive(Debug, Clone, Default)]
pub struct ImageSnapshotSink {
    create_directories: bool,
    written: u64,
}

impl ImageSnapshotSink {
    /// A sink that expects the output directory to exist.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create missing parent directories before writing.
    #[must_use]
    pub fn with_create_directories(mut self, create: bool) -> Self {
        self.create_directories = create;
        self
    }

    /// Snapshots written so far.
    pub fn written(&self) -> u64 {
        self.written
    }
}

impl SnapshotSink for ImageSnapshotSink {
    fn save(&mut self, frame: &OutputFrame, path: &Path) -> Result<(), HwsnapError> {
        let failed = |reason: String| HwsnapError::SnapshotError {
            path: path.to_path_buf(),
            reason,
        };

        if self.create_directories {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|error| failed(error.to_string()))?;
            }
        }

        let image = frame.to_image()?;
        // PPM only stores RGB.
        let is_pixmap = path
            .extension()
            .is_some_and(|extension| extension.eq_ignore_ascii_case("ppm"));
        let result = if is_pixmap {
            image.into_rgb8().save(path)
        } else {
            image.save(path)
        };
        result.map_err(|error| failed(error.to_string()))?;

        self.written += 1;
        log::debug!("Wrote snapshot {} ({})", frame.index(), path.display());
        Ok(())
    }
}

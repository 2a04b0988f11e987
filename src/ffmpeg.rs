//! FFmpeg library setup and log level configuration.
//!
//! FFmpeg keeps its own logging system, separate from the Rust
//! [`log`](https://crates.io/crates/log) facade used by the rest of this
//! crate. Hardware decode paths are chatty at the default level, so the CLI
//! and tests usually lower it with [`set_ffmpeg_log_level`]; raising it to
//! [`FfmpegLogLevel::Trace`] is the quickest way to see why a VAAPI or CUDA
//! surface negotiation failed.
//!
//! # Example
//!
//! ```no_run
//! use hwsnap::FfmpegLogLevel;
//!
//! hwsnap::initialize().unwrap();
//! hwsnap::set_ffmpeg_log_level(FfmpegLogLevel::Error);
//! ```

use ffmpeg_next::util::log::Level;

use crate::error::HwsnapError;

/// FFmpeg internal log verbosity level.
///
/// Maps directly to FFmpeg's `AV_LOG_*` constants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FfmpegLogLevel {
    /// Print no output at all.
    Quiet,
    /// Conditions the process cannot recover from.
    Panic,
    /// Unrecoverable errors.
    Fatal,
    /// Recoverable errors.
    Error,
    /// Warnings (FFmpeg's default).
    Warning,
    /// Informational messages.
    Info,
    /// Verbose informational messages.
    Verbose,
    /// Debugging messages.
    Debug,
    /// Everything, including per-packet tracing.
    Trace,
}

// Each level with FFmpeg's constant and its command-line name.
const LEVELS: [(FfmpegLogLevel, Level, &str); 9] = [
    (FfmpegLogLevel::Quiet, Level::Quiet, "quiet"),
    (FfmpegLogLevel::Panic, Level::Panic, "panic"),
    (FfmpegLogLevel::Fatal, Level::Fatal, "fatal"),
    (FfmpegLogLevel::Error, Level::Error, "error"),
    (FfmpegLogLevel::Warning, Level::Warning, "warning"),
    (FfmpegLogLevel::Info, Level::Info, "info"),
    (FfmpegLogLevel::Verbose, Level::Verbose, "verbose"),
    (FfmpegLogLevel::Debug, Level::Debug, "debug"),
    (FfmpegLogLevel::Trace, Level::Trace, "trace"),
];

impl FfmpegLogLevel {
    fn entry(self) -> (FfmpegLogLevel, Level, &'static str) {
        LEVELS
            .into_iter()
            .find(|(level, _, _)| *level == self)
            .unwrap_or(LEVELS[4])
    }

    /// The name [`from_name`](FfmpegLogLevel::from_name) accepts.
    pub fn name(self) -> &'static str {
        self.entry().2
    }

    /// Parse a level name as accepted on the command line.
    ///
    /// Case-insensitive; `warn` is accepted as an alias for `warning`.
    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.to_ascii_lowercase();
        let name = if name == "warn" { "warning" } else { name.as_str() };
        LEVELS
            .into_iter()
            .find(|(_, _, candidate)| *candidate == name)
            .map(|(level, _, _)| level)
    }
}

/// Initialise the FFmpeg libraries.
///
/// Safe to call more than once. Every entry point that touches FFmpeg calls
/// this first.
pub fn initialize() -> Result<(), HwsnapError> {
    ffmpeg_next::init()
        .map_err(|error| HwsnapError::FfmpegError(format!("initialisation failed: {error}")))
}

/// Set the FFmpeg internal log verbosity level.
///
/// This controls what FFmpeg prints to stderr. It does **not** affect
/// Rust-side `log` output.
pub fn set_ffmpeg_log_level(level: FfmpegLogLevel) {
    ffmpeg_next::util::log::set_level(level.entry().1);
}

/// Get the current FFmpeg internal log verbosity level.
pub fn get_ffmpeg_log_level() -> Option<FfmpegLogLevel> {
    let current = ffmpeg_next::util::log::get_level().ok()?;
    LEVELS
        .into_iter()
        .find(|(_, level, _)| *level == current)
        .map(|(level, _, _)| level)
}

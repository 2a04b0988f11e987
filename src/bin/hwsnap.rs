use std::{fs, path::PathBuf, sync::Arc, time::Duration};

use clap::{CommandFactory, Parser, Subcommand};
use clap_complete::Shell;
use colored::Colorize;
use hwsnap::{
    FfmpegLogLevel, GraphSpec, HardwareBackend, Pipeline, PipelineOptions, PipelineReport,
    PixelFormat, ProcessingMode, ProgressCallback, ProgressInfo, ScalingPolicy,
};
use indicatif::{ProgressBar, ProgressStyle};
use serde_json::json;
use tracing_subscriber::filter::LevelFilter;

const CLI_AFTER_HELP: &str = "Examples:\n  hwsnap decode input.mp4 --out /tmp/snaps --every 100\n  hwsnap decode input.mp4 --hardware vaapi --filter 'scale_vaapi=800:600:format=nv12,hwdownload,format=nv12' --progress\n  hwsnap backends\n  hwsnap completions zsh > _hwsnap";

#[derive(Debug, Parser)]
#[command(
    name = "hwsnap",
    version,
    about = "Decode video through hardware backends and filter graphs, sampling still snapshots",
    after_help = CLI_AFTER_HELP
)]
struct Cli {
    #[command(flatten)]
    global: GlobalOptions,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Parser, Clone, Default)]
struct GlobalOptions {
    /// Show debug logging output.
    #[arg(long, global = true)]
    verbose: bool,

    /// Show a spinner with the running decode rate.
    #[arg(long, global = true)]
    progress: bool,

    /// FFmpeg log level (quiet, panic, fatal, error, warning, info, verbose, debug, trace).
    #[arg(long, global = true)]
    log_level: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Decode a file and write every Nth frame as a still image.
    #[command(
        about = "Decode a file and sample snapshots",
        after_help = "Examples:\n  hwsnap decode input.mp4 --every 50 --ext png\n  hwsnap decode input.mp4 --hardware cuda --width 640 --scaling bicubic --json"
    )]
    Decode {
        /// Input media path.
        input: PathBuf,
        /// Hardware backend (vaapi, cuda, qsv, vdpau, dxva2, d3d11va, videotoolbox).
        #[arg(long)]
        hardware: Option<String>,
        /// Device path for the backend (e.g. /dev/dri/renderD128).
        #[arg(long)]
        device: Option<String>,
        /// Filter graph applied to decoded frames.
        #[arg(long)]
        filter: Option<String>,
        /// Output directory for snapshots (defaults to the system temp directory).
        #[arg(long)]
        out: Option<PathBuf>,
        /// Write a snapshot every N frames.
        #[arg(long, default_value_t = hwsnap::DEFAULT_SAMPLE_EVERY)]
        every: u64,
        /// Snapshot file name prefix.
        #[arg(long, default_value = "hwsnap")]
        prefix: String,
        /// Snapshot file extension (ppm, png, jpg, bmp, tiff).
        #[arg(long, default_value = "ppm")]
        ext: String,
        /// Output width; the height follows the aspect ratio if unset.
        #[arg(long)]
        width: Option<u32>,
        /// Output height; the width follows the aspect ratio if unset.
        #[arg(long)]
        height: Option<u32>,
        /// Output pixel format (rgb8, rgba8, gray8).
        #[arg(long)]
        pixel_format: Option<String>,
        /// Scaling interpolation (nearest, fast-bilinear, bilinear, bicubic).
        #[arg(long)]
        scaling: Option<String>,
        /// Print the run report as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// List hardware backends supported by the linked FFmpeg.
    #[command(about = "List available hardware backends")]
    Backends {
        /// Output as machine-readable JSON.
        #[arg(long)]
        json: bool,
    },

    /// Generate shell completion scripts.
    #[command(
        about = "Generate shell completions",
        after_help = "Examples:\n  hwsnap completions bash > hwsnap.bash\n  hwsnap completions zsh > _hwsnap"
    )]
    Completions {
        /// Target shell.
        shell: Shell,
    },
}

fn parse_pixel_format(value: &str) -> Result<PixelFormat, String> {
    PixelFormat::from_name(value).ok_or(format!("unsupported --pixel-format: {value}"))
}

fn parse_scaling(value: &str) -> Result<ScalingPolicy, String> {
    ScalingPolicy::from_name(value).ok_or(format!("unsupported --scaling: {value}"))
}

fn parse_log_level(value: &str) -> Result<FfmpegLogLevel, String> {
    FfmpegLogLevel::from_name(value).ok_or(format!("unsupported --log-level: {value}"))
}

fn init_logging(verbose: bool) {
    let level = if verbose {
        LevelFilter::DEBUG
    } else {
        LevelFilter::INFO
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn apply_global_options(global: &GlobalOptions) -> Result<(), Box<dyn std::error::Error>> {
    init_logging(global.verbose);
    hwsnap::initialize()?;

    if let Some(level) = &global.log_level {
        hwsnap::set_ffmpeg_log_level(parse_log_level(level)?);
    }
    if let Some(level) = hwsnap::get_ffmpeg_log_level() {
        log::debug!("FFmpeg log level: {}", level.name());
    }

    Ok(())
}

struct TerminalProgress {
    bar: ProgressBar,
}

impl TerminalProgress {
    fn new() -> Result<Self, Box<dyn std::error::Error>> {
        let bar = ProgressBar::new_spinner();
        bar.set_style(ProgressStyle::with_template("{spinner:.green} {elapsed} {msg}")?);
        bar.enable_steady_tick(Duration::from_millis(120));
        Ok(Self { bar })
    }
}

impl ProgressCallback for TerminalProgress {
    fn on_progress(&self, info: &ProgressInfo) {
        let frames = match info.total {
            Some(total) => format!("{}/{total} frames", info.current),
            None => format!("{} frames", info.current),
        };
        self.bar.set_message(format!(
            "{frames}, {} packets, {:.1} FPS",
            info.packets_submitted, info.frames_per_second
        ));
    }
}

fn report_json(report: &PipelineReport) -> serde_json::Value {
    json!({
        "packets_submitted": report.packets_submitted,
        "frames_decoded": report.frames_decoded,
        "frames_pushed": report.frames_pushed,
        "frames_filtered": report.frames_filtered,
        "frames_converted": report.frames_converted,
        "frames_dropped": report.frames_dropped,
        "snapshots_written": report.snapshots_written,
        "snapshots_failed": report.snapshots_failed,
        "snapshots": report
            .snapshot_paths
            .iter()
            .map(|path| path.display().to_string())
            .collect::<Vec<_>>(),
        "elapsed_seconds": report.elapsed.as_secs_f64(),
        "average_fps": report.average_fps,
        "hardware_active": report.hardware_active,
        "backend": report.backend.map(|backend| backend.name()),
        "filter_graph": report.topology.as_ref().map(|topology| topology.to_string()),
    })
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    apply_global_options(&cli.global)?;

    match cli.command {
        Commands::Decode {
            input,
            hardware,
            device,
            filter,
            out,
            every,
            prefix,
            ext,
            width,
            height,
            pixel_format,
            scaling,
            json,
        } => {
            let out = out.unwrap_or_else(std::env::temp_dir);
            fs::create_dir_all(&out)?;

            let mut options = PipelineOptions::new()
                .with_sample_every(every)
                .with_snapshot_directory(&out)
                .with_snapshot_prefix(prefix)
                .with_snapshot_extension(ext.to_ascii_lowercase())
                .with_resolution(width, height);

            if let Some(backend) = hardware {
                options = options.with_hardware(backend, device.as_deref());
            } else if device.is_some() {
                eprintln!(
                    "{} {}",
                    "warning:".yellow().bold(),
                    "--device has no effect without --hardware".yellow()
                );
            }
            if let Some(spec) = filter {
                let spec = GraphSpec::parse(&spec)?;
                options = options.with_processing(ProcessingMode::FilterGraph(spec));
            }
            if let Some(value) = pixel_format {
                options = options.with_pixel_format(parse_pixel_format(&value)?);
            }
            if let Some(value) = scaling {
                options = options.with_scaling(parse_scaling(&value)?);
            }

            let progress = if cli.global.progress {
                let progress = Arc::new(TerminalProgress::new()?);
                options = options.with_progress(progress.clone()).with_batch_size(10);
                Some(progress)
            } else {
                None
            };

            let report = Pipeline::open(&input, options)?.run()?;

            if let Some(progress) = progress {
                progress.bar.finish_and_clear();
            }

            if json {
                println!("{}", serde_json::to_string_pretty(&report_json(&report))?);
            } else {
                let mode = match report.backend {
                    Some(backend) => format!("{backend} hardware"),
                    None => "software".to_string(),
                };
                println!(
                    "{} {}",
                    "success:".green().bold(),
                    format!(
                        "Decoded {} frame(s) ({mode}) at {:.1} FPS, wrote {} snapshot(s) to {}",
                        report.frames_decoded,
                        report.average_fps,
                        report.snapshots_written,
                        out.display()
                    )
                    .green()
                );
                if report.frames_dropped > 0 || report.snapshots_failed > 0 {
                    eprintln!(
                        "{} {}",
                        "warning:".yellow().bold(),
                        format!(
                            "{} frame(s) dropped, {} snapshot(s) failed",
                            report.frames_dropped, report.snapshots_failed
                        )
                        .yellow()
                    );
                }
                if cli.global.verbose {
                    for path in &report.snapshot_paths {
                        eprintln!("saved {}", path.display());
                    }
                }
            }
        }
        Commands::Backends { json } => {
            let backends = hwsnap::available_backends();
            if json {
                let payload = json!({
                    "backends": backends
                        .iter()
                        .map(|backend| json!({
                            "name": backend.name(),
                            "default_device": backend.default_device(),
                            "scale_filter": backend.scale_filter(),
                        }))
                        .collect::<Vec<_>>(),
                });
                println!("{}", serde_json::to_string_pretty(&payload)?);
            } else if backends.is_empty() {
                println!("{}", "No hardware backends available".yellow());
            } else {
                for backend in HardwareBackend::ALL {
                    let marker = if backends.contains(&backend) {
                        "available".green()
                    } else {
                        "missing".dimmed()
                    };
                    println!("{:<14} {marker}", backend.name());
                }
            }
        }
        Commands::Completions { shell } => {
            let mut command = Cli::command();
            clap_complete::generate(shell, &mut command, "hwsnap", &mut std::io::stdout());
        }
    }

    Ok(())
}

fn main() {
    if let Err(error) = run() {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

//! pattern-track CLI: track a pattern through a list of frames and write a JSON report.

use clap::Parser;
use pattern_track::{
    detect, load_camera_json, AsyncTracker, FrameReport, PatternTracker, TrackConfig, TrackReport,
};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

type CliError = Box<dyn std::error::Error>;
type CliResult<T> = Result<T, CliError>;

#[derive(Parser, Debug)]
#[command(name = "pattern-track")]
#[command(about = "Track a planar image pattern through a sequence of frames")]
#[command(version)]
struct Cli {
    /// Reference image of the planar pattern.
    #[arg(long)]
    pattern: PathBuf,

    /// Frames to track, processed in order.
    #[arg(long, num_args = 1.., required = true)]
    frames: Vec<PathBuf>,

    /// Tracker configuration (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Camera intrinsics (JSON); overrides the camera in `--config`.
    #[arg(long)]
    camera: Option<PathBuf>,

    /// Where to write the report (JSON). Printed to stdout when omitted.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Run through the asynchronous worker instead of the synchronous tracker.
    #[arg(long = "async")]
    use_async: bool,

    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

/// Longest wait for the worker to publish a submitted frame.
const ASYNC_FRAME_WAIT: Duration = Duration::from_secs(30);

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(&cli) {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}

/// `RUST_LOG` overrides this default in both logging setups.
fn default_filter(verbose: bool) -> &'static str {
    if verbose {
        "debug"
    } else {
        "warn"
    }
}

#[cfg(feature = "tracing")]
fn init_logging(verbose: bool) {
    use pattern_track::core::{init_tracing, TraceFormat};
    init_tracing(TraceFormat::Text, default_filter(verbose));
}

#[cfg(not(feature = "tracing"))]
fn init_logging(verbose: bool) {
    let env = env_logger::Env::default().default_filter_or(default_filter(verbose));
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp_millis()
        .try_init();
}

fn frame_name(path: &Path) -> String {
    path.display().to_string()
}

fn run(cli: &Cli) -> CliResult<()> {
    let mut cfg = match &cli.config {
        Some(path) => TrackConfig::load_json(path)?,
        None => TrackConfig::default(),
    };
    if let Some(path) = &cli.camera {
        cfg.camera = Some(load_camera_json(path)?);
    }

    let pattern = detect::load_image_buffer(&cli.pattern)?;
    let mut tracker = cfg.build_tracker();
    tracker.register_pattern(&pattern.view())?;

    let mut report = TrackReport {
        pattern: frame_name(&cli.pattern),
        pattern_width: pattern.width,
        pattern_height: pattern.height,
        pattern_keypoints: tracker.pattern_keypoints().len(),
        frames: Vec::with_capacity(cli.frames.len()),
    };

    if cli.use_async {
        let params = cfg.async_params.clone().unwrap_or_default();
        track_async(tracker, params, &cli.frames, &mut report)?;
    } else {
        track_sync(&mut tracker, &cli.frames, &mut report)?;
    }

    log::info!(
        "found the pattern in {}/{} frames",
        report.found_count(),
        report.frames.len()
    );
    match &cli.output {
        Some(path) => {
            report.write_json(path)?;
            println!("wrote report JSON to {}", path.display());
        }
        None => println!("{}", serde_json::to_string_pretty(&report)?),
    }
    Ok(())
}

fn track_sync(
    tracker: &mut PatternTracker,
    frames: &[PathBuf],
    report: &mut TrackReport,
) -> CliResult<()> {
    for path in frames {
        let frame = detect::load_image_buffer(path)?;
        let outcome = tracker.process_frame(&frame.view());
        report
            .frames
            .push(FrameReport::from_tracker(frame_name(path), tracker, &outcome));
    }
    Ok(())
}

/// Submit frames one at a time and wait for each to be published, so every
/// frame gets its own report entry.
fn track_async(
    tracker: PatternTracker,
    params: pattern_track::AsyncParams,
    frames: &[PathBuf],
    report: &mut TrackReport,
) -> CliResult<()> {
    let poll = params.idle_sleep().max(Duration::from_millis(1));
    let worker = AsyncTracker::new(tracker, params);
    for path in frames {
        let frame = detect::load_image_buffer(path)?;
        let seq = worker.submit_frame(&frame.view());
        let start = Instant::now();
        while worker.frame_index() < seq {
            if start.elapsed() > ASYNC_FRAME_WAIT {
                return Err(format!("timed out waiting for frame {}", frame_name(path)).into());
            }
            thread::sleep(poll);
        }
        report
            .frames
            .push(FrameReport::from_snapshot(frame_name(path), &worker.snapshot()));
    }
    worker.into_inner()?;
    Ok(())
}

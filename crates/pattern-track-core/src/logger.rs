//! `tracing` subscriber for tracking runs.
//!
//! Span close events carry the per-stage timings of the tracking pipeline.
//! The asynchronous tracker wraps every pass in a span holding the frame
//! sequence number, so worker lines can be tied back to `submit_frame`.

use tracing_subscriber::fmt::format::FmtSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter};

/// Output format of [`init_tracing`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum TraceFormat {
    /// Human-readable lines with uptime and thread name.
    #[default]
    Text,
    /// One flattened JSON object per event.
    Json,
}

/// Install the global subscriber, writing to stderr.
///
/// `RUST_LOG` takes precedence over `default_directive` (for example `"info"`
/// or `"pattern_track=debug"`). Returns `false` when a subscriber was
/// already installed.
pub fn init_tracing(format: TraceFormat, default_directive: &str) -> bool {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    let builder = fmt()
        .with_env_filter(filter)
        .with_span_events(FmtSpan::CLOSE)
        .with_thread_names(true)
        .with_writer(std::io::stderr);
    match format {
        TraceFormat::Json => builder
            .json()
            .flatten_event(true)
            .finish()
            .try_init()
            .is_ok(),
        TraceFormat::Text => builder
            .with_timer(fmt::time::Uptime::default())
            .finish()
            .try_init()
            .is_ok(),
    }
}

//! Logging and observability infrastructure for concord.
//!
//! All crates log through `tracing` with structured fields. The CLI installs
//! the subscriber once via [`init_tracing`]; library code only emits events
//! and enters the spans created here.

use std::collections::HashMap;
use std::time::{Duration, Instant};
use tracing::{Level, debug, error, info, span};
use tracing_subscriber::{
    EnvFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Characters of a body shown in debug previews.
pub const PREVIEW_CHARS: usize = 80;

/// Initialize the tracing subscriber.
///
/// `RUST_LOG` wins when set. Otherwise verbose mode logs concord at debug
/// and everything else at info; quiet mode logs concord at info and the
/// rest at warn. `json` switches the formatter to one JSON object per line.
pub fn init_tracing(verbose: bool, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| {
            if verbose {
                EnvFilter::try_new("concord=debug,info")
            } else {
                EnvFilter::try_new("concord=info,warn")
            }
        })
        .unwrap_or_else(|_| EnvFilter::new("info"));

    if json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .json()
                    .with_current_span(true)
                    .with_span_list(false)
                    .with_writer(std::io::stderr),
            )
            .try_init()?;
    } else if verbose {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(true)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_span_events(FmtSpan::CLOSE)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_line_number(false)
                    .with_file(false)
                    .with_writer(std::io::stderr)
                    .compact(),
            )
            .try_init()?;
    }

    Ok(())
}

/// Span covering one consistency request.
pub fn request_span(corpus_id: &str, point: &str) -> tracing::Span {
    span!(
        Level::INFO,
        "consistency_request",
        corpus_id = %corpus_id,
        point = %preview(point),
    )
}

/// Span covering all work on one document.
pub fn document_span(document_id: &str) -> tracing::Span {
    span!(Level::INFO, "document", document_id = %document_id)
}

/// Span covering one ReAct loop.
pub fn loop_span(document_id: &str, point_index: usize) -> tracing::Span {
    span!(
        Level::DEBUG,
        "react_loop",
        document_id = %document_id,
        point_index = point_index,
    )
}

pub fn log_stage_start(stage: &str, document_id: Option<&str>) {
    info!(
        stage = %stage,
        document_id = document_id.unwrap_or("-"),
        "Starting stage"
    );
}

pub fn log_stage_complete(stage: &str, document_id: Option<&str>, duration_ms: u128) {
    info!(
        stage = %stage,
        document_id = document_id.unwrap_or("-"),
        duration_ms = %duration_ms,
        "Stage completed"
    );
}

pub fn log_stage_error(stage: &str, document_id: Option<&str>, error: &str, duration_ms: u128) {
    error!(
        stage = %stage,
        document_id = document_id.unwrap_or("-"),
        duration_ms = %duration_ms,
        error = %error,
        "Stage failed"
    );
}

/// Log the size of a body at debug level without ever emitting it whole.
pub fn log_body(label: &str, body: &str) {
    debug!(
        label = %label,
        chars = body.chars().count(),
        preview = %preview(body),
        "Body"
    );
}

/// First [`PREVIEW_CHARS`] characters of `text` on a char boundary, with
/// newlines flattened so log lines stay single-line.
#[must_use]
pub fn preview(text: &str) -> String {
    let mut out: String = text
        .chars()
        .take(PREVIEW_CHARS)
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect();
    if text.chars().count() > PREVIEW_CHARS {
        out.push('…');
    }
    out
}

/// Wall-clock timings for the stages of one request.
#[derive(Debug)]
pub struct StageTimer {
    start_time: Instant,
    running: HashMap<String, Instant>,
    finished: Vec<(String, Duration)>,
}

impl Default for StageTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl StageTimer {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            running: HashMap::new(),
            finished: Vec::new(),
        }
    }

    pub fn start(&mut self, stage: &str) {
        self.running.insert(stage.to_string(), Instant::now());
        log_stage_start(stage, None);
    }

    /// Stop `stage` and return its duration. Stopping a stage that was never
    /// started yields zero.
    pub fn end(&mut self, stage: &str) -> Duration {
        let duration = self
            .running
            .remove(stage)
            .map(|start| start.elapsed())
            .unwrap_or_default();
        self.finished.push((stage.to_string(), duration));
        log_stage_complete(stage, None, duration.as_millis());
        duration
    }

    #[must_use]
    pub fn total_elapsed(&self) -> Duration {
        self.start_time.elapsed()
    }

    #[must_use]
    pub fn summary(&self) -> &[(String, Duration)] {
        &self.finished
    }
}

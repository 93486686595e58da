//! Tracing subscriber setup.
//!
//! `RUST_LOG` takes precedence when set. Otherwise the configured level
//! applies to the workspace crates and to HTTP request spans, and every
//! other dependency is held at `warn`.

use std::fs::OpenOptions;
use std::sync::Arc;

use anyhow::Context;
use tracing::{Level, Span};
use tracing_subscriber::{
    fmt::{self, format::FmtSpan, writer::BoxMakeWriter},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::config::LoggingConfig;

/// Log targets owned by this workspace
const WORKSPACE_TARGETS: &[&str] = &[
    "watchparty",
    "watchparty_api",
    "watchparty_client",
    "watchparty_cluster",
    "watchparty_core",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Pretty,
}

impl LogFormat {
    /// Anything but `json` renders human-readable output
    #[must_use]
    pub fn from_name(name: &str) -> Self {
        if name.eq_ignore_ascii_case("json") {
            Self::Json
        } else {
            Self::Pretty
        }
    }
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter = env_filter(config)?;
    let writer = make_writer(config.file_path.as_deref())?;
    let ansi = config.file_path.is_none();

    let fmt_layer = match LogFormat::from_name(&config.format) {
        LogFormat::Json => fmt::layer()
            .json()
            .with_current_span(true)
            .with_span_list(false)
            .with_writer(writer)
            .boxed(),
        LogFormat::Pretty => fmt::layer()
            .pretty()
            .with_ansi(ansi)
            .with_span_events(FmtSpan::CLOSE)
            .with_file(false)
            .with_writer(writer)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt_layer)
        .try_init()?;
    Ok(())
}

/// Root span for one server node; events recorded inside carry `node_id`.
///
/// Error level keeps the span enabled under any filter.
pub fn node_span(node_id: &str) -> Span {
    tracing::error_span!(target: "watchparty", "node", node_id = %node_id)
}

/// Filter directives used when `RUST_LOG` is unset
#[must_use]
pub fn default_directives(level: Level) -> String {
    let level = level.as_str().to_ascii_lowercase();
    let mut directives = vec!["warn".to_string()];
    directives.extend(WORKSPACE_TARGETS.iter().map(|target| format!("{target}={level}")));
    directives.push(format!("tower_http={level}"));
    directives.join(",")
}

fn env_filter(config: &LoggingConfig) -> anyhow::Result<EnvFilter> {
    // The configured level is checked even when RUST_LOG overrides it
    let level = parse_log_level(&config.level)?;
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directives(level)).context("Invalid default log directives")
}

fn make_writer(file_path: Option<&str>) -> anyhow::Result<BoxMakeWriter> {
    let Some(path) = file_path else {
        return Ok(BoxMakeWriter::new(std::io::stdout));
    };
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("Failed to open log file {path}"))?;
    Ok(BoxMakeWriter::new(Arc::new(file)))
}

fn parse_log_level(level: &str) -> anyhow::Result<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        _ => Err(anyhow::anyhow!("Invalid log level: {level}")),
    }
}

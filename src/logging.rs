//! Tracing subscriber setup for the `stagegate` binary.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

pub const DEFAULT_FILTER: &str = "stagegate=info";
pub const VERBOSE_FILTER: &str = "stagegate=debug";

/// Logging options collected from the CLI.
#[derive(Debug, Clone, Default)]
pub struct LogOptions<'a> {
    pub verbose: bool,
    /// Emit JSON lines on stderr instead of human-readable output
    pub json: bool,
    /// Also write JSON lines to a daily rolling file in this directory
    pub log_dir: Option<&'a Path>,
}

/// Build the default filter: `RUST_LOG` wins, then `--verbose`.
pub fn env_filter(verbose: bool) -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(if verbose { VERBOSE_FILTER } else { DEFAULT_FILTER })
    })
}

/// Install the global subscriber. Keep the returned guard alive until exit
/// or buffered file output is lost.
///
/// Calling this twice is harmless; the second subscriber is ignored.
pub fn init(options: &LogOptions<'_>) -> Result<Option<WorkerGuard>> {
    let (file_layer, guard) = match options.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::Builder::new()
                .rotation(tracing_appender::rolling::Rotation::DAILY)
                .filename_prefix("stagegate")
                .filename_suffix("jsonl")
                .build(dir)
                .context("Failed to create rolling log file")?;
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false)
                .with_current_span(false)
                .with_span_list(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    let json_console = options
        .json
        .then(|| fmt::layer().json().with_writer(std::io::stderr));
    let plain_console = (!options.json).then(|| {
        fmt::layer()
            .compact()
            .with_target(false)
            .with_writer(std::io::stderr)
    });

    tracing_subscriber::registry()
        .with(env_filter(options.verbose))
        .with(json_console)
        .with(plain_console)
        .with(file_layer)
        .try_init()
        .ok();

    Ok(guard)
}

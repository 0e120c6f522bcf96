// ============================================================================
// SECTION 10: LOGGING & TRACING INFRASTRUCTURE
// ============================================================================
// The library only emits `tracing` events; installing a subscriber is left to
// the binary. Targets:
//   cerebro_indom::cache     store/lookup/reorganize
//   cerebro_indom::persist   load/save
//   cerebro_indom::registry  table lifecycle
//   cerebro_indom::perf      slow load/save warnings
// ============================================================================

use std::fmt::{self, Display, Formatter};
use std::path::Path;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing::{info, trace, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt as tracing_fmt, EnvFilter, Layer, Registry};

use crate::config::LoggingConfig;

// ----------------------------------------------------------------------------
// 10.1 Log Level Management
// ----------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn to_level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Trace => LevelFilter::TRACE,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Error => LevelFilter::ERROR,
        }
    }

    /// Parse from string, falling back to `Info`
    pub fn parse(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "trace" => LogLevel::Trace,
            "debug" => LogLevel::Debug,
            "info" => LogLevel::Info,
            "warn" | "warning" => LogLevel::Warn,
            "error" => LogLevel::Error,
            _ => LogLevel::Info,
        }
    }
}

impl Display for LogLevel {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Trace => write!(f, "trace"),
            LogLevel::Debug => write!(f, "debug"),
            LogLevel::Info => write!(f, "info"),
            LogLevel::Warn => write!(f, "warn"),
            LogLevel::Error => write!(f, "error"),
        }
    }
}

// ----------------------------------------------------------------------------
// 10.2 Logger Initialization
// ----------------------------------------------------------------------------

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Formatting layer for the configured output format. Diagnostics go to
/// stderr so dumps on stdout stay clean.
fn output_layer(config: &LoggingConfig) -> BoxedLayer {
    let layer = tracing_fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true);
    match config.format.as_str() {
        "json" => layer
            .json()
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .boxed(),
        "compact" => layer.compact().with_ansi(config.colors).boxed(),
        _ => layer
            .pretty()
            .with_ansi(config.colors)
            .with_file(config.source_location)
            .with_line_number(config.source_location)
            .boxed(),
    }
}

/// Install the global subscriber described by `config`.
///
/// `RUST_LOG` directives still apply on top of the configured level.
pub fn init_logging(config: &LoggingConfig) -> anyhow::Result<()> {
    let level = LogLevel::parse(&config.level);
    let env_filter = EnvFilter::builder()
        .with_default_directive(level.to_level_filter().into())
        .from_env_lossy();

    let subscriber = tracing_subscriber::registry()
        .with(output_layer(config))
        .with(env_filter);
    tracing::subscriber::set_global_default(subscriber)
        .map_err(|e| anyhow::anyhow!("Failed to set logger: {}", e))?;

    info!(
        target: "cerebro_indom::init",
        level = %level,
        format = %config.format,
        "Logging initialized"
    );
    Ok(())
}

// ----------------------------------------------------------------------------
// 10.3 Cache File Timing
// ----------------------------------------------------------------------------

/// A single load or save slower than this is logged as a warning
pub(crate) const SLOW_IO: Duration = Duration::from_millis(250);

/// Times one load or save of a cache file
#[derive(Debug)]
pub(crate) struct IoTimer<'a> {
    op: &'static str,
    path: &'a Path,
    start: Instant,
}

impl<'a> IoTimer<'a> {
    pub(crate) fn start(op: &'static str, path: &'a Path) -> Self {
        Self {
            op,
            path,
            start: Instant::now(),
        }
    }

    /// Log how long the operation took and how many records it moved.
    pub(crate) fn finish(self, records: usize) -> Duration {
        let elapsed = self.start.elapsed();
        let elapsed_ms = elapsed.as_millis() as u64;
        if elapsed > SLOW_IO {
            warn!(
                target: "cerebro_indom::perf",
                op = self.op,
                path = %self.path.display(),
                records,
                elapsed_ms,
                "Slow cache file operation"
            );
        } else {
            trace!(
                target: "cerebro_indom::perf",
                op = self.op,
                records,
                elapsed_ms,
                "Cache file operation completed"
            );
        }
        elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_parse() {
        assert_eq!(LogLevel::parse("DEBUG"), LogLevel::Debug);
        assert_eq!(LogLevel::parse("warning"), LogLevel::Warn);
        assert_eq!(LogLevel::parse("nonsense"), LogLevel::Info);
        assert_eq!(LogLevel::Trace.to_string(), "trace");
        assert!(LogLevel::Trace < LogLevel::Error);
    }

    #[test]
    fn test_io_timer_measures() {
        let path = Path::new("60.1");
        let timer = IoTimer::start("load", path);
        std::thread::sleep(Duration::from_millis(5));
        let elapsed = timer.finish(3);
        assert!(elapsed >= Duration::from_millis(5));
        assert!(elapsed < SLOW_IO * 40);
    }

    #[test]
    fn test_output_layer_for_every_format() {
        for format in ["json", "compact", "pretty", "unknown"] {
            let config = LoggingConfig {
                format: format.to_string(),
                ..LoggingConfig::default()
            };
            let subscriber = tracing_subscriber::registry().with(output_layer(&config));
            tracing::subscriber::with_default(subscriber, || {
                info!(target: "cerebro_indom::init", format, "layer built");
            });
        }
    }
}

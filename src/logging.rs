//! Logging setup for xscout.
//!
//! Everything logs through `tracing`; this module only decides where the
//! events go and how they look. Events always go to stderr so stdout carries
//! nothing but command output.
//!
//! # Usage
//!
//! ```rust
//! use xscout::logging::{init_logging, LogConfig};
//!
//! init_logging(&LogConfig::for_verbosity(false, 1));
//! tracing::info!(hashtag = "longevity", "Discovery started");
//! ```

use std::time::Instant;
use tracing_subscriber::{
    EnvFilter,
    filter::LevelFilter,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

/// Logging configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Most verbose level shown for xscout's own events.
    pub level: LevelFilter,
    pub format: LogFormat,
    pub timestamps: bool,
    /// Include the module path of each event.
    pub target: bool,
    /// Log page leases and other spans as they open and close.
    pub spans: bool,
    pub colors: bool,
}

/// Log line layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One line per event.
    Compact,
    /// Multi-line, field per line.
    Pretty,
    /// One line with thread, file and line number.
    Full,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self::for_verbosity(false, 0)
    }
}

impl LogConfig {
    /// Map `-q` / `-v` counts onto a configuration.
    ///
    /// Warnings are shown by default since skipped profiles and judge
    /// fallbacks are reported at that level; `-v` adds per-run progress.
    #[must_use]
    pub fn for_verbosity(quiet: bool, verbose: u8) -> Self {
        let (level, format) = match (quiet, verbose) {
            (true, _) => (LevelFilter::ERROR, LogFormat::Compact),
            (false, 0) => (LevelFilter::WARN, LogFormat::Compact),
            (false, 1) => (LevelFilter::INFO, LogFormat::Compact),
            (false, 2) => (LevelFilter::DEBUG, LogFormat::Pretty),
            (false, _) => (LevelFilter::TRACE, LogFormat::Full),
        };
        Self {
            level,
            format,
            timestamps: verbose > 0,
            target: verbose > 1,
            spans: verbose > 2,
            colors: std::env::var_os("NO_COLOR").is_none(),
        }
    }

    /// The directive used when `RUST_LOG` is unset. Dependencies stay at
    /// warn so reqwest and hyper do not drown out discovery events.
    #[must_use]
    pub fn filter_directive(&self) -> String {
        let own = self.level.to_string().to_lowercase();
        if self.level > LevelFilter::WARN {
            format!("warn,xscout={own}")
        } else {
            format!("xscout={own}")
        }
    }
}

/// Initialize the logging system. Later calls are ignored.
///
/// `RUST_LOG`, when set, replaces the directive from `config`.
pub fn init_logging(config: &LogConfig) {
    let env_filter = if std::env::var("RUST_LOG").is_ok() {
        EnvFilter::from_default_env()
    } else {
        EnvFilter::new(config.filter_directive())
    };

    let span_events = if config.spans {
        FmtSpan::NEW | FmtSpan::CLOSE
    } else {
        FmtSpan::NONE
    };

    let layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.colors)
        .with_target(config.target)
        .with_span_events(span_events);
    let registry = tracing_subscriber::registry().with(env_filter);

    // Each arm yields a distinct layer type.
    let _ = match (config.format, config.timestamps) {
        (LogFormat::Compact, false) => registry.with(layer.compact().without_time()).try_init(),
        (LogFormat::Compact, true) => registry.with(layer.compact()).try_init(),
        (LogFormat::Pretty, _) => registry.with(layer.pretty()).try_init(),
        (LogFormat::Full, _) => registry
            .with(
                layer
                    .with_thread_names(true)
                    .with_file(true)
                    .with_line_number(true),
            )
            .try_init(),
    };
}

/// Initialize logging from the CLI's `-q` and `-v` flags.
pub fn init_cli_logging(quiet: bool, verbose: u8) {
    init_logging(&LogConfig::for_verbosity(quiet, verbose));
}

/// Logs the start and end of a discovery call with its duration.
pub struct OperationGuard {
    name: String,
    start: Instant,
}

impl OperationGuard {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        tracing::debug!(operation = %name, "Starting");
        Self {
            name,
            start: Instant::now(),
        }
    }

    /// Record how many items the operation produced.
    pub fn complete(self, items: usize) {
        tracing::info!(
            operation = %self.name,
            items,
            elapsed_ms = self.start.elapsed().as_millis(),
            "Finished"
        );
    }

    /// Failures degrade to an empty result, so they log at warn.
    pub fn fail(self, error: &dyn std::error::Error) {
        tracing::warn!(
            operation = %self.name,
            elapsed_ms = self.start.elapsed().as_millis(),
            error = %error,
            "Failed; returning no results"
        );
    }
}

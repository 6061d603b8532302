use std::env;
use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::level_filters::LevelFilter;
use tracing_subscriber::filter::Directive;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, Layer, fmt as tfmt};

// Import CRATE_NAMES, which lists all crates in the workspace.
include!(concat!(env!("OUT_DIR"), "/constants.gen.rs"));

/// Controls the log format.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Auto detect the best format.
    ///
    /// This chooses [`LogFormat::Pretty`] for TTY, otherwise [`LogFormat::Simplified`].
    Auto,

    /// Pretty printing with colors.
    ///
    /// ```text
    ///  INFO logjam_server::services::streams: updated 3 streams
    /// ```
    Pretty,

    /// Simplified plain text output.
    ///
    /// ```text
    /// 2026-10-19T12:10:32.912Z  INFO logjam_server::services::streams: updated 3 streams
    /// ```
    Simplified,

    /// Dump out JSON lines.
    ///
    /// ```text
    /// {"timestamp":"2026-10-19T12:11:08.729716Z","level":"INFO","message":"updated 3 streams","target":"logjam_server::services::streams"}
    /// ```
    Json,
}

/// The logging level parsed from configuration.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// No logging at all.
    Off,
    /// Only errors.
    Error,
    /// Warnings and errors.
    Warn,
    /// The default level.
    Info,
    /// Debug messages.
    Debug,
    /// All messages.
    Trace,
}

impl LogLevel {
    /// Returns the tracing [`LevelFilter`].
    pub const fn level_filter(&self) -> LevelFilter {
        match self {
            LogLevel::Off => LevelFilter::OFF,
            LogLevel::Error => LevelFilter::ERROR,
            LogLevel::Warn => LevelFilter::WARN,
            LogLevel::Info => LevelFilter::INFO,
            LogLevel::Debug => LevelFilter::DEBUG,
            LogLevel::Trace => LevelFilter::TRACE,
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.level_filter().fmt(f)
    }
}

/// Controls the logging system.
#[derive(Clone, Debug, Deserialize, Serialize)]
#[serde(default)]
pub struct LogConfig {
    /// The log level for the exporter's own crates.
    pub level: LogLevel,

    /// Controls the log output format.
    ///
    /// Defaults to [`LogFormat::Auto`], which detects the best format based on the TTY.
    pub format: LogFormat,

    /// When set to `true`, backtraces are forced on.
    ///
    /// Otherwise, backtraces can be enabled by setting the `RUST_BACKTRACE` variable to `full`.
    pub enable_backtraces: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Auto,
            enable_backtraces: false,
        }
    }
}

/// Builds the filter used when `RUST_LOG` is not set.
///
/// Workspace crates log at the configured level, everything else at most at `INFO`.
fn default_filter(level: LogLevel) -> EnvFilter {
    let level = level.level_filter();
    let mut filter = EnvFilter::new(LevelFilter::INFO.min(level).to_string());

    for name in CRATE_NAMES {
        if let Ok(directive) = format!("{name}={level}").parse::<Directive>() {
            filter = filter.add_directive(directive);
        }
    }

    filter
}

/// Initialize the logging system.
///
/// `RUST_LOG` takes precedence over the configured level when it is set.
///
/// # Example
///
/// ```ignore
/// let log_config = logjam_log::LogConfig {
///     enable_backtraces: true,
///     ..Default::default()
/// };
///
/// logjam_log::init(&log_config);
/// ```
pub fn init(config: &LogConfig) {
    if config.enable_backtraces {
        // SAFETY: called once during startup before the runtime spawns any threads.
        unsafe { env::set_var("RUST_BACKTRACE", "full") };
    }

    let filter = match env::var(EnvFilter::DEFAULT_ENV) {
        Ok(_) => EnvFilter::from_default_env(),
        Err(_) => default_filter(config.level),
    };

    let format = match (config.format, console::user_attended()) {
        (LogFormat::Auto, true) | (LogFormat::Pretty, _) => {
            tfmt::layer().compact().without_time().boxed()
        }
        (LogFormat::Auto, false) | (LogFormat::Simplified, _) => {
            tfmt::layer().with_ansi(false).boxed()
        }
        (LogFormat::Json, _) => tfmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .boxed(),
    };

    tracing_subscriber::registry()
        .with(format.with_filter(filter))
        .try_init()
        .ok();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_filter_contains_workspace_crates() {
        let filter = default_filter(LogLevel::Debug).to_string();
        assert!(filter.contains("logjam_log=debug"), "{filter}");
    }

    #[test]
    fn test_level_deserialize() {
        let config: LogConfig = serde_json::from_str(r#"{"level": "trace", "format": "json"}"#)
            .expect("valid log config");
        assert_eq!(config.level, LogLevel::Trace);
        assert_eq!(config.format, LogFormat::Json);
        assert!(!config.enable_backtraces);
    }
}

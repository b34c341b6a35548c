//! Logging setup for the meter tools
//!
//! Console output goes to stderr so stdout stays free for command output.
//! File output, when a log directory is configured, rolls daily and is written
//! from a background thread.

use std::path::PathBuf;
use std::sync::{Mutex, OnceLock};

use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    fmt::{self, format::Writer, FmtContext, FormatEvent, FormatFields},
    layer::SubscriberExt,
    registry::LookupSpan,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

use crate::error::{Error, Result};

/// Custom format for log level with brackets: `[INFO]`, `[WARN]`, etc.
fn format_level(level: &Level) -> &'static str {
    match *level {
        Level::TRACE => "[TRACE]",
        Level::DEBUG => "[DEBUG]",
        Level::INFO => "[INFO]",
        Level::WARN => "[WARN]",
        Level::ERROR => "[ERROR]",
    }
}

/// Event formatter that outputs: `timestamp [LEVEL] message`
///
/// Example output: `2025-12-02T00:50:44.809Z [INFO] TCP connected: 10.0.0.5:1001`
struct BracketedLevelFormat;

impl<S, N> FormatEvent<S, N> for BracketedLevelFormat
where
    S: tracing::Subscriber + for<'a> LookupSpan<'a>,
    N: for<'a> FormatFields<'a> + 'static,
{
    fn format_event(
        &self,
        ctx: &FmtContext<'_, S, N>,
        mut writer: Writer<'_>,
        event: &tracing::Event<'_>,
    ) -> std::fmt::Result {
        write!(
            writer,
            "{} ",
            chrono::Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ")
        )?;

        let level = *event.metadata().level();
        if writer.has_ansi_escapes() {
            let color = match level {
                Level::TRACE => "\x1b[35m",
                Level::DEBUG => "\x1b[34m",
                Level::INFO => "\x1b[32m",
                Level::WARN => "\x1b[33m",
                Level::ERROR => "\x1b[31m",
            };
            write!(writer, "{}{}\x1b[0m ", color, format_level(&level))?;
        } else {
            write!(writer, "{} ", format_level(&level))?;
        }

        ctx.field_format().format_fields(writer.by_ref(), event)?;
        writeln!(writer)
    }
}

// Keeps the background file writers alive for the life of the process
static GUARDS: OnceLock<Mutex<Vec<WorkerGuard>>> = OnceLock::new();

#[derive(Debug, Clone)]
pub struct LogConfig {
    /// Application name, used as the log file prefix
    pub app_name: String,
    /// Level for the application's own crates
    pub level: Level,
    /// File output directory, console only when `None`
    pub log_dir: Option<PathBuf>,
    /// Write JSON lines to the log file
    pub enable_json: bool,
    /// Colored console output
    pub ansi: bool,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            app_name: "meterctl".to_string(),
            level: Level::INFO,
            log_dir: None,
            enable_json: false,
            ansi: true,
        }
    }
}

/// Filter directive: `RUST_LOG` wins, otherwise warn globally and `level`
/// for the application and the protocol library.
fn filter_directive(config: &LogConfig, rust_log: Option<String>) -> String {
    match rust_log {
        Some(env) if !env.trim().is_empty() => env,
        _ => {
            let level = config.level.as_str().to_lowercase();
            format!(
                "warn,{}={level},meter_link={level},common={level}",
                config.app_name.replace('-', "_")
            )
        },
    }
}

/// Parse a level name such as `debug` or `WARN`
pub fn parse_level(level: &str) -> Result<Level> {
    level
        .parse::<Level>()
        .map_err(|_| Error::Logging(format!("Invalid log level '{level}'")))
}

/// Initialize logging system with configuration
pub fn init_with_config(config: LogConfig) -> Result<()> {
    let directive = filter_directive(&config, std::env::var("RUST_LOG").ok());
    let env_filter = EnvFilter::try_new(&directive)
        .map_err(|e| Error::Logging(format!("Invalid filter '{directive}': {e}")))?;

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_ansi(config.ansi)
        .event_format(BracketedLevelFormat)
        .boxed();

    let file_layer = match &config.log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender =
                tracing_appender::rolling::daily(dir, format!("{}.log", config.app_name));
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);

            let guards = GUARDS.get_or_init(|| Mutex::new(Vec::new()));
            match guards.lock() {
                Ok(mut guards) => guards.push(guard),
                Err(poisoned) => poisoned.into_inner().push(guard),
            }

            let layer = if config.enable_json {
                fmt::layer()
                    .json()
                    .with_writer(non_blocking)
                    .with_target(true)
                    .boxed()
            } else {
                fmt::layer()
                    .with_writer(non_blocking)
                    .with_ansi(false)
                    .event_format(BracketedLevelFormat)
                    .boxed()
            };
            Some(layer)
        },
        None => None,
    };

    tracing_subscriber::registry()
        .with(env_filter)
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| Error::Logging(e.to_string()))?;

    tracing::debug!("Logging: {} filter={}", config.app_name, directive);
    if let Some(dir) = &config.log_dir {
        tracing::debug!("Log file: {}/{}.log.<date>", dir.display(), config.app_name);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[test]
    fn test_format_level() {
        assert_eq!(format_level(&Level::INFO), "[INFO]");
        assert_eq!(format_level(&Level::ERROR), "[ERROR]");
    }

    #[test]
    fn test_parse_level() {
        assert_eq!(parse_level("debug").unwrap(), Level::DEBUG);
        assert_eq!(parse_level("WARN").unwrap(), Level::WARN);
        assert!(parse_level("loud").is_err());
    }

    #[test]
    fn test_filter_directive_defaults() {
        let config = LogConfig {
            level: Level::DEBUG,
            ..Default::default()
        };
        assert_eq!(
            filter_directive(&config, None),
            "warn,meterctl=debug,meter_link=debug,common=debug"
        );
    }

    #[test]
    fn test_filter_directive_respects_rust_log() {
        let config = LogConfig::default();
        assert_eq!(
            filter_directive(&config, Some("trace".to_string())),
            "trace"
        );
        assert_eq!(
            filter_directive(&config, Some("  ".to_string())),
            "warn,meterctl=info,meter_link=info,common=info"
        );
    }

    #[test]
    fn test_init_with_file_output_once() {
        let dir = tempfile::tempdir().unwrap();
        let config = LogConfig {
            log_dir: Some(dir.path().join("logs")),
            ansi: false,
            ..Default::default()
        };

        init_with_config(config.clone()).unwrap();
        assert!(dir.path().join("logs").is_dir());
        tracing::info!("logging initialized");

        // a second global subscriber is refused
        assert!(matches!(init_with_config(config), Err(Error::Logging(_))));
    }
}

//! Logging setup for the input subsystem.
//!
//! Built on the `tracing` ecosystem: console output filtered by level, optional
//! daily-rolling file output, text or JSON formatting.

use crate::config::LoggingConfig;
use crate::error::{ConfigError, InputError};

use once_cell::sync::Lazy;
use std::path::Path;
use std::sync::Mutex;
use tracing::Level;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Layer, Registry};

/// Keeps the non-blocking file writer alive so buffered records are flushed.
static LOG_WORKER_GUARD: Lazy<Mutex<Option<WorkerGuard>>> = Lazy::new(|| Mutex::new(None));

/// Minimal stderr logging filtered by `RUST_LOG`, defaulting to `info`.
///
/// Intended for tests and early start-up. Errors (e.g. a subscriber is already set)
/// are ignored.
pub fn init_minimal_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(Level::INFO.to_string()));

    let _ = fmt::Subscriber::builder()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(atty::is(atty::Stream::Stderr))
        .try_init();
}

fn level_from_config(level: &str) -> Result<Level, InputError> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        invalid => Err(InputError::Config(ConfigError::ValidationError(format!(
            "Invalid log level in config: {}",
            invalid
        )))),
    }
}

fn file_layer(
    log_path: &Path,
    format: &str,
    level: Level,
) -> (Box<dyn Layer<Registry> + Send + Sync + 'static>, WorkerGuard) {
    let directory = log_path.parent().filter(|p| !p.as_os_str().is_empty()).unwrap_or_else(|| Path::new("."));
    let file_name = log_path
        .file_name()
        .unwrap_or_else(|| std::ffi::OsStr::new("novade-input.log"));
    let appender = tracing_appender::rolling::daily(directory, file_name);
    let (writer, guard) = tracing_appender::non_blocking(appender);

    let filter = EnvFilter::new(level.to_string());
    let layer = match format {
        "json" => fmt::layer()
            .json()
            .with_writer(writer)
            .with_ansi(false)
            .with_filter(filter)
            .boxed(),
        _ => fmt::layer().with_writer(writer).with_ansi(false).with_filter(filter).boxed(),
    };
    (layer, guard)
}

/// Installs the global subscriber described by `config`.
///
/// # Errors
///
/// Returns a configuration error for unknown levels, and `InputError::InvalidArgument`
/// if a global subscriber is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<(), InputError> {
    let level = level_from_config(&config.level)?;
    let format = config.format.to_lowercase();

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync + 'static>> = Vec::new();
    let console_filter = EnvFilter::new(level.to_string());
    layers.push(match format.as_str() {
        "json" => fmt::layer()
            .json()
            .with_writer(std::io::stdout)
            .with_ansi(false)
            .with_filter(console_filter)
            .boxed(),
        _ => fmt::layer()
            .with_writer(std::io::stdout)
            .with_ansi(atty::is(atty::Stream::Stdout))
            .with_filter(console_filter)
            .boxed(),
    });

    let mut guard = None;
    if let Some(path) = &config.file {
        let (layer, file_guard) = file_layer(path, &format, level);
        layers.push(layer);
        guard = Some(file_guard);
    }

    tracing_subscriber::registry()
        .with(layers)
        .try_init()
        .map_err(|e| InputError::InvalidArgument(format!("logging already initialized: {}", e)))?;

    if let Ok(mut slot) = LOG_WORKER_GUARD.lock() {
        *slot = guard;
    }
    tracing::info!("Logging initialized at level {} ({} format).", level, format);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_level_is_rejected_before_installing() {
        let config = LoggingConfig {
            level: "verbose".to_string(),
            ..LoggingConfig::default()
        };
        let err = init_logging(&config).unwrap_err();
        assert!(matches!(err, InputError::Config(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_level_parsing_is_case_insensitive() {
        assert_eq!(level_from_config("WARN").unwrap(), Level::WARN);
    }

    #[test]
    fn test_minimal_logging_can_be_called_twice() {
        init_minimal_logging();
        init_minimal_logging();
    }
}

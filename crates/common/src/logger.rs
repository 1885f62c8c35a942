use crate::config::AppConfig;
use crate::error::CodeSearchError;
use std::path::{Path, PathBuf};
use tracing::Level;
use tracing_subscriber::{
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
    EnvFilter, Layer,
};

/// Log file name inside the configured log directory
pub const LOG_FILE_NAME: &str = "codesearch.log";

/// Where log output goes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogOutput {
    /// stderr only (CLI one-shot commands)
    Console,
    /// stderr plus an append-only file in the given directory (server)
    ConsoleAndFile(PathBuf),
}

/// Initialize logging from application config
///
/// `RUST_LOG` takes precedence over `LOG_LEVEL`.
pub fn init(config: &AppConfig, output: LogOutput) -> Result<(), CodeSearchError> {
    match output {
        LogOutput::Console => setup_console_logging(&config.log_level),
        LogOutput::ConsoleAndFile(dir) => setup_logging(&dir, &config.log_level),
    }
}

/// Console + file logging
///
/// # Arguments
/// * `log_dir` - Directory where the log file is appended
/// * `log_level` - Fallback filter when `RUST_LOG` is unset
pub fn setup_logging(log_dir: &Path, log_level: &str) -> Result<(), CodeSearchError> {
    std::fs::create_dir_all(log_dir).map_err(|e| {
        CodeSearchError::config(format!(
            "Failed to create log directory {}: {}",
            log_dir.display(),
            e
        ))
    })?;

    let log_file_path = log_dir.join(LOG_FILE_NAME);
    let log_file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
        .map_err(|e| {
            CodeSearchError::config(format!(
                "Failed to open log file {}: {}",
                log_file_path.display(),
                e
            ))
        })?;

    let env_filter = env_filter(log_level);

    let console_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_line_number(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter.clone());

    let file_layer = fmt::layer()
        .with_writer(log_file)
        .with_target(true)
        .with_thread_ids(true)
        .with_line_number(true)
        .with_ansi(false)
        .with_span_events(FmtSpan::CLOSE)
        .with_filter(env_filter);

    tracing_subscriber::registry()
        .with(console_layer)
        .with(file_layer)
        .try_init()
        .map_err(|e| CodeSearchError::config(format!("Logging already initialized: {}", e)))?;

    tracing::info!(
        "Logging initialized: level={}, log_file={}",
        log_level,
        log_file_path.display()
    );

    Ok(())
}

/// Console-only logging
pub fn setup_console_logging(log_level: &str) -> Result<(), CodeSearchError> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_target(false)
        .with_env_filter(env_filter(log_level))
        .try_init()
        .map_err(|e| CodeSearchError::config(format!("Logging already initialized: {}", e)))?;

    Ok(())
}

fn env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(parse_log_level(log_level).as_str().to_lowercase()))
}

/// Parse string to tracing Level, falling back to INFO
pub fn parse_log_level(level: &str) -> Level {
    match level.to_lowercase().as_str() {
        "trace" => Level::TRACE,
        "debug" => Level::DEBUG,
        "info" => Level::INFO,
        "warn" | "warning" => Level::WARN,
        "error" => Level::ERROR,
        _ => {
            eprintln!("Invalid log level '{}', defaulting to INFO", level);
            Level::INFO
        }
    }
}

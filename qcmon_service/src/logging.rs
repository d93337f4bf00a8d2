//! Structured logging for the QC monitoring service
//!
//! Provides context-rich logging tagged with the data source and, where
//! relevant, the stream or station identifier. Events go through `tracing`;
//! `init_logger` installs the console subscriber and an optional log file.

use std::fmt;
use std::fs::OpenOptions;
use std::sync::Mutex;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Log Levels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    Debug,
    Info,
    Warning,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warning => "warn",
            LogLevel::Error => "error",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LogLevel::Debug => write!(f, "DEBUG"),
            LogLevel::Info => write!(f, "INFO"),
            LogLevel::Warning => write!(f, "WARN"),
            LogLevel::Error => write!(f, "ERROR"),
        }
    }
}

impl std::str::FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "debug" | "trace" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warning),
            "error" => Ok(LogLevel::Error),
            other => Err(format!("unknown log level '{}'", other)),
        }
    }
}

// ---------------------------------------------------------------------------
// Data Source Types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DataSource {
    /// SeisComP metadata database
    Database,
    /// FDSN station web service
    Fdsnws,
    /// scqueryqc process
    Tool,
    /// QC XML parsing
    Parser,
    System,
}

impl fmt::Display for DataSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DataSource::Database => write!(f, "DB"),
            DataSource::Fdsnws => write!(f, "FDSNWS"),
            DataSource::Tool => write!(f, "QCTOOL"),
            DataSource::Parser => write!(f, "XML"),
            DataSource::System => write!(f, "SYS"),
        }
    }
}

// ---------------------------------------------------------------------------
// Failure Classification
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureType {
    /// Expected failure - e.g. a gateway that has no station configuration
    Expected,
    /// Unexpected failure - indicates service degradation or configuration issue
    Unexpected,
    /// Unknown - cannot determine if this is expected or not
    Unknown,
}

impl fmt::Display for FailureType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureType::Expected => write!(f, "EXPECTED"),
            FailureType::Unexpected => write!(f, "UNEXPECTED"),
            FailureType::Unknown => write!(f, "UNKNOWN"),
        }
    }
}

// ---------------------------------------------------------------------------
// Logger Configuration
// ---------------------------------------------------------------------------

/// Initialize the global logger.
///
/// `RUST_LOG` takes precedence over `min_level`. With `log_file` set, events
/// are appended to that file instead of stderr; if the file cannot be
/// opened, console output is used. Calling this more than once is harmless.
pub fn init_logger(min_level: LogLevel, log_file: Option<&str>, console_timestamps: bool) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("qcmon_service={},qcmon={}", min_level.as_filter(), min_level.as_filter())));

    let file = log_file.and_then(|path| {
        match OpenOptions::new().create(true).append(true).open(path) {
            Ok(f) => Some(f),
            Err(e) => {
                eprintln!("Failed to open log file {}: {}", path, e);
                None
            }
        }
    });

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false);

    let result = match (file, console_timestamps) {
        (Some(f), _) => builder.with_ansi(false).with_writer(Mutex::new(f)).try_init(),
        (None, true) => builder.with_writer(std::io::stderr).try_init(),
        (None, false) => builder.without_time().with_writer(std::io::stderr).try_init(),
    };
    // already initialized (tests, repeated calls)
    let _ = result;
}

// ---------------------------------------------------------------------------
// Public Logging Functions
// ---------------------------------------------------------------------------

/// Log a general informational message
pub fn info(source: DataSource, stream_id: Option<&str>, message: &str) {
    tracing::info!(source = %source, stream = stream_id.unwrap_or("-"), "{}", message);
}

/// Log a warning message
pub fn warn(source: DataSource, stream_id: Option<&str>, message: &str) {
    tracing::warn!(source = %source, stream = stream_id.unwrap_or("-"), "{}", message);
}

/// Log an error message
pub fn error(source: DataSource, stream_id: Option<&str>, message: &str) {
    tracing::error!(source = %source, stream = stream_id.unwrap_or("-"), "{}", message);
}

/// Log a debug message
pub fn debug(source: DataSource, stream_id: Option<&str>, message: &str) {
    tracing::debug!(source = %source, stream = stream_id.unwrap_or("-"), "{}", message);
}

// ---------------------------------------------------------------------------
// Failure Classification Helpers
// ---------------------------------------------------------------------------

/// Classify a metadata gateway failure based on its message.
pub fn classify_gateway_failure(error_message: &str) -> FailureType {
    if error_message.contains("not available from") {
        // e.g. station configuration asked of the FDSN web service
        FailureType::Expected
    } else if error_message.contains("connection")
        || error_message.contains("timed out")
        || error_message.contains("error sending request")
    {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

/// Classify a QC tool failure.
pub fn classify_tool_failure(error_message: &str) -> FailureType {
    if error_message.contains("No such file") || error_message.contains("failed to start") {
        FailureType::Unexpected
    } else {
        FailureType::Unknown
    }
}

// ---------------------------------------------------------------------------
// Structured Failure Logging
// ---------------------------------------------------------------------------

/// Log a metadata gateway failure with automatic classification
pub fn log_gateway_failure(source: DataSource, operation: &str, err: &dyn std::error::Error) {
    let error_msg = err.to_string();
    let failure_type = classify_gateway_failure(&error_msg);

    let message = format!("{} failed [{}]: {}", operation, failure_type, error_msg);

    match failure_type {
        FailureType::Expected => debug(source, None, &message),
        FailureType::Unexpected => error(source, None, &message),
        FailureType::Unknown => warn(source, None, &message),
    }
}

/// Log a QC tool failure with classification
pub fn log_tool_failure(command_line: &str, err: &dyn std::error::Error) {
    let error_msg = err.to_string();
    let failure_type = classify_tool_failure(&error_msg);

    let message = format!("`{}` failed [{}]: {}", command_line, failure_type, error_msg);
    error(DataSource::Tool, None, &message);
}

// ---------------------------------------------------------------------------
// Request Summary Logging
// ---------------------------------------------------------------------------

/// Log a summary of a completed QC request
pub fn log_request_summary(requested_streams: usize, reporting_streams: usize, samples: usize, silent_stations: usize) {
    let message = format!(
        "QC request complete: {}/{} streams reported, {} samples, {} silent stations",
        reporting_streams, requested_streams, samples, silent_stations
    );

    if reporting_streams == 0 && requested_streams > 0 {
        warn(DataSource::System, None, &message);
    } else if silent_stations > 0 {
        warn(DataSource::System, None, &message);
    } else {
        info(DataSource::System, None, &message);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_level_ordering() {
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warning);
        assert!(LogLevel::Warning < LogLevel::Error);
    }

    #[test]
    fn test_log_level_parses_config_values() {
        assert_eq!("warning".parse::<LogLevel>(), Ok(LogLevel::Warning));
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert!("loud".parse::<LogLevel>().is_err());
    }

    #[test]
    fn test_failure_classification() {
        let result = classify_gateway_failure("Configuration lookup failed: station configuration is not available from FDSNWS");
        assert_eq!(result, FailureType::Expected);

        let result = classify_gateway_failure("Configuration lookup failed: error connecting to server: connection refused");
        assert_eq!(result, FailureType::Unexpected);

        let result = classify_tool_failure("QC tool failed: failed to start scqueryqc: No such file or directory");
        assert_eq!(result, FailureType::Unexpected);

        let result = classify_tool_failure("QC tool failed: database not reachable");
        assert_eq!(result, FailureType::Unknown);
    }

    #[test]
    fn test_init_logger_twice_does_not_panic() {
        init_logger(LogLevel::Debug, None, false);
        init_logger(LogLevel::Info, None, true);
        info(DataSource::System, None, "logger initialized");
    }
}

//! # Error Handling
//!
//! Error types for the accumulator pipeline and how they are converted from the
//! libraries the crate sits on.
//!
//! ## Where errors can happen:
//! - **Construction**: zero block size, zero channel bound, unreadable PCM file
//! - **Configuration**: config.toml syntax, environment overrides, validation
//! - **Teardown**: the producer thread or consumer task failed to join
//!
//! ## Where they cannot:
//! The real-time path (`FrameAccumulator::ingest`, `BlockSender::push`) never
//! returns an error. Overload is handled by the drop-oldest policy and shows up
//! only in the dropped-block counter.

use std::fmt;

/// Custom error types for the application.
///
/// ## Error Categories:
/// - **Internal**: task/thread failures and report serialization
/// - **InvalidInput**: a constructor was given an unusable argument
/// - **ConfigError**: configuration file or environment variable problems
/// - **ValidationError**: configuration values failed validation rules
/// - **Source**: the audio source could not be opened or decoded
///
/// ## Usage Example:
/// ```rust
/// # use frame_accumulator::error::AppError;
/// let err = AppError::InvalidInput("block size must be greater than 0".to_string());
/// assert!(err.to_string().starts_with("Invalid input"));
/// ```
#[derive(Debug)]
pub enum AppError {
    /// Thread/task join failures, report serialization
    Internal(String),

    /// A constructor argument cannot produce a working component
    InvalidInput(String),

    /// Configuration file or environment variable problems
    ConfigError(String),

    /// Configuration values failed validation
    ValidationError(String),

    /// Audio source could not be opened or decoded
    Source(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AppError::Internal(msg) => write!(f, "Internal error: {}", msg),
            AppError::InvalidInput(msg) => write!(f, "Invalid input: {}", msg),
            AppError::ConfigError(msg) => write!(f, "Configuration error: {}", msg),
            AppError::ValidationError(msg) => write!(f, "Validation error: {}", msg),
            AppError::Source(msg) => write!(f, "Audio source error: {}", msg),
        }
    }
}

impl std::error::Error for AppError {}

impl AppError {
    /// Machine-readable error kind, logged as `error.kind` by the binary.
    pub fn kind(&self) -> &'static str {
        match self {
            AppError::Internal(_) => "internal_error",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::ConfigError(_) => "config_error",
            AppError::ValidationError(_) => "validation_error",
            AppError::Source(_) => "source_error",
        }
    }
}

/// Report serialization failures are internal: the report types are ours.
impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Internal(format!("JSON serialization error: {}", err))
    }
}

/// Automatic conversion from configuration errors to AppError.
///
/// ## When this happens:
/// - config.toml file has invalid syntax
/// - An `APP_*` environment variable cannot be parsed into its field
impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::ConfigError(err.to_string())
    }
}

/// I/O errors only come from opening audio sources.
impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Source(err.to_string())
    }
}

/// Shorthand for `Result<T, AppError>`.
pub type AppResult<T> = Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_kind() {
        let err = AppError::ValidationError("block_size must be greater than 0".to_string());
        assert_eq!(err.to_string(), "Validation error: block_size must be greater than 0");
        assert_eq!(err.kind(), "validation_error");
    }

    #[test]
    fn test_io_error_becomes_source_error() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "missing.pcm");
        let err: AppError = io.into();
        assert!(matches!(err, AppError::Source(_)));
    }

    #[test]
    fn test_config_error_keeps_its_kind() {
        let err: AppError = config::ConfigError::NotFound("pipeline.block_size".to_string()).into();
        assert_eq!(err.kind(), "config_error");
        assert!(err.to_string().starts_with("Configuration error"));
    }
}

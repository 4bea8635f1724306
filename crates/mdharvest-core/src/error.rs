use std::fmt;

use serde::Serialize;
use thiserror::Error;

/// Application-wide error types for mdharvest.
#[derive(Error, Debug, Clone)]
pub enum AppError {
    /// Transport-level HTTP failure that is not a timeout or connect error.
    #[error("HTTP error: {0}")]
    HttpError(String),

    /// The content service answered with a non-2xx status.
    #[error("Content service error (HTTP {status_code}): {message}")]
    ServiceError { status_code: u16, message: String },

    /// The content service answered 2xx but reported `success: false`.
    #[error("Content service rejected request: {0}")]
    ServiceRejected(String),

    /// The circuit breaker for an endpoint is open; no request was sent.
    #[error("Content service unavailable: {endpoint} circuit open, retry after {retry_after_secs}s")]
    ServiceUnavailable {
        endpoint: String,
        retry_after_secs: u64,
    },

    /// Request timed out.
    #[error("Request timed out after {0} seconds")]
    Timeout(u64),

    /// Rate limit exceeded (HTTP 429).
    #[error("Rate limit exceeded")]
    RateLimitExceeded,

    /// Network/connection error.
    #[error("Network error: {0}")]
    NetworkError(String),

    /// The URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The URL is outside the configured crawl boundary.
    #[error("URL outside crawl boundary: {0}")]
    OutOfBoundary(String),

    /// JSON serialization/deserialization failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),

    /// Filesystem operation failed.
    #[error("I/O error: {0}")]
    IoError(String),

    /// Destination file exists and overwriting is disabled.
    #[error("File already exists: {0}")]
    FileExists(String),

    /// Invalid configuration; the run never starts.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// The run was cancelled by the caller.
    #[error("Cancelled")]
    Cancelled,
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::SerializationError(e.to_string())
    }
}

/// Coarse classification used for retry decisions and error listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Transient,
    Permanent,
    ServiceUnavailable,
    Io,
    Config,
    Cancelled,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Transient => "transient",
            ErrorKind::Permanent => "permanent",
            ErrorKind::ServiceUnavailable => "service_unavailable",
            ErrorKind::Io => "io",
            ErrorKind::Config => "config",
            ErrorKind::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl AppError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            AppError::Timeout(_) | AppError::NetworkError(_) | AppError::RateLimitExceeded => {
                ErrorKind::Transient
            }
            AppError::ServiceError { status_code, .. } if *status_code >= 500 => {
                ErrorKind::Transient
            }
            AppError::HttpError(msg)
                if msg.contains("timeout") || msg.contains("connect") || msg.contains("reset") =>
            {
                ErrorKind::Transient
            }
            AppError::ServiceUnavailable { .. } => ErrorKind::ServiceUnavailable,
            AppError::IoError(_) | AppError::FileExists(_) => ErrorKind::Io,
            AppError::ConfigError(_) => ErrorKind::Config,
            AppError::Cancelled => ErrorKind::Cancelled,
            _ => ErrorKind::Permanent,
        }
    }

    /// Returns true if this error is transient and worth retrying.
    pub fn is_retryable(&self) -> bool {
        self.kind() == ErrorKind::Transient
    }

    /// Returns true if this error should count against the circuit breaker.
    ///
    /// Permanent client errors (4xx) say nothing about service health.
    pub fn should_trip_circuit(&self) -> bool {
        self.is_retryable()
    }

    /// Maps an HTTP status from the content service onto the taxonomy.
    pub fn from_status(status_code: u16, message: impl Into<String>) -> Self {
        if status_code == 429 {
            return AppError::RateLimitExceeded;
        }
        AppError::ServiceError {
            status_code,
            message: message.into(),
        }
    }
}

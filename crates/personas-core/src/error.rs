//! Error types for personas-core.

use std::time::Duration;
use thiserror::Error;

/// Result type alias using personas-core Error
pub type Result<T> = std::result::Result<T, Error>;

/// How a failed remote call should be treated by [`crate::retry::RetryPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryClass {
    /// Remote asked us to slow down; an explicit wait may be attached.
    RateLimited { retry_after: Option<Duration> },
    /// 5xx or transport failure.
    Transient,
    /// Validation, auth, not-found and everything else.
    Permanent,
}

/// Core error types for canvas persona operations
#[derive(Error, Debug)]
pub enum Error {
    // Remote (transient) errors
    #[error("Rate limited: {message}")]
    RateLimited {
        message: String,
        retry_after: Option<Duration>,
    },

    #[error("Server error {status}: {message}")]
    Server { status: u16, message: String },

    #[error("Network error: {0}")]
    Network(String),

    // Remote (permanent) errors
    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    // Workflow errors
    #[error("Missing prerequisite: {0}")]
    MissingPrerequisite(String),

    #[error("Insufficient results in {stage}: {succeeded} succeeded, {required} required")]
    InsufficientResults {
        stage: &'static str,
        succeeded: usize,
        required: usize,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Task panicked: {0}")]
    Panic(String),

    #[error("Generation returned no content")]
    EmptyGeneration,

    // IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // Generic errors
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Map an HTTP status (and optional `Retry-After`) to the error taxonomy.
    pub fn from_status(status: u16, message: impl Into<String>, retry_after: Option<Duration>) -> Self {
        let message = message.into();
        match status {
            429 => Self::RateLimited {
                message,
                retry_after,
            },
            500..=599 => Self::Server { status, message },
            401 | 403 => Self::Unauthorized(message),
            404 => Self::NotFound(message),
            _ => Self::Validation(format!("HTTP {}: {}", status, message)),
        }
    }

    /// Create a rate limit error without an explicit wait
    pub fn rate_limited(message: impl Into<String>) -> Self {
        Self::RateLimited {
            message: message.into(),
            retry_after: None,
        }
    }

    /// Create a transient server error
    pub fn server(status: u16, message: impl Into<String>) -> Self {
        Self::Server {
            status,
            message: message.into(),
        }
    }

    /// Classify this error for retry purposes
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::RateLimited { retry_after, .. } => RetryClass::RateLimited {
                retry_after: *retry_after,
            },
            Self::Server { .. } | Self::Network(_) => RetryClass::Transient,
            _ => RetryClass::Permanent,
        }
    }

    /// Check whether a retry could help
    pub fn is_retryable(&self) -> bool {
        !matches!(self.retry_class(), RetryClass::Permanent)
    }

    /// Check if this error is a not found error
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

#[cfg(feature = "client")]
impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string(), None);
        }
        if err.is_decode() {
            return Self::Other(format!("Failed to decode response: {}", err));
        }
        if err.is_builder() {
            return Self::Validation(err.to_string());
        }
        Self::Network(err.to_string())
    }
}

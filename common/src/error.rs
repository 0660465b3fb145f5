//! Error handling for the quern-common crate.

use thiserror::Error;

/// Common error type that abstracts over underlying library errors.
///
/// This enum provides structured error types with support for error chaining
/// so that the engine crates can surface a single failure cause to the
/// coordinator while keeping the original error attached.
#[derive(Error, Debug)]
pub enum CommonError {
    #[error("IO operation failed: {message}")]
    IoError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Serialization failed: {message}")]
    SerializationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Invalid configuration: {message}")]
    ConfigurationError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Compression failed: {message}")]
    CompressionError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Resource not found: {message}")]
    NotFoundError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    #[error("Internal error: {message}")]
    InternalError {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

/// Result type alias for common operations.
pub type Result<T> = std::result::Result<T, CommonError>;

impl CommonError {
    /// Create an IO error with a custom message.
    pub fn io_error<S: Into<String>>(message: S) -> Self {
        Self::IoError {
            message: message.into(),
            source: None,
        }
    }

    /// Create an IO error with a custom message and source error.
    pub fn io_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::IoError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a serialization error with a custom message.
    pub fn serialization_error<S: Into<String>>(message: S) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a serialization error with a custom message and source error.
    pub fn serialization_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::SerializationError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a configuration error with a custom message.
    pub fn configuration_error<S: Into<String>>(message: S) -> Self {
        Self::ConfigurationError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a compression error with a custom message.
    pub fn compression_error<S: Into<String>>(message: S) -> Self {
        Self::CompressionError {
            message: message.into(),
            source: None,
        }
    }

    /// Create a compression error with a custom message and source error.
    pub fn compression_error_with_source<S: Into<String>, E: Into<anyhow::Error>>(
        message: S,
        source: E,
    ) -> Self {
        Self::CompressionError {
            message: message.into(),
            source: Some(source.into()),
        }
    }

    /// Create a not-found error with a custom message.
    pub fn not_found_error<S: Into<String>>(message: S) -> Self {
        Self::NotFoundError {
            message: message.into(),
            source: None,
        }
    }

    /// Create an internal error with a custom message.
    pub fn internal_error<S: Into<String>>(message: S) -> Self {
        Self::InternalError {
            message: message.into(),
            source: None,
        }
    }
}

impl From<std::io::Error> for CommonError {
    fn from(err: std::io::Error) -> Self {
        Self::IoError {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}

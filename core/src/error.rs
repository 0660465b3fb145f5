//! Error types for the quern execution core.
//!
//! The taxonomy distinguishes terminal configuration errors (raised before
//! any task runs), I/O errors that fail the current task attempt, and
//! invariant violations (programming errors). Coordination races - a
//! partition reassigned out from under a task, no additional partitions
//! available - are expected protocol outcomes and are modeled as plain
//! values, never as errors.

use thiserror::Error;

use quern_common::CommonError;

/// Error type for stage-graph construction, merging and task execution.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Invalid job or stage configuration. Fatal to job submission; no
    /// partial job state is created.
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    /// I/O failure while reading a channel or writing a spill file. Fatal to
    /// the current task attempt; the coordinator decides whether to retry.
    #[error("IO error: {message}")]
    Io {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },

    /// A malformed intermediate file or an unusable merge input.
    #[error("Merge error: {message}")]
    Merge { message: String },

    /// Channel-level failure (closed or panicked pipeline stage).
    #[error("Channel error: {message}")]
    Channel { message: String },

    /// Programming-error class: operating on a disposed engine, dequeueing
    /// from an empty queue, merging with no inputs. Fast-fail, not retried.
    #[error("Invalid operation: {message}")]
    InvalidOperation { message: String },

    /// The task runner itself failed.
    #[error("Task failed: {message}")]
    TaskFailed {
        message: String,
        #[source]
        source: Option<anyhow::Error>,
    },
}

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

impl EngineError {
    pub fn configuration<S: Into<String>>(message: S) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub fn io<S: Into<String>>(message: S) -> Self {
        Self::Io {
            message: message.into(),
            source: None,
        }
    }

    pub fn merge<S: Into<String>>(message: S) -> Self {
        Self::Merge {
            message: message.into(),
        }
    }

    pub fn channel<S: Into<String>>(message: S) -> Self {
        Self::Channel {
            message: message.into(),
        }
    }

    pub fn invalid_operation<S: Into<String>>(message: S) -> Self {
        Self::InvalidOperation {
            message: message.into(),
        }
    }

    pub fn task_failed<S: Into<String>, E: Into<anyhow::Error>>(message: S, source: E) -> Self {
        Self::TaskFailed {
            message: message.into(),
            source: Some(source.into()),
        }
    }
}

impl From<CommonError> for EngineError {
    fn from(err: CommonError) -> Self {
        match err {
            CommonError::ConfigurationError { message, .. } => Self::Configuration { message },
            other => Self::Io {
                message: other.to_string(),
                source: Some(other.into()),
            },
        }
    }
}

impl From<std::io::Error> for EngineError {
    fn from(err: std::io::Error) -> Self {
        Self::Io {
            message: err.to_string(),
            source: Some(err.into()),
        }
    }
}

impl From<bincode::error::EncodeError> for EngineError {
    fn from(err: bincode::error::EncodeError) -> Self {
        Self::Io {
            message: format!("record encoding failed: {err}"),
            source: Some(err.into()),
        }
    }
}

impl From<bincode::error::DecodeError> for EngineError {
    fn from(err: bincode::error::DecodeError) -> Self {
        Self::Merge {
            message: format!("record decoding failed: {err}"),
        }
    }
}

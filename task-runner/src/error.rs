//! Error types for task-runner

use thiserror::Error;

/// Result type alias for runner operations
pub type Result<T> = std::result::Result<T, RunnerError>;

/// Errors that can occur while preparing, running or reporting a task
#[derive(Debug, Error)]
pub enum RunnerError {
    /// Workspace directory could not be prepared
    #[error("Workspace error: {message}")]
    Workspace {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// Platform request could not be sent
    #[error("Platform request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// Platform rejected a request
    #[error("Platform returned status {status}: {message}")]
    Platform { status: u16, message: String },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RunnerError {
    /// Create a Workspace error
    pub fn workspace(message: impl Into<String>) -> Self {
        Self::Workspace {
            message: message.into(),
            source: None,
        }
    }

    /// Create a Workspace error with source
    pub fn workspace_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Workspace {
            message: message.into(),
            source: Some(source),
        }
    }

    /// Create a Platform error
    pub fn platform(status: u16, message: impl Into<String>) -> Self {
        Self::Platform {
            status,
            message: message.into(),
        }
    }
}

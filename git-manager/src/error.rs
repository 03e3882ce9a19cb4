//! Error types for git operations

use thiserror::Error;

/// Result type alias for git operations
pub type Result<T> = std::result::Result<T, GitError>;

/// Errors that can occur while running git
#[derive(Debug, Error)]
pub enum GitError {
    /// Git command execution failed
    #[error("Git command failed: {message}")]
    CommandFailed {
        message: String,
        #[source]
        source: Option<std::io::Error>,
    },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl GitError {
    /// Create a CommandFailed error
    pub fn command_failed(message: impl Into<String>) -> Self {
        Self::CommandFailed {
            message: message.into(),
            source: None,
        }
    }

    /// Create a CommandFailed error with source
    pub fn command_failed_with_source(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::CommandFailed {
            message: message.into(),
            source: Some(source),
        }
    }
}

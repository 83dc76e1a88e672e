//! Git-specific error types.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum GitError {
    #[error("Failed to run git: {0}")]
    Spawn(String),

    #[error("git {command} failed: {message}")]
    CommandFailed { command: String, message: String },

    #[error("Git network error: {0}")]
    Network(String),

    #[error("Git authentication failed: {0}")]
    AuthFailed(String),

    #[error("Failed to prepare git credentials: {0}")]
    AuthSetup(String),

    #[error("Branch not found on remote: {0}")]
    BranchNotFound(String),
}

impl GitError {
    /// Returns true if the error is likely transient and the operation can be retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, GitError::Network(_))
    }
}

/// Classifies a failed git invocation by its stderr.
pub fn classify_git_error(command: &str, stderr: &str) -> GitError {
    let lower = stderr.to_lowercase();
    let message = stderr.trim().to_string();

    if lower.contains("could not resolve host")
        || lower.contains("connection refused")
        || lower.contains("connection timed out")
        || lower.contains("network is unreachable")
        || lower.contains("failed to connect")
        || lower.contains("couldn't connect to server")
        || lower.contains("the remote end hung up unexpectedly")
    {
        return GitError::Network(message);
    }

    if lower.contains("authentication failed")
        || lower.contains("permission denied")
        || lower.contains("invalid credentials")
        || lower.contains("could not read username")
    {
        return GitError::AuthFailed(message);
    }

    GitError::CommandFailed {
        command: command.to_string(),
        message,
    }
}

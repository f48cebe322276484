//! Error types for SSH shell sessions

use thiserror::Error;

/// Main error type for shell sessions and command execution
#[derive(Debug, Error)]
pub enum ShellError {
    /// SSH connection failed
    #[error("SSH connection error: {0}")]
    Connection(String),

    /// Authentication failed (password or key)
    #[error("Authentication failed: {0}")]
    Authentication(String),

    /// Shell channel could not be opened or died
    #[error("Shell channel error: {0}")]
    Channel(String),

    /// Shell could not be brought to an echo-free, history-free state
    #[error("Shell handshake failed: {0}")]
    Handshake(String),

    /// User context switch did not produce the expected identity
    #[error("Elevation verification failed: expected user '{expected}', got '{actual}'")]
    ElevationVerification { expected: String, actual: String },

    /// Command execution timed out
    #[error("Command timeout after {0}s")]
    Timeout(u64),

    /// Command was cancelled
    #[error("Command cancelled")]
    Cancelled,

    /// Operation not allowed in the current session state
    #[error("Cannot {operation} while session is {state}")]
    InvalidState {
        operation: &'static str,
        state: String,
    },

    /// Invalid parameters provided
    #[error("Invalid parameters: {0}")]
    InvalidParams(String),

    /// File transfer (SFTP) failure
    #[error("Transfer error: {0}")]
    Transfer(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// SSH key parsing error
    #[error("SSH key error: {0}")]
    SshKey(String),
}

/// Result type alias using ShellError
pub type Result<T> = std::result::Result<T, ShellError>;

impl ShellError {
    /// Create a connection error from a string
    pub fn connection(msg: impl Into<String>) -> Self {
        ShellError::Connection(msg.into())
    }

    /// Create an authentication error from a string
    pub fn auth(msg: impl Into<String>) -> Self {
        ShellError::Authentication(msg.into())
    }

    /// Create a channel error from a string
    pub fn channel(msg: impl Into<String>) -> Self {
        ShellError::Channel(msg.into())
    }

    /// Create a handshake error from a string
    pub fn handshake(msg: impl Into<String>) -> Self {
        ShellError::Handshake(msg.into())
    }

    /// Create an elevation verification error
    pub fn elevation(expected: impl Into<String>, actual: impl Into<String>) -> Self {
        ShellError::ElevationVerification {
            expected: expected.into(),
            actual: actual.into(),
        }
    }

    /// Create an invalid params error from a string
    pub fn invalid_params(msg: impl Into<String>) -> Self {
        ShellError::InvalidParams(msg.into())
    }

    /// Create a transfer error from a string
    pub fn transfer(msg: impl Into<String>) -> Self {
        ShellError::Transfer(msg.into())
    }

    /// Create a config error from a string
    pub fn config(msg: impl Into<String>) -> Self {
        ShellError::Config(msg.into())
    }

    /// Cancellation is an expected outcome, not an application failure
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ShellError::Cancelled)
    }

    pub fn is_timeout(&self) -> bool {
        matches!(self, ShellError::Timeout(_))
    }

    /// Errors raised while establishing a connection (transport or auth)
    pub fn is_connection(&self) -> bool {
        matches!(
            self,
            ShellError::Connection(_) | ShellError::Authentication(_) | ShellError::SshKey(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShellError::Connection("failed to connect".to_string());
        assert_eq!(err.to_string(), "SSH connection error: failed to connect");

        let err = ShellError::Timeout(5);
        assert_eq!(err.to_string(), "Command timeout after 5s");

        let err = ShellError::elevation("svc", "alice");
        assert_eq!(
            err.to_string(),
            "Elevation verification failed: expected user 'svc', got 'alice'"
        );
    }

    #[test]
    fn test_error_classification() {
        assert!(ShellError::Cancelled.is_cancelled());
        assert!(ShellError::Timeout(2).is_timeout());
        assert!(ShellError::auth("rejected").is_connection());
        assert!(!ShellError::handshake("stty").is_connection());
    }
}

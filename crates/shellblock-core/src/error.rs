//! Error types for shellblock.

use thiserror::Error;

use crate::{Lifecycle, SessionId};

/// Main error type for shellblock operations.
#[derive(Debug, Error)]
pub enum Error {
    /// Session not found
    #[error("Session not found: {0}")]
    SessionNotFound(SessionId),

    /// Input submitted while the session cannot accept a new command
    #[error("Session {id} is not ready for input (state: {lifecycle})")]
    NotReady {
        /// Session that rejected the input
        id: SessionId,
        /// Lifecycle state at the time of the request
        lifecycle: Lifecycle,
    },

    /// Keys or credentials sent while no command is running
    #[error("No command is running in session {0}")]
    NoCommandRunning(SessionId),

    /// Elevation requested without a configured credential
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// Malformed or out-of-order marker sequence
    #[error("Protocol violation: {0}")]
    ProtocolViolation(String),

    /// The shell process behind the session has exited
    #[error("Session {0} has terminated")]
    UpstreamTerminated(SessionId),

    /// Session limit reached
    #[error("Session limit reached (max: {0})")]
    SessionLimitReached(usize),

    /// PTY-related errors
    #[error("PTY error: {0}")]
    PtyError(String),

    /// Invalid input or parameters
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic error with custom message
    #[error("{0}")]
    Other(String),
}

/// Coarse classification of errors, used by callers that translate errors
/// into protocol responses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Unknown session id
    NotFound,
    /// Session busy, starting, or otherwise not accepting the request
    NotReady,
    /// Elevation or credential use not permitted
    PermissionDenied,
    /// Malformed marker stream
    ProtocolViolation,
    /// Shell process is gone
    UpstreamTerminated,
    /// Bad request parameters or configuration
    InvalidInput,
    /// Everything else (I/O, PTY, serialization)
    Internal,
}

impl Error {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::SessionNotFound(_) => ErrorKind::NotFound,
            Error::NotReady { .. } | Error::NoCommandRunning(_) => ErrorKind::NotReady,
            Error::SessionLimitReached(_) => ErrorKind::NotReady,
            Error::PermissionDenied(_) => ErrorKind::PermissionDenied,
            Error::ProtocolViolation(_) => ErrorKind::ProtocolViolation,
            Error::UpstreamTerminated(_) => ErrorKind::UpstreamTerminated,
            Error::InvalidInput(_) | Error::Config(_) => ErrorKind::InvalidInput,
            Error::PtyError(_) | Error::Io(_) | Error::Serialization(_) | Error::Other(_) => {
                ErrorKind::Internal
            }
        }
    }
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_not_found_error() {
        let err = Error::SessionNotFound(SessionId::new(7));
        assert_eq!(err.to_string(), "Session not found: 7");
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[test]
    fn test_not_ready_error() {
        let err = Error::NotReady {
            id: SessionId::new(2),
            lifecycle: Lifecycle::Running,
        };
        assert_eq!(
            err.to_string(),
            "Session 2 is not ready for input (state: running)"
        );
        assert_eq!(err.kind(), ErrorKind::NotReady);
    }

    #[test]
    fn test_no_command_running_error() {
        let err = Error::NoCommandRunning(SessionId::new(1));
        assert_eq!(err.to_string(), "No command is running in session 1");
        assert_eq!(err.kind(), ErrorKind::NotReady);
    }

    #[test]
    fn test_permission_denied_error() {
        let err = Error::PermissionDenied("no credential configured".to_string());
        assert_eq!(
            err.to_string(),
            "Permission denied: no credential configured"
        );
        assert_eq!(err.kind(), ErrorKind::PermissionDenied);
    }

    #[test]
    fn test_protocol_violation_error() {
        let err = Error::ProtocolViolation("unknown tag 'z'".to_string());
        assert_eq!(err.to_string(), "Protocol violation: unknown tag 'z'");
        assert_eq!(err.kind(), ErrorKind::ProtocolViolation);
    }

    #[test]
    fn test_upstream_terminated_error() {
        let err = Error::UpstreamTerminated(SessionId::new(4));
        assert_eq!(err.to_string(), "Session 4 has terminated");
        assert_eq!(err.kind(), ErrorKind::UpstreamTerminated);
    }

    #[test]
    fn test_session_limit_reached_error() {
        let err = Error::SessionLimitReached(10);
        assert_eq!(err.to_string(), "Session limit reached (max: 10)");
    }

    #[test]
    fn test_pty_error() {
        let err = Error::PtyError("spawn failed".to_string());
        assert_eq!(err.to_string(), "PTY error: spawn failed");
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_config_error() {
        let err = Error::Config("missing field: shell".to_string());
        assert_eq!(err.to_string(), "Configuration error: missing field: shell");
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }

    #[test]
    fn test_serialization_error_conversion() {
        let json_err = serde_json::from_str::<i32>("invalid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Serialization(_)));
    }
}

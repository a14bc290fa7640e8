//! Error taxonomy for streaming sessions.
//!
//! Every failure path of the protocol engine maps to exactly one
//! [`StreamError`] variant. None of them are retried inside the core: sequence
//! numbers are not resumable across a new socket, so reconnect policy belongs
//! to the caller.

use thiserror::Error;

/// Errors produced by the frame codec, the segmenter and running sessions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// Header or length inconsistency, or a payload that cannot be decoded.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Serialization or compression code the codec does not understand.
    #[error("Unsupported {kind} code: {code:#x}")]
    UnsupportedEncoding { kind: &'static str, code: u8 },

    /// Unexpected message type / flag combination, sequence regression, or
    /// use of a session after it reached an absorbing state.
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Error frame sent by the remote service.
    #[error("Remote error {code}: {message}")]
    RemoteError { code: u32, message: String },

    /// A push would grow the segmenter buffer past its configured cap.
    #[error("Audio buffer overflow: {buffered} buffered + {incoming} incoming exceeds cap of {cap} bytes")]
    BufferOverflow {
        buffered: usize,
        incoming: usize,
        cap: usize,
    },

    /// Socket closed or errored before a terminal frame was observed.
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// No inbound frame within the configured deadline.
    #[error("Timeout: {0}")]
    Timeout(String),

    /// Connecting or upgrading the socket failed.
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl StreamError {
    /// Whether the error aborts the session it occurred in.
    ///
    /// `BufferOverflow` only rejects the offending push and `Configuration`
    /// is raised before a session exists.
    pub fn is_session_fatal(&self) -> bool {
        !matches!(
            self,
            StreamError::BufferOverflow { .. } | StreamError::Configuration(_)
        )
    }

    /// Stable snake_case identifier, used in gateway error events.
    pub fn code(&self) -> &'static str {
        match self {
            StreamError::MalformedFrame(_) => "malformed_frame",
            StreamError::UnsupportedEncoding { .. } => "unsupported_encoding",
            StreamError::ProtocolError(_) => "protocol_error",
            StreamError::RemoteError { .. } => "remote_error",
            StreamError::BufferOverflow { .. } => "buffer_overflow",
            StreamError::ConnectionLost(_) => "connection_lost",
            StreamError::Timeout(_) => "timeout",
            StreamError::ConnectionFailed(_) => "connection_failed",
            StreamError::Configuration(_) => "configuration_error",
        }
    }
}

/// Result alias used throughout the core.
pub type StreamResult<T> = Result<T, StreamError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_display() {
        let err = StreamError::RemoteError {
            code: 45000001,
            message: "invalid audio format".to_string(),
        };
        assert_eq!(err.to_string(), "Remote error 45000001: invalid audio format");
        assert_eq!(err.code(), "remote_error");
    }

    #[test]
    fn test_unsupported_encoding_display() {
        let err = StreamError::UnsupportedEncoding {
            kind: "compression",
            code: 0xf,
        };
        assert_eq!(err.to_string(), "Unsupported compression code: 0xf");
    }

    #[test]
    fn test_buffer_overflow_is_not_session_fatal() {
        let err = StreamError::BufferOverflow {
            buffered: 0,
            incoming: 70000,
            cap: 64000,
        };
        assert!(!err.is_session_fatal());
        assert!(StreamError::Timeout("no frame".into()).is_session_fatal());
        assert!(StreamError::ConnectionLost("closed".into()).is_session_fatal());
    }
}

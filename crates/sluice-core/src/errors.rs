//! Error hierarchy for the query session.
//!
//! - [`SessionError`]: connection lifecycle and send failures surfaced to callers
//! - [`CodecError`]: frame encode/decode failures, never fatal to a connection
//!
//! `SessionError` is `Clone` because a single in-flight connect attempt is
//! shared by every caller that joins it, and each of them receives the same
//! outcome.

use thiserror::Error;

/// Errors surfaced by the session to its callers.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// Creating the transport failed (DNS, refused, bad URL, HTTP upgrade rejected).
    #[error("failed to connect to {url}: {reason}")]
    ConnectError {
        /// The address we tried.
        url: String,
        /// Why it failed.
        reason: String,
    },

    /// The transport handshake did not complete in time.
    #[error("connection to {url} timed out after {timeout_ms}ms")]
    ConnectTimeout {
        /// The address we tried.
        url: String,
        /// How long we waited.
        timeout_ms: u64,
    },

    /// Automatic reconnection gave up; the caller must reconnect manually.
    #[error("reconnection exhausted after {attempts} attempts")]
    ReconnectExhausted {
        /// Number of attempts made.
        attempts: u32,
    },

    /// No live transport to write to.
    #[error("not connected")]
    NotConnected,

    /// A write on the live transport failed.
    #[error("transport error: {0}")]
    Transport(String),

    /// An outbound message could not be encoded.
    #[error("{0}")]
    Codec(#[from] CodecError),

    /// The session was closed and accepts no further work.
    #[error("session closed")]
    SessionClosed,
}

impl SessionError {
    /// Whether this error concerns the connection rather than a single message.
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        !matches!(self, Self::Codec(_))
    }
}

/// Errors from the frame codec.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum CodecError {
    /// The inbound frame is not a well-formed JSON object.
    #[error("malformed frame: {0}")]
    Malformed(String),

    /// The frame decoded but its payload does not fit the message kind.
    #[error("invalid {kind} payload: {reason}")]
    InvalidPayload {
        /// Message kind whose payload was rejected.
        kind: String,
        /// Why it was rejected.
        reason: String,
    },

    /// An outbound message could not be serialized.
    #[error("failed to encode {kind} message: {reason}")]
    Encode {
        /// Outbound message kind.
        kind: String,
        /// Serializer error.
        reason: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn connect_error_display() {
        let err = SessionError::ConnectError {
            url: "ws://localhost:8080/ws".into(),
            reason: "connection refused".into(),
        };
        assert_eq!(
            err.to_string(),
            "failed to connect to ws://localhost:8080/ws: connection refused"
        );
    }

    #[test]
    fn connect_timeout_display() {
        let err = SessionError::ConnectTimeout {
            url: "ws://db:8080/ws".into(),
            timeout_ms: 5000,
        };
        assert!(err.to_string().contains("5000ms"));
        assert!(err.to_string().contains("ws://db:8080/ws"));
    }

    #[test]
    fn reconnect_exhausted_display() {
        let err = SessionError::ReconnectExhausted { attempts: 5 };
        assert_eq!(err.to_string(), "reconnection exhausted after 5 attempts");
    }

    #[test]
    fn codec_error_converts() {
        let err: SessionError = CodecError::Malformed("eof".into()).into();
        assert!(matches!(err, SessionError::Codec(_)));
        assert!(!err.is_connection_error());
        assert_eq!(err.to_string(), "malformed frame: eof");
    }

    #[test]
    fn connection_errors_classified() {
        assert!(SessionError::NotConnected.is_connection_error());
        assert!(SessionError::Transport("broken pipe".into()).is_connection_error());
        assert!(SessionError::ReconnectExhausted { attempts: 1 }.is_connection_error());
    }

    #[test]
    fn invalid_payload_display() {
        let err = CodecError::InvalidPayload {
            kind: "metadata".into(),
            reason: "missing columns".into(),
        };
        assert_eq!(err.to_string(), "invalid metadata payload: missing columns");
    }
}

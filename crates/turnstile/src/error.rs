//! Unified error type for Turnstile.

use turnstile_protocol::ProtocolError;
use turnstile_session::SessionError;
use turnstile_transport::TransportError;

/// Top-level error wrapping every crate-specific error.
///
/// Sub-crate errors convert with `?` through the `#[from]` impls.
#[derive(Debug, thiserror::Error)]
pub enum TurnstileError {
    /// Socket-level failure (bind, accept, send, recv).
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// A frame could not be encoded or decoded.
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Admission failed or was refused.
    #[error(transparent)]
    Session(#[from] SessionError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_transport_error() {
        let err = TransportError::ConnectionClosed("gone".into());
        let turnstile_err: TurnstileError = err.into();
        assert!(matches!(turnstile_err, TurnstileError::Transport(_)));
        assert!(turnstile_err.to_string().contains("gone"));
    }

    #[test]
    fn test_from_protocol_error() {
        let err = ProtocolError::InvalidMessage("bad".into());
        let turnstile_err: TurnstileError = err.into();
        assert!(matches!(turnstile_err, TurnstileError::Protocol(_)));
    }

    #[test]
    fn test_from_session_error_keeps_reject_reason() {
        let err = SessionError::Rejected("server is full (1/1)".into());
        let turnstile_err: TurnstileError = err.into();
        assert!(matches!(turnstile_err, TurnstileError::Session(_)));
        assert!(turnstile_err.to_string().contains("server is full (1/1)"));
    }
}

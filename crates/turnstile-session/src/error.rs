//! Error types for the session layer.

use std::fmt;

use turnstile_protocol::IdentityKey;
use turnstile_transport::ConnectionId;

use crate::AuthStatus;

/// Errors that can occur in the session layer.
///
/// Admission refusals are *not* errors from the authority's point of
/// view; they are [`RejectReason`]s sent to the peer. These variants
/// cover broken invariants on the authority side and failures on the
/// joining side.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// The roster already holds a user with this identity key.
    ///
    /// The coordinator checks for this before it starts validation, so
    /// seeing it means the single-writer discipline was broken.
    #[error("identity {0} is already in the roster")]
    DuplicateIdentity(IdentityKey),

    /// The roster already holds a user on this connection.
    #[error("peer {0} is already in the roster")]
    DuplicatePeer(ConnectionId),

    /// The authority refused to admit us.
    #[error("connection rejected: {0}")]
    Rejected(String),

    /// The local identity provider could not produce a ticket.
    #[error("identity ticket unavailable: {0}")]
    TicketUnavailable(String),

    /// A handshake message arrived that makes no sense right now.
    #[error("unexpected handshake message: {0}")]
    UnexpectedMessage(&'static str),
}

/// Why a connection attempt was refused.
///
/// The `Display` form is the human-readable reason carried by
/// `ConnectionRejected`. Every refusal reaches the peer; none is fatal to
/// the authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RejectReason {
    /// The roster is at capacity.
    ServerFull { count: usize, max: usize },

    /// The peer runs a different build.
    VersionMismatch { client: String, server: String },

    /// The handshake decoded but its content is unusable.
    Malformed(String),

    /// Someone with this identity is already in the session.
    IdentityInUse(IdentityKey),

    /// This connection already has an admitted user.
    AlreadyAdmitted,

    /// The identity provider refused to even begin validation.
    ValidatorStartFailed,

    /// The identity provider answered with something other than OK.
    ValidationFailed {
        identity_key: IdentityKey,
        status: AuthStatus,
    },

    /// The identity provider never answered.
    TimedOut,

    /// The authority is closing.
    ShuttingDown,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::ServerFull { count, max } => {
                write!(f, "server is full ({count}/{max})")
            }
            Self::VersionMismatch { client, server } => {
                write!(f, "version mismatch: client {client}, server {server}")
            }
            Self::Malformed(detail) => write!(f, "malformed handshake: {detail}"),
            Self::IdentityInUse(key) => {
                write!(f, "identity already in session ({key})")
            }
            Self::AlreadyAdmitted => write!(f, "connection already admitted"),
            Self::ValidatorStartFailed => write!(f, "failed to start auth session"),
            Self::ValidationFailed {
                identity_key,
                status,
            } => write!(f, "identity validation failed ({identity_key}): {status}"),
            Self::TimedOut => write!(f, "authentication timed out"),
            Self::ShuttingDown => write!(f, "server shutting down"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reject_reason_server_full_includes_capacity() {
        let reason = RejectReason::ServerFull { count: 1, max: 1 };
        assert_eq!(reason.to_string(), "server is full (1/1)");
    }

    #[test]
    fn test_reject_reason_version_mismatch_names_both_versions() {
        let reason = RejectReason::VersionMismatch {
            client: "0.9".into(),
            server: "1.0".into(),
        };
        let text = reason.to_string();
        assert!(text.contains("0.9"));
        assert!(text.contains("1.0"));
    }

    #[test]
    fn test_reject_reason_validation_failed_names_status() {
        let reason = RejectReason::ValidationFailed {
            identity_key: IdentityKey(5),
            status: AuthStatus::Banned,
        };
        assert_eq!(
            reason.to_string(),
            "identity validation failed (ID-5): banned"
        );
    }

    #[test]
    fn test_reject_reason_already_admitted() {
        assert_eq!(
            RejectReason::AlreadyAdmitted.to_string(),
            "connection already admitted"
        );
    }

    #[test]
    fn test_reject_reason_timed_out() {
        assert!(RejectReason::TimedOut.to_string().contains("timed out"));
    }
}

//! Core protocol types for Turnstile's handshake.
//!
//! The handshake is three messages long:
//!
//! ```text
//! authority                                 peer
//!     │ ── HandshakeRequest ─────────────────→ │
//!     │ ←──────────────── HandshakeResponse ── │  version, ticket, key, name
//!     │ ── ConnectionAccepted / Rejected ────→ │
//! ```
//!
//! Everything here is plain data. Deciding what a response *means* is the
//! session layer's job.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::ProtocolError;

/// Number of bytes an identity key occupies on the wire.
pub const IDENTITY_KEY_LEN: usize = 8;

// ---------------------------------------------------------------------------
// IdentityKey
// ---------------------------------------------------------------------------

/// The stable numeric identifier of an authenticated identity.
///
/// Peers send it as eight little-endian bytes next to their ticket; the
/// authority parses it once and keys the roster and the identity
/// provider's sessions by it.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(transparent)]
pub struct IdentityKey(pub u64);

impl IdentityKey {
    /// Parses the wire form of a key.
    ///
    /// # Errors
    /// Returns [`ProtocolError::InvalidIdentityKey`] unless `bytes` is
    /// exactly [`IDENTITY_KEY_LEN`] long.
    pub fn from_wire(bytes: &[u8]) -> Result<Self, ProtocolError> {
        let raw: [u8; IDENTITY_KEY_LEN] =
            bytes.try_into().map_err(|_| ProtocolError::InvalidIdentityKey {
                expected: IDENTITY_KEY_LEN,
                actual: bytes.len(),
            })?;
        Ok(Self(u64::from_le_bytes(raw)))
    }

    /// Returns the wire form of this key.
    pub fn to_wire(self) -> [u8; IDENTITY_KEY_LEN] {
        self.0.to_le_bytes()
    }
}

impl fmt::Display for IdentityKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ID-{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// HandshakeMessage
// ---------------------------------------------------------------------------

/// Every message exchanged during admission.
///
/// Internally tagged, so JSON looks like
/// `{ "type": "ConnectionRejected", "reason": "version mismatch: ..." }`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum HandshakeMessage {
    /// Authority → Peer: "prove who you are."
    HandshakeRequest,

    /// Peer → Authority: the identity proof.
    ///
    /// `ticket` is opaque to everyone but the identity provider.
    /// `identity_key` should be [`IDENTITY_KEY_LEN`] bytes; it is kept
    /// as raw bytes here so a malformed key can still be decoded and
    /// answered with a proper rejection instead of a dropped frame.
    HandshakeResponse {
        version: String,
        ticket: Vec<u8>,
        identity_key: Vec<u8>,
        display_name: String,
    },

    /// Authority → Peer: "you're in."
    ConnectionAccepted,

    /// Authority → Peer: "you're not." The peer closes its own transport.
    ConnectionRejected { reason: String },
}

impl HandshakeMessage {
    /// Builds a response with a well-formed identity key.
    pub fn response(
        version: impl Into<String>,
        ticket: Vec<u8>,
        identity_key: IdentityKey,
        display_name: impl Into<String>,
    ) -> Self {
        Self::HandshakeResponse {
            version: version.into(),
            ticket,
            identity_key: identity_key.to_wire().to_vec(),
            display_name: display_name.into(),
        }
    }

    /// Builds a rejection.
    pub fn rejected(reason: impl fmt::Display) -> Self {
        Self::ConnectionRejected {
            reason: reason.to_string(),
        }
    }

    /// Returns `true` for messages only the authority may send.
    pub fn is_from_authority(&self) -> bool {
        !matches!(self, Self::HandshakeResponse { .. })
    }

    /// Short name for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::HandshakeRequest => "HandshakeRequest",
            Self::HandshakeResponse { .. } => "HandshakeResponse",
            Self::ConnectionAccepted => "ConnectionAccepted",
            Self::ConnectionRejected { .. } => "ConnectionRejected",
        }
    }
}

// ---------------------------------------------------------------------------
// Envelope
// ---------------------------------------------------------------------------

/// The top-level wire frame. Every message travels inside one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Per-sender sequence number, starting at 0.
    pub seq: u64,

    /// Milliseconds since the sender started.
    pub timestamp: u64,

    /// The handshake message itself.
    pub message: HandshakeMessage,
}

impl Envelope {
    /// Wraps a message.
    pub fn new(seq: u64, timestamp: u64, message: HandshakeMessage) -> Self {
        Self {
            seq,
            timestamp,
            message,
        }
    }
}

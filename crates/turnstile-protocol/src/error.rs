//! Error types for the protocol layer.

/// Errors that can occur in the protocol layer.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    /// Serialization failed (turning a Rust type into bytes).
    #[cfg(feature = "json")]
    #[error("encode failed: {0}")]
    Encode(serde_json::Error),

    /// Deserialization failed (turning bytes into a Rust type).
    ///
    /// Common causes: malformed JSON, missing required fields,
    /// or an unknown message `type`.
    #[cfg(feature = "json")]
    #[error("decode failed: {0}")]
    Decode(serde_json::Error),

    /// The identity key field did not carry exactly eight bytes.
    #[error("identity key must be {expected} bytes, got {actual}")]
    InvalidIdentityKey { expected: usize, actual: usize },

    /// The message decoded but violates the handshake rules.
    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

//! Wire protocol for Turnstile.
//!
//! This crate defines the messages an authority and a joining peer
//! exchange while the peer proves who it is:
//!
//! - **Types** ([`HandshakeMessage`], [`Envelope`], [`IdentityKey`]) —
//!   the structures that travel on the wire.
//! - **Codec** ([`Codec`] trait, [`JsonCodec`]) — how those messages
//!   are converted to/from bytes.
//! - **Errors** ([`ProtocolError`]) — what can go wrong during
//!   encoding/decoding.
//!
//! ```text
//! Transport (bytes) → Protocol (Envelope) → Session (admission)
//! ```

mod codec;
mod error;
mod types;

pub use codec::Codec;
#[cfg(feature = "json")]
pub use codec::JsonCodec;
pub use error::ProtocolError;
pub use types::{Envelope, HandshakeMessage, IdentityKey, IDENTITY_KEY_LEN};

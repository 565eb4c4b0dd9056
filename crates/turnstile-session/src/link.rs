//! The coordinator's view of the transport.

use turnstile_protocol::HandshakeMessage;
use turnstile_transport::{ConnectionId, PeerStatus};

/// Sends handshake messages to peers and reports whether they are still
/// connected.
///
/// `send` is fire-and-forget: it must not block the drive loop. The host
/// server implements it by pushing onto each connection task's outbound
/// channel; tests implement it with a `RefCell<Vec<_>>`.
pub trait PeerLink {
    /// Queues `message` for delivery to `peer`. Unknown or closed peers
    /// are silently skipped.
    fn send(&self, peer: ConnectionId, message: HandshakeMessage);

    /// Current transport status of `peer`. Unknown peers are
    /// [`PeerStatus::Disconnected`].
    fn status(&self, peer: ConnectionId) -> PeerStatus;
}

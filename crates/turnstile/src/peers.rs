//! The drive loop's table of live connections.

use std::collections::HashMap;

use tokio::sync::mpsc;
use turnstile_protocol::HandshakeMessage;
use turnstile_session::PeerLink;
use turnstile_transport::{ConnectionId, PeerStatus};

/// Outbound half of a connection task: messages pushed here are framed
/// and written to the socket in order.
pub(crate) type Outbound = mpsc::UnboundedSender<HandshakeMessage>;

/// What connection tasks report to the drive loop.
#[derive(Debug)]
pub(crate) enum PeerEvent {
    Connected {
        peer: ConnectionId,
        outbound: Outbound,
    },
    Message {
        peer: ConnectionId,
        message: HandshakeMessage,
    },
    Disconnected {
        peer: ConnectionId,
    },
}

pub(crate) type PeerEventSender = mpsc::UnboundedSender<PeerEvent>;
pub(crate) type PeerEventReceiver = mpsc::UnboundedReceiver<PeerEvent>;

/// Connections the drive loop can still reach.
///
/// A peer is `Connected` from its `Connected` event until its
/// `Disconnected` event, or until its task drops the outbound receiver,
/// whichever comes first.
#[derive(Debug, Default)]
pub(crate) struct PeerTable {
    peers: HashMap<ConnectionId, Outbound>,
}

impl PeerTable {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn insert(&mut self, peer: ConnectionId, outbound: Outbound) {
        self.peers.insert(peer, outbound);
    }

    pub(crate) fn remove(&mut self, peer: ConnectionId) {
        self.peers.remove(&peer);
    }

    pub(crate) fn len(&self) -> usize {
        self.peers.len()
    }

    /// Drops every outbound sender. Each connection task flushes what it
    /// already has and then closes its socket.
    pub(crate) fn release_all(&mut self) {
        self.peers.clear();
    }
}

impl PeerLink for PeerTable {
    fn send(&self, peer: ConnectionId, message: HandshakeMessage) {
        match self.peers.get(&peer) {
            Some(outbound) => {
                if outbound.send(message).is_err() {
                    tracing::debug!(%peer, "connection task gone, message dropped");
                }
            }
            None => {
                tracing::debug!(%peer, kind = message.kind(), "send to unknown peer dropped");
            }
        }
    }

    fn status(&self, peer: ConnectionId) -> PeerStatus {
        match self.peers.get(&peer) {
            Some(outbound) if !outbound.is_closed() => PeerStatus::Connected,
            _ => PeerStatus::Disconnected,
        }
    }
}

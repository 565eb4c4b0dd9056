//! The challenge/response handshake, one state machine per side.
//!
//! ```text
//! Peer                                  Authority
//!  │ ──────── (transport connect) ────────→ │ on_raw_connect
//!  │ ←──────── HandshakeRequest ─────────── │
//!  │ ──────── HandshakeResponse ──────────→ │ on_message → Connect queued
//!  │ ←── ConnectionAccepted / Rejected ──── │ (sent by the coordinator)
//! ```
//!
//! Neither side touches the network directly. The authority sends through
//! a [`PeerLink`] and feeds the [`OperationQueue`](crate::OperationQueue);
//! the client hands back a [`ClientStep`] for its caller to act on.

use std::collections::HashMap;

use turnstile_protocol::HandshakeMessage;
use turnstile_transport::ConnectionId;

use crate::{
    ConnectRequest, ConnectionOperation, EventSender, PeerLink, QueueHandle,
    SessionError, SessionEvent, TicketIssuer,
};

// ---------------------------------------------------------------------------
// Authority side
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PeerPhase {
    /// `HandshakeRequest` sent, nothing back yet.
    AwaitingResponse,
    /// A Connect operation was queued for this peer.
    Submitted,
}

/// Challenges each new connection and turns the answer into a queued
/// Connect operation.
///
/// A peer gets exactly one Connect per connection. Repeated responses are
/// dropped here, before they can reach the coordinator.
#[derive(Debug)]
pub struct HandshakeAuthority {
    peers: HashMap<ConnectionId, PeerPhase>,
    queue: QueueHandle,
}

impl HandshakeAuthority {
    pub fn new(queue: QueueHandle) -> Self {
        Self {
            peers: HashMap::new(),
            queue,
        }
    }

    /// A transport connection opened: ask it to identify itself.
    pub fn on_raw_connect(&mut self, peer: ConnectionId, link: &impl PeerLink) {
        if self.peers.insert(peer, PeerPhase::AwaitingResponse).is_some() {
            tracing::warn!(%peer, "raw connect for a known peer, restarting handshake");
        }
        tracing::debug!(%peer, "sending handshake request");
        link.send(peer, HandshakeMessage::HandshakeRequest);
    }

    /// A message arrived from `peer`.
    ///
    /// Returns whether it produced a Connect operation.
    pub fn on_message(&mut self, peer: ConnectionId, message: HandshakeMessage) -> bool {
        if message.is_from_authority() {
            tracing::warn!(%peer, kind = message.kind(), "peer sent an authority-only message");
            return false;
        }

        let Some(phase) = self.peers.get_mut(&peer) else {
            tracing::warn!(%peer, "handshake response from unknown peer dropped");
            return false;
        };
        if *phase == PeerPhase::Submitted {
            tracing::warn!(%peer, "duplicate handshake response dropped");
            return false;
        }

        match ConnectRequest::from_message(message) {
            Ok(request) => {
                *phase = PeerPhase::Submitted;
                tracing::debug!(%peer, version = %request.version, "handshake response received");
                self.queue.enqueue(ConnectionOperation::connect(peer, request));
                true
            }
            Err(other) => {
                tracing::warn!(%peer, kind = other.kind(), "unexpected handshake message");
                false
            }
        }
    }

    /// A transport connection closed: forget it and queue a Disconnect.
    ///
    /// The Disconnect is queued even if the peer never answered, so that
    /// it lands behind any Connect that is still waiting.
    pub fn on_raw_disconnect(&mut self, peer: ConnectionId) {
        self.peers.remove(&peer);
        self.queue.enqueue(ConnectionOperation::disconnect(peer));
    }

    /// Peers with an open handshake or a submitted connect.
    pub fn peer_count(&self) -> usize {
        self.peers.len()
    }
}

// ---------------------------------------------------------------------------
// Peer side
// ---------------------------------------------------------------------------

/// Where a joining peer is in the handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientPhase {
    /// Transport open, waiting to be challenged.
    Connecting,
    /// Response sent, waiting for the verdict.
    AwaitingVerdict,
    Joined,
    Rejected(String),
    /// Torn down locally.
    Closed,
}

/// What the caller of [`HandshakeClient::on_message`] should do next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientStep {
    /// Send this message to the authority.
    Reply(HandshakeMessage),
    /// Admitted. Nothing to send.
    Joined,
    /// Refused. The caller must close its transport.
    Rejected(String),
    /// Nothing to do.
    Ignored,
}

/// The joining peer's half of the handshake.
pub struct HandshakeClient<I: TicketIssuer> {
    issuer: I,
    version: String,
    phase: ClientPhase,
    ticket_issued: bool,
    events: EventSender,
}

impl<I: TicketIssuer> HandshakeClient<I> {
    /// `version` is compared byte-for-byte against the authority's
    /// required version.
    pub fn new(issuer: I, version: impl Into<String>, events: EventSender) -> Self {
        Self {
            issuer,
            version: version.into(),
            phase: ClientPhase::Connecting,
            ticket_issued: false,
            events,
        }
    }

    pub fn phase(&self) -> &ClientPhase {
        &self.phase
    }

    pub fn is_joined(&self) -> bool {
        self.phase == ClientPhase::Joined
    }

    /// Handles one message from the authority.
    ///
    /// # Errors
    /// Returns [`SessionError::TicketUnavailable`] if the issuer cannot
    /// produce a ticket when challenged.
    pub fn on_message(&mut self, message: HandshakeMessage) -> Result<ClientStep, SessionError> {
        let step = match (self.phase.clone(), message) {
            (ClientPhase::Connecting, HandshakeMessage::HandshakeRequest) => {
                let issued = self.issuer.issue_ticket()?;
                self.ticket_issued = true;
                self.phase = ClientPhase::AwaitingVerdict;
                tracing::debug!(identity_key = %issued.identity_key, "answering handshake request");
                ClientStep::Reply(HandshakeMessage::response(
                    self.version.clone(),
                    issued.ticket,
                    issued.identity_key,
                    self.issuer.display_name(),
                ))
            }
            (ClientPhase::AwaitingVerdict, HandshakeMessage::ConnectionAccepted) => {
                self.phase = ClientPhase::Joined;
                tracing::info!("joined remote session");
                let _ = self.events.send(SessionEvent::JoinedRemoteSession);
                ClientStep::Joined
            }
            (
                ClientPhase::Connecting | ClientPhase::AwaitingVerdict,
                HandshakeMessage::ConnectionRejected { reason },
            ) => {
                tracing::warn!(%reason, "connection rejected by authority");
                self.phase = ClientPhase::Rejected(reason.clone());
                ClientStep::Rejected(reason)
            }
            (phase, message) => {
                tracing::debug!(?phase, kind = message.kind(), "handshake message ignored");
                ClientStep::Ignored
            }
        };
        Ok(step)
    }

    /// Local teardown. Cancels the ticket if one was issued and, if the
    /// peer had joined, emits `ExitedRemoteSession`. Calling it again does
    /// nothing.
    pub fn close(&mut self) {
        if self.phase == ClientPhase::Closed {
            return;
        }
        if self.ticket_issued {
            self.issuer.cancel_ticket();
            self.ticket_issued = false;
        }
        if self.phase == ClientPhase::Joined {
            tracing::info!("exited remote session");
            let _ = self.events.send(SessionEvent::ExitedRemoteSession);
        }
        self.phase = ClientPhase::Closed;
    }
}

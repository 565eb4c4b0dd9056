//! Per-connection task: frames in, frames out.
//!
//! Each accepted connection gets its own Tokio task running
//! [`handle_connection`]. The task owns the socket and nothing else; every
//! admission decision is made by the drive loop. The flow is:
//!   1. Register with the drive loop (`PeerEvent::Connected`)
//!   2. Loop: decode incoming envelopes and forward their messages, frame
//!      and write whatever the drive loop queues for this peer
//!   3. On exit, report `PeerEvent::Disconnected` (from a drop guard)

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use turnstile_protocol::{Codec, Envelope, HandshakeMessage};
use turnstile_transport::{Connection, ConnectionId, WebSocketConnection};

use crate::peers::{PeerEvent, PeerEventSender};
use crate::TurnstileError;

/// Reports the disconnect when the handler exits, however it exits.
struct DisconnectGuard {
    peer: ConnectionId,
    events: PeerEventSender,
}

impl Drop for DisconnectGuard {
    fn drop(&mut self) {
        // The drive loop may already be gone during shutdown.
        let _ = self.events.send(PeerEvent::Disconnected { peer: self.peer });
    }
}

/// Stamps outgoing envelopes with a sequence number and a timestamp.
pub(crate) struct EnvelopeWriter {
    seq: u64,
    start: Instant,
}

impl EnvelopeWriter {
    pub(crate) fn new() -> Self {
        Self {
            seq: 0,
            start: Instant::now(),
        }
    }

    pub(crate) fn wrap(&mut self, message: HandshakeMessage) -> Envelope {
        let envelope = Envelope::new(
            self.seq,
            self.start.elapsed().as_millis() as u64,
            message,
        );
        self.seq += 1;
        envelope
    }
}

/// Handles a single connection from accept to close.
pub(crate) async fn handle_connection<C: Codec>(
    conn: WebSocketConnection,
    codec: Arc<C>,
    events: PeerEventSender,
) -> Result<(), TurnstileError> {
    let peer = conn.id();
    let (outbound, mut outbound_rx) = mpsc::unbounded_channel();

    if events.send(PeerEvent::Connected { peer, outbound }).is_err() {
        tracing::debug!(%peer, "server stopped before connection registered");
        let _ = conn.close().await;
        return Ok(());
    }
    let _guard = DisconnectGuard {
        peer,
        events: events.clone(),
    };
    tracing::debug!(%peer, "handling new connection");

    let mut writer = EnvelopeWriter::new();

    loop {
        tokio::select! {
            incoming = conn.recv() => {
                let data = match incoming {
                    Ok(Some(data)) => data,
                    Ok(None) => {
                        tracing::info!(%peer, "connection closed by peer");
                        break;
                    }
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "recv error");
                        break;
                    }
                };

                let envelope: Envelope = match codec.decode(&data) {
                    Ok(envelope) => envelope,
                    Err(e) => {
                        tracing::debug!(%peer, error = %e, "failed to decode envelope");
                        continue;
                    }
                };
                tracing::trace!(%peer, seq = envelope.seq, kind = envelope.message.kind(), "frame received");

                let message = envelope.message;
                if events.send(PeerEvent::Message { peer, message }).is_err() {
                    break;
                }
            }
            outgoing = outbound_rx.recv() => {
                let Some(message) = outgoing else {
                    tracing::debug!(%peer, "released by server, closing connection");
                    let _ = conn.close().await;
                    break;
                };
                let bytes = codec.encode(&writer.wrap(message))?;
                conn.send(&bytes).await?;
            }
        }
    }

    Ok(())
}

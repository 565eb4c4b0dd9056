//! Joining a remote Turnstile session.

use turnstile_protocol::{Codec, Envelope, JsonCodec};
use turnstile_session::{
    ClientStep, EventSender, HandshakeClient, SessionError, TicketIssuer,
};
use turnstile_transport::{Connection, ConnectionId, TransportError, WebSocketConnection};

use crate::handler::EnvelopeWriter;
use crate::TurnstileError;

/// A session this process has joined as a peer.
///
/// Dropping it without calling [`leave`](Self::leave) closes the socket
/// but skips the ticket cancellation and the `ExitedRemoteSession` event.
pub struct RemoteSession<I: TicketIssuer> {
    conn: WebSocketConnection,
    client: HandshakeClient<I>,
}

impl<I: TicketIssuer> RemoteSession<I> {
    /// Dials `url` and runs the handshake to completion.
    ///
    /// # Errors
    /// - [`TurnstileError::Session`] with [`SessionError::Rejected`] if
    ///   the authority refused us; the reason is the authority's text
    /// - [`TurnstileError::Transport`] if the socket fails or closes
    ///   before a verdict
    pub async fn join(
        url: &str,
        issuer: I,
        version: &str,
        events: EventSender,
    ) -> Result<Self, TurnstileError> {
        Self::join_with_codec(url, issuer, version, events, &JsonCodec).await
    }

    /// Like [`join`](Self::join), with a custom codec.
    pub async fn join_with_codec<C: Codec>(
        url: &str,
        issuer: I,
        version: &str,
        events: EventSender,
        codec: &C,
    ) -> Result<Self, TurnstileError> {
        let conn = WebSocketConnection::connect(url).await?;
        let mut client = HandshakeClient::new(issuer, version, events);
        tracing::debug!(%url, conn = %conn.id(), "joining remote session");

        match handshake(&conn, &mut client, codec).await {
            Ok(()) => Ok(Self { conn, client }),
            Err(e) => {
                client.close();
                let _ = conn.close().await;
                Err(e)
            }
        }
    }

    pub fn connection_id(&self) -> ConnectionId {
        self.conn.id()
    }

    /// Leaves the session: cancels our ticket, emits
    /// `ExitedRemoteSession` and closes the connection.
    pub async fn leave(mut self) -> Result<(), TurnstileError> {
        self.client.close();
        self.conn.close().await?;
        Ok(())
    }

    /// Waits until the authority closes the connection, e.g. at shutdown.
    /// Frames that arrive meanwhile are discarded.
    ///
    /// Once the connection is gone the ticket is canceled and
    /// `ExitedRemoteSession` is emitted, as with [`leave`](Self::leave).
    pub async fn closed(&mut self) {
        loop {
            match self.conn.recv().await {
                Ok(Some(_)) => continue,
                Ok(None) => break,
                Err(e) => {
                    tracing::debug!(error = %e, "connection to authority failed");
                    break;
                }
            }
        }
        tracing::info!(conn = %self.conn.id(), "authority closed the session");
        self.client.close();
    }
}

async fn handshake<I: TicketIssuer, C: Codec>(
    conn: &WebSocketConnection,
    client: &mut HandshakeClient<I>,
    codec: &C,
) -> Result<(), TurnstileError> {
    let mut writer = EnvelopeWriter::new();

    loop {
        let Some(data) = conn.recv().await? else {
            return Err(TransportError::ConnectionClosed(
                "closed before admission verdict".into(),
            )
            .into());
        };
        let envelope: Envelope = codec.decode(&data)?;

        match client.on_message(envelope.message)? {
            ClientStep::Reply(message) => {
                let bytes = codec.encode(&writer.wrap(message))?;
                conn.send(&bytes).await?;
            }
            ClientStep::Joined => return Ok(()),
            ClientStep::Rejected(reason) => {
                return Err(SessionError::Rejected(reason).into());
            }
            ClientStep::Ignored => {}
        }
    }
}

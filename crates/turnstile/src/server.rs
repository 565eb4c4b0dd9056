//! `TurnstileServer` builder and drive loop.
//!
//! This is the entry point for hosting a session. It ties the layers
//! together: transport → protocol → handshake → admission.
//!
//! ```text
//!  accept task ──spawn──→ connection task (one per socket)
//!                               │ PeerEvent
//!                               ▼
//!  drive loop: select! { peer event, tick, shutdown }
//!     ├─ HandshakeAuthority  (challenge, queue Connect/Disconnect)
//!     ├─ AuthCoordinator     (one validation at a time, roster)
//!     └─ PeerTable           (outbound channels, peer status)
//! ```

use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use turnstile_protocol::{Codec, JsonCodec};
use turnstile_session::{
    event_channel, AdmissionConfig, AuthCoordinator, EventSender,
    HandshakeAuthority, IdentityValidator, SessionEvent, StatusReceiver,
};
use turnstile_tick::{TickConfig, TickScheduler};
use turnstile_transport::{DEFAULT_UPGRADE_TIMEOUT, WebSocketTransport};

use crate::handler::handle_connection;
use crate::peers::{PeerEvent, PeerEventReceiver, PeerEventSender, PeerTable};
use crate::TurnstileError;

/// Everything needed to stand up a server, loadable from a config file.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Address to listen on. Port 0 picks a free one.
    pub bind_addr: String,
    /// How long a new TCP client has to finish the WebSocket upgrade.
    pub upgrade_timeout: Duration,
    pub admission: AdmissionConfig,
    pub tick: TickConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "127.0.0.1:7777".to_string(),
            upgrade_timeout: DEFAULT_UPGRADE_TIMEOUT,
            admission: AdmissionConfig::default(),
            tick: TickConfig::default(),
        }
    }
}

/// Builder for configuring and starting a Turnstile server.
///
/// # Example
///
/// ```rust,ignore
/// use turnstile::prelude::*;
///
/// let (status_tx, status_rx) = status_channel();
/// let server = TurnstileServerBuilder::new()
///     .bind("0.0.0.0:7777")
///     .admission(AdmissionConfig { max_players: 8, ..Default::default() })
///     .build(MyValidator::new(status_tx), status_rx)
///     .await?;
/// server.run().await
/// ```
pub struct TurnstileServerBuilder {
    config: ServerConfig,
    events: Option<EventSender>,
}

impl TurnstileServerBuilder {
    pub fn new() -> Self {
        Self {
            config: ServerConfig::default(),
            events: None,
        }
    }

    /// Replaces the whole configuration.
    pub fn config(mut self, config: ServerConfig) -> Self {
        self.config = config;
        self
    }

    /// Sets the address to bind the server to.
    pub fn bind(mut self, addr: &str) -> Self {
        self.config.bind_addr = addr.to_string();
        self
    }

    /// Sets the admission rules.
    pub fn admission(mut self, admission: AdmissionConfig) -> Self {
        self.config.admission = admission;
        self
    }

    /// Sets the drive loop pacing.
    pub fn tick(mut self, tick: TickConfig) -> Self {
        self.config.tick = tick;
        self
    }

    /// Where to deliver [`SessionEvent`]s. Without this they are dropped.
    pub fn events(mut self, events: EventSender) -> Self {
        self.events = Some(events);
        self
    }

    /// Binds the listener and assembles the server.
    ///
    /// `statuses` must be the receiving end of the channel `validator`
    /// reports its verdicts on. Uses `JsonCodec` on the wire.
    pub async fn build<V: IdentityValidator>(
        self,
        validator: V,
        statuses: StatusReceiver,
    ) -> Result<TurnstileServer<V, JsonCodec>, TurnstileError> {
        self.build_with_codec(validator, statuses, JsonCodec).await
    }

    /// Like [`build`](Self::build), with a custom codec.
    pub async fn build_with_codec<V: IdentityValidator, C: Codec>(
        self,
        validator: V,
        statuses: StatusReceiver,
        codec: C,
    ) -> Result<TurnstileServer<V, C>, TurnstileError> {
        let transport = WebSocketTransport::bind(&self.config.bind_addr).await?;
        let events = self.events.unwrap_or_else(|| event_channel().0);

        let coordinator = AuthCoordinator::new(
            self.config.admission,
            validator,
            statuses,
            events.clone(),
        );

        Ok(TurnstileServer {
            transport,
            coordinator,
            upgrade_timeout: self.config.upgrade_timeout,
            tick: self.config.tick,
            events,
            codec: Arc::new(codec),
        })
    }
}

impl Default for TurnstileServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A bound, not yet running, Turnstile server.
///
/// Call [`run()`](Self::run) or [`run_until()`](Self::run_until) to start
/// accepting connections.
pub struct TurnstileServer<V: IdentityValidator, C: Codec = JsonCodec> {
    transport: WebSocketTransport,
    coordinator: AuthCoordinator<V>,
    upgrade_timeout: Duration,
    tick: TickConfig,
    events: EventSender,
    codec: Arc<C>,
}

impl<V: IdentityValidator, C: Codec> TurnstileServer<V, C> {
    /// Returns the local address the server is bound to.
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    /// Runs until the process is terminated.
    pub async fn run(self) -> Result<(), TurnstileError> {
        self.run_until(std::future::pending()).await
    }

    /// Runs until `shutdown` completes, then tears the session down:
    /// the pending authentication is rejected, every admitted user is
    /// ended and every connection is closed.
    pub async fn run_until(
        self,
        shutdown: impl Future<Output = ()>,
    ) -> Result<(), TurnstileError> {
        let Self {
            transport,
            mut coordinator,
            upgrade_timeout,
            tick,
            events,
            codec,
        } = self;

        let (peer_tx, mut peer_rx) = mpsc::unbounded_channel();
        let accept_task = tokio::spawn(accept_loop(
            transport,
            upgrade_timeout,
            codec,
            peer_tx,
        ));

        let mut authority = HandshakeAuthority::new(coordinator.queue_handle());
        let mut peers = PeerTable::new();
        let mut scheduler = TickScheduler::new(tick);

        tracing::info!(
            max_players = coordinator.config().max_players,
            version = %coordinator.config().required_version,
            tick_rate_hz = scheduler.tick_rate_hz(),
            "Turnstile server running"
        );
        let _ = events.send(SessionEvent::ServerOpened);

        tokio::pin!(shutdown);
        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    tracing::info!("shutdown requested");
                    break;
                }
                Some(event) = peer_rx.recv() => {
                    on_peer_event(event, &mut authority, &mut peers);
                }
                info = scheduler.wait_for_tick() => {
                    coordinator.tick(info.at, &peers);
                    scheduler.record_tick_end();
                }
            }
        }

        accept_task.abort();
        coordinator.shutdown(&peers);
        tracing::info!(connections = peers.len(), "closing connections");
        peers.release_all();
        drain_peer_events(&mut peer_rx);

        let _ = events.send(SessionEvent::ServerClosed);
        tracing::info!("Turnstile server stopped");
        Ok(())
    }
}

fn on_peer_event(
    event: PeerEvent,
    authority: &mut HandshakeAuthority,
    peers: &mut PeerTable,
) {
    match event {
        PeerEvent::Connected { peer, outbound } => {
            tracing::info!(%peer, "peer connected");
            peers.insert(peer, outbound);
            authority.on_raw_connect(peer, &*peers);
        }
        PeerEvent::Message { peer, message } => {
            authority.on_message(peer, message);
        }
        PeerEvent::Disconnected { peer } => {
            tracing::info!(%peer, "peer disconnected");
            peers.remove(peer);
            authority.on_raw_disconnect(peer);
        }
    }
}

/// Discards whatever connection tasks reported after the loop stopped.
/// Their outbound senders would otherwise sit in the channel.
fn drain_peer_events(peer_rx: &mut PeerEventReceiver) {
    let mut dropped = 0usize;
    while peer_rx.try_recv().is_ok() {
        dropped += 1;
    }
    if dropped > 0 {
        tracing::debug!(dropped, "peer events discarded at shutdown");
    }
}

/// Takes TCP streams off the listener. The WebSocket upgrade runs in the
/// spawned task, so a client that stalls mid-upgrade only costs its own task.
async fn accept_loop<C: Codec>(
    mut transport: WebSocketTransport,
    upgrade_timeout: Duration,
    codec: Arc<C>,
    events: PeerEventSender,
) {
    loop {
        match transport.accept_pending().await {
            Ok(pending) => {
                let codec = Arc::clone(&codec);
                let events = events.clone();
                tokio::spawn(async move {
                    let addr = pending.peer_addr();
                    let conn = match pending.upgrade(upgrade_timeout).await {
                        Ok(conn) => conn,
                        Err(e) => {
                            tracing::debug!(%addr, error = %e, "upgrade failed");
                            return;
                        }
                    };
                    if let Err(e) = handle_connection(conn, codec, events).await {
                        tracing::debug!(error = %e, "connection ended with error");
                    }
                });
            }
            Err(e) => {
                tracing::error!(error = %e, "accept failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config_defaults() {
        let config = ServerConfig::default();
        assert_eq!(config.bind_addr, "127.0.0.1:7777");
        assert_eq!(config.upgrade_timeout, Duration::from_secs(5));
        assert_eq!(config.admission.max_players, 16);
        assert_eq!(config.tick.tick_rate_hz, 20);
    }

    #[test]
    fn test_builder_setters_override_config() {
        let builder = TurnstileServerBuilder::new()
            .bind("0.0.0.0:9000")
            .admission(AdmissionConfig {
                max_players: 2,
                ..AdmissionConfig::default()
            })
            .tick(TickConfig::with_rate(60));

        assert_eq!(builder.config.bind_addr, "0.0.0.0:9000");
        assert_eq!(builder.config.admission.max_players, 2);
        assert_eq!(builder.config.tick.tick_rate_hz, 60);
    }
}

//! A lobby host with a development identity provider.
//!
//! ```text
//! cargo run -p lobby                          # host on 0.0.0.0:7777
//! cargo run -p lobby -- join ws://HOST:7777 42  # join as identity 42
//! ```
//!
//! Set `RUST_LOG=debug` to watch the admission state machine.

use std::time::Duration;

use turnstile::prelude::*;
use tracing_subscriber::EnvFilter;

const VERSION: &str = "1.0";

// ---------------------------------------------------------------------------
// Development identity provider
// ---------------------------------------------------------------------------

/// Approves every ticket except the literal `banned`, answering straight
/// away through the status channel like a real provider's callback.
struct DevValidator {
    statuses: StatusSender,
}

impl IdentityValidator for DevValidator {
    fn start_session(&mut self, ticket: &[u8], identity_key: IdentityKey) -> bool {
        let status = if ticket == b"banned" {
            AuthStatus::Banned
        } else {
            AuthStatus::Ok
        };
        self.statuses
            .send(StatusChange {
                identity_key,
                owner_key: identity_key,
                status,
            })
            .is_ok()
    }

    fn end_session(&mut self, identity_key: IdentityKey) {
        tracing::info!(%identity_key, "dev session ended");
    }
}

/// Issues `dev-<key>` tickets.
struct DevIssuer {
    key: IdentityKey,
}

impl TicketIssuer for DevIssuer {
    fn issue_ticket(&mut self) -> Result<IssuedTicket, SessionError> {
        Ok(IssuedTicket {
            ticket: format!("dev-{}", self.key.0).into_bytes(),
            identity_key: self.key,
        })
    }

    fn cancel_ticket(&mut self) {
        tracing::debug!(identity_key = %self.key, "dev ticket canceled");
    }

    fn display_name(&self) -> String {
        format!("guest-{}", self.key.0)
    }
}

// ---------------------------------------------------------------------------
// Entry point
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args: Vec<String> = std::env::args().skip(1).collect();
    match args.as_slice() {
        [cmd, url, key] if cmd == "join" => join(url, key.parse()?).await,
        _ => host("0.0.0.0:7777").await,
    }
}

async fn host(addr: &str) -> Result<(), Box<dyn std::error::Error>> {
    let (status_tx, status_rx) = status_channel();
    let (events_tx, mut events) = event_channel();

    let server = TurnstileServerBuilder::new()
        .bind(addr)
        .admission(AdmissionConfig {
            required_version: VERSION.into(),
            max_players: 8,
            auth_timeout: Duration::from_secs(5),
        })
        .events(events_tx)
        .build(DevValidator { statuses: status_tx }, status_rx)
        .await?;
    tracing::info!(addr = %server.local_addr()?, "lobby listening");

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::UserJoined(user) => {
                    tracing::info!(name = %user.display_name, peer = %user.peer, "welcome");
                }
                SessionEvent::UserExited(user) => {
                    tracing::info!(name = %user.display_name, "goodbye");
                }
                other => tracing::debug!(?other, "session event"),
            }
        }
    });

    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;
    Ok(())
}

async fn join(url: &str, key: u64) -> Result<(), Box<dyn std::error::Error>> {
    let (events, _rx) = event_channel();
    let issuer = DevIssuer {
        key: IdentityKey(key),
    };

    let mut session = RemoteSession::join(url, issuer, VERSION, events).await?;
    tracing::info!("joined, press Ctrl-C to leave");

    let interrupted = tokio::select! {
        _ = tokio::signal::ctrl_c() => true,
        _ = session.closed() => false,
    };
    if interrupted {
        session.leave().await?;
    }
    Ok(())
}

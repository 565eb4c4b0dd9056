//! # Turnstile
//!
//! Authenticated connection admission for session-based multiplayer hosts.
//!
//! A Turnstile server challenges every new connection for an identity
//! ticket, validates tickets one at a time against an external identity
//! provider (with a timeout), enforces a version match and a player cap,
//! and keeps the roster of admitted users. Applications plug in the
//! provider by implementing [`IdentityValidator`](prelude::IdentityValidator)
//! on the host and [`TicketIssuer`](prelude::TicketIssuer) on peers.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use turnstile::prelude::*;
//!
//! // Implement IdentityValidator for your provider, then:
//! // let (status_tx, status_rx) = status_channel();
//! // let server = TurnstileServerBuilder::new()
//! //     .bind("0.0.0.0:7777")
//! //     .build(MyValidator::new(status_tx), status_rx)
//! //     .await?;
//! // server.run().await
//! ```

mod client;
mod error;
mod handler;
mod peers;
mod server;

pub use client::RemoteSession;
pub use error::TurnstileError;
pub use server::{ServerConfig, TurnstileServer, TurnstileServerBuilder};

/// Everything needed to host or join a session.
pub mod prelude {
    pub use crate::{
        RemoteSession, ServerConfig, TurnstileError, TurnstileServer,
        TurnstileServerBuilder,
    };
    pub use turnstile_protocol::{Envelope, HandshakeMessage, IdentityKey};
    pub use turnstile_session::{
        event_channel, status_channel, AdmissionConfig, AuthStatus,
        EventReceiver, EventSender, IdentityValidator, IssuedTicket,
        RejectReason, SessionError, SessionEvent, SessionUser, StatusChange,
        StatusSender, TicketIssuer,
    };
    pub use turnstile_tick::{TickConfig, TickPolicy};
}

//! Connection admission for Turnstile.
//!
//! This crate decides who gets into a session:
//!
//! 1. **Handshake** — challenge a fresh connection for identity proof
//!    ([`HandshakeAuthority`]) or answer that challenge ([`HandshakeClient`])
//! 2. **Queueing** — turn concurrent connect/disconnect notifications into
//!    one ordered stream ([`OperationQueue`])
//! 3. **Coordination** — validate one identity at a time against an
//!    external provider, with a deadline ([`AuthCoordinator`])
//! 4. **Roster** — the authoritative set of admitted users
//!    ([`SessionRoster`])
//!
//! # How it fits in the stack
//!
//! ```text
//! Host server (above)  ← owns the drive loop, calls tick()
//!     ↕
//! Session Layer (this crate)  ← admission state machines
//!     ↕
//! Protocol + Transport (below)  ← HandshakeMessage, ConnectionId
//! ```
//!
//! Nothing in here blocks or spawns. Every state change happens inside a
//! call made by the single drive loop that owns the [`AuthCoordinator`].

mod config;
mod coordinator;
mod error;
mod event;
mod handshake;
mod link;
mod operation;
mod queue;
mod roster;
mod validator;

pub use config::AdmissionConfig;
pub use coordinator::{AuthCoordinator, AuthState, PendingAuth};
pub use error::{RejectReason, SessionError};
pub use event::{event_channel, EventReceiver, EventSender, SessionEvent};
pub use handshake::{ClientPhase, ClientStep, HandshakeAuthority, HandshakeClient};
pub use link::PeerLink;
pub use operation::{ConnectRequest, ConnectionOperation, OperationKind};
pub use queue::{OperationQueue, QueueHandle};
pub use roster::{SessionRoster, SessionUser};
pub use validator::{
    status_channel, AuthStatus, IdentityValidator, IssuedTicket, StatusChange,
    StatusReceiver, StatusSender, TicketIssuer,
};

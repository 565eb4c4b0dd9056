//! Hooks into the external identity provider.
//!
//! Turnstile doesn't validate tickets itself. The provider (a platform
//! SDK, a web API, a test double) sits behind two traits:
//!
//! - [`IdentityValidator`] — authority side. `start_session` only says
//!   whether validation could *begin*; the verdict arrives later as a
//!   [`StatusChange`] pushed into a [`StatusSender`].
//! - [`TicketIssuer`] — peer side. Produces the ticket the peer sends in
//!   its handshake and cancels it when the peer leaves.
//!
//! Verdicts travel over a channel instead of a callback so that they are
//! applied by the coordinator's own drive tick, never from whatever thread
//! the provider happens to answer on.

use std::fmt;

use tokio::sync::mpsc;
use turnstile_protocol::IdentityKey;

use crate::SessionError;

/// Verdict reported by the identity provider for one identity key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthStatus {
    /// The ticket is valid and the identity may play.
    Ok,
    /// The owner of the ticket canceled it, usually by disconnecting.
    TicketCanceled,
    InvalidTicket,
    /// The ticket was already redeemed.
    TicketAlreadyUsed,
    Banned,
    /// The identity is active in another session.
    LoggedInElsewhere,
    /// The identity does not own the product.
    NoLicense,
    /// The identity is not connected to the provider.
    NotConnected,
    /// The provider's own check timed out.
    CheckTimedOut,
    /// The publisher revoked access for this identity.
    PublisherBanned,
}

impl fmt::Display for AuthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            Self::Ok => "ok",
            Self::TicketCanceled => "ticket canceled",
            Self::InvalidTicket => "invalid ticket",
            Self::TicketAlreadyUsed => "ticket already used",
            Self::Banned => "banned",
            Self::LoggedInElsewhere => "logged in elsewhere",
            Self::NoLicense => "no license",
            Self::NotConnected => "not connected to identity provider",
            Self::CheckTimedOut => "provider check timed out",
            Self::PublisherBanned => "publisher ban",
        };
        f.write_str(text)
    }
}

/// One asynchronous report from the identity provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StatusChange {
    /// The identity the report is about.
    pub identity_key: IdentityKey,
    /// The identity that owns the license. Differs from `identity_key`
    /// when the license is borrowed.
    pub owner_key: IdentityKey,
    pub status: AuthStatus,
}

pub type StatusSender = mpsc::UnboundedSender<StatusChange>;
pub type StatusReceiver = mpsc::UnboundedReceiver<StatusChange>;

/// Creates the channel a validator reports verdicts through.
///
/// Give the sender to your [`IdentityValidator`] and the receiver to the
/// [`AuthCoordinator`](crate::AuthCoordinator).
pub fn status_channel() -> (StatusSender, StatusReceiver) {
    mpsc::unbounded_channel()
}

/// Authority-side access to the identity provider.
///
/// The coordinator is the only caller, and it calls from its drive tick,
/// so implementations see `start_session`/`end_session` strictly in order
/// and never concurrently for the same key.
pub trait IdentityValidator: Send + 'static {
    /// Begins validating `ticket` for `identity_key`.
    ///
    /// Returns `false` if the provider refuses to even try. When it
    /// returns `true`, a [`StatusChange`] for the key is expected later
    /// (though the coordinator stops waiting after its timeout).
    fn start_session(&mut self, ticket: &[u8], identity_key: IdentityKey) -> bool;

    /// Ends the provider-side session for `identity_key`.
    fn end_session(&mut self, identity_key: IdentityKey);
}

/// A freshly issued identity proof.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IssuedTicket {
    pub ticket: Vec<u8>,
    pub identity_key: IdentityKey,
}

/// Peer-side access to the identity provider.
pub trait TicketIssuer: Send + 'static {
    /// Issues a ticket the authority can redeem.
    ///
    /// # Errors
    /// Returns [`SessionError::TicketUnavailable`] if the provider is not
    /// reachable or the local identity is not signed in.
    fn issue_ticket(&mut self) -> Result<IssuedTicket, SessionError>;

    /// Cancels the most recently issued ticket.
    fn cancel_ticket(&mut self);

    /// The name this identity shows to others.
    fn display_name(&self) -> String;
}

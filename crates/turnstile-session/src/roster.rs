//! The session roster: every user currently admitted.
//!
//! The roster is the authoritative answer to "who is in this session?".
//! Only the [`AuthCoordinator`](crate::AuthCoordinator) mutates it, from
//! its drive tick, which is why it's a plain `HashMap` rather than a
//! concurrent one.

use std::collections::HashMap;
use std::time::Instant;

use turnstile_protocol::IdentityKey;
use turnstile_transport::ConnectionId;

use crate::SessionError;

/// A peer that passed identity validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionUser {
    /// The connection the user is on.
    pub peer: ConnectionId,

    /// Validated identity. Unique within a roster.
    pub identity_key: IdentityKey,

    /// License owner as reported by the identity provider.
    pub owner_key: IdentityKey,

    /// Name the peer asked to be shown as. The authority has no other
    /// source for it.
    pub display_name: String,

    /// When the user was admitted.
    pub joined_at: Instant,
}

/// Admitted users, keyed by identity key.
///
/// ```text
/// add() ──→ [admitted] ──→ remove() / remove_by_peer()
///               │
///               └── get() / get_by_peer() / len()
/// ```
#[derive(Debug, Default)]
pub struct SessionRoster {
    /// All users, keyed by identity.
    users: HashMap<IdentityKey, SessionUser>,

    /// Index from connection to identity, kept in sync with `users`.
    /// Disconnects arrive with only a connection id.
    peers: HashMap<ConnectionId, IdentityKey>,
}

impl SessionRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a newly admitted user.
    ///
    /// # Errors
    /// - [`SessionError::DuplicateIdentity`] if the identity is present
    /// - [`SessionError::DuplicatePeer`] if the connection is present
    pub fn add(&mut self, user: SessionUser) -> Result<&SessionUser, SessionError> {
        if self.users.contains_key(&user.identity_key) {
            return Err(SessionError::DuplicateIdentity(user.identity_key));
        }
        if self.peers.contains_key(&user.peer) {
            return Err(SessionError::DuplicatePeer(user.peer));
        }

        let key = user.identity_key;
        self.peers.insert(user.peer, key);
        tracing::debug!(peer = %user.peer, identity_key = %key, "roster entry added");
        Ok(self.users.entry(key).or_insert(user))
    }

    /// Removes the user with this identity, if present.
    pub fn remove(&mut self, identity_key: IdentityKey) -> Option<SessionUser> {
        let user = self.users.remove(&identity_key)?;
        self.peers.remove(&user.peer);
        Some(user)
    }

    /// Removes the user on this connection, if present.
    pub fn remove_by_peer(&mut self, peer: ConnectionId) -> Option<SessionUser> {
        let key = self.peers.get(&peer).copied()?;
        self.remove(key)
    }

    pub fn get(&self, identity_key: IdentityKey) -> Option<&SessionUser> {
        self.users.get(&identity_key)
    }

    pub fn get_by_peer(&self, peer: ConnectionId) -> Option<&SessionUser> {
        self.peers.get(&peer).and_then(|key| self.users.get(key))
    }

    pub fn contains(&self, identity_key: IdentityKey) -> bool {
        self.users.contains_key(&identity_key)
    }

    /// Number of admitted users. Compared against the capacity limit.
    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &SessionUser> {
        self.users.values()
    }

    /// Removes and returns every user, ordered by admission time.
    pub fn drain(&mut self) -> Vec<SessionUser> {
        self.peers.clear();
        let mut users: Vec<SessionUser> = self.users.drain().map(|(_, u)| u).collect();
        users.sort_by_key(|u| u.joined_at);
        users
    }
}

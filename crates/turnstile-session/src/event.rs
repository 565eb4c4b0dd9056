//! Lifecycle notifications for surrounding application code.

use tokio::sync::mpsc;

use crate::SessionUser;

/// Something the application may want to react to.
///
/// The authority side sees `ServerOpened`, `UserJoined`, `UserExited`
/// and `ServerClosed`; a joining peer sees `JoinedRemoteSession` and
/// `ExitedRemoteSession`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The host started accepting connections.
    ServerOpened,
    /// The host stopped; every user has been torn down.
    ServerClosed,
    /// A peer passed validation and is now in the roster.
    UserJoined(SessionUser),
    /// An admitted user left and was removed from the roster.
    UserExited(SessionUser),
    /// Local side: the remote authority accepted us.
    JoinedRemoteSession,
    /// Local side: we left a session we had joined.
    ExitedRemoteSession,
}

pub type EventSender = mpsc::UnboundedSender<SessionEvent>;
pub type EventReceiver = mpsc::UnboundedReceiver<SessionEvent>;

/// Creates an event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

//! Queued units of admission work.

use std::fmt;

use turnstile_protocol::HandshakeMessage;
use turnstile_transport::ConnectionId;

/// The identity proof a peer submitted in its `HandshakeResponse`.
///
/// Kept exactly as received; the coordinator validates it when the
/// operation reaches the head of the queue.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    pub version: String,
    pub ticket: Vec<u8>,
    pub identity_key: Vec<u8>,
    pub display_name: String,
}

impl ConnectRequest {
    /// Extracts the request from a `HandshakeResponse`, or hands the
    /// message back if it is anything else.
    pub fn from_message(message: HandshakeMessage) -> Result<Self, HandshakeMessage> {
        match message {
            HandshakeMessage::HandshakeResponse {
                version,
                ticket,
                identity_key,
                display_name,
            } => Ok(Self {
                version,
                ticket,
                identity_key,
                display_name,
            }),
            other => Err(other),
        }
    }
}

/// What a queued operation asks the coordinator to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationKind {
    /// Authenticate and, if that succeeds, admit the peer.
    Connect(ConnectRequest),
    /// Tear down the peer's session user, if it has one.
    Disconnect,
}

impl OperationKind {
    /// Short lowercase label for logs.
    pub fn name(&self) -> &'static str {
        match self {
            Self::Connect(_) => "connect",
            Self::Disconnect => "disconnect",
        }
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// One entry in the [`OperationQueue`](crate::OperationQueue).
///
/// Immutable once built: the fields are private and the coordinator
/// consumes the whole value when it dequeues it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionOperation {
    peer: ConnectionId,
    kind: OperationKind,
}

impl ConnectionOperation {
    /// A connect attempt carrying the peer's identity proof.
    pub fn connect(peer: ConnectionId, request: ConnectRequest) -> Self {
        Self {
            peer,
            kind: OperationKind::Connect(request),
        }
    }

    /// A transport-level disconnect.
    pub fn disconnect(peer: ConnectionId) -> Self {
        Self {
            peer,
            kind: OperationKind::Disconnect,
        }
    }

    /// The connection this operation belongs to.
    pub fn peer(&self) -> ConnectionId {
        self.peer
    }

    pub fn kind(&self) -> &OperationKind {
        &self.kind
    }

    pub fn into_parts(self) -> (ConnectionId, OperationKind) {
        (self.peer, self.kind)
    }
}

#[cfg(test)]
mod tests {
    use turnstile_protocol::IdentityKey;

    use super::*;

    #[test]
    fn test_from_message_accepts_response() {
        let msg = HandshakeMessage::response("1.0", vec![1, 2], IdentityKey(9), "ada");

        let request = ConnectRequest::from_message(msg).expect("should extract");

        assert_eq!(request.version, "1.0");
        assert_eq!(request.ticket, vec![1, 2]);
        assert_eq!(request.identity_key, IdentityKey(9).to_wire().to_vec());
        assert_eq!(request.display_name, "ada");
    }

    #[test]
    fn test_from_message_returns_other_messages() {
        let result = ConnectRequest::from_message(HandshakeMessage::ConnectionAccepted);
        assert_eq!(result, Err(HandshakeMessage::ConnectionAccepted));
    }

    #[test]
    fn test_operation_accessors() {
        let op = ConnectionOperation::disconnect(ConnectionId::new(3));
        assert_eq!(op.peer(), ConnectionId::new(3));
        assert_eq!(op.kind(), &OperationKind::Disconnect);
        assert_eq!(op.kind().to_string(), "disconnect");
    }

    #[test]
    fn test_operation_kind_name_matches_display() {
        let connect = ConnectionOperation::connect(
            ConnectionId::new(1),
            ConnectRequest {
                version: "1.0".into(),
                ticket: vec![1],
                identity_key: IdentityKey(1).to_wire().to_vec(),
                display_name: "ada".into(),
            },
        );
        let disconnect = ConnectionOperation::disconnect(ConnectionId::new(1));

        assert_eq!(connect.kind().name(), "connect");
        assert_eq!(disconnect.kind().name(), "disconnect");
        assert_eq!(disconnect.kind().to_string(), "disconnect");
    }
}

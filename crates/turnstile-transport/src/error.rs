/// Errors that can occur in the transport layer.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The connection was closed.
    #[error("connection closed: {0}")]
    ConnectionClosed(String),

    /// Sending data failed.
    #[error("send failed: {0}")]
    SendFailed(#[source] std::io::Error),

    /// Receiving data failed.
    #[error("receive failed: {0}")]
    ReceiveFailed(#[source] std::io::Error),

    /// Binding or accepting connections failed.
    #[error("accept failed: {0}")]
    AcceptFailed(#[source] std::io::Error),

    /// A client connected but never finished the WebSocket upgrade.
    #[error("upgrade timed out after {0:?}")]
    UpgradeTimedOut(std::time::Duration),

    /// Dialing a remote host failed.
    #[error("connect failed: {0}")]
    ConnectFailed(#[source] std::io::Error),
}

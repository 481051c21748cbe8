//! Transport abstraction for the persistent connection.
//!
//! [`SocketSession`](super::SocketSession) only ever talks to these traits, so
//! tests can script a server without opening a socket.

use crate::errors::TransportError;
use async_trait::async_trait;
use common::secret::SecretString;

/// One established duplex text connection.
#[async_trait]
pub trait Transport: Send {
    /// Send one text frame.
    async fn send(&mut self, text: String) -> Result<(), TransportError>;

    /// Receive the next text frame.
    ///
    /// `None` means the peer closed the connection cleanly. Must be cancel
    /// safe: it is polled inside `tokio::select!`.
    async fn recv(&mut self) -> Option<Result<String, TransportError>>;

    /// Close the connection and release its resources.
    async fn close(&mut self) -> Result<(), TransportError>;
}

/// Opens authenticated connections.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `url`, authenticating with `access_token`.
    ///
    /// The token is presented once, during the handshake. A server that
    /// rejects it answers the handshake with an error status.
    async fn connect(
        &self,
        url: &str,
        access_token: &SecretString,
    ) -> Result<Box<dyn Transport>, TransportError>;
}

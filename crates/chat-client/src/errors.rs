//! Chat client error types.
//!
//! [`ClientError`] is what the presentation layer sees. Only
//! [`ClientError::AuthenticationLost`] ends the session; everything else is
//! displayed and the session carries on.

use common::types::RoomId;
use thiserror::Error;

/// Generic message used when the server supplies none.
pub const GENERIC_REQUEST_FAILURE: &str = "Request failed";

/// Socket-level failures. Non-fatal: reported, then the connection is
/// re-established by the caller if desired.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransportError {
    /// TCP/TLS connect or WebSocket upgrade failed before a response.
    #[error("Connection failed: {0}")]
    Connect(String),

    /// Server answered the upgrade with a non-101 status (stale token, etc).
    #[error("Handshake rejected with status {status}")]
    HandshakeRejected { status: u16 },

    /// Writing a frame failed.
    #[error("Send failed: {0}")]
    Send(String),

    /// Reading a frame failed.
    #[error("Receive failed: {0}")]
    Receive(String),

    /// Inbound frame could not be decoded.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// The connection is gone.
    #[error("Connection closed")]
    Closed,
}

/// Credential persistence failures.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Credential storage I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Credential storage is corrupt: {0}")]
    Corrupt(#[from] serde_json::Error),
}

/// Errors surfaced by chat client operations.
#[derive(Debug, Error)]
pub enum ClientError {
    /// Refresh failed; credentials have been cleared and the user must log in.
    #[error("Authentication lost")]
    AuthenticationLost,

    /// REST call returned a non-success status.
    #[error("Request failed ({status}): {message}")]
    RequestFailed { status: u16, message: String },

    /// Server did not confirm membership for the room.
    #[error("Access denied to room {room_id}")]
    AccessDenied { room_id: RoomId },

    /// Socket-level failure.
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Local input validation failed; nothing was sent.
    #[error("Validation error: {0}")]
    Validation(String),

    /// Operation needs a live socket connection.
    #[error("Not connected")]
    NotConnected,

    /// Operation needs the server to have confirmed membership first.
    #[error("Room {room_id} is not joined")]
    NotJoined { room_id: RoomId },

    /// No room is currently open.
    #[error("No active room")]
    NoActiveRoom,

    /// No access token is held.
    #[error("Not logged in")]
    NotAuthenticated,

    /// REST request never produced a response (DNS, connect, timeout).
    #[error("HTTP error: {0}")]
    Http(String),

    /// REST response body did not match the expected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// Join confirmation did not arrive in time.
    #[error("Timed out waiting for room {room_id}")]
    JoinTimeout { room_id: RoomId },
}

impl ClientError {
    /// Whether the session must be torn down.
    pub fn is_fatal(&self) -> bool {
        matches!(self, ClientError::AuthenticationLost)
    }

    /// Text suitable for showing to the user.
    ///
    /// Server-supplied messages pass through verbatim.
    pub fn user_message(&self) -> String {
        match self {
            ClientError::AuthenticationLost => {
                "Your session has expired, please log in again".to_string()
            }
            ClientError::RequestFailed { message, .. } | ClientError::Validation(message) => {
                message.clone()
            }
            ClientError::AccessDenied { room_id } => {
                format!("You do not have access to room {room_id}")
            }
            ClientError::Transport(_) => "Connection problem, please reconnect".to_string(),
            ClientError::NotConnected => "Not connected to the chat server".to_string(),
            ClientError::NotJoined { room_id } => format!("Room {room_id} is not joined yet"),
            ClientError::NoActiveRoom => "Open a room first".to_string(),
            ClientError::NotAuthenticated => "Please log in first".to_string(),
            ClientError::JoinTimeout { room_id } => {
                format!("Room {room_id} did not respond, please try again")
            }
            ClientError::Http(_) | ClientError::InvalidResponse(_) => {
                "An internal error occurred".to_string()
            }
        }
    }
}

//! Notifications for the presentation layer.
//!
//! [`crate::session::ChatSession::subscribe`] hands out a broadcast receiver of
//! [`SessionEvent`]s. Events are published in the order the session processed
//! the underlying socket events and REST results, so a subscriber always sees
//! `RoomJoined` for a room before `HistoryLoaded` for it.

use crate::models::{ChatMessage, Roster, Room};
use crate::socket::ConnectionState;
use common::types::RoomId;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    ConnectionChanged(ConnectionState),
    /// The server confirmed membership.
    RoomJoined { room: RoomId },
    /// The server's confirmation omitted a requested room.
    AccessDenied { room: RoomId },
    /// A history batch replaced the open room's visible list.
    HistoryLoaded {
        room: RoomId,
        messages: Vec<ChatMessage>,
    },
    /// A live message was rendered into the open room.
    MessageReceived { room: RoomId, message: ChatMessage },
    RosterUpdated { room: RoomId, roster: Roster },
    /// Re-fetching the roster failed; the cached copy was dropped.
    RosterCleared { room: RoomId },
    RoomsUpdated { rooms: Vec<Room> },
    /// Non-fatal error reported by the server over the socket.
    ServerError(String),
    /// Non-fatal socket failure.
    TransportError(String),
    /// Refresh failed and the session was reset.
    AuthenticationLost,
    LoggedOut,
}

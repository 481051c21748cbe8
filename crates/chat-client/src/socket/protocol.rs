//! Wire protocol for the persistent connection.
//!
//! Every frame is a JSON envelope `{"event": "<name>", "data": {...}}`.
//!
//! | Direction | Event | Payload |
//! |---|---|---|
//! | out | `join_rooms` | `{room_ids: [...]}` |
//! | in | `joined_rooms` | `{rooms: [...]}` |
//! | out | `fetch_history` | `{room}` |
//! | in | `old_messages` | `{messages: [...], room?}` |
//! | out | `send_message` | `{room, message}` |
//! | in | `new_message` | `{sender, message, timestamp, sender_id, room?, id?}` |
//! | out | `leave_room` | `{room}` |
//! | in | `error` | `{error}` |

use crate::errors::TransportError;
use crate::models::ChatMessage;
use common::types::RoomId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    JoinRooms { room_ids: Vec<RoomId> },
    FetchHistory { room: RoomId },
    SendMessage { room: RoomId, message: String },
    LeaveRoom { room: RoomId },
}

impl ClientEvent {
    /// Event name, for logging.
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::JoinRooms { .. } => "join_rooms",
            ClientEvent::FetchHistory { .. } => "fetch_history",
            ClientEvent::SendMessage { .. } => "send_message",
            ClientEvent::LeaveRoom { .. } => "leave_room",
        }
    }

    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String, TransportError> {
        serde_json::to_string(self).map_err(|e| TransportError::Protocol(e.to_string()))
    }
}

/// Events the server emits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerEvent {
    /// Membership confirmation naming the rooms the server accepted.
    JoinedRooms { rooms: Vec<RoomId> },
    /// History batch in server order.
    OldMessages {
        room: Option<RoomId>,
        messages: Vec<ChatMessage>,
    },
    /// One live message.
    NewMessage(ChatMessage),
    /// Server-reported, non-fatal error.
    Error { error: String },
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
    #[serde(default)]
    data: Value,
}

#[derive(Deserialize)]
struct JoinedRoomsPayload {
    #[serde(default)]
    rooms: Vec<RoomId>,
}

/// `old_messages` arrives either as `{messages, room?}` or a bare array.
#[derive(Deserialize)]
#[serde(untagged)]
enum OldMessagesPayload {
    Wrapped {
        messages: Vec<ChatMessage>,
        #[serde(default)]
        room: Option<RoomId>,
    },
    Bare(Vec<ChatMessage>),
}

#[derive(Deserialize)]
struct ErrorPayload {
    #[serde(default)]
    error: String,
}

fn payload<T: serde::de::DeserializeOwned>(event: &str, data: Value) -> Result<T, TransportError> {
    serde_json::from_value(data)
        .map_err(|e| TransportError::Protocol(format!("invalid {event} payload: {e}")))
}

impl ServerEvent {
    /// Decode a text frame.
    ///
    /// Returns `Ok(None)` for well-formed envelopes with an event name this
    /// client does not handle.
    ///
    /// # Errors
    ///
    /// `TransportError::Protocol` if the frame is not an envelope or a known
    /// event's payload does not match its schema.
    pub fn decode(text: &str) -> Result<Option<ServerEvent>, TransportError> {
        let envelope: Envelope = serde_json::from_str(text)
            .map_err(|e| TransportError::Protocol(format!("invalid envelope: {e}")))?;

        let event = match envelope.event.as_str() {
            "joined_rooms" => {
                let p: JoinedRoomsPayload = payload("joined_rooms", envelope.data)?;
                ServerEvent::JoinedRooms { rooms: p.rooms }
            }
            "old_messages" => match payload("old_messages", envelope.data)? {
                OldMessagesPayload::Wrapped { messages, room } => {
                    ServerEvent::OldMessages { room, messages }
                }
                OldMessagesPayload::Bare(messages) => ServerEvent::OldMessages {
                    room: None,
                    messages,
                },
            },
            "new_message" => ServerEvent::NewMessage(payload("new_message", envelope.data)?),
            "error" => {
                let p: ErrorPayload = payload("error", envelope.data)?;
                ServerEvent::Error { error: p.error }
            }
            _ => return Ok(None),
        };

        Ok(Some(event))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_client_events_use_envelope() {
        let encoded = ClientEvent::JoinRooms {
            room_ids: vec![RoomId::new("1"), RoomId::new("2")],
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({"event": "join_rooms", "data": {"room_ids": ["1", "2"]}})
        );

        let encoded = ClientEvent::SendMessage {
            room: RoomId::new("1"),
            message: "hi".to_string(),
        }
        .encode()
        .unwrap();
        let value: Value = serde_json::from_str(&encoded).unwrap();
        assert_eq!(
            value,
            json!({"event": "send_message", "data": {"room": "1", "message": "hi"}})
        );
    }

    #[test]
    fn test_event_names_match_wire() {
        let room = RoomId::new("r");
        let events = [
            ClientEvent::JoinRooms { room_ids: vec![] },
            ClientEvent::FetchHistory { room: room.clone() },
            ClientEvent::SendMessage {
                room: room.clone(),
                message: String::new(),
            },
            ClientEvent::LeaveRoom { room },
        ];
        for event in events {
            let value: Value = serde_json::from_str(&event.encode().unwrap()).unwrap();
            assert_eq!(value["event"], event.name());
        }
    }

    #[test]
    fn test_decode_joined_rooms_with_numeric_ids() {
        let event = ServerEvent::decode(r#"{"event": "joined_rooms", "data": {"rooms": [1, "2"]}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::JoinedRooms {
                rooms: vec![RoomId::new("1"), RoomId::new("2")]
            }
        );
    }

    #[test]
    fn test_decode_old_messages_both_shapes() {
        let wrapped = ServerEvent::decode(
            &json!({"event": "old_messages", "data": {"room": "1", "messages": [
                {"sender": "a", "sender_id": "u1", "message": "first", "timestamp": "t1"},
                {"sender": "b", "sender_id": "u2", "message": "second", "timestamp": "t2"}
            ]}})
            .to_string(),
        )
        .unwrap()
        .unwrap();
        let ServerEvent::OldMessages { room, messages } = wrapped else {
            unreachable!("decoded the wrong variant");
        };
        assert_eq!(room, Some(RoomId::new("1")));
        let bodies: Vec<_> = messages.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(bodies, ["first", "second"]);

        let bare = ServerEvent::decode(
            &json!({"event": "old_messages", "data": [
                {"sender": "a", "sender_id": "u1", "message": "only", "timestamp": "t1"}
            ]})
            .to_string(),
        )
        .unwrap()
        .unwrap();
        assert!(matches!(bare, ServerEvent::OldMessages { room: None, ref messages } if messages.len() == 1));
    }

    #[test]
    fn test_decode_new_message() {
        let event = ServerEvent::decode(
            &json!({"event": "new_message", "data": {
                "sender": "alice", "sender_id": "u1", "message": "hello", "timestamp": "2024-05-01T10:00:00"
            }})
            .to_string(),
        )
        .unwrap()
        .unwrap();
        let ServerEvent::NewMessage(msg) = event else {
            unreachable!("decoded the wrong variant");
        };
        assert_eq!(msg.sender, "alice");
        assert_eq!(msg.room, None);
    }

    #[test]
    fn test_decode_error_event() {
        let event = ServerEvent::decode(r#"{"event": "error", "data": {"error": "Unauthorized"}}"#)
            .unwrap()
            .unwrap();
        assert_eq!(
            event,
            ServerEvent::Error {
                error: "Unauthorized".to_string()
            }
        );
    }

    #[test]
    fn test_unknown_event_is_ignored() {
        let event = ServerEvent::decode(r#"{"event": "typing", "data": {"user": "x"}}"#).unwrap();
        assert!(event.is_none());
    }

    #[test]
    fn test_malformed_frames_are_protocol_errors() {
        assert!(matches!(
            ServerEvent::decode("not json"),
            Err(TransportError::Protocol(_))
        ));
        assert!(matches!(
            ServerEvent::decode(r#"{"event": "new_message", "data": {"sender": "x"}}"#),
            Err(TransportError::Protocol(_))
        ));
    }
}

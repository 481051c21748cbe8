//! REST and socket payload types.

use common::types::{MemberId, MessageId, Role, RoomId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

// =============================================================================
// Authentication
// =============================================================================

/// Body for `POST /signup` and `POST /login`.
#[derive(Serialize)]
pub struct CredentialsRequest<'a> {
    pub username: &'a str,
    pub password: &'a str,
}

/// Body for `POST /refresh`.
#[derive(Serialize)]
pub struct RefreshRequest<'a> {
    pub refresh_token: &'a str,
}

/// Response from `POST /login` and `POST /refresh`.
///
/// Refresh responses may omit the refresh token (no rotation) and the
/// username.
#[derive(Deserialize)]
pub struct TokenResponse {
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    #[serde(default)]
    pub username: Option<String>,
}

impl fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .finish()
    }
}

/// Generic `{"message": "..."}` acknowledgement.
#[derive(Debug, Default, Deserialize)]
pub struct MessageResponse {
    #[serde(default)]
    pub message: Option<String>,
}

// =============================================================================
// Rooms
// =============================================================================

/// A room the user belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub description: String,
}

/// `GET /my-rooms` returns either a bare list or `{"rooms": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum RoomList {
    Bare(Vec<Room>),
    Wrapped { rooms: Vec<Room> },
}

impl RoomList {
    pub fn into_rooms(self) -> Vec<Room> {
        match self {
            RoomList::Bare(rooms) | RoomList::Wrapped { rooms } => rooms,
        }
    }
}

/// Body for `POST /room`.
#[derive(Debug, Serialize)]
pub struct CreateRoomRequest<'a> {
    pub name: &'a str,
    pub description: &'a str,
}

// =============================================================================
// Members
// =============================================================================

/// One roster row as returned by `GET /room/{id}/members`.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "RawMember")]
pub struct Member {
    pub id: MemberId,
    pub name: String,
    pub role: Role,
}

/// Wire shape of a member row. The server keys users by `user_id` (the token
/// subject) and may also send its internal numeric `id`.
#[derive(Deserialize)]
struct RawMember {
    #[serde(default)]
    user_id: Option<MemberId>,
    #[serde(default)]
    id: Option<MemberId>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    name: Option<String>,
    role: Role,
}

impl TryFrom<RawMember> for Member {
    type Error = String;

    fn try_from(raw: RawMember) -> Result<Self, Self::Error> {
        let id = raw
            .user_id
            .or(raw.id)
            .filter(|id| !id.is_empty())
            .ok_or_else(|| "member row has no user_id or id".to_string())?;
        let name = raw
            .display_name
            .or(raw.username)
            .or(raw.name)
            .unwrap_or_else(|| id.to_string());
        Ok(Member {
            id,
            name,
            role: raw.role,
        })
    }
}

/// Members response: a bare list or `{"members": [...]}`.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum MemberList {
    Bare(Vec<Member>),
    Wrapped { members: Vec<Member> },
}

impl MemberList {
    pub fn into_members(self) -> Vec<Member> {
        match self {
            MemberList::Bare(members) | MemberList::Wrapped { members } => members,
        }
    }
}

/// A member's display name and role within one room.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub display_name: String,
    pub role: Role,
}

/// Member id to roster entry, ordered by id for stable rendering.
pub type Roster = BTreeMap<MemberId, RosterEntry>;

/// Build a roster from a members response. Later duplicates win.
pub fn roster_from_members(members: Vec<Member>) -> Roster {
    members
        .into_iter()
        .map(|m| {
            (
                m.id,
                RosterEntry {
                    display_name: m.name,
                    role: m.role,
                },
            )
        })
        .collect()
}

/// Roster changes a moderator can make.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModerationAction {
    Ban,
    Unban,
    Promote,
    Demote,
}

impl ModerationAction {
    /// Path segment under `/room/{id}/`.
    pub fn path_segment(self) -> &'static str {
        match self {
            ModerationAction::Ban => "ban",
            ModerationAction::Unban => "unban",
            ModerationAction::Promote => "promote",
            ModerationAction::Demote => "demote",
        }
    }
}

impl fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.path_segment())
    }
}

// =============================================================================
// Messages
// =============================================================================

/// A chat message as delivered by the server.
///
/// `timestamp` is the server-assigned ordering key and is kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<MessageId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub room: Option<RoomId>,
    #[serde(default)]
    pub sender_id: MemberId,
    #[serde(default)]
    pub sender: String,
    pub message: String,
    #[serde(default, alias = "date")]
    pub timestamp: String,
}

/// Identity used to recognise a redelivered message.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageKey {
    Id(MessageId),
    Content {
        sender_id: MemberId,
        timestamp: String,
        body: String,
    },
}

impl ChatMessage {
    /// Server id when present, otherwise `(sender_id, timestamp, body)`.
    pub fn key(&self) -> MessageKey {
        match &self.id {
            Some(id) if !id.is_empty() => MessageKey::Id(id.clone()),
            _ => MessageKey::Content {
                sender_id: self.sender_id.clone(),
                timestamp: self.timestamp.clone(),
                body: self.message.clone(),
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_room_list_accepts_both_shapes() {
        let bare: RoomList =
            serde_json::from_str(r#"[{"id": 1, "name": "general", "description": "hi"}]"#)
                .unwrap();
        let wrapped: RoomList =
            serde_json::from_str(r#"{"rooms": [{"id": "1", "name": "general"}]}"#).unwrap();

        let bare = bare.into_rooms();
        let wrapped = wrapped.into_rooms();
        assert_eq!(bare.len(), 1);
        let first = wrapped.first().unwrap();
        assert_eq!(bare.first().unwrap().id, first.id);
        assert_eq!(first.description, "");
    }

    #[test]
    fn test_member_aliases() {
        let members: MemberList = serde_json::from_str(
            r#"{"members": [
                {"id": 3, "user_id": "u1", "username": "alice", "role": "owner"},
                {"id": "u2", "name": "bob", "role": "member"}
            ]}"#,
        )
        .unwrap();
        let roster = roster_from_members(members.into_members());

        assert_eq!(roster.len(), 2);
        assert_eq!(roster[&MemberId::new("u1")].role, Role::Owner);
        assert_eq!(roster[&MemberId::new("u2")].display_name, "bob");
    }

    #[test]
    fn test_member_without_any_id_rejected() {
        let result = serde_json::from_str::<Member>(r#"{"username": "ghost", "role": "member"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_chat_message_accepts_date_alias() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"id": 7, "sender": "alice", "sender_id": "u1",
                "message": "hello", "date": "2024-01-01T00:00:00"}"#,
        )
        .unwrap();
        assert_eq!(msg.timestamp, "2024-01-01T00:00:00");
        assert_eq!(msg.key(), MessageKey::Id(MessageId::new("7")));
    }

    #[test]
    fn test_message_key_without_id_uses_content() {
        let msg: ChatMessage = serde_json::from_str(
            r#"{"sender": "alice", "sender_id": "u1", "message": "hi", "timestamp": "t1"}"#,
        )
        .unwrap();
        assert_eq!(
            msg.key(),
            MessageKey::Content {
                sender_id: MemberId::new("u1"),
                timestamp: "t1".to_string(),
                body: "hi".to_string(),
            }
        );
    }

    #[test]
    fn test_token_response_debug_redacts() {
        let resp: TokenResponse =
            serde_json::from_str(r#"{"access_token": "aaa", "refresh_token": "rrr"}"#).unwrap();
        let debug_str = format!("{resp:?}");
        assert!(!debug_str.contains("aaa"));
        assert!(!debug_str.contains("rrr"));
    }
}

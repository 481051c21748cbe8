//! Moderation integration tests.
//!
//! Every successful action is followed by a full roster re-fetch that
//! replaces the cached copy.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use chat_client::errors::ClientError;
use chat_client::events::SessionEvent;
use chat_client::moderation::RosterRefresh;
use chat_test_utils::*;
use common::types::{MemberId, Role, RoomId};
use serde_json::json;
use wiremock::matchers::{method, path};
use wiremock::{Mock, ResponseTemplate};

fn role_of(refresh: &RosterRefresh, member: &str) -> Option<Role> {
    match refresh {
        RosterRefresh::Updated(roster) => roster.get(&MemberId::new(member)).map(|e| e.role),
        RosterRefresh::Cleared { .. } => None,
    }
}

#[tokio::test]
async fn test_actions_refetch_roster_after_each_change() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;

    mount_members_once(
        &chat.server,
        "1",
        json!([
            member_json("member-alice", "alice", "owner"),
            member_json("member-bob", "bob", "member"),
        ]),
    )
    .await;
    let roster = chat.session.fetch_roster().await?;
    assert_eq!(roster.len(), 2);
    assert_eq!(roster[&MemberId::new("member-bob")].role, Role::Member);

    mount_moderation(&chat.server, "1", "promote", "member-bob").await;
    mount_members_once(
        &chat.server,
        "1",
        json!([
            member_json("member-alice", "alice", "owner"),
            member_json("member-bob", "bob", "admin"),
        ]),
    )
    .await;
    let refresh = chat.session.promote(&MemberId::new("member-bob")).await?;
    assert_eq!(role_of(&refresh, "member-bob"), Some(Role::Admin));

    mount_moderation(&chat.server, "1", "ban", "member-bob").await;
    mount_members_once(
        &chat.server,
        "1",
        json!({"members": [
            member_json("member-alice", "alice", "owner"),
            member_json("member-bob", "bob", "banned"),
        ]}),
    )
    .await;
    let refresh = chat.session.ban(&MemberId::new("member-bob")).await?;
    assert_eq!(role_of(&refresh, "member-bob"), Some(Role::Banned));

    let cached = chat.session.roster(&RoomId::new("1")).unwrap();
    assert_eq!(cached[&MemberId::new("member-bob")].role, Role::Banned);

    let updates = chat
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, SessionEvent::RosterUpdated { .. }))
        .count();
    assert_eq!(updates, 3);
    Ok(())
}

#[tokio::test]
async fn test_failed_action_surfaces_server_text_and_keeps_roster() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;

    mount_members_once(
        &chat.server,
        "1",
        json!([member_json("member-bob", "bob", "member")]),
    )
    .await;
    chat.session.fetch_roster().await?;

    Mock::given(method("POST"))
        .and(path("/room/1/demote/member-bob"))
        .respond_with(
            ResponseTemplate::new(403).set_body_json(json!({"error": "Only the owner can demote"})),
        )
        .expect(1)
        .mount(&chat.server)
        .await;

    let err = chat
        .session
        .demote(&MemberId::new("member-bob"))
        .await
        .unwrap_err();
    assert_eq!(err.user_message(), "Only the owner can demote");
    assert!(matches!(err, ClientError::RequestFailed { status: 403, .. }));

    // No refetch happened, so the cached roster is untouched.
    assert!(chat.session.roster(&RoomId::new("1")).is_some());
    Ok(())
}

#[tokio::test]
async fn test_roster_refetch_failure_clears_cache() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;

    mount_members_once(
        &chat.server,
        "1",
        json!([member_json("member-bob", "bob", "banned")]),
    )
    .await;
    chat.session.fetch_roster().await?;

    mount_moderation(&chat.server, "1", "unban", "member-bob").await;
    Mock::given(method("GET"))
        .and(path("/room/1/members"))
        .respond_with(ResponseTemplate::new(500).set_body_json(json!({"error": "database busy"})))
        .mount(&chat.server)
        .await;

    let refresh = chat.session.unban(&MemberId::new("member-bob")).await?;
    assert!(matches!(refresh, RosterRefresh::Cleared { .. }));
    assert!(chat.session.roster(&RoomId::new("1")).is_none());
    assert!(chat.drain_events().contains(&SessionEvent::RosterCleared {
        room: RoomId::new("1")
    }));
    Ok(())
}

#[tokio::test]
async fn test_leave_room_drops_room_and_notifies_socket() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    mount_my_rooms(
        &chat.server,
        json!([room_json("1", "general"), room_json("2", "random")]),
    )
    .await;
    Mock::given(method("DELETE"))
        .and(path("/leave_room/1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Left room"})))
        .expect(1)
        .mount(&chat.server)
        .await;

    chat.session.refresh_rooms().await?;
    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;

    let left = chat.session.leave_room().await?;
    assert_eq!(left, RoomId::new("1"));

    let data = server.expect_event("leave_room").await;
    assert_eq!(data["room"], "1");
    assert!(chat.session.active_room().is_none());
    let remaining: Vec<&str> = chat.session.rooms().iter().map(|r| r.id.as_str()).collect();
    assert_eq!(remaining, ["2"]);

    // Further actions need a room to be open again.
    assert!(matches!(
        chat.session.ban(&MemberId::new("member-bob")).await,
        Err(ClientError::NoActiveRoom)
    ));
    Ok(())
}

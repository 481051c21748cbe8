//! Room membership integration tests.
//!
//! Drives a full `ChatSession` against a wiremock REST server and the
//! scripted socket, checking the join-before-fetch/send ordering end to end.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use chat_client::coordinator::RoomJoinState;
use chat_client::errors::ClientError;
use chat_client::events::SessionEvent;
use chat_client::socket::ConnectionState;
use chat_test_utils::*;
use common::secret::SecretString;
use common::types::RoomId;
use serde_json::json;
use std::time::Duration;

const QUIET: Duration = Duration::from_millis(100);

fn bodies(chat: &TestChat) -> Vec<String> {
    chat.session
        .visible_messages()
        .iter()
        .map(|m| m.message.clone())
        .collect()
}

#[tokio::test]
async fn test_login_enter_confirm_fetches_history_once_in_server_order() -> Result<()> {
    let mut chat = TestChat::start().await?;
    let access = TestTokenBuilder::new().for_user("member-alice").build();
    mount_login(&chat.server, "alice", &access, "refresh-1").await;

    chat.session
        .login("alice", &SecretString::from("password"))
        .await?;
    assert_eq!(chat.session.tokens().subject_id(), "member-alice");
    assert_eq!(chat.session.tokens().display_name(), Some("alice"));

    let mut server = chat.connect().await;
    assert_eq!(server.access_token(), access);
    assert_eq!(chat.session.connection_state(), ConnectionState::Connected);

    let room = RoomId::new("1");
    let ticket = chat.session.enter(&room).await?;
    let data = server.expect_event("join_rooms").await;
    assert_eq!(data["room_ids"], json!(["1"]));
    assert_eq!(chat.session.room_state(&room), RoomJoinState::JoinRequested);

    // Nothing else may leave the client before the server confirms.
    assert!(matches!(
        chat.session.send_message("too early").await,
        Err(ClientError::NotJoined { .. })
    ));
    assert!(matches!(
        chat.session.fetch_history().await,
        Err(ClientError::NotJoined { .. })
    ));
    server.expect_silence(QUIET).await;

    server.joined_rooms(&["1"]);
    chat.session.wait_joined(ticket).await?;
    assert_eq!(chat.session.room_state(&room), RoomJoinState::Joined);

    let data = server.expect_event("fetch_history").await;
    assert_eq!(data["room"], "1");

    // Server order is kept even though timestamps run backwards.
    server.old_messages(
        Some("1"),
        json!([
            message_json("member-bob", "bob", "first", "2024-05-01T10:00:00"),
            message_json("member-carol", "carol", "second", "2024-05-01T09:00:00"),
        ]),
    );
    chat.pump().await;
    assert_eq!(bodies(&chat), ["first", "second"]);

    server.expect_silence(QUIET).await;

    let events = chat.drain_events();
    let joined = events
        .iter()
        .position(|e| matches!(e, SessionEvent::RoomJoined { .. }))
        .expect("no RoomJoined");
    let loaded = events
        .iter()
        .position(|e| matches!(e, SessionEvent::HistoryLoaded { .. }))
        .expect("no HistoryLoaded");
    assert!(joined < loaded);
    Ok(())
}

#[tokio::test]
async fn test_omitted_room_is_access_denied_without_history_fetch() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut server = chat.connect().await;

    let room = RoomId::new("2");
    let ticket = chat.session.enter(&room).await?;
    server.expect_event("join_rooms").await;
    server.joined_rooms(&[]);

    let err = chat.session.wait_joined(ticket).await.unwrap_err();
    assert!(
        matches!(err, ClientError::AccessDenied { ref room_id } if *room_id == room),
        "unexpected error: {err:?}"
    );
    assert_eq!(chat.session.room_state(&room), RoomJoinState::Unjoined);
    server.expect_silence(QUIET).await;

    assert!(chat
        .drain_events()
        .contains(&SessionEvent::AccessDenied { room }));
    Ok(())
}

#[tokio::test]
async fn test_send_goes_out_only_after_join() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;

    assert!(matches!(
        chat.session.send_message("   ").await,
        Err(ClientError::Validation(_))
    ));
    server.expect_silence(QUIET).await;

    chat.session.send_message("  hello  ").await?;
    let data = server.expect_event("send_message").await;
    assert_eq!(data, json!({"room": "1", "message": "hello"}));

    // The sent message is only rendered once the server echoes it.
    assert!(bodies(&chat).is_empty());
    server.new_message(json!({
        "room": "1",
        "sender_id": "member-alice",
        "sender": "alice",
        "message": "hello",
        "timestamp": "2024-05-01T10:00:00",
    }));
    chat.pump().await;
    assert_eq!(bodies(&chat), ["hello"]);
    Ok(())
}

#[tokio::test]
async fn test_reconnect_resets_membership_and_rejoins() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;
    let room = RoomId::new("1");

    server.disconnect();
    chat.pump().await;

    assert_eq!(chat.session.connection_state(), ConnectionState::Disconnected);
    assert_eq!(chat.session.room_state(&room), RoomJoinState::Unjoined);
    assert!(matches!(
        chat.session.send_message("while away").await,
        Err(ClientError::NotJoined { .. })
    ));

    // A fresh handshake is required on the new connection.
    let mut server = chat.connect().await;
    let data = server.expect_event("join_rooms").await;
    assert_eq!(data["room_ids"], json!(["1"]));
    assert_eq!(chat.session.room_state(&room), RoomJoinState::JoinRequested);

    server.joined_rooms(&["1"]);
    chat.pump().await;
    assert_eq!(chat.session.room_state(&room), RoomJoinState::Joined);
    server.expect_event("fetch_history").await;
    Ok(())
}

#[tokio::test]
async fn test_reopen_supersedes_in_flight_join() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut first = chat.connect().await;

    let room = RoomId::new("1");
    let ticket = chat.session.enter(&room).await?;
    first.expect_event("join_rooms").await;

    // Replace the connection before the confirmation arrives.
    chat.session.connect().await?;
    let mut second = chat.acceptor.accept().await;
    first.joined_rooms(&["1"]);
    chat.pump().await;

    assert!(matches!(
        chat.session.wait_joined(ticket).await,
        Err(ClientError::NotConnected)
    ));
    second.expect_event("join_rooms").await;
    assert_eq!(chat.session.room_state(&room), RoomJoinState::JoinRequested);

    second.joined_rooms(&["1"]);
    chat.pump().await;
    assert_eq!(chat.session.room_state(&room), RoomJoinState::Joined);
    Ok(())
}

#[tokio::test]
async fn test_live_messages_never_render_into_wrong_room() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;
    chat.enter_joined(&mut server, "2").await;

    let mut for_one = message_json("member-bob", "bob", "for one", "t1");
    for_one["room"] = json!("1");
    let mut for_two = message_json("member-bob", "bob", "for two", "t2");
    for_two["room"] = json!("2");

    server.new_message(for_one);
    chat.pump().await;
    server.new_message(for_two);
    chat.pump().await;
    // Two rooms joined: a message without a room cannot be placed.
    server.new_message(message_json("member-bob", "bob", "orphan", "t3"));
    chat.pump().await;

    assert_eq!(bodies(&chat), ["for two"]);

    // Switching back re-fetches history and appends what was queued.
    let ticket = chat.session.enter(&RoomId::new("1")).await?;
    chat.session.wait_joined(ticket).await?;
    let data = server.expect_event("fetch_history").await;
    assert_eq!(data["room"], "1");
    server.old_messages(
        Some("1"),
        json!([message_json("member-carol", "carol", "older", "t0")]),
    );
    chat.pump().await;

    assert_eq!(bodies(&chat), ["older", "for one"]);
    Ok(())
}

#[tokio::test]
async fn test_leave_is_fire_and_forget() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;
    let room = RoomId::new("1");

    chat.session.leave(&room).await?;
    let data = server.expect_event("leave_room").await;
    assert_eq!(data["room"], "1");
    assert_eq!(chat.session.room_state(&room), RoomJoinState::Unjoined);
    assert!(chat.session.active_room().is_none());

    // A late broadcast for the room is discarded.
    let mut late = message_json("member-bob", "bob", "late", "t9");
    late["room"] = json!("1");
    server.new_message(late);
    chat.pump().await;
    assert!(bodies(&chat).is_empty());
    Ok(())
}

#[tokio::test]
async fn test_server_error_is_non_fatal() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    let server = chat.connect().await;

    server.error("Room does not exist");
    chat.pump().await;

    assert_eq!(chat.session.connection_state(), ConnectionState::Connected);
    assert!(chat
        .drain_events()
        .contains(&SessionEvent::ServerError("Room does not exist".to_string())));
    Ok(())
}

#[tokio::test]
async fn test_enter_while_disconnected_is_rejected() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    assert!(matches!(
        chat.session.enter(&RoomId::new("1")).await,
        Err(ClientError::NotConnected)
    ));
    chat.acceptor.expect_no_connection(QUIET).await;
    Ok(())
}

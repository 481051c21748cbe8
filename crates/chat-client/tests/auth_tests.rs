//! Credential lifecycle integration tests.
//!
//! Covers refresh-and-retry through the session, socket re-authentication
//! after rotation, and the full reset when a refresh fails.

// Test code is allowed to use expect/unwrap for assertions
#![allow(clippy::unwrap_used, clippy::expect_used)]

use anyhow::Result;
use chat_client::errors::ClientError;
use chat_client::events::SessionEvent;
use chat_client::socket::ConnectionState;
use chat_test_utils::*;
use common::types::RoomId;
use serde_json::json;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, ResponseTemplate};

#[tokio::test]
async fn test_rotation_reopens_socket_with_new_token() -> Result<()> {
    let stale = TestTokenBuilder::new().for_user("member-alice").build();
    let fresh = TestTokenBuilder::new()
        .for_user("member-alice")
        .expires_in(7200)
        .build();
    let mut chat = TestChat::with_credentials(&stale, Some(TEST_REFRESH_TOKEN)).await?;

    Mock::given(method("GET"))
        .and(path("/my-rooms"))
        .and(header("Authorization", format!("Bearer {stale}").as_str()))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Token expired"})))
        .expect(1)
        .mount(&chat.server)
        .await;
    Mock::given(method("GET"))
        .and(path("/my-rooms"))
        .and(header("Authorization", format!("Bearer {fresh}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([room_json("1", "general")])))
        .expect(1)
        .mount(&chat.server)
        .await;
    mount_refresh(&chat.server, TEST_REFRESH_TOKEN, &fresh).await;

    let mut first = chat.connect().await;
    chat.enter_joined(&mut first, "1").await;
    assert_eq!(first.access_token(), stale);

    let rooms = chat.session.refresh_rooms().await?;
    assert_eq!(rooms.len(), 1);
    assert_eq!(rooms[0].id, RoomId::new("1"));

    // The live connection is replaced by one using the rotated token.
    let mut second = chat.acceptor.accept().await;
    assert_eq!(second.access_token(), fresh);
    assert_eq!(chat.connector.tokens(), [stale.clone(), fresh.clone()]);

    chat.pump().await;
    assert_eq!(chat.session.connection_state(), ConnectionState::Connected);
    let data = second.expect_event("join_rooms").await;
    assert_eq!(data["room_ids"], json!(["1"]));

    let stored = chat.store.snapshot();
    assert!(stored.access_token.is_some());
    Ok(())
}

#[tokio::test]
async fn test_refresh_failure_resets_whole_session() -> Result<()> {
    let stale = TestTokenBuilder::new().for_user("member-alice").build();
    let mut chat = TestChat::with_credentials(&stale, Some(TEST_REFRESH_TOKEN)).await?;

    Mock::given(method("GET"))
        .and(path("/my-rooms"))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "Token expired"})))
        .expect(1)
        .mount(&chat.server)
        .await;
    mount_refresh_failure(&chat.server).await;

    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;
    chat.drain_events();

    let err = chat.session.refresh_rooms().await.unwrap_err();
    assert!(matches!(err, ClientError::AuthenticationLost));
    assert!(err.is_fatal());

    assert!(!chat.session.tokens().is_authenticated());
    assert!(chat.store.snapshot().is_empty());
    assert_eq!(chat.session.connection_state(), ConnectionState::Disconnected);
    assert!(chat.session.active_room().is_none());
    assert!(chat.session.rooms().is_empty());

    let events = chat.drain_events();
    assert!(events.contains(&SessionEvent::AuthenticationLost));

    // Nothing reconnects on its own.
    chat.acceptor
        .expect_no_connection(std::time::Duration::from_millis(100))
        .await;
    Ok(())
}

#[tokio::test]
async fn test_expired_token_is_refreshed_before_connect() -> Result<()> {
    let expired = TestTokenBuilder::new()
        .for_user("member-alice")
        .expired()
        .build();
    let fresh = TestTokenBuilder::new().for_user("member-alice").build();
    let mut chat = TestChat::with_credentials(&expired, Some(TEST_REFRESH_TOKEN)).await?;
    mount_refresh(&chat.server, TEST_REFRESH_TOKEN, &fresh).await;

    let server = chat.connect().await;

    assert_eq!(server.access_token(), fresh);
    assert_eq!(chat.connector.attempts(), 1);
    Ok(())
}

#[tokio::test]
async fn test_handshake_rejection_is_surfaced_without_refresh() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    Mock::given(method("POST"))
        .and(path("/refresh"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&chat.server)
        .await;

    chat.connector.reject_next(401);
    chat.session.connect().await?;
    chat.pump().await;

    assert_eq!(chat.session.connection_state(), ConnectionState::Errored);
    let events = chat.drain_events();
    assert!(events
        .iter()
        .any(|e| matches!(e, SessionEvent::TransportError(_))));
    assert!(events.contains(&SessionEvent::ConnectionChanged(ConnectionState::Errored)));

    // Still logged in; the presentation layer decides what to do next.
    assert!(chat.session.tokens().is_authenticated());
    assert!(matches!(
        chat.session.enter(&RoomId::new("1")).await,
        Err(ClientError::NotConnected)
    ));
    Ok(())
}

#[tokio::test]
async fn test_logout_clears_credentials_and_connection() -> Result<()> {
    let mut chat = TestChat::logged_in().await?;
    Mock::given(method("POST"))
        .and(path("/logout"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "Logged out"})))
        .expect(1)
        .mount(&chat.server)
        .await;

    let mut server = chat.connect().await;
    chat.enter_joined(&mut server, "1").await;

    chat.session.logout().await;

    assert!(chat.store.snapshot().is_empty());
    assert!(!chat.session.tokens().is_authenticated());
    assert_eq!(chat.session.connection_state(), ConnectionState::Disconnected);
    assert!(chat.session.active_room().is_none());
    assert!(chat.drain_events().contains(&SessionEvent::LoggedOut));

    assert!(matches!(
        chat.session.connect().await,
        Err(ClientError::NotAuthenticated)
    ));
    Ok(())
}

//! Session test harness.
//!
//! [`TestChat`] wires a [`ChatSession`] to a wiremock REST server, an
//! in-memory credential store and the scripted socket, and offers helpers to
//! drive socket events deterministically.

use crate::mock_socket::{ConnectionAcceptor, MockConnector, ServerHandle, DEFAULT_EXPECT_TIMEOUT};
use crate::token_builders::TestTokenBuilder;
use chat_client::config::Config;
use chat_client::events::SessionEvent;
use chat_client::session::ChatSession;
use chat_client::storage::{MemoryCredentialStore, StoredCredentials};
use common::types::RoomId;
use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use wiremock::MockServer;

/// Refresh token used by [`TestChat::logged_in`].
pub const TEST_REFRESH_TOKEN: &str = "refresh-token-1";

/// A session under test plus everything it talks to.
pub struct TestChat {
    pub server: MockServer,
    pub connector: Arc<MockConnector>,
    pub acceptor: ConnectionAcceptor,
    pub store: MemoryCredentialStore,
    pub session: ChatSession,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl TestChat {
    /// Logged-out session.
    pub async fn start() -> Result<Self, anyhow::Error> {
        Self::with_store(MemoryCredentialStore::new()).await
    }

    /// Session restored from stored credentials.
    pub async fn with_credentials(
        access: &str,
        refresh: Option<&str>,
    ) -> Result<Self, anyhow::Error> {
        let store = MemoryCredentialStore::with_credentials(StoredCredentials {
            access_token: Some(SecretString::from(access)),
            refresh_token: refresh.map(SecretString::from),
            username: Some("alice".to_string()),
        });
        Self::with_store(store).await
    }

    /// Session holding a fresh access token and [`TEST_REFRESH_TOKEN`].
    pub async fn logged_in() -> Result<Self, anyhow::Error> {
        let access = TestTokenBuilder::new().for_user("member-alice").build();
        Self::with_credentials(&access, Some(TEST_REFRESH_TOKEN)).await
    }

    async fn with_store(store: MemoryCredentialStore) -> Result<Self, anyhow::Error> {
        let server = MockServer::start().await;
        let (connector, acceptor) = MockConnector::new();
        let config = Config::default()
            .with_api_url(server.uri())
            .with_join_timeout(Duration::from_secs(2));

        let session = ChatSession::new(config, Arc::new(store.clone()), connector.clone())
            .map_err(|e| anyhow::anyhow!("Failed to build session: {}", e))?;
        let events = session.subscribe();

        Ok(Self {
            server,
            connector,
            acceptor,
            store,
            session,
            events,
        })
    }

    /// Connect and process the handshake. Returns the server side.
    pub async fn connect(&mut self) -> ServerHandle {
        self.session.connect().await.expect("connect failed");
        let server = self.acceptor.accept().await;
        self.pump().await;
        server
    }

    /// Handle exactly one socket event.
    pub async fn pump(&mut self) {
        tokio::time::timeout(DEFAULT_EXPECT_TIMEOUT, self.session.process_next_event())
            .await
            .expect("timed out waiting for a socket event");
    }

    /// Enter `room` and complete the join handshake and history fetch.
    pub async fn enter_joined(&mut self, server: &mut ServerHandle, room: &str) {
        let room_id = RoomId::new(room);
        let ticket = self.session.enter(&room_id).await.expect("enter failed");
        server.expect_event("join_rooms").await;
        server.joined_rooms(&[room]);
        self.session
            .wait_joined(ticket)
            .await
            .expect("join was not confirmed");
        server.expect_event("fetch_history").await;
        server.old_messages(Some(room), serde_json::json!([]));
        self.pump().await;
    }

    /// Session events published so far, without waiting.
    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}

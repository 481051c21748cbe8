//! Moderation actions and roster refresh.
//!
//! Each action validates locally, makes one REST call, and on success drops
//! the cached roster and fetches it again. Roster responses always replace
//! the cache wholesale. A failed roster fetch clears the cache rather than
//! leaving stale roles on display.

use crate::api_client::ApiClient;
use crate::coordinator::{CoordinatorAction, RoomMembershipCoordinator};
use crate::errors::ClientError;
use crate::models::{roster_from_members, ModerationAction, Roster};
use common::types::{MemberId, RoomId};
use tracing::{info, instrument, warn};

/// Roster state after a successful moderation call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RosterRefresh {
    Updated(Roster),
    /// The action succeeded but the roster could not be re-fetched.
    Cleared { reason: String },
}

/// Fetch `room`'s member list and replace the cached roster with it.
///
/// # Errors
///
/// Whatever the members call returns. The cached roster is cleared first.
#[instrument(skip_all, fields(room_id = %room))]
pub async fn fetch_roster(
    api: &mut ApiClient,
    coordinator: &mut RoomMembershipCoordinator,
    room: &RoomId,
) -> Result<Roster, ClientError> {
    match api.room_members(room).await {
        Ok(members) => {
            let roster = roster_from_members(members);
            coordinator.replace_roster(room, roster.clone());
            Ok(roster)
        }
        Err(e) => {
            coordinator.invalidate_roster(room);
            warn!(target: "chat.moderation", room_id = %room, error = %e, "Roster fetch failed, cache cleared");
            Err(e)
        }
    }
}

/// Borrowed view over the pieces moderation needs.
pub struct ModerationActions<'a> {
    api: &'a mut ApiClient,
    coordinator: &'a mut RoomMembershipCoordinator,
    active_room: Option<&'a RoomId>,
}

impl<'a> ModerationActions<'a> {
    pub fn new(
        api: &'a mut ApiClient,
        coordinator: &'a mut RoomMembershipCoordinator,
        active_room: Option<&'a RoomId>,
    ) -> Self {
        Self {
            api,
            coordinator,
            active_room,
        }
    }

    pub async fn ban(&mut self, member: &MemberId) -> Result<RosterRefresh, ClientError> {
        self.apply(ModerationAction::Ban, member).await
    }

    pub async fn unban(&mut self, member: &MemberId) -> Result<RosterRefresh, ClientError> {
        self.apply(ModerationAction::Unban, member).await
    }

    pub async fn promote(&mut self, member: &MemberId) -> Result<RosterRefresh, ClientError> {
        self.apply(ModerationAction::Promote, member).await
    }

    pub async fn demote(&mut self, member: &MemberId) -> Result<RosterRefresh, ClientError> {
        self.apply(ModerationAction::Demote, member).await
    }

    /// Leave the active room on the server, then drop its membership state.
    ///
    /// Returns the room left and the coordinator actions to execute.
    pub async fn leave_room(&mut self) -> Result<(RoomId, Vec<CoordinatorAction>), ClientError> {
        let room = self.active_room()?;
        self.api.leave_room(&room).await?;

        self.coordinator.invalidate_roster(&room);
        let actions = self.coordinator.leave(&room);
        info!(target: "chat.moderation", room_id = %room, "Left room");
        Ok((room, actions))
    }

    #[instrument(skip_all, fields(action = %action, member = %member))]
    async fn apply(
        &mut self,
        action: ModerationAction,
        member: &MemberId,
    ) -> Result<RosterRefresh, ClientError> {
        let room = self.active_room()?;
        if member.is_empty() {
            return Err(ClientError::Validation("Member id is required".to_string()));
        }

        // Server text on failure is surfaced unmodified through RequestFailed.
        self.api.moderate(action, &room, member).await?;
        info!(target: "chat.moderation", room_id = %room, action = %action, "Moderation applied");

        self.coordinator.invalidate_roster(&room);
        match fetch_roster(self.api, self.coordinator, &room).await {
            Ok(roster) => Ok(RosterRefresh::Updated(roster)),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => Ok(RosterRefresh::Cleared {
                reason: e.user_message(),
            }),
        }
    }

    fn active_room(&self) -> Result<RoomId, ClientError> {
        self.active_room
            .filter(|r| !r.is_empty())
            .cloned()
            .ok_or(ClientError::NoActiveRoom)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::socket::ClientEvent;
    use crate::storage::{MemoryCredentialStore, StoredCredentials};
    use crate::token_manager::TokenManager;
    use common::secret::SecretString;
    use common::types::Role;
    use serde_json::json;
    use std::sync::Arc;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn api_for(server: &MockServer) -> ApiClient {
        let store = MemoryCredentialStore::with_credentials(StoredCredentials {
            access_token: Some(SecretString::from("access")),
            refresh_token: Some(SecretString::from("refresh")),
            username: Some("owner".to_string()),
        });
        let tokens = TokenManager::load_from_storage(Arc::new(store));
        ApiClient::new(&Config::default().with_api_url(server.uri()), tokens).unwrap()
    }

    async fn mount_members(server: &MockServer, room: &str, members: serde_json::Value) {
        Mock::given(method("GET"))
            .and(path(format!("/room/{room}/members")))
            .respond_with(ResponseTemplate::new(200).set_body_json(members))
            .up_to_n_times(1)
            .mount(server)
            .await;
    }

    #[tokio::test]
    async fn test_requires_active_room_and_member() {
        let server = MockServer::start().await;
        let mut api = api_for(&server);
        let mut coordinator = RoomMembershipCoordinator::new();

        let mut actions = ModerationActions::new(&mut api, &mut coordinator, None);
        assert!(matches!(
            actions.ban(&MemberId::new("u2")).await,
            Err(ClientError::NoActiveRoom)
        ));

        let room = RoomId::new("1");
        let mut actions = ModerationActions::new(&mut api, &mut coordinator, Some(&room));
        assert!(matches!(
            actions.ban(&MemberId::new(" ")).await,
            Err(ClientError::Validation(_))
        ));

        // Nothing reached the server.
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_promote_refetches_roster() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/room/1/promote/u2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "ok"})))
            .expect(1)
            .mount(&server)
            .await;
        mount_members(
            &server,
            "1",
            json!([
                {"user_id": "u1", "username": "owner", "role": "owner"},
                {"user_id": "u2", "username": "bob", "role": "admin"}
            ]),
        )
        .await;

        let mut api = api_for(&server);
        let mut coordinator = RoomMembershipCoordinator::new();
        let room = RoomId::new("1");

        let outcome = ModerationActions::new(&mut api, &mut coordinator, Some(&room))
            .promote(&MemberId::new("u2"))
            .await
            .unwrap();

        let RosterRefresh::Updated(roster) = outcome else {
            unreachable!("roster was not refreshed");
        };
        assert_eq!(roster[&MemberId::new("u2")].role, Role::Admin);
        assert_eq!(coordinator.roster(&room), Some(&roster));
    }

    #[tokio::test]
    async fn test_failure_surfaces_server_message_and_keeps_roster() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/room/1/ban/u1"))
            .respond_with(
                ResponseTemplate::new(403).set_body_json(json!({"error": "Cannot ban the owner"})),
            )
            .mount(&server)
            .await;

        let mut api = api_for(&server);
        let mut coordinator = RoomMembershipCoordinator::new();
        let room = RoomId::new("1");
        coordinator.replace_roster(&room, Roster::new());

        let err = ModerationActions::new(&mut api, &mut coordinator, Some(&room))
            .ban(&MemberId::new("u1"))
            .await
            .unwrap_err();

        assert_eq!(err.user_message(), "Cannot ban the owner");
        assert!(coordinator.roster(&room).is_some());
    }

    #[tokio::test]
    async fn test_failed_refetch_clears_roster() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/room/1/demote/u2"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/room/1/members"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let mut api = api_for(&server);
        let mut coordinator = RoomMembershipCoordinator::new();
        let room = RoomId::new("1");
        coordinator.replace_roster(&room, Roster::new());

        let outcome = ModerationActions::new(&mut api, &mut coordinator, Some(&room))
            .demote(&MemberId::new("u2"))
            .await
            .unwrap();

        assert!(matches!(outcome, RosterRefresh::Cleared { .. }));
        assert!(coordinator.roster(&room).is_none());
    }

    #[tokio::test]
    async fn test_leave_room_clears_membership() {
        let server = MockServer::start().await;
        Mock::given(method("DELETE"))
            .and(path("/leave_room/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"message": "left"})))
            .expect(1)
            .mount(&server)
            .await;

        let mut api = api_for(&server);
        let mut coordinator = RoomMembershipCoordinator::new();
        let room = RoomId::new("1");
        coordinator.on_connected(1);
        let (_ticket, _) = coordinator.enter(&room).unwrap();
        coordinator.on_joined_rooms(1, &[room.clone()]);
        coordinator.replace_roster(&room, Roster::new());

        let (left, actions) = ModerationActions::new(&mut api, &mut coordinator, Some(&room))
            .leave_room()
            .await
            .unwrap();

        assert_eq!(left, room);
        assert!(!coordinator.is_joined(&room));
        assert!(coordinator.roster(&room).is_none());
        assert_eq!(
            actions,
            vec![CoordinatorAction::Emit(ClientEvent::LeaveRoom { room })]
        );
    }
}

//! The session context object.
//!
//! [`ChatSession`] owns every component and is the only thing the
//! presentation layer talks to. It executes coordinator actions against the
//! socket, routes socket events, and publishes [`SessionEvent`]s.
//!
//! Two cross-cutting rules are enforced here after every REST result:
//!
//! - `AuthenticationLost` resets the whole session (socket closed, rooms and
//!   membership dropped, subscribers told).
//! - If the access token changed while the socket was live, the socket is
//!   re-opened so the connection authenticates with the current token.

use crate::api_client::ApiClient;
use crate::config::Config;
use crate::coordinator::{CoordinatorAction, JoinTicket, RoomJoinState, RoomMembershipCoordinator};
use crate::errors::ClientError;
use crate::events::SessionEvent;
use crate::message_stream::{Delivery, MessageStream};
use crate::models::{ChatMessage, ModerationAction, Room, Roster};
use crate::moderation::{self, ModerationActions, RosterRefresh};
use crate::observability::metrics;
use crate::socket::{
    ConnectionState, Connector, ServerEvent, SocketEvent, SocketEventKind, SocketSession,
    WsConnector,
};
use crate::storage::{CredentialStore, FileCredentialStore};
use crate::token_manager::TokenManager;
use common::secret::SecretString;
use common::types::{MemberId, RoomId};
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio::time::Instant;
use tracing::{debug, info, instrument, warn};

/// One chat session: credentials, connection, rooms and the open room.
pub struct ChatSession {
    config: Config,
    api: ApiClient,
    socket: SocketSession,
    coordinator: RoomMembershipCoordinator,
    stream: MessageStream,
    rooms: Vec<Room>,
    active_room: Option<RoomId>,
    events: broadcast::Sender<SessionEvent>,
    /// Token rotation the socket was last opened with.
    last_rotation: u64,
}

impl std::fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatSession")
            .field("api", &self.api)
            .field("socket", &self.socket)
            .field("rooms", &self.rooms.len())
            .field("active_room", &self.active_room)
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    /// Build a session, restoring credentials from `store`.
    ///
    /// # Errors
    ///
    /// `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(
        config: Config,
        store: Arc<dyn CredentialStore>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ClientError> {
        let tokens = TokenManager::load_from_storage(store);
        let last_rotation = tokens.rotation();
        let api = ApiClient::new(&config, tokens)?;
        let socket = SocketSession::new(
            connector,
            config.socket_url.clone(),
            config.event_channel_capacity,
        );
        let stream = MessageStream::new(config.live_queue_limit, config.max_message_length);
        let (events, _) = broadcast::channel(config.event_channel_capacity.max(1));

        Ok(Self {
            config,
            api,
            socket,
            coordinator: RoomMembershipCoordinator::new(),
            stream,
            rooms: Vec::new(),
            active_room: None,
            events,
            last_rotation,
        })
    }

    /// Build a session with the credential file and WebSocket transport
    /// named by `config`.
    pub fn from_config(config: Config) -> Result<Self, ClientError> {
        let store = Arc::new(FileCredentialStore::new(config.credentials_path.clone()));
        let connector = Arc::new(WsConnector::new(config.connect_timeout));
        Self::new(config, store, connector)
    }

    // ========================================================================
    // Views
    // ========================================================================

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn tokens(&self) -> &TokenManager {
        self.api.tokens()
    }

    pub fn connection_state(&self) -> ConnectionState {
        self.socket.state()
    }

    pub fn rooms(&self) -> &[Room] {
        &self.rooms
    }

    pub fn active_room(&self) -> Option<&RoomId> {
        self.active_room.as_ref()
    }

    pub fn room_state(&self, room: &RoomId) -> RoomJoinState {
        self.coordinator.state(room)
    }

    pub fn visible_messages(&self) -> &[ChatMessage] {
        self.stream.visible()
    }

    pub fn roster(&self, room: &RoomId) -> Option<&Roster> {
        self.coordinator.roster(room)
    }

    // ========================================================================
    // Account
    // ========================================================================

    pub async fn signup(
        &mut self,
        username: &str,
        password: &SecretString,
    ) -> Result<Option<String>, ClientError> {
        let result = self.api.signup(username, password).await;
        self.settle(result).await
    }

    pub async fn login(&mut self, username: &str, password: &SecretString) -> Result<(), ClientError> {
        let result = self.api.login(username, password).await;
        self.settle(result).await
    }

    /// Close the socket, tell the server (best effort) and forget everything.
    #[instrument(skip_all)]
    pub async fn logout(&mut self) {
        self.socket.close().await;
        self.api.logout().await;
        self.reset_local();
        info!(target: "chat.session", "Logged out");
        self.publish(SessionEvent::LoggedOut);
    }

    // ========================================================================
    // Rooms over REST
    // ========================================================================

    /// Reload the rooms the user belongs to.
    pub async fn refresh_rooms(&mut self) -> Result<Vec<Room>, ClientError> {
        let result = self.api.my_rooms().await;
        let rooms = self.settle(result).await?;
        self.rooms.clone_from(&rooms);
        self.publish(SessionEvent::RoomsUpdated {
            rooms: rooms.clone(),
        });
        Ok(rooms)
    }

    pub async fn create_room(&mut self, name: &str, description: &str) -> Result<Vec<Room>, ClientError> {
        let result = self.api.create_room(name, description).await;
        self.settle(result).await?;
        self.refresh_rooms().await
    }

    /// Become a member of a room by id. Viewing it still needs [`Self::enter`].
    pub async fn join_room(&mut self, room: &RoomId) -> Result<Vec<Room>, ClientError> {
        let result = self.api.join_room(room).await;
        self.settle(result).await?;
        self.refresh_rooms().await
    }

    // ========================================================================
    // Connection
    // ========================================================================

    /// Open the persistent connection with the current access token.
    ///
    /// A token whose `exp` has passed is refreshed first. The handshake
    /// outcome arrives as a socket event.
    #[instrument(skip_all)]
    pub async fn connect(&mut self) -> Result<u64, ClientError> {
        if !self.api.tokens().is_authenticated() {
            return Err(ClientError::NotAuthenticated);
        }

        let now = chrono::Utc::now().timestamp();
        if self.api.tokens().access_token_expired_at(now) && self.api.tokens().refresh_token().is_some() {
            info!(target: "chat.session", "Access token expired, refreshing before connect");
            if let Err(e) = self.api.refresh().await {
                if e.is_fatal() {
                    self.authentication_lost().await;
                }
                return Err(e);
            }
        }

        self.open_socket().await
    }

    /// Close the persistent connection. Membership is re-requested on the
    /// next connect.
    pub async fn disconnect(&mut self) {
        self.socket.close().await;
        self.coordinator.on_disconnected();
        self.publish(SessionEvent::ConnectionChanged(ConnectionState::Disconnected));
    }

    async fn open_socket(&mut self) -> Result<u64, ClientError> {
        self.coordinator.on_disconnected();
        let generation = self.socket.open(self.api.tokens().access_token()).await?;
        self.last_rotation = self.api.tokens().rotation();
        self.publish(SessionEvent::ConnectionChanged(ConnectionState::Connecting));
        Ok(generation)
    }

    // ========================================================================
    // Membership
    // ========================================================================

    /// Open `room` and request membership if it is not already confirmed.
    ///
    /// # Errors
    ///
    /// `NotConnected` if the socket is not connected.
    #[instrument(skip_all, fields(room_id = %room))]
    pub async fn enter(&mut self, room: &RoomId) -> Result<JoinTicket, ClientError> {
        let (ticket, mut actions) = self.coordinator.enter(room)?;

        let switching = self.stream.current_room() != Some(room);
        self.active_room = Some(room.clone());
        self.stream.open_room(room);

        // Re-opening a room that is still joined needs its history again.
        if switching && self.coordinator.is_joined(room) {
            actions.extend(self.coordinator.fetch_history(room)?);
        }

        self.execute(actions).await?;
        Ok(ticket)
    }

    /// Process socket events until `ticket` resolves or the join timeout
    /// passes.
    pub async fn wait_joined(&mut self, mut ticket: JoinTicket) -> Result<(), ClientError> {
        let deadline = Instant::now() + self.config.join_timeout;
        loop {
            if let Some(outcome) = ticket.try_result() {
                if matches!(outcome, Err(ClientError::NotConnected)) {
                    metrics::record_room_join("cancelled");
                }
                return outcome;
            }
            match tokio::time::timeout_at(deadline, self.socket.next_event()).await {
                Ok(event) => self.handle_socket_event(event).await,
                Err(_) => {
                    metrics::record_room_join("timeout");
                    return Err(ClientError::JoinTimeout {
                        room_id: ticket.room().clone(),
                    })
                }
            }
        }
    }

    pub async fn enter_and_wait(&mut self, room: &RoomId) -> Result<(), ClientError> {
        let ticket = self.enter(room).await?;
        self.wait_joined(ticket).await
    }

    /// Stop viewing `room` and drop its membership. No REST call.
    pub async fn leave(&mut self, room: &RoomId) -> Result<(), ClientError> {
        let actions = self.coordinator.leave(room);
        self.stream.forget_room(room);
        if self.active_room.as_ref() == Some(room) {
            self.active_room = None;
        }
        self.execute(actions).await
    }

    /// Send `body` to the open room.
    ///
    /// # Errors
    ///
    /// `NoActiveRoom`, `Validation` for an empty or oversized body, or
    /// `NotJoined` before the server has confirmed membership.
    pub async fn send_message(&mut self, body: &str) -> Result<(), ClientError> {
        let room = self.active_room.clone().ok_or(ClientError::NoActiveRoom)?;
        let body = self.stream.prepare_send(body)?;
        let actions = self.coordinator.send_message(&room, body)?;
        self.execute(actions).await
    }

    /// Ask again for the open room's history.
    pub async fn fetch_history(&mut self) -> Result<(), ClientError> {
        let room = self.active_room.clone().ok_or(ClientError::NoActiveRoom)?;
        let actions = self.coordinator.fetch_history(&room)?;
        self.execute(actions).await
    }

    // ========================================================================
    // Roster and moderation
    // ========================================================================

    /// Fetch the open room's roster, replacing the cached copy.
    pub async fn fetch_roster(&mut self) -> Result<Roster, ClientError> {
        let room = self.active_room.clone().ok_or(ClientError::NoActiveRoom)?;
        let result = moderation::fetch_roster(&mut self.api, &mut self.coordinator, &room).await;
        match &result {
            Ok(roster) => self.publish(SessionEvent::RosterUpdated {
                room,
                roster: roster.clone(),
            }),
            Err(_) => self.publish(SessionEvent::RosterCleared { room }),
        }
        self.settle(result).await
    }

    pub async fn ban(&mut self, member: &MemberId) -> Result<RosterRefresh, ClientError> {
        self.moderate(ModerationAction::Ban, member).await
    }

    pub async fn unban(&mut self, member: &MemberId) -> Result<RosterRefresh, ClientError> {
        self.moderate(ModerationAction::Unban, member).await
    }

    pub async fn promote(&mut self, member: &MemberId) -> Result<RosterRefresh, ClientError> {
        self.moderate(ModerationAction::Promote, member).await
    }

    pub async fn demote(&mut self, member: &MemberId) -> Result<RosterRefresh, ClientError> {
        self.moderate(ModerationAction::Demote, member).await
    }

    /// Leave the open room on the server and drop it from the room set.
    pub async fn leave_room(&mut self) -> Result<RoomId, ClientError> {
        let result = ModerationActions::new(
            &mut self.api,
            &mut self.coordinator,
            self.active_room.as_ref(),
        )
        .leave_room()
        .await;
        let (room, actions) = self.settle(result).await?;

        self.stream.forget_room(&room);
        self.rooms.retain(|r| r.id != room);
        self.active_room = None;
        if let Err(e) = self.execute(actions).await {
            debug!(target: "chat.session", error = %e, "Leave notification not sent");
        }
        self.publish(SessionEvent::RoomsUpdated {
            rooms: self.rooms.clone(),
        });
        Ok(room)
    }

    async fn moderate(
        &mut self,
        action: ModerationAction,
        member: &MemberId,
    ) -> Result<RosterRefresh, ClientError> {
        let mut actions = ModerationActions::new(
            &mut self.api,
            &mut self.coordinator,
            self.active_room.as_ref(),
        );
        let result = match action {
            ModerationAction::Ban => actions.ban(member).await,
            ModerationAction::Unban => actions.unban(member).await,
            ModerationAction::Promote => actions.promote(member).await,
            ModerationAction::Demote => actions.demote(member).await,
        };

        if let (Ok(refresh), Some(room)) = (&result, self.active_room.clone()) {
            match refresh {
                RosterRefresh::Updated(roster) => self.publish(SessionEvent::RosterUpdated {
                    room,
                    roster: roster.clone(),
                }),
                RosterRefresh::Cleared { .. } => {
                    self.publish(SessionEvent::RosterCleared { room });
                }
            }
        }
        self.settle(result).await
    }

    // ========================================================================
    // Socket events
    // ========================================================================

    /// Wait for the next event from the live connection.
    pub async fn next_socket_event(&mut self) -> SocketEvent {
        self.socket.next_event().await
    }

    /// Wait for and handle one socket event.
    pub async fn process_next_event(&mut self) {
        let event = self.socket.next_event().await;
        self.handle_socket_event(event).await;
    }

    /// Route one socket event through the coordinator and message stream.
    pub async fn handle_socket_event(&mut self, event: SocketEvent) {
        let generation = event.generation;
        match event.kind {
            SocketEventKind::Connected => {
                self.publish(SessionEvent::ConnectionChanged(ConnectionState::Connected));
                let actions = self.coordinator.on_connected(generation);
                self.execute_logged(actions).await;
            }
            SocketEventKind::Disconnected { reason } => {
                self.coordinator.on_disconnected();
                metrics::set_rooms_joined(0);
                self.publish(SessionEvent::ConnectionChanged(ConnectionState::Disconnected));
                if let Some(reason) = reason {
                    self.publish(SessionEvent::TransportError(reason));
                }
            }
            SocketEventKind::Failed(e) => {
                self.coordinator.on_disconnected();
                metrics::set_rooms_joined(0);
                self.publish(SessionEvent::TransportError(e.to_string()));
                self.publish(SessionEvent::ConnectionChanged(ConnectionState::Errored));
            }
            SocketEventKind::Server(server_event) => {
                self.handle_server_event(generation, server_event).await;
            }
        }
    }

    async fn handle_server_event(&mut self, generation: u64, event: ServerEvent) {
        match event {
            ServerEvent::JoinedRooms { rooms } => {
                let actions = self.coordinator.on_joined_rooms(generation, &rooms);
                self.execute_logged(actions).await;
                metrics::set_rooms_joined(self.coordinator.joined_rooms().len());
            }
            ServerEvent::OldMessages { room, messages } => {
                let Some(room) = self.coordinator.attribute_history(generation, room.as_ref())
                else {
                    return;
                };
                if self.stream.deliver_history(&room, messages) {
                    self.publish(SessionEvent::HistoryLoaded {
                        room,
                        messages: self.stream.visible().to_vec(),
                    });
                }
            }
            ServerEvent::NewMessage(message) => match self.attribute_live(&message) {
                Some(room) => {
                    let delivery = self.stream.deliver_live(Some(&room), message.clone());
                    metrics::record_message_delivery(delivery);
                    if delivery == Delivery::Rendered {
                        self.publish(SessionEvent::MessageReceived { room, message });
                    }
                }
                None => {
                    metrics::record_message_delivery(self.stream.deliver_live(None, message));
                }
            },
            ServerEvent::Error { error } => {
                warn!(target: "chat.session", error = %error, "Server reported an error");
                self.publish(SessionEvent::ServerError(error));
            }
        }
    }

    /// Room a live message belongs to, if it can be told.
    ///
    /// A message naming its room is accepted only for a joined room. One
    /// without a room is attributed to the open room only when that is the
    /// single joined room.
    fn attribute_live(&self, message: &ChatMessage) -> Option<RoomId> {
        if let Some(room) = &message.room {
            return self.coordinator.is_joined(room).then(|| room.clone());
        }
        let joined = self.coordinator.joined_rooms();
        match (joined.as_slice(), self.stream.current_room()) {
            ([only], Some(open)) if only == open => Some(only.clone()),
            _ => None,
        }
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Carry out coordinator actions in order. Returns the first send error.
    async fn execute(&mut self, actions: Vec<CoordinatorAction>) -> Result<(), ClientError> {
        let mut first_error = None;
        for action in actions {
            match action {
                CoordinatorAction::Emit(event) => {
                    if let Err(e) = self.socket.send(&event).await {
                        warn!(target: "chat.session", event = event.name(), error = %e, "Failed to emit");
                        first_error.get_or_insert(e);
                    }
                }
                CoordinatorAction::Notify(event) => {
                    match &event {
                        SessionEvent::RoomJoined { .. } => metrics::record_room_join("joined"),
                        SessionEvent::AccessDenied { .. } => metrics::record_room_join("denied"),
                        _ => {}
                    }
                    self.publish(event);
                }
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    async fn execute_logged(&mut self, actions: Vec<CoordinatorAction>) {
        if let Err(e) = self.execute(actions).await {
            self.publish(SessionEvent::TransportError(e.to_string()));
        }
    }

    /// Apply the session-wide rules to a REST result and pass it through.
    async fn settle<T>(&mut self, result: Result<T, ClientError>) -> Result<T, ClientError> {
        if matches!(result, Err(ClientError::AuthenticationLost)) {
            self.authentication_lost().await;
        } else {
            self.reconcile_rotation().await;
        }
        result
    }

    async fn reconcile_rotation(&mut self) {
        let rotation = self.api.tokens().rotation();
        if rotation == self.last_rotation {
            return;
        }
        self.last_rotation = rotation;

        if matches!(
            self.socket.state(),
            ConnectionState::Connected | ConnectionState::Connecting
        ) {
            info!(target: "chat.session", "Credentials rotated, re-opening connection");
            if let Err(e) = self.open_socket().await {
                warn!(target: "chat.session", error = %e, "Failed to re-open connection");
                self.publish(SessionEvent::TransportError(e.to_string()));
            }
        }
    }

    async fn authentication_lost(&mut self) {
        warn!(target: "chat.session", "Authentication lost, resetting session");
        self.socket.close().await;
        self.reset_local();
        self.publish(SessionEvent::ConnectionChanged(ConnectionState::Disconnected));
        self.publish(SessionEvent::AuthenticationLost);
    }

    fn reset_local(&mut self) {
        self.coordinator.reset();
        self.stream.reset();
        self.rooms.clear();
        self.active_room = None;
        self.last_rotation = self.api.tokens().rotation();
    }

    fn publish(&self, event: SessionEvent) {
        if self.events.send(event).is_err() {
            debug!(target: "chat.session", "No subscribers for session event");
        }
    }
}

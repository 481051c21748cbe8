//! Room membership coordinator.
//!
//! Per-room join state machine. The coordinator performs no I/O: every
//! operation returns the [`CoordinatorAction`]s the owner must execute, in
//! order. That keeps the one rule this module exists for easy to audit:
//!
//! **No `fetch_history` or `send_message` is ever emitted for a room whose
//! state is not [`RoomJoinState::Joined`].**
//!
//! ## Lifecycle
//!
//! ```text
//!             enter()                joined_rooms ∋ R
//! Unjoined ────────────► JoinRequested ──────────────► Joined
//!    ▲                        │                          │
//!    │   joined_rooms ∌ R     │                          │ leave()
//!    ├────────────────────────┘                          ▼
//!    └─────────────────────────────────────────── LeaveRequested
//! ```
//!
//! A disconnect sends every room back to `Unjoined`. Rooms that were joined
//! or being joined are remembered and re-requested as one batch when the next
//! connection comes up.
//!
//! ## Generations
//!
//! Join requests are tagged with the connection generation they were issued
//! under. A confirmation is only applied when it arrives on the current
//! generation and only to requests issued on that generation.

use crate::errors::ClientError;
use crate::events::SessionEvent;
use crate::models::Roster;
use crate::socket::ClientEvent;
use common::types::RoomId;
use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};
use std::fmt;
use tokio::sync::oneshot;
use tokio::sync::oneshot::error::TryRecvError;
use tracing::{debug, info, warn};

/// Per-room membership state.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RoomJoinState {
    #[default]
    Unjoined,
    JoinRequested,
    Joined,
    LeaveRequested,
}

impl fmt::Display for RoomJoinState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RoomJoinState::Unjoined => "unjoined",
            RoomJoinState::JoinRequested => "join_requested",
            RoomJoinState::Joined => "joined",
            RoomJoinState::LeaveRequested => "leave_requested",
        };
        f.write_str(s)
    }
}

/// Work the owner must carry out on the coordinator's behalf.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CoordinatorAction {
    /// Send this event over the live connection.
    Emit(ClientEvent),
    /// Publish this to subscribers.
    Notify(SessionEvent),
}

type JoinOutcome = Result<(), ClientError>;

/// A caller's pending intent to enter a room.
///
/// Resolves with `Ok(())` once the server confirms membership, or with the
/// reason it never will (`AccessDenied`, `NotConnected`, `NotJoined` after a
/// leave).
#[derive(Debug)]
pub struct JoinTicket {
    room: RoomId,
    rx: oneshot::Receiver<JoinOutcome>,
}

impl JoinTicket {
    fn pending(room: RoomId) -> (Self, oneshot::Sender<JoinOutcome>) {
        let (tx, rx) = oneshot::channel();
        (Self { room, rx }, tx)
    }

    fn resolved(room: RoomId, outcome: JoinOutcome) -> Self {
        let (ticket, tx) = Self::pending(room);
        let _ = tx.send(outcome);
        ticket
    }

    pub fn room(&self) -> &RoomId {
        &self.room
    }

    /// Non-blocking check. `None` while the join is still in flight.
    pub fn try_result(&mut self) -> Option<JoinOutcome> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Closed) => Some(Err(ClientError::NotConnected)),
        }
    }

    /// Wait for the outcome.
    pub async fn wait(self) -> JoinOutcome {
        self.rx.await.unwrap_or(Err(ClientError::NotConnected))
    }
}

#[derive(Debug, Default)]
struct RoomEntry {
    state: RoomJoinState,
    /// Generation the outstanding join request was issued under.
    generation: u64,
    waiters: Vec<oneshot::Sender<JoinOutcome>>,
}

impl RoomEntry {
    fn resolve(&mut self, outcome: impl Fn() -> JoinOutcome) {
        for waiter in self.waiters.drain(..) {
            let _ = waiter.send(outcome());
        }
    }
}

/// Owns every room's [`RoomJoinState`] and the roster cache.
#[derive(Debug, Default)]
pub struct RoomMembershipCoordinator {
    /// Generation of the live connection, if any.
    connection: Option<u64>,
    rooms: HashMap<RoomId, RoomEntry>,
    /// Rooms to re-request when the next connection comes up.
    remembered: BTreeSet<RoomId>,
    /// Outstanding `join_rooms` batches on the current generation, oldest first.
    join_batches: VecDeque<Vec<RoomId>>,
    /// Outstanding `fetch_history` requests on the current generation.
    pending_history: VecDeque<RoomId>,
    rosters: HashMap<RoomId, Roster>,
}

impl RoomMembershipCoordinator {
    pub fn new() -> Self {
        Self::default()
    }

    // ========================================================================
    // Connection lifecycle
    // ========================================================================

    /// The connection for `generation` completed its handshake.
    ///
    /// Re-requests every remembered room in a single `join_rooms`.
    pub fn on_connected(&mut self, generation: u64) -> Vec<CoordinatorAction> {
        self.connection = Some(generation);
        self.join_batches.clear();
        self.pending_history.clear();

        let batch: Vec<RoomId> = std::mem::take(&mut self.remembered).into_iter().collect();
        if batch.is_empty() {
            return Vec::new();
        }

        for room in &batch {
            let entry = self.rooms.entry(room.clone()).or_default();
            entry.state = RoomJoinState::JoinRequested;
            entry.generation = generation;
        }

        info!(
            target: "chat.coordinator",
            generation,
            rooms = batch.len(),
            "Re-requesting membership after connect"
        );
        self.join_batches.push_back(batch.clone());
        vec![CoordinatorAction::Emit(ClientEvent::JoinRooms { room_ids: batch })]
    }

    /// The connection went away, or is about to be replaced.
    ///
    /// Every room reverts to `Unjoined`; joined or requested rooms are
    /// remembered for the next connection; pending intents fail with
    /// `NotConnected`.
    pub fn on_disconnected(&mut self) {
        if self.connection.take().is_none() && self.rooms.is_empty() {
            return;
        }

        for (room, entry) in &mut self.rooms {
            if matches!(
                entry.state,
                RoomJoinState::Joined | RoomJoinState::JoinRequested
            ) {
                self.remembered.insert(room.clone());
            }
            entry.state = RoomJoinState::Unjoined;
            entry.resolve(|| Err(ClientError::NotConnected));
        }
        self.join_batches.clear();
        self.pending_history.clear();

        debug!(
            target: "chat.coordinator",
            remembered = self.remembered.len(),
            "Membership reset after disconnect"
        );
    }

    /// Forget everything, including remembered rooms and rosters.
    pub fn reset(&mut self) {
        for entry in self.rooms.values_mut() {
            entry.resolve(|| Err(ClientError::NotConnected));
        }
        *self = Self::default();
    }

    // ========================================================================
    // Join / leave
    // ========================================================================

    /// Request membership of `room`.
    ///
    /// A room already joined resolves immediately; a room already requested
    /// gets another waiter and no second network request.
    ///
    /// # Errors
    ///
    /// `NotConnected` when no connection is live; `Validation` for an empty id.
    pub fn enter(
        &mut self,
        room: &RoomId,
    ) -> Result<(JoinTicket, Vec<CoordinatorAction>), ClientError> {
        if room.is_empty() {
            return Err(ClientError::Validation("Room id is required".to_string()));
        }
        let generation = self.connection.ok_or(ClientError::NotConnected)?;

        let entry = self.rooms.entry(room.clone()).or_default();
        match entry.state {
            RoomJoinState::Joined => Ok((JoinTicket::resolved(room.clone(), Ok(())), Vec::new())),
            RoomJoinState::JoinRequested => {
                let (ticket, tx) = JoinTicket::pending(room.clone());
                entry.waiters.push(tx);
                debug!(target: "chat.coordinator", room_id = %room, "Join already in flight");
                Ok((ticket, Vec::new()))
            }
            RoomJoinState::Unjoined | RoomJoinState::LeaveRequested => {
                let (ticket, tx) = JoinTicket::pending(room.clone());
                entry.state = RoomJoinState::JoinRequested;
                entry.generation = generation;
                entry.waiters.push(tx);
                self.join_batches.push_back(vec![room.clone()]);

                debug!(target: "chat.coordinator", room_id = %room, generation, "Join requested");
                Ok((
                    ticket,
                    vec![CoordinatorAction::Emit(ClientEvent::JoinRooms {
                        room_ids: vec![room.clone()],
                    })],
                ))
            }
        }
    }

    /// Apply a `joined_rooms` confirmation received on `generation`.
    pub fn on_joined_rooms(
        &mut self,
        generation: u64,
        confirmed: &[RoomId],
    ) -> Vec<CoordinatorAction> {
        if self.connection != Some(generation) {
            debug!(
                target: "chat.coordinator",
                generation,
                "Ignoring confirmation from superseded connection"
            );
            return Vec::new();
        }

        let confirmed_set: HashSet<&RoomId> = confirmed.iter().collect();
        let mut actions = Vec::new();

        let Some(batch) = self.join_batches.pop_front() else {
            // Unsolicited: only rooms we are actually waiting on are promoted.
            for room in confirmed {
                self.promote_if_requested(room, generation, &mut actions);
            }
            return actions;
        };

        for room in &batch {
            if !self.is_requested_on(room, generation) {
                continue;
            }
            if confirmed_set.contains(room) {
                self.mark_joined(room, &mut actions);
            } else {
                self.mark_denied(room, &mut actions);
            }
        }

        // Rooms from later batches the server has already accepted.
        for room in confirmed {
            self.promote_if_requested(room, generation, &mut actions);
        }

        actions
    }

    /// Leave `room`. Fire-and-forget: no confirmation is awaited.
    pub fn leave(&mut self, room: &RoomId) -> Vec<CoordinatorAction> {
        self.remembered.remove(room);
        self.pending_history.retain(|r| r != room);

        let Some(mut entry) = self.rooms.remove(room) else {
            return self.leave_event(room);
        };

        entry.state = RoomJoinState::LeaveRequested;
        debug!(target: "chat.coordinator", room_id = %room, state = %entry.state, "Leaving room");
        entry.resolve(|| {
            Err(ClientError::NotJoined {
                room_id: room.clone(),
            })
        });

        self.leave_event(room)
    }

    fn leave_event(&self, room: &RoomId) -> Vec<CoordinatorAction> {
        if self.connection.is_some() {
            vec![CoordinatorAction::Emit(ClientEvent::LeaveRoom { room: room.clone() })]
        } else {
            Vec::new()
        }
    }

    // ========================================================================
    // Joined-gated operations
    // ========================================================================

    /// Request the history for a joined room.
    ///
    /// # Errors
    ///
    /// `NotJoined` unless the room is `Joined`.
    pub fn fetch_history(&mut self, room: &RoomId) -> Result<Vec<CoordinatorAction>, ClientError> {
        self.require_joined(room)?;
        self.pending_history.push_back(room.clone());
        Ok(vec![CoordinatorAction::Emit(ClientEvent::FetchHistory {
            room: room.clone(),
        })])
    }

    /// Send a message to a joined room. `body` must already be validated.
    ///
    /// # Errors
    ///
    /// `NotJoined` unless the room is `Joined`.
    pub fn send_message(
        &self,
        room: &RoomId,
        body: String,
    ) -> Result<Vec<CoordinatorAction>, ClientError> {
        self.require_joined(room)?;
        Ok(vec![CoordinatorAction::Emit(ClientEvent::SendMessage {
            room: room.clone(),
            message: body,
        })])
    }

    /// Decide which joined room an `old_messages` batch belongs to.
    ///
    /// A batch naming its room is matched by id; otherwise it is matched to
    /// the oldest outstanding fetch. Returns `None` if the batch cannot be
    /// attributed to a room that is joined on the current generation.
    pub fn attribute_history(&mut self, generation: u64, room: Option<&RoomId>) -> Option<RoomId> {
        if self.connection != Some(generation) {
            return None;
        }

        let room = match room {
            Some(room) => {
                if let Some(pos) = self.pending_history.iter().position(|r| r == room) {
                    self.pending_history.remove(pos);
                }
                room.clone()
            }
            None => self.pending_history.pop_front()?,
        };

        if self.is_joined(&room) {
            Some(room)
        } else {
            warn!(
                target: "chat.coordinator",
                room_id = %room,
                "Dropping history for a room that is not joined"
            );
            None
        }
    }

    // ========================================================================
    // Queries
    // ========================================================================

    pub fn state(&self, room: &RoomId) -> RoomJoinState {
        self.rooms.get(room).map(|e| e.state).unwrap_or_default()
    }

    pub fn is_joined(&self, room: &RoomId) -> bool {
        self.state(room) == RoomJoinState::Joined
    }

    /// Joined rooms, sorted by id.
    pub fn joined_rooms(&self) -> Vec<RoomId> {
        let mut rooms: Vec<RoomId> = self
            .rooms
            .iter()
            .filter(|(_, e)| e.state == RoomJoinState::Joined)
            .map(|(id, _)| id.clone())
            .collect();
        rooms.sort();
        rooms
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    // ========================================================================
    // Roster cache
    // ========================================================================

    /// Replace the cached roster wholesale.
    pub fn replace_roster(&mut self, room: &RoomId, roster: Roster) {
        self.rosters.insert(room.clone(), roster);
    }

    /// Mark the cached roster stale by dropping it.
    pub fn invalidate_roster(&mut self, room: &RoomId) -> Option<Roster> {
        self.rosters.remove(room)
    }

    pub fn roster(&self, room: &RoomId) -> Option<&Roster> {
        self.rosters.get(room)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn require_joined(&self, room: &RoomId) -> Result<(), ClientError> {
        if self.is_joined(room) {
            Ok(())
        } else {
            Err(ClientError::NotJoined {
                room_id: room.clone(),
            })
        }
    }

    fn is_requested_on(&self, room: &RoomId, generation: u64) -> bool {
        self.rooms.get(room).is_some_and(|e| {
            e.state == RoomJoinState::JoinRequested && e.generation == generation
        })
    }

    fn promote_if_requested(
        &mut self,
        room: &RoomId,
        generation: u64,
        actions: &mut Vec<CoordinatorAction>,
    ) {
        if self.is_requested_on(room, generation) {
            self.mark_joined(room, actions);
        }
    }

    fn mark_joined(&mut self, room: &RoomId, actions: &mut Vec<CoordinatorAction>) {
        let Some(entry) = self.rooms.get_mut(room) else {
            return;
        };
        entry.state = RoomJoinState::Joined;
        entry.resolve(|| Ok(()));
        info!(target: "chat.coordinator", room_id = %room, "Room joined");

        // History is requested only now that membership is confirmed.
        self.pending_history.push_back(room.clone());
        actions.push(CoordinatorAction::Notify(SessionEvent::RoomJoined {
            room: room.clone(),
        }));
        actions.push(CoordinatorAction::Emit(ClientEvent::FetchHistory {
            room: room.clone(),
        }));
    }

    fn mark_denied(&mut self, room: &RoomId, actions: &mut Vec<CoordinatorAction>) {
        let Some(entry) = self.rooms.get_mut(room) else {
            return;
        };
        entry.state = RoomJoinState::Unjoined;
        entry.resolve(|| {
            Err(ClientError::AccessDenied {
                room_id: room.clone(),
            })
        });
        warn!(target: "chat.coordinator", room_id = %room, "Join not confirmed");
        actions.push(CoordinatorAction::Notify(SessionEvent::AccessDenied {
            room: room.clone(),
        }));
    }
}

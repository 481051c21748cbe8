//! Ordered, idempotent message delivery for the open room.
//!
//! The visible list only ever holds messages for the room currently open.
//! Live messages for other joined rooms, and for the open room before its
//! history has arrived, wait in a bounded per-room queue and are appended
//! after the history batch. Server order is authoritative: history is kept
//! exactly as supplied and live messages are appended in arrival order.

use crate::errors::ClientError;
use crate::models::{ChatMessage, MessageKey};
use common::types::RoomId;
use std::collections::{HashMap, HashSet, VecDeque};
use tracing::{debug, warn};

/// What happened to a live message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Appended to the open room's visible list.
    Rendered,
    /// Held for a room that is not open, or whose history is pending.
    Queued,
    /// Already shown or queued.
    Duplicate,
    /// No room could be attributed.
    Dropped,
}

#[derive(Debug)]
pub struct MessageStream {
    open_room: Option<RoomId>,
    history_loaded: bool,
    visible: Vec<ChatMessage>,
    seen: HashSet<MessageKey>,
    queues: HashMap<RoomId, VecDeque<ChatMessage>>,
    queue_limit: usize,
    max_length: usize,
}

impl MessageStream {
    pub fn new(queue_limit: usize, max_length: usize) -> Self {
        Self {
            open_room: None,
            history_loaded: false,
            visible: Vec::new(),
            seen: HashSet::new(),
            queues: HashMap::new(),
            queue_limit,
            max_length,
        }
    }

    /// Switch the view to `room`. The visible list stays empty until its
    /// history is delivered.
    pub fn open_room(&mut self, room: &RoomId) {
        if self.open_room.as_ref() == Some(room) {
            return;
        }
        self.open_room = Some(room.clone());
        self.history_loaded = false;
        self.visible.clear();
        self.seen.clear();
    }

    pub fn close_room(&mut self) {
        self.open_room = None;
        self.history_loaded = false;
        self.visible.clear();
        self.seen.clear();
    }

    pub fn current_room(&self) -> Option<&RoomId> {
        self.open_room.as_ref()
    }

    pub fn visible(&self) -> &[ChatMessage] {
        &self.visible
    }

    pub fn queued(&self, room: &RoomId) -> usize {
        self.queues.get(room).map_or(0, VecDeque::len)
    }

    /// Replace the visible list with a history batch.
    ///
    /// Returns `false` (and changes nothing) when `room` is not the open room.
    pub fn deliver_history(&mut self, room: &RoomId, messages: Vec<ChatMessage>) -> bool {
        if self.open_room.as_ref() != Some(room) {
            debug!(target: "chat.message_stream", room_id = %room, "History for a room that is not open");
            return false;
        }

        self.visible.clear();
        self.seen.clear();
        for message in messages {
            self.push_unseen(message);
        }

        let queued = self.queues.remove(room).unwrap_or_default();
        for message in queued {
            self.push_unseen(message);
        }

        self.history_loaded = true;
        debug!(
            target: "chat.message_stream",
            room_id = %room,
            count = self.visible.len(),
            "History delivered"
        );
        true
    }

    /// Route one live message.
    pub fn deliver_live(&mut self, room: Option<&RoomId>, message: ChatMessage) -> Delivery {
        let Some(room) = room else {
            warn!(target: "chat.message_stream", "Dropping message with no attributable room");
            return Delivery::Dropped;
        };

        if self.history_loaded && self.open_room.as_ref() == Some(room) {
            return if self.push_unseen(message) {
                Delivery::Rendered
            } else {
                Delivery::Duplicate
            };
        }

        let queue = self.queues.entry(room.clone()).or_default();
        let key = message.key();
        if queue.iter().any(|m| m.key() == key) {
            return Delivery::Duplicate;
        }
        queue.push_back(message);
        while queue.len() > self.queue_limit {
            queue.pop_front();
        }
        Delivery::Queued
    }

    /// Drop anything held for `room`.
    pub fn forget_room(&mut self, room: &RoomId) {
        self.queues.remove(room);
        if self.open_room.as_ref() == Some(room) {
            self.close_room();
        }
    }

    /// Trim and validate an outgoing body.
    ///
    /// # Errors
    ///
    /// `Validation` for an empty body or one longer than the configured limit.
    pub fn prepare_send(&self, body: &str) -> Result<String, ClientError> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ClientError::Validation("Message cannot be empty".to_string()));
        }
        if body.chars().count() > self.max_length {
            return Err(ClientError::Validation(format!(
                "Message cannot exceed {} characters",
                self.max_length
            )));
        }
        Ok(body.to_string())
    }

    pub fn reset(&mut self) {
        self.close_room();
        self.queues.clear();
    }

    fn push_unseen(&mut self, message: ChatMessage) -> bool {
        if self.seen.insert(message.key()) {
            self.visible.push(message);
            true
        } else {
            false
        }
    }
}

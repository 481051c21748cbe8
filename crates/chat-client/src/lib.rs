//! Chat Client Library
//!
//! Session synchronization core for the real-time chat client. The library
//! reconciles three independently evolving facts into one consistent view:
//!
//! - credential validity (access/refresh token pair)
//! - connection liveness (the single persistent socket)
//! - per-room membership (which rooms the server has confirmed as joined)
//!
//! # Architecture
//!
//! ```text
//! ChatSession (one per process, owns everything below)
//! ├── ApiClient ── TokenManager ── CredentialStore
//! ├── SocketSession ── Connector / Transport (I/O task per connection)
//! ├── RoomMembershipCoordinator (pure state machine, emits actions)
//! ├── MessageStream (visible list + per-room live queues)
//! └── ModerationActions (borrowed view over ApiClient + coordinator)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Joined-gate**: history fetches and sends for a room are only emitted once
//!   the server has confirmed the room in a `joined_rooms` event
//! - **Connection generations**: every socket open bumps a generation; events
//!   and confirmations from superseded connections are discarded
//! - **Retry once**: a 401 triggers at most one refresh and one retried call
//! - **No ambient singletons**: all state lives in [`session::ChatSession`]
//!
//! # Modules
//!
//! - [`config`] - Client configuration from environment
//! - [`errors`] - Error taxonomy surfaced to the presentation layer
//! - [`storage`] - Credential persistence
//! - [`token_manager`] - Credential pair ownership
//! - [`api_client`] - REST boundary with refresh-and-retry
//! - [`socket`] - Persistent connection lifecycle and wire protocol
//! - [`coordinator`] - Per-room join state machine
//! - [`message_stream`] - Ordered, idempotent message delivery
//! - [`moderation`] - Ban/unban/promote/demote/leave
//! - [`observability`] - Metric definitions (no-op until a recorder is installed)
//! - [`session`] - The context object tying it together

pub mod api_client;
pub mod config;
pub mod coordinator;
pub mod errors;
pub mod events;
pub mod message_stream;
pub mod models;
pub mod moderation;
pub mod observability;
pub mod session;
pub mod socket;
pub mod storage;
pub mod token_manager;

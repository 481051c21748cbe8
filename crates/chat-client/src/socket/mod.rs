//! Persistent connection.
//!
//! - [`transport`] - the `Connector`/`Transport` seam
//! - [`ws`] - WebSocket implementation over `tokio-tungstenite`
//! - [`protocol`] - JSON event envelope
//! - [`session`] - lifecycle owner with connection generations

pub mod protocol;
pub mod session;
pub mod transport;
pub mod ws;

pub use protocol::{ClientEvent, ServerEvent};
pub use session::{ConnectionState, SocketEvent, SocketEventKind, SocketSession};
pub use transport::{Connector, Transport};
pub use ws::WsConnector;

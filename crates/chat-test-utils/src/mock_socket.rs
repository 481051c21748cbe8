//! Scripted in-memory socket.
//!
//! [`MockConnector`] stands in for the WebSocket connector. Each accepted
//! connection produces a [`ServerHandle`] that the test uses to play the
//! server: push events to the client and assert on what the client sent.
//!
//! # Example
//! ```rust,ignore
//! let (connector, mut acceptor) = MockConnector::new();
//! // hand `connector` to the session, then:
//! let mut server = acceptor.accept().await;
//! let data = server.expect_event("join_rooms").await;
//! server.joined_rooms(&["1"]);
//! ```

use async_trait::async_trait;
use chat_client::errors::TransportError;
use chat_client::socket::{Connector, Transport};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;

/// How long helpers wait before failing a test.
pub const DEFAULT_EXPECT_TIMEOUT: Duration = Duration::from_secs(2);

/// Connector that hands every connection to the test.
pub struct MockConnector {
    rejections: Mutex<VecDeque<u16>>,
    tokens: Mutex<Vec<String>>,
    accepted: mpsc::UnboundedSender<ServerHandle>,
}

/// Receives the server side of each connection the client makes.
pub struct ConnectionAcceptor {
    rx: mpsc::UnboundedReceiver<ServerHandle>,
}

impl MockConnector {
    /// Create a connector and the acceptor for its connections.
    pub fn new() -> (Arc<Self>, ConnectionAcceptor) {
        let (accepted, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            rejections: Mutex::new(VecDeque::new()),
            tokens: Mutex::new(Vec::new()),
            accepted,
        });
        (connector, ConnectionAcceptor { rx })
    }

    /// Fail the next handshake with HTTP `status`.
    pub fn reject_next(&self, status: u16) {
        self.rejections.lock().unwrap().push_back(status);
    }

    /// Access tokens presented on every connection attempt, in order.
    pub fn tokens(&self) -> Vec<String> {
        self.tokens.lock().unwrap().clone()
    }

    /// Number of connection attempts so far.
    pub fn attempts(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }
}

#[async_trait]
impl Connector for MockConnector {
    async fn connect(
        &self,
        _url: &str,
        access_token: &SecretString,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let token = access_token.expose_secret().to_string();
        self.tokens.lock().unwrap().push(token.clone());

        if let Some(status) = self.rejections.lock().unwrap().pop_front() {
            return Err(TransportError::HandshakeRejected { status });
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let handle = ServerHandle {
            to_client,
            from_client,
            access_token: token,
        };
        self.accepted
            .send(handle)
            .map_err(|_| TransportError::Connect("acceptor dropped".to_string()))?;

        Ok(Box::new(MockTransport { inbound, outbound }))
    }
}

impl ConnectionAcceptor {
    /// Wait for the client's next connection.
    pub async fn accept(&mut self) -> ServerHandle {
        tokio::time::timeout(DEFAULT_EXPECT_TIMEOUT, self.rx.recv())
            .await
            .expect("timed out waiting for a connection")
            .expect("connector dropped")
    }

    /// Assert no connection is made within `within`.
    pub async fn expect_no_connection(&mut self, within: Duration) {
        if let Ok(Some(_)) = tokio::time::timeout(within, self.rx.recv()).await {
            panic!("unexpected connection");
        }
    }
}

struct MockTransport {
    inbound: mpsc::UnboundedReceiver<Option<String>>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.outbound.send(text).map_err(|_| TransportError::Closed)
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        // `None` from the handle (or the handle dropped) closes the connection.
        self.inbound.recv().await.flatten().map(Ok)
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        self.inbound.close();
        Ok(())
    }
}

/// The server side of one mock connection.
pub struct ServerHandle {
    to_client: mpsc::UnboundedSender<Option<String>>,
    from_client: mpsc::UnboundedReceiver<String>,
    access_token: String,
}

impl ServerHandle {
    /// Token the client authenticated this connection with.
    pub fn access_token(&self) -> &str {
        &self.access_token
    }

    /// Push a raw `{event, data}` envelope to the client.
    pub fn push(&self, event: &str, data: Value) {
        let frame = json!({"event": event, "data": data}).to_string();
        // The client may already have dropped the connection.
        let _ = self.to_client.send(Some(frame));
    }

    pub fn joined_rooms(&self, rooms: &[&str]) {
        self.push("joined_rooms", json!({"rooms": rooms}));
    }

    pub fn old_messages(&self, room: Option<&str>, messages: Value) {
        let data = match room {
            Some(room) => json!({"room": room, "messages": messages}),
            None => json!({"messages": messages}),
        };
        self.push("old_messages", data);
    }

    pub fn new_message(&self, message: Value) {
        self.push("new_message", message);
    }

    pub fn error(&self, message: &str) {
        self.push("error", json!({"error": message}));
    }

    /// Close the connection from the server side.
    pub fn disconnect(&self) {
        let _ = self.to_client.send(None);
    }

    /// Wait for the client's next frame and assert its event name.
    pub async fn expect_event(&mut self, event: &str) -> Value {
        let frame = tokio::time::timeout(DEFAULT_EXPECT_TIMEOUT, self.from_client.recv())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {event}"))
            .expect("client closed the connection");
        let value: Value = serde_json::from_str(&frame).expect("client sent invalid JSON");
        assert_eq!(value["event"], event, "unexpected frame: {frame}");
        value["data"].clone()
    }

    /// Assert the client sends nothing within `within`.
    pub async fn expect_silence(&mut self, within: Duration) {
        if let Ok(Some(frame)) = tokio::time::timeout(within, self.from_client.recv()).await {
            panic!("unexpected frame from client: {frame}");
        }
    }

    /// Every frame the client has sent so far, without waiting.
    pub fn drain(&mut self) -> Vec<Value> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(serde_json::from_str(&frame).expect("client sent invalid JSON"));
        }
        frames
    }
}

/// A `new_message` / history entry.
pub fn message_json(sender_id: &str, sender: &str, body: &str, timestamp: &str) -> Value {
    json!({
        "sender_id": sender_id,
        "sender": sender,
        "message": body,
        "timestamp": timestamp,
    })
}

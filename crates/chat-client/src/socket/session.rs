//! Socket session: owns the single persistent connection.
//!
//! Every [`SocketSession::open`] bumps a connection generation and spawns one
//! I/O task for that connection. The task reports back through a bounded
//! channel as [`SocketEvent`]s tagged with the generation, in the order the
//! frames arrived. [`SocketSession::next_event`] drops events from any
//! generation other than the live one, so a late frame from a replaced
//! connection can never be mistaken for a current one.

use super::protocol::{ClientEvent, ServerEvent};
use super::transport::{Connector, Transport};
use crate::errors::{ClientError, TransportError};
use crate::observability::metrics;
use secrecy::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// How long `close` waits for the I/O task to shut the transport down before
/// aborting it.
const CLOSE_GRACE: Duration = Duration::from_secs(2);

/// Connection lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    /// The last connection attempt failed (handshake rejected, unreachable).
    Errored,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ConnectionState::Disconnected => "disconnected",
            ConnectionState::Connecting => "connecting",
            ConnectionState::Connected => "connected",
            ConnectionState::Errored => "errored",
        };
        f.write_str(s)
    }
}

/// An event from one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SocketEvent {
    pub generation: u64,
    pub kind: SocketEventKind,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SocketEventKind {
    /// Handshake succeeded.
    Connected,
    /// An established connection ended.
    Disconnected { reason: Option<String> },
    /// The connection could not be established.
    Failed(TransportError),
    /// A decoded server event.
    Server(ServerEvent),
}

struct LiveConnection {
    generation: u64,
    cmd_tx: mpsc::Sender<String>,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

/// Owner of the persistent connection.
pub struct SocketSession {
    connector: Arc<dyn Connector>,
    url: String,
    state: ConnectionState,
    generation: u64,
    capacity: usize,
    live: Option<LiveConnection>,
    events_tx: mpsc::Sender<SocketEvent>,
    events_rx: mpsc::Receiver<SocketEvent>,
}

impl fmt::Debug for SocketSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SocketSession")
            .field("url", &self.url)
            .field("state", &self.state)
            .field("generation", &self.generation)
            .finish_non_exhaustive()
    }
}

impl SocketSession {
    pub fn new(connector: Arc<dyn Connector>, url: impl Into<String>, capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (events_tx, events_rx) = mpsc::channel(capacity);
        Self {
            connector,
            url: url.into(),
            state: ConnectionState::Disconnected,
            generation: 0,
            capacity,
            live: None,
            events_tx,
            events_rx,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Generation of the most recent `open`. Zero before the first.
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// Open a connection authenticated with `access_token`.
    ///
    /// Any existing connection is closed first. Returns the new generation;
    /// the outcome of the handshake arrives later as `Connected` or `Failed`.
    ///
    /// # Errors
    ///
    /// `ClientError::NotAuthenticated` if no non-empty token is supplied.
    #[instrument(skip_all, fields(url = %self.url))]
    pub async fn open(&mut self, access_token: Option<&SecretString>) -> Result<u64, ClientError> {
        let token = access_token
            .map(|t| t.expose_secret().trim())
            .filter(|t| !t.is_empty())
            .map(|t| SecretString::from(t.to_owned()))
            .ok_or(ClientError::NotAuthenticated)?;

        self.close().await;

        self.generation += 1;
        let generation = self.generation;
        self.state = ConnectionState::Connecting;

        let (cmd_tx, cmd_rx) = mpsc::channel(self.capacity);
        let cancel = CancellationToken::new();
        let task = tokio::spawn(run_connection(
            Arc::clone(&self.connector),
            self.url.clone(),
            token,
            cmd_rx,
            Emitter {
                tx: self.events_tx.clone(),
                generation,
                cancel: cancel.clone(),
            },
        ));

        self.live = Some(LiveConnection {
            generation,
            cmd_tx,
            cancel,
            task,
        });

        info!(target: "chat.socket", generation, "Opening connection");
        Ok(generation)
    }

    /// Close the connection, if any. Safe to call when already disconnected.
    pub async fn close(&mut self) {
        let Some(live) = self.live.take() else {
            if self.state != ConnectionState::Errored {
                self.state = ConnectionState::Disconnected;
            }
            return;
        };

        live.cancel.cancel();
        let mut task = live.task;
        if tokio::time::timeout(CLOSE_GRACE, &mut task).await.is_err() {
            warn!(target: "chat.socket", generation = live.generation, "Connection task did not stop, aborting");
            task.abort();
        }

        self.state = ConnectionState::Disconnected;
        info!(target: "chat.socket", generation = live.generation, "Connection closed");
    }

    /// Queue an event for the live connection.
    ///
    /// # Errors
    ///
    /// `ClientError::NotConnected` unless the handshake has completed.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ClientError> {
        let live = match (&self.live, self.state) {
            (Some(live), ConnectionState::Connected) => live,
            _ => return Err(ClientError::NotConnected),
        };

        let text = event.encode()?;
        live.cmd_tx
            .send(text)
            .await
            .map_err(|_| ClientError::NotConnected)?;

        debug!(
            target: "chat.socket",
            generation = live.generation,
            event = event.name(),
            "Queued outbound event"
        );
        Ok(())
    }

    /// Wait for the next event from the live connection.
    ///
    /// Events from superseded generations are discarded. Pends indefinitely
    /// while no connection is live.
    pub async fn next_event(&mut self) -> SocketEvent {
        loop {
            let Some(event) = self.events_rx.recv().await else {
                // The session holds a sender, so the channel never closes.
                continue;
            };

            let live_generation = self.live.as_ref().map(|l| l.generation);
            if live_generation != Some(event.generation) {
                metrics::record_frame_dropped("superseded");
                debug!(
                    target: "chat.socket",
                    generation = event.generation,
                    "Dropping event from superseded connection"
                );
                continue;
            }

            match &event.kind {
                SocketEventKind::Connected => self.state = ConnectionState::Connected,
                SocketEventKind::Disconnected { .. } => {
                    self.state = ConnectionState::Disconnected;
                    self.live = None;
                }
                SocketEventKind::Failed(_) => {
                    self.state = ConnectionState::Errored;
                    self.live = None;
                }
                SocketEventKind::Server(_) => {}
            }
            metrics::set_connection_state(self.state);
            return event;
        }
    }
}

/// Sends events for one generation, giving up once cancelled.
struct Emitter {
    tx: mpsc::Sender<SocketEvent>,
    generation: u64,
    cancel: CancellationToken,
}

impl Emitter {
    async fn emit(&self, kind: SocketEventKind) {
        let event = SocketEvent {
            generation: self.generation,
            kind,
        };
        tokio::select! {
            () = self.cancel.cancelled() => {}
            _ = self.tx.send(event) => {}
        }
    }
}

/// I/O task for one connection.
async fn run_connection(
    connector: Arc<dyn Connector>,
    url: String,
    token: SecretString,
    mut cmd_rx: mpsc::Receiver<String>,
    emitter: Emitter,
) {
    let generation = emitter.generation;

    let connected = tokio::select! {
        () = emitter.cancel.cancelled() => return,
        result = connector.connect(&url, &token) => result,
    };

    let mut transport: Box<dyn Transport> = match connected {
        Ok(transport) => transport,
        Err(e) => {
            let outcome = match e {
                TransportError::HandshakeRejected { .. } => "rejected",
                _ => "failed",
            };
            metrics::record_socket_connect(outcome);
            warn!(target: "chat.socket", generation, error = %e, "Connection failed");
            emitter.emit(SocketEventKind::Failed(e)).await;
            return;
        }
    };

    metrics::record_socket_connect("connected");
    info!(target: "chat.socket", generation, "Connected");
    emitter.emit(SocketEventKind::Connected).await;

    loop {
        tokio::select! {
            () = emitter.cancel.cancelled() => {
                if let Err(e) = transport.close().await {
                    debug!(target: "chat.socket", generation, error = %e, "Close handshake failed");
                }
                break;
            }

            cmd = cmd_rx.recv() => {
                let Some(text) = cmd else {
                    let _ = transport.close().await;
                    break;
                };
                if let Err(e) = transport.send(text).await {
                    warn!(target: "chat.socket", generation, error = %e, "Send failed");
                    emitter
                        .emit(SocketEventKind::Disconnected { reason: Some(e.to_string()) })
                        .await;
                    break;
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match ServerEvent::decode(&text) {
                        Ok(Some(event)) => emitter.emit(SocketEventKind::Server(event)).await,
                        Ok(None) => {
                            metrics::record_frame_dropped("unknown_event");
                            debug!(target: "chat.socket", generation, "Ignoring unknown event");
                        }
                        Err(e) => {
                            metrics::record_frame_dropped("undecodable");
                            warn!(target: "chat.socket", generation, error = %e, "Dropping undecodable frame");
                        }
                    },
                    Some(Err(e)) => {
                        warn!(target: "chat.socket", generation, error = %e, "Receive failed");
                        emitter
                            .emit(SocketEventKind::Disconnected { reason: Some(e.to_string()) })
                            .await;
                        break;
                    }
                    None => {
                        info!(target: "chat.socket", generation, "Server closed connection");
                        emitter.emit(SocketEventKind::Disconnected { reason: None }).await;
                        break;
                    }
                }
            }
        }
    }

    debug!(target: "chat.socket", generation, "Connection task exited");
}

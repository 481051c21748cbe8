//! WebSocket transport over tokio-tungstenite.

use super::transport::{Connector, Transport};
use crate::errors::TransportError;
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{connect_async_with_config, MaybeTlsStream, WebSocketStream};
use tracing::{debug, instrument};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Opens WebSocket connections authenticated with a bearer token in the
/// upgrade request.
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl Connector for WsConnector {
    #[instrument(skip_all, fields(url = %url))]
    async fn connect(
        &self,
        url: &str,
        access_token: &SecretString,
    ) -> Result<Box<dyn Transport>, TransportError> {
        let mut request = url
            .into_client_request()
            .map_err(|e| TransportError::Connect(format!("invalid socket url: {e}")))?;
        let bearer = HeaderValue::from_str(&format!("Bearer {}", access_token.expose_secret()))
            .map_err(|_| TransportError::Connect("token is not a valid header value".to_string()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (stream, response) = tokio::time::timeout(
            self.connect_timeout,
            connect_async_with_config(request, None, false),
        )
        .await
        .map_err(|_| TransportError::Connect("timed out".to_string()))?
        .map_err(map_handshake_error)?;

        debug!(
            target: "chat.socket",
            status = response.status().as_u16(),
            "WebSocket upgrade complete"
        );

        Ok(Box::new(WsTransport { stream }))
    }
}

fn map_handshake_error(err: WsError) -> TransportError {
    match err {
        WsError::Http(response) => TransportError::HandshakeRejected {
            status: response.status().as_u16(),
        },
        other => TransportError::Connect(other.to_string()),
    }
}

/// One open WebSocket. Text frames carry the envelope protocol.
pub struct WsTransport {
    stream: WsStream,
}

#[async_trait]
impl Transport for WsTransport {
    async fn send(&mut self, text: String) -> Result<(), TransportError> {
        self.stream
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, TransportError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text)),
                Ok(Message::Binary(bytes)) => {
                    return Some(
                        String::from_utf8(bytes)
                            .map_err(|_| TransportError::Protocol("binary frame is not UTF-8".to_string())),
                    );
                }
                Ok(Message::Close(frame)) => {
                    debug!(target: "chat.socket", frame = ?frame, "Server closed connection");
                    return None;
                }
                // Ping/pong are answered by tungstenite.
                Ok(_) => continue,
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => return None,
                Err(e) => return Some(Err(TransportError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) -> Result<(), TransportError> {
        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(TransportError::Send(e.to_string())),
        }
    }
}

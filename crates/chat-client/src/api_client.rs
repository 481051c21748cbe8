//! REST boundary.
//!
//! [`ApiClient`] owns the [`TokenManager`] and performs every request/response
//! call against the chat server.
//!
//! # Refresh-and-retry
//!
//! A call made with `retry_allowed = true` that receives HTTP 401 while a
//! refresh token is held triggers exactly one refresh. If the refresh
//! succeeds the original call is repeated once with `retry_allowed = false`;
//! if it fails the credentials are cleared and the caller receives
//! [`ClientError::AuthenticationLost`]. A failed refresh is terminal and is
//! never retried.
//!
//! No call here touches room membership state; that belongs to the
//! coordinator.

use crate::config::Config;
use crate::errors::{ClientError, GENERIC_REQUEST_FAILURE};
use crate::models::{
    CreateRoomRequest, CredentialsRequest, Member, MemberList, MessageResponse, ModerationAction,
    RefreshRequest, Room, RoomList, TokenResponse,
};
use crate::observability::metrics;
use crate::token_manager::{CredentialUpdate, TokenManager};
use common::secret::{ExposeSecret, SecretString};
use common::types::{MemberId, RoomId};
use reqwest::{Client, Method, StatusCode};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::time::Instant;
use tracing::{debug, error, info, instrument, warn};

/// HTTP client for the chat server REST API.
pub struct ApiClient {
    /// HTTP client with configured timeouts.
    client: Client,

    /// Base URL without trailing slash.
    base_url: String,

    tokens: TokenManager,
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("tokens", &self.tokens)
            .finish_non_exhaustive()
    }
}

impl ApiClient {
    /// Create a client for `config.api_url` that owns `tokens`.
    ///
    /// # Errors
    ///
    /// Returns `ClientError::Http` if the HTTP client cannot be built.
    pub fn new(config: &Config, tokens: TokenManager) -> Result<Self, ClientError> {
        let client = Client::builder()
            .timeout(config.http_timeout)
            .connect_timeout(config.connect_timeout)
            .build()
            .map_err(|e| {
                error!(target: "chat.api_client", error = %e, "Failed to build HTTP client");
                ClientError::Http(e.to_string())
            })?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            tokens,
        })
    }

    pub fn tokens(&self) -> &TokenManager {
        &self.tokens
    }

    // =========================================================================
    // Generic call
    // =========================================================================

    /// Perform a JSON call against `endpoint`, refreshing once on 401.
    ///
    /// # Errors
    ///
    /// - `AuthenticationLost` if a refresh was needed and failed
    /// - `RequestFailed` for any non-success status once retry logic resolves,
    ///   carrying the server's `error`/`message` text when present
    /// - `Http` if no response was received
    /// - `InvalidResponse` if a success body does not decode as `T`
    #[instrument(skip_all, fields(method = %method, endpoint = %endpoint))]
    pub async fn call<B, T>(
        &mut self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
        retry_allowed: bool,
    ) -> Result<T, ClientError>
    where
        B: Serialize + ?Sized + Sync,
        T: DeserializeOwned,
    {
        let mut retry_allowed = retry_allowed;

        loop {
            let started = Instant::now();
            let response = match self.send(method.clone(), endpoint, body).await {
                Ok(response) => response,
                Err(e) => {
                    metrics::record_api_request(method.as_str(), endpoint, None, started.elapsed());
                    return Err(e);
                }
            };
            let status = response.status();
            metrics::record_api_request(
                method.as_str(),
                endpoint,
                Some(status.as_u16()),
                started.elapsed(),
            );

            if status == StatusCode::UNAUTHORIZED
                && retry_allowed
                && self.tokens.refresh_token().is_some()
            {
                info!(
                    target: "chat.api_client",
                    endpoint = %endpoint,
                    "Access token rejected, refreshing before retry"
                );
                self.refresh().await?;
                retry_allowed = false;
                continue;
            }

            if status.is_success() {
                return decode_success(response).await;
            }

            return Err(request_failed(response).await);
        }
    }

    async fn send<B>(
        &self,
        method: Method,
        endpoint: &str,
        body: Option<&B>,
    ) -> Result<reqwest::Response, ClientError>
    where
        B: Serialize + ?Sized + Sync,
    {
        let url = format!("{}{endpoint}", self.base_url);
        let mut request = self.client.request(method, &url);

        if let Some(token) = self.tokens.access_token() {
            request = request.bearer_auth(token.expose_secret());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        request.send().await.map_err(|e| {
            warn!(target: "chat.api_client", error = %e, url = %url, "Request failed to complete");
            ClientError::Http(e.to_string())
        })
    }

    // =========================================================================
    // Refresh
    // =========================================================================

    /// Exchange the refresh token for a new access token.
    ///
    /// On success the new access token (and rotated refresh token, if the
    /// server supplied one) is saved. On any failure the credentials are
    /// cleared.
    ///
    /// # Errors
    ///
    /// Returns `AuthenticationLost` on any failure, including when no
    /// refresh token is held.
    #[instrument(skip_all)]
    pub async fn refresh(&mut self) -> Result<(), ClientError> {
        let Some(refresh_token) = self
            .tokens
            .refresh_token()
            .map(|t| t.expose_secret().to_string())
        else {
            warn!(target: "chat.api_client", "No refresh token held, clearing session");
            self.tokens.clear();
            return Err(ClientError::AuthenticationLost);
        };

        let started = Instant::now();
        let result = self.request_refresh(&refresh_token).await;
        metrics::record_token_refresh(result.is_ok(), started.elapsed());

        match result {
            Ok(response) => {
                let rotated_refresh = response.refresh_token.is_some();
                self.tokens.save(CredentialUpdate {
                    access_token: Some(response.access_token),
                    refresh_token: response.refresh_token,
                    username: None,
                });
                info!(
                    target: "chat.api_client",
                    rotated_refresh,
                    "Access token refreshed"
                );
                Ok(())
            }
            Err(e) => {
                warn!(target: "chat.api_client", error = %e, "Refresh failed, clearing session");
                self.tokens.clear();
                Err(ClientError::AuthenticationLost)
            }
        }
    }

    async fn request_refresh(&self, refresh_token: &str) -> Result<TokenResponse, ClientError> {
        let url = format!("{}/refresh", self.base_url);

        let response = self
            .client
            .post(&url)
            .bearer_auth(refresh_token)
            .json(&RefreshRequest { refresh_token })
            .send()
            .await
            .map_err(|e| {
                debug!(target: "chat.api_client", error = %e, "Refresh request failed to complete");
                ClientError::Http(e.to_string())
            })?;

        if !response.status().is_success() {
            return Err(request_failed(response).await);
        }

        let token_response: TokenResponse = decode_success(response).await?;
        if token_response.access_token.is_empty() {
            return Err(ClientError::InvalidResponse(
                "refresh response has no access_token".to_string(),
            ));
        }
        Ok(token_response)
    }

    // =========================================================================
    // Account
    // =========================================================================

    /// Create an account. Returns the server's acknowledgement text, if any.
    pub async fn signup(
        &mut self,
        username: &str,
        password: &SecretString,
    ) -> Result<Option<String>, ClientError> {
        let request = validated_credentials(username, password)?;
        let response: MessageResponse = self
            .call(Method::POST, "/signup", Some(&request), false)
            .await?;
        info!(target: "chat.api_client", "Signup succeeded");
        Ok(response.message)
    }

    /// Log in and store the returned credential pair and display name.
    ///
    /// A 401 here means bad credentials and is never refreshed.
    pub async fn login(&mut self, username: &str, password: &SecretString) -> Result<(), ClientError> {
        let request = validated_credentials(username, password)?;
        let response: TokenResponse = self
            .call(Method::POST, "/login", Some(&request), false)
            .await?;

        if response.access_token.is_empty() {
            return Err(ClientError::InvalidResponse(
                "login response has no access_token".to_string(),
            ));
        }

        self.tokens.save(CredentialUpdate {
            access_token: Some(response.access_token),
            refresh_token: response.refresh_token,
            username: response.username.or_else(|| Some(username.trim().to_string())),
        });
        info!(target: "chat.api_client", "Login succeeded");
        Ok(())
    }

    /// Tell the server we are leaving (best effort) and clear local credentials.
    pub async fn logout(&mut self) {
        if self.tokens.is_authenticated() {
            if let Err(e) = self
                .call::<(), MessageResponse>(Method::POST, "/logout", None, false)
                .await
            {
                debug!(target: "chat.api_client", error = %e, "Server logout failed, clearing locally");
            }
        }
        self.tokens.clear();
    }

    // =========================================================================
    // Rooms
    // =========================================================================

    pub async fn my_rooms(&mut self) -> Result<Vec<Room>, ClientError> {
        let rooms: RoomList = self.call::<(), _>(Method::GET, "/my-rooms", None, true).await?;
        Ok(rooms.into_rooms())
    }

    pub async fn create_room(&mut self, name: &str, description: &str) -> Result<(), ClientError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(ClientError::Validation("Room name is required".to_string()));
        }
        let request = CreateRoomRequest {
            name,
            description: description.trim(),
        };
        let _: MessageResponse = self.call(Method::POST, "/room", Some(&request), true).await?;
        Ok(())
    }

    pub async fn join_room(&mut self, room_id: &RoomId) -> Result<(), ClientError> {
        require_id(room_id.as_str(), "Room id")?;
        let endpoint = format!("/join_room/{room_id}");
        let _: MessageResponse = self.call::<(), _>(Method::POST, &endpoint, None, true).await?;
        Ok(())
    }

    pub async fn leave_room(&mut self, room_id: &RoomId) -> Result<(), ClientError> {
        require_id(room_id.as_str(), "Room id")?;
        let endpoint = format!("/leave_room/{room_id}");
        let _: MessageResponse = self.call::<(), _>(Method::DELETE, &endpoint, None, true).await?;
        Ok(())
    }

    pub async fn room_members(&mut self, room_id: &RoomId) -> Result<Vec<Member>, ClientError> {
        require_id(room_id.as_str(), "Room id")?;
        let endpoint = format!("/room/{room_id}/members");
        let members: MemberList = self.call::<(), _>(Method::GET, &endpoint, None, true).await?;
        Ok(members.into_members())
    }

    /// Ban, unban, promote or demote `member` in `room_id`.
    pub async fn moderate(
        &mut self,
        action: ModerationAction,
        room_id: &RoomId,
        member: &MemberId,
    ) -> Result<(), ClientError> {
        require_id(room_id.as_str(), "Room id")?;
        require_id(member.as_str(), "Member id")?;
        let endpoint = format!("/room/{room_id}/{}/{member}", action.path_segment());
        let _: MessageResponse = self.call::<(), _>(Method::POST, &endpoint, None, true).await?;
        Ok(())
    }
}

fn validated_credentials<'a>(
    username: &'a str,
    password: &'a SecretString,
) -> Result<CredentialsRequest<'a>, ClientError> {
    let username = username.trim();
    if username.is_empty() {
        return Err(ClientError::Validation("Username is required".to_string()));
    }
    if password.expose_secret().is_empty() {
        return Err(ClientError::Validation("Password is required".to_string()));
    }
    Ok(CredentialsRequest {
        username,
        password: password.expose_secret(),
    })
}

fn require_id(id: &str, what: &str) -> Result<(), ClientError> {
    if id.trim().is_empty() {
        return Err(ClientError::Validation(format!("{what} is required")));
    }
    Ok(())
}

async fn decode_success<T: DeserializeOwned>(response: reqwest::Response) -> Result<T, ClientError> {
    let text = response.text().await.map_err(|e| {
        warn!(target: "chat.api_client", error = %e, "Failed to read response body");
        ClientError::Http(e.to_string())
    })?;

    // Acknowledgement endpoints may answer with an empty body.
    let text = if text.trim().is_empty() { "{}" } else { text.as_str() };

    serde_json::from_str(text).map_err(|e| {
        warn!(target: "chat.api_client", error = %e, "Failed to parse response body");
        ClientError::InvalidResponse(e.to_string())
    })
}

async fn request_failed(response: reqwest::Response) -> ClientError {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();

    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| {
            ["error", "message"].iter().find_map(|key| {
                v.get(*key)
                    .and_then(serde_json::Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(ToString::to_string)
            })
        })
        .unwrap_or_else(|| GENERIC_REQUEST_FAILURE.to_string());

    if status.is_server_error() {
        warn!(target: "chat.api_client", status = %status, "Server returned error");
    } else {
        debug!(target: "chat.api_client", status = %status, message = %message, "Request rejected");
    }

    ClientError::RequestFailed {
        status: status.as_u16(),
        message,
    }
}

// =============================================================================
// Tests
// =============================================================================

//! Credential pair ownership.
//!
//! [`TokenManager`] holds the access token, refresh token and display name in
//! memory and mirrors every change to a [`CredentialStore`].
//!
//! # Invariants
//!
//! - The subject id is never stored; it is decoded from the current access
//!   token on every call, so it can never go stale.
//! - [`TokenManager::save`] merges: an absent or empty field never overwrites
//!   a stored non-empty value, so a partial refresh response cannot erase
//!   the session.
//! - [`TokenManager::rotation`] increases whenever the access token value
//!   changes, letting the socket owner notice that it authenticated with an
//!   outdated credential.
//!
//! # Security
//!
//! - Tokens are held as `SecretString` and never logged
//! - Storage failures are logged without credential values

use crate::storage::{CredentialStore, StoredCredentials};
use common::jwt::{self, AccessClaims};
use common::secret::{ExposeSecret, SecretString};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// A partial credential update, as returned by login or refresh.
#[derive(Default, Clone)]
pub struct CredentialUpdate {
    pub access_token: Option<String>,
    pub refresh_token: Option<String>,
    pub username: Option<String>,
}

impl fmt::Debug for CredentialUpdate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialUpdate")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .finish()
    }
}

/// Owns the credential pair and its persisted copy.
pub struct TokenManager {
    store: Arc<dyn CredentialStore>,
    access_token: Option<SecretString>,
    refresh_token: Option<SecretString>,
    username: Option<String>,
    rotation: u64,
}

impl fmt::Debug for TokenManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenManager")
            .field("access_token", &self.access_token.as_ref().map(|_| "[REDACTED]"))
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .field("username", &self.username)
            .field("rotation", &self.rotation)
            .finish_non_exhaustive()
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.is_empty())
}

impl TokenManager {
    /// Create an empty manager backed by `store`, without reading it.
    pub fn new(store: Arc<dyn CredentialStore>) -> Self {
        Self {
            store,
            access_token: None,
            refresh_token: None,
            username: None,
            rotation: 0,
        }
    }

    /// Restore credentials from `store`.
    ///
    /// Never fails: unreadable or corrupt storage yields an empty pair.
    pub fn load_from_storage(store: Arc<dyn CredentialStore>) -> Self {
        let stored = match store.load() {
            Ok(stored) => stored,
            Err(e) => {
                warn!(
                    target: "chat.token_manager",
                    error = %e,
                    "Failed to read stored credentials, starting logged out"
                );
                StoredCredentials::default()
            }
        };

        let mut manager = Self::new(store);
        manager.access_token = stored
            .access_token
            .filter(|t| !t.expose_secret().is_empty());
        manager.refresh_token = stored
            .refresh_token
            .filter(|t| !t.expose_secret().is_empty());
        manager.username = non_empty(stored.username);

        debug!(
            target: "chat.token_manager",
            has_access_token = manager.access_token.is_some(),
            has_refresh_token = manager.refresh_token.is_some(),
            "Credentials loaded from storage"
        );

        manager
    }

    /// Merge `update` into the held credentials and persist the result.
    ///
    /// Fields that are `None` or empty leave the current value untouched.
    pub fn save(&mut self, update: CredentialUpdate) {
        let mut changed = false;

        if let Some(access) = non_empty(update.access_token) {
            let rotated = self
                .access_token
                .as_ref()
                .map_or(true, |current| current.expose_secret() != access);
            if rotated {
                self.rotation += 1;
                debug!(
                    target: "chat.token_manager",
                    rotation = self.rotation,
                    "Access token rotated"
                );
            }
            self.access_token = Some(SecretString::from(access));
            changed = true;
        }

        if let Some(refresh) = non_empty(update.refresh_token) {
            self.refresh_token = Some(SecretString::from(refresh));
            changed = true;
        }

        if let Some(username) = non_empty(update.username) {
            self.username = Some(username);
            changed = true;
        }

        if changed {
            self.persist();
        }
    }

    /// Wipe all three fields from memory and storage. Idempotent.
    pub fn clear(&mut self) {
        if self.access_token.is_some() {
            self.rotation += 1;
        }
        self.access_token = None;
        self.refresh_token = None;
        self.username = None;

        if let Err(e) = self.store.clear() {
            warn!(target: "chat.token_manager", error = %e, "Failed to clear stored credentials");
        } else {
            info!(target: "chat.token_manager", "Credentials cleared");
        }
    }

    fn persist(&self) {
        let snapshot = StoredCredentials {
            access_token: self.access_token.clone(),
            refresh_token: self.refresh_token.clone(),
            username: self.username.clone(),
        };
        // The in-memory session stays usable even if the disk copy is stale.
        if let Err(e) = self.store.store(&snapshot) {
            warn!(target: "chat.token_manager", error = %e, "Failed to persist credentials");
        }
    }

    pub fn access_token(&self) -> Option<&SecretString> {
        self.access_token.as_ref()
    }

    pub fn refresh_token(&self) -> Option<&SecretString> {
        self.refresh_token.as_ref()
    }

    /// Display name captured at login.
    pub fn display_name(&self) -> Option<&str> {
        self.username.as_deref()
    }

    /// Whether an access token is held. Says nothing about its validity.
    pub fn is_authenticated(&self) -> bool {
        self.access_token.is_some()
    }

    /// Subject id of the current access token, or `""` if none can be decoded.
    pub fn subject_id(&self) -> String {
        self.access_token
            .as_ref()
            .map(|t| jwt::subject_id(t.expose_secret()))
            .unwrap_or_default()
    }

    /// Decoded claims of the current access token.
    pub fn claims(&self) -> Option<AccessClaims> {
        self.access_token
            .as_ref()
            .and_then(|t| jwt::decode_claims(t.expose_secret()).ok())
    }

    /// Whether the current access token's `exp` is at or before `now`.
    ///
    /// An undecodable token is reported as not expired; the server decides.
    pub fn access_token_expired_at(&self, now: i64) -> bool {
        self.claims().is_some_and(|c| c.is_expired_at(now))
    }

    /// Counter bumped each time the access token value changes.
    pub fn rotation(&self) -> u64 {
        self.rotation
    }
}

//! Builder patterns for test access tokens.
//!
//! Tokens are real three-segment JWTs signed with a fixed HS256 test key.
//! The client never verifies signatures; it only decodes the claims.

use chrono::{Duration, Utc};
use jsonwebtoken::{encode, EncodingKey, Header};
use serde_json::json;
use uuid::Uuid;

/// Signing key for test tokens. Not a secret.
pub const TEST_SIGNING_KEY: &[u8] = b"chat-test-signing-key";

/// Builder for signed test access tokens.
///
/// # Example
/// ```rust,ignore
/// let token = TestTokenBuilder::new()
///     .for_user("member-1")
///     .expires_in(3600)
///     .build();
/// ```
pub struct TestTokenBuilder {
    sub: String,
    exp: i64,
    iat: i64,
    typ: String,
}

impl TestTokenBuilder {
    /// Create a new token builder with a random subject, valid for an hour.
    pub fn new() -> Self {
        let now = Utc::now();
        Self {
            sub: format!("member-{}", Uuid::new_v4()),
            exp: (now + Duration::seconds(3600)).timestamp(),
            iat: now.timestamp(),
            typ: "access".to_string(),
        }
    }

    /// Set the subject (member id).
    pub fn for_user(mut self, subject: &str) -> Self {
        self.sub = subject.to_string();
        self
    }

    /// Set expiration in seconds from now. Negative values are in the past.
    pub fn expires_in(mut self, seconds: i64) -> Self {
        self.exp = (Utc::now() + Duration::seconds(seconds)).timestamp();
        self
    }

    /// Shorthand for a token that expired a minute ago.
    pub fn expired(self) -> Self {
        self.expires_in(-60)
    }

    /// Set the token type claim (`access` or `refresh`).
    pub fn with_type(mut self, typ: &str) -> Self {
        self.typ = typ.to_string();
        self
    }

    /// Subject this builder will encode.
    pub fn subject(&self) -> &str {
        &self.sub
    }

    /// Build the claims as a JSON value.
    pub fn claims(&self) -> serde_json::Value {
        json!({
            "sub": self.sub,
            "exp": self.exp,
            "iat": self.iat,
            "typ": self.typ,
            "iss": "vally_chat_app",
        })
    }

    /// Build the signed token.
    pub fn build(self) -> String {
        encode(
            &Header::default(),
            &self.claims(),
            &EncodingKey::from_secret(TEST_SIGNING_KEY),
        )
        .expect("test token encoding cannot fail")
    }
}

impl Default for TestTokenBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_subject_round_trips_through_client_decoder() {
        let token = TestTokenBuilder::new().for_user("member-7").build();
        assert_eq!(common::jwt::subject_id(&token), "member-7");
    }

    #[test]
    fn test_expired_token_is_expired() {
        let token = TestTokenBuilder::new().expired().build();
        let claims = common::jwt::decode_claims(&token).unwrap();
        assert!(claims.is_expired_at(Utc::now().timestamp()));
    }

    #[test]
    fn test_default_subject_is_unique() {
        let a = TestTokenBuilder::default();
        let b = TestTokenBuilder::default();
        assert_ne!(a.subject(), b.subject());
    }
}

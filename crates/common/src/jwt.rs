//! Client-side access token inspection.
//!
//! The chat server signs its access and refresh tokens; the client never holds
//! the signing key and never verifies signatures. What the client does need is
//! read-only access to a few claims:
//! - `sub` to know which member id the session belongs to
//! - `exp` to avoid opening a socket with a token the server will reject
//!
//! Decoding is structured: callers get a typed [`AccessClaims`] or a
//! [`TokenDecodeError`], never a panic.
//!
//! # Security
//!
//! - Tokens are size-checked BEFORE parsing
//! - The `sub` field is redacted in Debug output
//! - Decode failures are logged at debug level without the token value

use base64::engine::general_purpose::{URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

// =============================================================================
// Constants
// =============================================================================

/// Maximum token size accepted for decoding (8KB).
///
/// Server tokens are a few hundred bytes; anything larger is rejected before
/// base64 decoding allocates.
pub const MAX_JWT_SIZE_BYTES: usize = 8192;

// =============================================================================
// Error Types
// =============================================================================

/// Reasons an access token could not be decoded.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TokenDecodeError {
    /// Token was empty.
    #[error("Token is empty")]
    Empty,

    /// Token size exceeds [`MAX_JWT_SIZE_BYTES`].
    #[error("Token exceeds maximum size")]
    TooLarge,

    /// Token is not three dot-separated segments.
    #[error("Token is not a valid JWT structure")]
    Malformed,

    /// Claims segment is not valid URL-safe base64.
    #[error("Token claims are not valid base64")]
    InvalidEncoding,

    /// Claims segment is not a JSON object with a string `sub`.
    #[error("Token claims are not valid JSON")]
    InvalidClaims,
}

// =============================================================================
// Claims Types
// =============================================================================

/// Claims carried by chat server tokens.
///
/// Only `sub` is required. The remaining claims are optional so that tokens
/// issued by older server builds still decode.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (member id) - redacted in Debug output.
    pub sub: String,

    /// Expiration timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exp: Option<i64>,

    /// Issued-at timestamp (Unix epoch seconds).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,

    /// Token type, `"access"` or `"refresh"`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub typ: Option<String>,

    /// Issuer.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iss: Option<String>,
}

impl fmt::Debug for AccessClaims {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AccessClaims")
            .field("sub", &"[REDACTED]")
            .field("exp", &self.exp)
            .field("iat", &self.iat)
            .field("typ", &self.typ)
            .field("iss", &self.iss)
            .finish()
    }
}

impl AccessClaims {
    /// Whether the token has expired at `now` (Unix epoch seconds).
    ///
    /// Tokens without an `exp` claim are treated as not expired; the server
    /// remains the authority and will answer 401 if it disagrees.
    #[must_use]
    pub fn is_expired_at(&self, now: i64) -> bool {
        self.exp.is_some_and(|exp| exp <= now)
    }
}

// =============================================================================
// Functions
// =============================================================================

/// Decode the claims segment of a JWT without verifying its signature.
///
/// # Errors
///
/// Returns a [`TokenDecodeError`] describing the first structural problem
/// found: empty input, oversized input, wrong segment count, bad base64, or
/// claims that are not a JSON object with a string `sub`.
pub fn decode_claims(token: &str) -> Result<AccessClaims, TokenDecodeError> {
    if token.is_empty() {
        return Err(TokenDecodeError::Empty);
    }

    if token.len() > MAX_JWT_SIZE_BYTES {
        tracing::debug!(
            target: "common.jwt",
            token_size = token.len(),
            max_size = MAX_JWT_SIZE_BYTES,
            "Token rejected: size exceeds maximum allowed"
        );
        return Err(TokenDecodeError::TooLarge);
    }

    let mut segments = token.split('.');
    let (Some(_header), Some(payload), Some(_signature), None) = (
        segments.next(),
        segments.next(),
        segments.next(),
        segments.next(),
    ) else {
        tracing::debug!(target: "common.jwt", "Token rejected: invalid JWT format");
        return Err(TokenDecodeError::Malformed);
    };

    // Some issuers keep the '=' padding; accept both forms.
    let payload_bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .or_else(|_| URL_SAFE.decode(payload))
        .map_err(|e| {
            tracing::debug!(target: "common.jwt", error = %e, "Failed to decode JWT claims base64");
            TokenDecodeError::InvalidEncoding
        })?;

    serde_json::from_slice::<AccessClaims>(&payload_bytes).map_err(|e| {
        tracing::debug!(target: "common.jwt", error = %e, "Failed to parse JWT claims JSON");
        TokenDecodeError::InvalidClaims
    })
}

/// Return the subject id carried by `token`, or an empty string.
///
/// A token that cannot be decoded is a display-layer problem, not a session
/// failure, so this never returns an error.
#[must_use]
pub fn subject_id(token: &str) -> String {
    decode_claims(token).map(|c| c.sub).unwrap_or_default()
}

// =============================================================================
// Tests
// =============================================================================

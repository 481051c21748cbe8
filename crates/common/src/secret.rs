//! Secret types for keeping credentials out of logs.
//!
//! Re-exports the [`secrecy`] types used for every credential the chat client
//! handles: account passwords, access tokens and refresh tokens.
//!
//! `SecretString` implements `Debug` with redaction, so a struct that derives
//! `Debug` and holds a token stays safe to pass to `tracing`. The value is
//! zeroized on drop. Reading it requires an explicit `expose_secret()`.
//!
//! ```rust
//! use common::secret::{ExposeSecret, SecretString};
//!
//! #[derive(Debug)]
//! struct LoginForm {
//!     username: String,
//!     password: SecretString,
//! }
//!
//! let form = LoginForm {
//!     username: "alice".to_string(),
//!     password: SecretString::from("hunter2"),
//! };
//!
//! assert!(!format!("{form:?}").contains("hunter2"));
//! assert_eq!(form.password.expose_secret(), "hunter2");
//! ```
//!
//! With the `serde` feature, token pairs can be deserialized straight from a
//! login or refresh response body:
//!
//! ```rust
//! use serde::Deserialize;
//! use common::secret::SecretString;
//!
//! #[derive(Debug, Deserialize)]
//! struct TokenPair {
//!     access_token: SecretString,
//!     refresh_token: Option<SecretString>,
//! }
//!
//! let json = r#"{"access_token": "a.b.c"}"#;
//! let pair: TokenPair = serde_json::from_str(json).unwrap();
//! assert!(pair.refresh_token.is_none());
//! ```

// Re-export the main types from secrecy
pub use secrecy::{ExposeSecret, SecretString};

//! Common utilities and types shared across the chat client crates.

#![warn(clippy::pedantic)]

/// Module for identifier and role types
pub mod types;

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for access token claim decoding
pub mod jwt;

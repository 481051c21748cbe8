//! # Chat Test Utilities
//!
//! Shared test utilities for the chat client.
//!
//! This crate provides:
//! - A scripted in-memory socket (`MockConnector` + `ServerHandle`)
//! - Test token builders (`TestTokenBuilder`)
//! - wiremock mount helpers for the REST boundary
//! - A session harness wiring all of the above together (`TestChat`)
//!
//! ## Usage
//!
//! ```rust,ignore
//! use chat_test_utils::*;
//!
//! #[tokio::test]
//! async fn test_example() -> anyhow::Result<()> {
//!     let mut chat = TestChat::logged_in().await?;
//!     let mut server = chat.connect().await;
//!
//!     let ticket = chat.session.enter(&RoomId::new("1")).await?;
//!     server.expect_event("join_rooms").await;
//!     server.joined_rooms(&["1"]);
//!     chat.session.wait_joined(ticket).await?;
//!     Ok(())
//! }
//! ```

pub mod api_mocks;
pub mod harness;
pub mod mock_socket;
pub mod token_builders;

// Re-export commonly used items
pub use api_mocks::*;
pub use harness::*;
pub use mock_socket::*;
pub use token_builders::*;

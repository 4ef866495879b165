//! Transport implementations for the realtime change feed.
//!
//! This module provides concrete [`Transport`](crate::Transport) implementations
//! behind feature gates:
//!
//! | Feature                | Transport              |
//! |------------------------|------------------------|
//! | `transport-websocket`  | [`WebSocketTransport`] |
//!
//! # Example
//!
//! ```rust,ignore
//! # async fn example() -> Result<(), dead_card_lobby::LobbyError> {
//! use dead_card_lobby::{RealtimeConfig, RealtimeFeed, WebSocketTransport};
//!
//! let ws = WebSocketTransport::connect_realtime("https://demo.example.co", "anon-key").await?;
//! let feed = RealtimeFeed::start(ws, RealtimeConfig::default());
//! # Ok(())
//! # }
//! ```

#[cfg(feature = "transport-websocket")]
pub mod websocket;

#[cfg(feature = "transport-websocket")]
pub use websocket::WebSocketTransport;

//! # Dead Card Lobby
//!
//! Async client for the lobby of a multiplayer social-deduction card game.
//!
//! The crate signs players in anonymously, creates and joins rooms by their
//! six-character code, takes seats through an atomic server-side procedure,
//! starts rounds, and mirrors room and seat state live through a row-level
//! change feed.
//!
//! ## Features
//!
//! - **Backend-agnostic**: the client depends only on the [`Backend`] and
//!   [`ChangeFeed`] traits
//! - **Offline-capable**: [`MemoryBackend`] and [`MemoryFeed`] implement every
//!   contract in-process, with atomic seat allocation
//! - **Hosted backend**: `HttpBackend` (feature `backend-http`) talks to the
//!   project's auth, REST and RPC endpoints
//! - **Realtime**: [`RealtimeFeed`] speaks the Phoenix channel protocol over
//!   any [`Transport`]; `WebSocketTransport` (feature `transport-websocket`)
//!   is built in
//! - **Event-driven**: receive typed [`LobbyEvent`]s via a channel
//!
//! ## Quick Start
//!
//! ```
//! # tokio_test::block_on(async {
//! use dead_card_lobby::{JoinRoomRequest, LobbyClient, LobbyConfig, MemoryBackend};
//!
//! let backend = MemoryBackend::new();
//! let feed = backend.feed();
//! let (client, _events) = LobbyClient::start(backend, feed, LobbyConfig::default());
//!
//! let room = client.create_room(8.0).await.unwrap();
//! let joined = client
//!     .join_room(JoinRoomRequest::new(&room.room_code, "Alice"))
//!     .await
//!     .unwrap();
//! assert_eq!(joined.player.turn_order, 0);
//! client.shutdown().await;
//! # });
//! ```

pub mod backend;
pub mod client;
pub mod config;
pub mod error;
pub mod error_codes;
pub mod event;
pub mod feed;
#[cfg(feature = "backend-http")]
pub mod http;
pub mod memory;
pub mod protocol;
pub mod realtime;
pub mod transport;
pub mod transports;
pub mod validate;
pub mod view;

// Re-export primary types for ergonomic imports.
pub use backend::{Backend, Identity, IdentityProvider, PlayerStore, Procedures, RoomStore};
pub use client::{JoinRoomRequest, JoinedRoom, LobbyClient};
pub use config::LobbyConfig;
pub use error::LobbyError;
pub use error_codes::ErrorCode;
pub use event::{FeedScope, LobbyEvent};
pub use feed::{ChangeFeed, FeedMessage, Subscription, SubscriptionStatus};
#[cfg(feature = "backend-http")]
pub use http::HttpBackend;
pub use memory::{MemoryBackend, MemoryFeed};
pub use protocol::{ChangeEvent, ChangeFilter, Player, Room, RoomStatus};
pub use realtime::{RealtimeConfig, RealtimeFeed};
pub use transport::Transport;
#[cfg(feature = "transport-websocket")]
pub use transports::WebSocketTransport;
pub use validate::PlayerProfile;
pub use view::Locale;

//! Transport abstraction for the realtime change feed.
//!
//! The [`Transport`] trait defines a bidirectional text message channel
//! between [`RealtimeFeed`](crate::RealtimeFeed) and the realtime server. The
//! channel protocol uses JSON text frames, so every transport implementation
//! must handle framing internally (WebSocket frames, an in-process channel,
//! a recorded script in tests).
//!
//! # Connection Setup
//!
//! Connection setup is intentionally NOT part of this trait. Construct a
//! connected transport externally, then pass it to `RealtimeFeed::start`.
//!
//! # Implementing a Custom Transport
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use dead_card_lobby::error::LobbyError;
//! use dead_card_lobby::transport::Transport;
//! use tokio::sync::mpsc;
//!
//! struct ChannelTransport {
//!     tx: mpsc::UnboundedSender<String>,
//!     rx: mpsc::UnboundedReceiver<String>,
//! }
//!
//! #[async_trait]
//! impl Transport for ChannelTransport {
//!     async fn send(&mut self, message: String) -> Result<(), LobbyError> {
//!         self.tx
//!             .send(message)
//!             .map_err(|e| LobbyError::TransportSend(e.to_string()))
//!     }
//!
//!     async fn recv(&mut self) -> Option<Result<String, LobbyError>> {
//!         self.rx.recv().await.map(Ok)
//!     }
//!
//!     async fn close(&mut self) -> Result<(), LobbyError> {
//!         Ok(())
//!     }
//! }
//! ```

use async_trait::async_trait;

use crate::error::LobbyError;

/// A bidirectional text message transport for the realtime channel protocol.
///
/// Each call to [`send`](Transport::send) transmits one complete JSON frame.
/// Each call to [`recv`](Transport::recv) returns one complete JSON frame.
///
/// # Cancel Safety
///
/// [`recv`](Transport::recv) **MUST** be cancel-safe because it is polled
/// inside `tokio::select!`. Cancelling it must not lose data.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Send a JSON text frame to the server.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::TransportSend`] if the frame could not be sent.
    async fn send(&mut self, message: String) -> Result<(), LobbyError>;

    /// Receive the next JSON text frame from the server.
    ///
    /// Returns:
    /// - `Some(Ok(text))`: a complete frame was received
    /// - `Some(Err(e))`: a transport error occurred
    /// - `None`: the connection was closed cleanly by the server
    async fn recv(&mut self) -> Option<Result<String, LobbyError>>;

    /// Close the connection gracefully. Implementations should release
    /// resources even if the close handshake fails.
    async fn close(&mut self) -> Result<(), LobbyError>;
}

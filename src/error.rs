//! Error types for the lobby client.

use thiserror::Error;

use crate::error_codes::ErrorCode;

/// Errors that can occur when using the lobby client.
#[derive(Debug, Error)]
pub enum LobbyError {
    /// User input was empty or malformed. Raised before any backend call.
    #[error("{0}")]
    Validation(String),

    /// No room matches the given join code.
    #[error("room {code} not found")]
    RoomNotFound {
        /// The normalized code that was looked up.
        code: String,
    },

    /// The room already holds the maximum number of seats.
    #[error("room is full ({capacity} seats)")]
    RoomFull {
        /// Seat capacity of the room.
        capacity: usize,
    },

    /// A room operation was requested while no room is active client-side.
    #[error("no active room")]
    NoActiveRoom,

    /// A remote procedure returned neither a record nor an error.
    #[error("empty RPC response from {procedure}")]
    EmptyRpcResponse {
        /// Name of the procedure that was called.
        procedure: String,
    },

    /// The backend rejected the request.
    #[error("{message}")]
    Backend {
        /// Human-readable message, verbatim from the backend.
        message: String,
        /// Structured error code, when the backend payload could be classified.
        code: Option<ErrorCode>,
    },

    /// Failed to send a frame through the transport.
    #[error("transport send error: {0}")]
    TransportSend(String),

    /// Failed to receive a frame from the transport.
    #[error("transport receive error: {0}")]
    TransportReceive(String),

    /// The transport connection was closed.
    #[error("transport connection closed")]
    TransportClosed,

    /// Failed to serialize or deserialize a record or frame.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The configuration could not be loaded.
    #[error("configuration error: {0}")]
    Config(String),

    /// An HTTP request to the backend failed before a response was decoded.
    #[cfg(feature = "backend-http")]
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// An operation timed out.
    #[error("operation timed out")]
    Timeout,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl LobbyError {
    /// Shorthand for a [`LobbyError::Validation`] error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }

    /// Build a backend error, classifying it from an optional backend code
    /// and the message text.
    pub fn backend(message: impl Into<String>, raw_code: Option<&str>) -> Self {
        let message = message.into();
        let code = ErrorCode::classify(raw_code, &message);
        Self::Backend { message, code }
    }

    /// Returns the structured code of a backend error, if any.
    pub fn code(&self) -> Option<&ErrorCode> {
        match self {
            Self::Backend { code, .. } => code.as_ref(),
            _ => None,
        }
    }

    /// Returns `true` for errors raised by client-side input validation.
    pub fn is_validation(&self) -> bool {
        matches!(self, Self::Validation(_))
    }
}

/// A specialized [`Result`] type for lobby client operations.
pub type Result<T> = std::result::Result<T, LobbyError>;

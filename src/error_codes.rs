//! Structured error codes for backend rejections.
//!
//! The hosted backend reports failures as a free-text message plus an optional
//! code (a Postgres SQLSTATE, a PostgREST `PGRST…` code, or an auth error
//! slug). [`ErrorCode::classify`] folds those into a small set of conditions
//! the lobby cares about. Codes serialize as `SCREAMING_SNAKE_CASE`.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Conditions recognized in backend error payloads.
///
/// Use [`description()`](ErrorCode::description) for a human-readable explanation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Room errors
    RoomFull,
    RoomNotFound,
    InvalidRoomState,
    DuplicateSeat,

    // Authentication errors
    Unauthorized,

    // Validation errors
    InvalidInput,

    // Rate limiting
    RateLimitExceeded,

    // Server errors
    InternalError,
}

/// SQLSTATE for `unique_violation`.
const UNIQUE_VIOLATION: &str = "23505";

impl ErrorCode {
    /// Returns a human-readable description of this error code.
    pub fn description(&self) -> &'static str {
        match self {
            Self::RoomFull => "The room has reached its seat capacity. Try a different room.",
            Self::RoomNotFound => {
                "The requested room could not be found. The code may be incorrect."
            }
            Self::InvalidRoomState => {
                "The room is in the wrong state for this operation, e.g. the round already started."
            }
            Self::DuplicateSeat => "This identity already holds a seat in the room.",
            Self::Unauthorized => {
                "The session is missing or expired, or the row is not visible to this identity."
            }
            Self::InvalidInput => "The backend rejected a value as malformed or out of range.",
            Self::RateLimitExceeded => "Too many requests in a short time. Try again later.",
            Self::InternalError => "The backend failed while processing the request.",
        }
    }

    /// Classify a backend failure from its optional code and its message.
    ///
    /// Specific codes win over message text. Procedure rejections raised with
    /// a generic code (`P0001`) are recognized by their message.
    pub fn classify(raw_code: Option<&str>, message: &str) -> Option<Self> {
        if let Some(code) = raw_code.map(str::trim) {
            let by_code = match code {
                UNIQUE_VIOLATION => Some(Self::DuplicateSeat),
                "42501" | "PGRST301" | "PGRST302" | "401" | "403" | "bad_jwt"
                | "no_authorization" | "session_not_found" => Some(Self::Unauthorized),
                "22P02" | "22023" | "23502" | "23514" | "validation_failed" => {
                    Some(Self::InvalidInput)
                }
                "429" | "over_request_rate_limit" => Some(Self::RateLimitExceeded),
                "XX000" | "500" => Some(Self::InternalError),
                _ => None,
            };
            if by_code.is_some() {
                return by_code;
            }
        }

        let lower = message.to_lowercase();
        let mentions = |phrases: &[&str]| phrases.iter().any(|p| lower.contains(p));
        if mentions(ROOM_FULL_PHRASES) {
            Some(Self::RoomFull)
        } else if mentions(ROOM_NOT_FOUND_PHRASES) {
            Some(Self::RoomNotFound)
        } else if mentions(ROOM_STATE_PHRASES) {
            Some(Self::InvalidRoomState)
        } else {
            None
        }
    }
}

// Lower-case phrases the room procedures raise with `P0001`.
const ROOM_FULL_PHRASES: &[&str] = &["room is full", "room full", "room capacity", "capacity reached"];
const ROOM_NOT_FOUND_PHRASES: &[&str] = &["room not found", "no such room"];
const ROOM_STATE_PHRASES: &[&str] = &[
    "room status",
    "room state",
    "already started",
    "cannot start a round",
];

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.description())
    }
}

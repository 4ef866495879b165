//! Client-side input validation.
//!
//! Everything here runs before the backend is contacted, so a rejected input
//! never costs a network round-trip.

use crate::error::{LobbyError, Result};

/// Length of a room join code.
pub const ROOM_CODE_LEN: usize = 6;

/// Maximum number of seats in a room.
pub const MAX_SEATS: usize = 6;

/// Target used when the create-room form is left empty.
pub const DEFAULT_TARGET_DEAD_CARDS: i32 = 8;

/// Normalize a user-typed room code: trim whitespace and upper-case.
///
/// # Errors
///
/// Returns [`LobbyError::Validation`] if the code is empty or not exactly
/// [`ROOM_CODE_LEN`] characters long.
pub fn normalize_room_code(raw: &str) -> Result<String> {
    let code = raw.trim().to_uppercase();
    if code.is_empty() {
        return Err(LobbyError::validation("room code is required"));
    }
    if code.chars().count() != ROOM_CODE_LEN {
        return Err(LobbyError::validation(format!(
            "room code must be {ROOM_CODE_LEN} characters"
        )));
    }
    Ok(code)
}

/// Validate a numeric dead-card target.
///
/// # Errors
///
/// Returns [`LobbyError::Validation`] for non-finite, non-integral,
/// non-positive or out-of-range values.
pub fn validate_target_count(value: f64) -> Result<i32> {
    if !value.is_finite() || value <= 0.0 || value.fract() != 0.0 || value > f64::from(i32::MAX)
    {
        return Err(LobbyError::validation(
            "target dead cards must be a positive integer",
        ));
    }
    // Range and integrality checked above.
    Ok(value as i32)
}

/// Parse the create-room form field. Empty input falls back to
/// [`DEFAULT_TARGET_DEAD_CARDS`].
///
/// # Errors
///
/// Returns [`LobbyError::Validation`] when the text is not a number or fails
/// [`validate_target_count`].
pub fn parse_target_count(raw: &str) -> Result<i32> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(DEFAULT_TARGET_DEAD_CARDS);
    }
    let value: f64 = raw.parse().map_err(|_| {
        LobbyError::validation("target dead cards must be a positive integer")
    })?;
    validate_target_count(value)
}

/// Profile fields submitted when taking a seat.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerProfile {
    pub name: String,
    pub job: String,
    pub personality: String,
}

impl PlayerProfile {
    /// Build a profile, trimming every field.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::Validation`] if the name is empty after trimming.
    pub fn new(name: &str, job: &str, personality: &str) -> Result<Self> {
        let name = name.trim();
        if name.is_empty() {
            return Err(LobbyError::validation("player name is required"));
        }
        Ok(Self {
            name: name.to_owned(),
            job: job.trim().to_owned(),
            personality: personality.trim().to_owned(),
        })
    }
}

//! Records and call payloads exchanged with the lobby backend.
//!
//! Field names match the backend's snake_case columns and procedure
//! parameters exactly, so every type here serializes straight onto the wire:
//!
//! - `rooms` / `players` rows → [`Room`] / [`Player`]
//! - `join_room_player` / `start_round` arguments → [`JoinRoomPlayerArgs`] / [`StartRoundArgs`]
//! - row-level change notifications → [`ChangeEvent`], filtered by [`ChangeFilter`]

use std::fmt;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::Result;

// ── Type aliases ────────────────────────────────────────────────────

/// Identifier of a session identity (the auth user id).
pub type IdentityId = Uuid;

/// Unique identifier for rooms.
pub type RoomId = Uuid;

/// Unique identifier for player seats.
pub type PlayerId = Uuid;

/// Table holding rooms.
pub const ROOMS_TABLE: &str = "rooms";

/// Table holding player seats.
pub const PLAYERS_TABLE: &str = "players";

/// Schema both tables live in.
pub const PUBLIC_SCHEMA: &str = "public";

/// Seat-assignment procedure.
pub const JOIN_ROOM_PLAYER_RPC: &str = "join_room_player";

/// Round-start procedure.
pub const START_ROUND_RPC: &str = "start_round";

// ── Enums ───────────────────────────────────────────────────────────

/// Lifecycle status of a room.
///
/// Statuses unknown to this client are preserved verbatim in
/// [`RoomStatus::Other`] so a newer server never breaks decoding.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum RoomStatus {
    /// Players are gathering; rounds have not started.
    #[default]
    Lobby,
    /// A round is in progress.
    Active,
    /// The game is over.
    Finished,
    /// Any other server-defined status.
    Other(String),
}

impl RoomStatus {
    /// Wire representation of this status.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Lobby => "lobby",
            Self::Active => "active",
            Self::Finished => "finished",
            Self::Other(s) => s,
        }
    }
}

impl From<String> for RoomStatus {
    fn from(value: String) -> Self {
        match value.as_str() {
            "lobby" => Self::Lobby,
            "active" => Self::Active,
            "finished" => Self::Finished,
            _ => Self::Other(value),
        }
    }
}

impl From<RoomStatus> for String {
    fn from(value: RoomStatus) -> Self {
        match value {
            RoomStatus::Other(s) => s,
            other => other.as_str().to_owned(),
        }
    }
}

impl fmt::Display for RoomStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of row-level change carried by a [`ChangeEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

// ── Rows ────────────────────────────────────────────────────────────

/// A shared game session keyed by a short join code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Room {
    pub id: RoomId,
    /// Six-character join code, generated by the server.
    pub room_code: String,
    pub created_by: IdentityId,
    /// Number of dead cards that ends the game.
    pub target_dead_cards: i32,
    #[serde(default)]
    pub status: RoomStatus,
    #[serde(default)]
    pub current_round: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

/// One identity's seat within a room.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Player {
    pub id: PlayerId,
    pub room_id: RoomId,
    pub user_id: IdentityId,
    pub name: String,
    #[serde(default)]
    pub job: Option<String>,
    #[serde(default)]
    pub personality: Option<String>,
    #[serde(default)]
    pub suspicion_total: i32,
    #[serde(default)]
    pub innocence_total: i32,
    #[serde(default)]
    pub challenge_left_this_round: i32,
    /// Position in play sequence, unique within the room.
    pub turn_order: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
}

// ── Call payloads ───────────────────────────────────────────────────

/// Body of a room insert. The server assigns id, code, status and round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewRoom {
    pub target_dead_cards: i32,
    pub created_by: IdentityId,
}

/// Arguments of the `join_room_player` procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoinRoomPlayerArgs {
    pub p_room_id: RoomId,
    pub p_user_id: IdentityId,
    pub p_name: String,
    pub p_job: String,
    pub p_personality: String,
}

/// Arguments of the `start_round` procedure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartRoundArgs {
    pub p_room_id: RoomId,
}

// ── Change feed ─────────────────────────────────────────────────────

/// Scope of a change-feed subscription.
///
/// Serializes as one entry of a realtime join's `postgres_changes` config.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChangeFilter {
    /// `"*"` for every change kind, or `INSERT` / `UPDATE` / `DELETE`.
    pub event: String,
    pub schema: String,
    pub table: String,
    /// Row filter in `column=eq.value` form.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub filter: Option<String>,
}

impl ChangeFilter {
    /// Every change to the given table matching `column = value`.
    pub fn eq(table: impl Into<String>, column: &str, value: impl fmt::Display) -> Self {
        Self {
            event: "*".into(),
            schema: PUBLIC_SCHEMA.into(),
            table: table.into(),
            filter: Some(format!("{column}=eq.{value}")),
        }
    }

    /// Changes to one room row.
    pub fn room(room_id: RoomId) -> Self {
        Self::eq(ROOMS_TABLE, "id", room_id)
    }

    /// Changes to the seats of one room.
    pub fn players_of(room_id: RoomId) -> Self {
        Self::eq(PLAYERS_TABLE, "room_id", room_id)
    }

    /// Restrict this filter to a single change kind.
    #[must_use]
    pub fn only(mut self, kind: ChangeKind) -> Self {
        self.event = match kind {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
        .into();
        self
    }

    /// Short topic name used for realtime channels, e.g. `players:<room>`.
    pub fn topic(&self) -> String {
        match &self.filter {
            Some(filter) => {
                let value = filter.rsplit("eq.").next().unwrap_or(filter);
                format!("{}:{value}", self.table)
            }
            None => self.table.clone(),
        }
    }

    /// Returns `true` if the filter admits the given change.
    ///
    /// Only `eq` filters are evaluated; the row checked is the new record, or
    /// the old one for deletes.
    pub fn matches(&self, event: &ChangeEvent) -> bool {
        if event.table != self.table || event.schema != self.schema {
            return false;
        }
        let kind_ok = match self.event.as_str() {
            "*" => true,
            "INSERT" => event.kind == ChangeKind::Insert,
            "UPDATE" => event.kind == ChangeKind::Update,
            "DELETE" => event.kind == ChangeKind::Delete,
            _ => false,
        };
        if !kind_ok {
            return false;
        }
        let Some(filter) = &self.filter else {
            return true;
        };
        let Some((column, value)) = filter.split_once("=eq.") else {
            return true;
        };
        let row = match event.kind {
            ChangeKind::Delete => event.old_record.as_ref(),
            _ => event.record.as_ref(),
        };
        row.and_then(|r| r.get(column))
            .map(|v| match v {
                serde_json::Value::String(s) => s == value,
                other => other.to_string() == value,
            })
            .unwrap_or(false)
    }
}

/// A row-level change notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    #[serde(rename = "type")]
    pub kind: ChangeKind,
    pub schema: String,
    pub table: String,
    /// New row for inserts and updates.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub record: Option<serde_json::Value>,
    /// Previous row (or its primary key) for updates and deletes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_record: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_timestamp: Option<String>,
}

impl ChangeEvent {
    /// Build a change for a row in the public schema.
    pub fn new<T: Serialize>(
        kind: ChangeKind,
        table: &str,
        record: Option<&T>,
        old_record: Option<&T>,
    ) -> Result<Self> {
        Ok(Self {
            kind,
            schema: PUBLIC_SCHEMA.into(),
            table: table.into(),
            record: record.map(serde_json::to_value).transpose()?,
            old_record: old_record.map(serde_json::to_value).transpose()?,
            commit_timestamp: Some(chrono::Utc::now().to_rfc3339()),
        })
    }

    /// Decode the new row into a typed record.
    pub fn decode_record<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        Ok(self
            .record
            .clone()
            .map(serde_json::from_value)
            .transpose()?)
    }
}

//! Backend contracts consumed by the lobby client.
//!
//! The lobby runs against a hosted backend that provides anonymous
//! authentication, two tables (`rooms`, `players`) and two atomic procedures
//! (`join_room_player`, `start_round`). Each concern is a separate trait so a
//! deployment can mix implementations; [`Backend`] bundles them and is
//! implemented automatically for any type providing all four.
//!
//! Shipped implementations:
//!
//! | Type                                  | Notes                                   |
//! |---------------------------------------|-----------------------------------------|
//! | [`MemoryBackend`](crate::MemoryBackend) | in-process, atomic seat allocation    |
//! | `HttpBackend`                         | feature `backend-http`, REST + RPC      |
//!
//! # Implementing a custom backend
//!
//! ```rust,no_run
//! use async_trait::async_trait;
//! use dead_card_lobby::backend::{Identity, IdentityProvider};
//! use dead_card_lobby::error::Result;
//!
//! struct FixedIdentity(Identity);
//!
//! #[async_trait]
//! impl IdentityProvider for FixedIdentity {
//!     async fn current_identity(&self) -> Result<Option<Identity>> {
//!         Ok(Some(self.0.clone()))
//!     }
//!
//!     async fn sign_in_anonymously(&self) -> Result<Identity> {
//!         Ok(self.0.clone())
//!     }
//! }
//! ```

use std::fmt;

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{
    IdentityId, JoinRoomPlayerArgs, NewRoom, Player, Room, RoomId, StartRoundArgs,
};

/// Number of id characters shown in status readouts.
const IDENTITY_LABEL_LEN: usize = 8;

/// The session identity issued by the identity provider.
#[derive(Clone, PartialEq, Eq)]
pub struct Identity {
    /// Opaque user id; foreign key of seat ownership.
    pub id: IdentityId,
    /// Bearer token for authenticated requests, if the provider issues one.
    pub access_token: Option<String>,
}

impl Identity {
    /// An identity without an access token.
    pub fn new(id: IdentityId) -> Self {
        Self {
            id,
            access_token: None,
        }
    }

    /// Attach a bearer token.
    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }

    /// Truncated id for status readouts, e.g. `1b4e28ba…`.
    pub fn short_label(&self) -> String {
        let id = self.id.to_string();
        let head: String = id.chars().take(IDENTITY_LABEL_LEN).collect();
        format!("{head}…")
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("id", &self.id)
            .field(
                "access_token",
                &self.access_token.as_ref().map(|_| "<redacted>"),
            )
            .finish()
    }
}

/// Issues and remembers the anonymous session identity.
#[async_trait]
pub trait IdentityProvider: Send + Sync + 'static {
    /// The identity of the persisted session, if any.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable. A missing or expired
    /// session is `Ok(None)`, not an error.
    async fn current_identity(&self) -> Result<Option<Identity>>;

    /// Create a new anonymous identity and persist it as the session.
    ///
    /// # Errors
    ///
    /// Returns an error if the provider is unreachable or rejects the request.
    async fn sign_in_anonymously(&self) -> Result<Identity>;
}

/// Persistent table of rooms.
#[async_trait]
pub trait RoomStore: Send + Sync + 'static {
    /// Insert a room. The server assigns id, join code, status and round.
    async fn insert_room(&self, room: NewRoom) -> Result<Room>;

    /// Look up a room by its normalized join code.
    async fn find_room_by_code(&self, code: &str) -> Result<Option<Room>>;
}

/// Persistent table of seats, scoped to rooms.
#[async_trait]
pub trait PlayerStore: Send + Sync + 'static {
    /// The seat held by `user_id` in `room_id`, if any.
    async fn find_player(&self, room_id: RoomId, user_id: IdentityId) -> Result<Option<Player>>;

    /// All seats of a room, ordered by `turn_order` ascending.
    async fn list_players(&self, room_id: RoomId) -> Result<Vec<Player>>;
}

/// Atomic server-side procedures.
#[async_trait]
pub trait Procedures: Send + Sync + 'static {
    /// Return the caller's existing seat or allocate the next one.
    ///
    /// Implementations must make the existence check, capacity check and
    /// insert a single atomic step. `Ok(None)` means the procedure answered
    /// without a record.
    async fn join_room_player(&self, args: JoinRoomPlayerArgs) -> Result<Option<Player>>;

    /// Advance the room's round state and return the updated room.
    async fn start_round(&self, args: StartRoundArgs) -> Result<Option<Room>>;
}

/// Everything the lobby client needs from a backend.
pub trait Backend: IdentityProvider + RoomStore + PlayerStore + Procedures {}

impl<T> Backend for T where T: IdentityProvider + RoomStore + PlayerStore + Procedures {}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[test]
    fn short_label_truncates_to_eight_chars() {
        let identity = Identity::new(Uuid::parse_str("1b4e28ba-2fa1-11d2-883f-0016d3cca427").unwrap());
        assert_eq!(identity.short_label(), "1b4e28ba…");
    }

    #[test]
    fn debug_redacts_token() {
        let identity = Identity::new(Uuid::nil()).with_access_token("secret-jwt");
        let rendered = format!("{identity:?}");
        assert!(!rendered.contains("secret-jwt"));
        assert!(rendered.contains("<redacted>"));
    }
}

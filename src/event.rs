//! Events emitted by [`LobbyClient`](crate::LobbyClient).
//!
//! Every change to the view-model and every log line is published on the
//! event channel returned from [`LobbyClient::start`](crate::LobbyClient::start),
//! so a front-end can re-render from events alone.

use crate::backend::Identity;
use crate::feed::SubscriptionStatus;
use crate::protocol::{Player, Room};
use crate::view::LogEntry;

/// Which change-feed scope a subscription covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedScope {
    /// The active room row.
    Room,
    /// The seats of the active room.
    Players,
}

impl FeedScope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Room => "room",
            Self::Players => "players",
        }
    }
}

/// Events emitted by the lobby client.
#[derive(Debug, Clone)]
pub enum LobbyEvent {
    /// A session identity is now in use.
    IdentityChanged {
        identity: Identity,
        /// Rendered status readout.
        status: String,
    },

    /// The active room record was replaced.
    RoomChanged {
        room: Room,
        /// Rendered room-info readout.
        info: String,
    },

    /// The player list was replaced; seats are in ascending turn order.
    PlayersChanged {
        players: Vec<Player>,
        /// Rendered player-list readout.
        listing: String,
    },

    /// A change-feed subscription changed status.
    SubscriptionStatus {
        scope: FeedScope,
        status: SubscriptionStatus,
    },

    /// A line was added to the activity log.
    Log(LogEntry),
}

//! In-process backend.
//!
//! [`MemoryBackend`] implements every backend contract against shared
//! in-memory tables, and [`MemoryFeed`] broadcasts the resulting row changes.
//! Handles created with [`MemoryBackend::session`] share tables and feed but
//! each carries its own anonymous session, which is how several players are
//! simulated in one process.
//!
//! Seat allocation happens under the table lock: the existing-seat lookup,
//! the capacity check and the insert form one critical section, so concurrent
//! joins can neither exceed capacity nor share a turn order.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use tokio::sync::{mpsc, Mutex};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Identity, IdentityProvider, PlayerStore, Procedures, RoomStore};
use crate::error::{LobbyError, Result};
use crate::feed::{ChangeFeed, FeedMessage, Subscription, SubscriptionId, SubscriptionStatus};
use crate::protocol::{
    ChangeEvent, ChangeFilter, ChangeKind, IdentityId, JoinRoomPlayerArgs, NewRoom, Player,
    Room, RoomId, RoomStatus, StartRoundArgs, PLAYERS_TABLE, ROOMS_TABLE,
};
use crate::validate::{MAX_SEATS, ROOM_CODE_LEN};

/// Characters used in generated room codes (no `0/O` or `1/I` look-alikes).
const CODE_ALPHABET: &[u8] = b"ABCDEFGHJKLMNPQRSTUVWXYZ23456789";

/// Attempts at drawing an unused code before giving up.
const CODE_ATTEMPTS: usize = 64;

/// Challenge allowance granted to every seat when a round starts.
const DEFAULT_CHALLENGES_PER_ROUND: i32 = 1;

/// Generic procedure-raised SQLSTATE.
const RAISE_EXCEPTION: &str = "P0001";

// ── Tables ──────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct Tables {
    rooms: HashMap<RoomId, Room>,
    codes: HashMap<String, RoomId>,
    /// Seats per room, kept in turn order.
    seats: HashMap<RoomId, Vec<Player>>,
}

impl Tables {
    fn generate_code(&self) -> Result<String> {
        let mut rng = rand::thread_rng();
        for _ in 0..CODE_ATTEMPTS {
            let code: String = (0..ROOM_CODE_LEN)
                .map(|_| {
                    let idx = rng.gen_range(0..CODE_ALPHABET.len());
                    CODE_ALPHABET.get(idx).copied().map_or('A', char::from)
                })
                .collect();
            if !self.codes.contains_key(&code) {
                return Ok(code);
            }
        }
        Err(LobbyError::backend("could not allocate a unique room code", Some("XX000")))
    }
}

// ── Backend ─────────────────────────────────────────────────────────

/// In-memory implementation of [`Backend`](crate::Backend).
///
/// # Example
///
/// ```
/// use dead_card_lobby::MemoryBackend;
///
/// let alice = MemoryBackend::new();
/// let bob = alice.session();
/// // `alice` and `bob` see the same rooms but sign in as different identities.
/// # let _ = (alice, bob);
/// ```
#[derive(Debug)]
pub struct MemoryBackend {
    tables: Arc<Mutex<Tables>>,
    feed: MemoryFeed,
    session: Mutex<Option<Identity>>,
    capacity: usize,
    challenges_per_round: i32,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryBackend {
    /// Create empty tables with a fresh, signed-out session.
    pub fn new() -> Self {
        Self {
            tables: Arc::new(Mutex::new(Tables::default())),
            feed: MemoryFeed::new(),
            session: Mutex::new(None),
            capacity: MAX_SEATS,
            challenges_per_round: DEFAULT_CHALLENGES_PER_ROUND,
        }
    }

    /// Override the seat capacity per room. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.capacity = capacity.max(1);
        self
    }

    /// Override the challenge allowance granted when a round starts.
    #[must_use]
    pub fn with_challenges_per_round(mut self, challenges: i32) -> Self {
        self.challenges_per_round = challenges;
        self
    }

    /// Another signed-out session on the same tables and feed.
    pub fn session(&self) -> Self {
        Self {
            tables: Arc::clone(&self.tables),
            feed: self.feed.clone(),
            session: Mutex::new(None),
            capacity: self.capacity,
            challenges_per_round: self.challenges_per_round,
        }
    }

    /// The change feed fed by this backend's writes.
    pub fn feed(&self) -> MemoryFeed {
        self.feed.clone()
    }

    /// Seat capacity per room.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    async fn require_identity(&self, user_id: Option<IdentityId>) -> Result<Identity> {
        let session = self.session.lock().await.clone();
        match session {
            Some(identity) if user_id.is_none_or(|id| id == identity.id) => Ok(identity),
            Some(_) => Err(LobbyError::backend(
                "permission denied: user id does not match the session",
                Some("42501"),
            )),
            None => Err(LobbyError::backend("not signed in", Some("42501"))),
        }
    }
}

#[async_trait]
impl IdentityProvider for MemoryBackend {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        Ok(self.session.lock().await.clone())
    }

    async fn sign_in_anonymously(&self) -> Result<Identity> {
        let identity = Identity::new(Uuid::new_v4());
        *self.session.lock().await = Some(identity.clone());
        debug!(identity = %identity.id, "memory backend: anonymous sign-in");
        Ok(identity)
    }
}

#[async_trait]
impl RoomStore for MemoryBackend {
    async fn insert_room(&self, new_room: NewRoom) -> Result<Room> {
        self.require_identity(Some(new_room.created_by)).await?;
        if new_room.target_dead_cards <= 0 {
            return Err(LobbyError::backend(
                "new row for relation \"rooms\" violates check constraint",
                Some("23514"),
            ));
        }

        let mut tables = self.tables.lock().await;
        let code = tables.generate_code()?;
        let room = Room {
            id: Uuid::new_v4(),
            room_code: code.clone(),
            created_by: new_room.created_by,
            target_dead_cards: new_room.target_dead_cards,
            status: RoomStatus::Lobby,
            current_round: 0,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        };
        tables.codes.insert(code, room.id);
        tables.rooms.insert(room.id, room.clone());
        tables.seats.insert(room.id, Vec::new());
        self.feed
            .publish(ChangeEvent::new(ChangeKind::Insert, ROOMS_TABLE, Some(&room), None)?)
            .await;
        debug!(room_code = %room.room_code, room_id = %room.id, "memory backend: room created");
        Ok(room)
    }

    async fn find_room_by_code(&self, code: &str) -> Result<Option<Room>> {
        self.require_identity(None).await?;
        let tables = self.tables.lock().await;
        Ok(tables
            .codes
            .get(code)
            .and_then(|id| tables.rooms.get(id))
            .cloned())
    }
}

#[async_trait]
impl PlayerStore for MemoryBackend {
    async fn find_player(&self, room_id: RoomId, user_id: IdentityId) -> Result<Option<Player>> {
        self.require_identity(None).await?;
        let tables = self.tables.lock().await;
        Ok(tables
            .seats
            .get(&room_id)
            .and_then(|seats| seats.iter().find(|p| p.user_id == user_id))
            .cloned())
    }

    async fn list_players(&self, room_id: RoomId) -> Result<Vec<Player>> {
        self.require_identity(None).await?;
        let tables = self.tables.lock().await;
        let mut players = tables.seats.get(&room_id).cloned().unwrap_or_default();
        players.sort_by_key(|p| p.turn_order);
        Ok(players)
    }
}

#[async_trait]
impl Procedures for MemoryBackend {
    async fn join_room_player(&self, args: JoinRoomPlayerArgs) -> Result<Option<Player>> {
        self.require_identity(Some(args.p_user_id)).await?;
        if args.p_name.trim().is_empty() {
            return Err(LobbyError::backend("name is required", Some("22023")));
        }

        let mut tables = self.tables.lock().await;
        if !tables.rooms.contains_key(&args.p_room_id) {
            return Err(LobbyError::backend("room not found", Some(RAISE_EXCEPTION)));
        }
        let seats = tables.seats.entry(args.p_room_id).or_default();
        if let Some(existing) = seats.iter().find(|p| p.user_id == args.p_user_id) {
            return Ok(Some(existing.clone()));
        }
        if seats.len() >= self.capacity {
            warn!(room_id = %args.p_room_id, "memory backend: room is full");
            return Err(LobbyError::backend(
                format!("room is full (max {} players)", self.capacity),
                Some(RAISE_EXCEPTION),
            ));
        }

        let turn_order = i32::try_from(seats.len())
            .map_err(|_| LobbyError::backend("turn order overflow", Some("XX000")))?;
        let player = Player {
            id: Uuid::new_v4(),
            room_id: args.p_room_id,
            user_id: args.p_user_id,
            name: args.p_name,
            job: Some(args.p_job),
            personality: Some(args.p_personality),
            suspicion_total: 0,
            innocence_total: 0,
            challenge_left_this_round: 0,
            turn_order,
            created_at: Some(chrono::Utc::now().to_rfc3339()),
        };
        seats.push(player.clone());
        self.feed
            .publish(ChangeEvent::new(ChangeKind::Insert, PLAYERS_TABLE, Some(&player), None)?)
            .await;
        debug!(
            room_id = %player.room_id,
            turn_order = player.turn_order,
            "memory backend: seat allocated"
        );
        Ok(Some(player))
    }

    async fn start_round(&self, args: StartRoundArgs) -> Result<Option<Room>> {
        self.require_identity(None).await?;
        let mut tables = self.tables.lock().await;
        let Some(room) = tables.rooms.get_mut(&args.p_room_id) else {
            return Err(LobbyError::backend("room not found", Some(RAISE_EXCEPTION)));
        };
        match room.status {
            RoomStatus::Lobby | RoomStatus::Active => {}
            ref other => {
                return Err(LobbyError::backend(
                    format!("cannot start a round while room status is {other}"),
                    Some(RAISE_EXCEPTION),
                ));
            }
        }
        let before = room.clone();
        room.status = RoomStatus::Active;
        room.current_round += 1;
        let updated = room.clone();

        self.feed
            .publish(ChangeEvent::new(
                ChangeKind::Update,
                ROOMS_TABLE,
                Some(&updated),
                Some(&before),
            )?)
            .await;

        let challenges = self.challenges_per_round;
        if let Some(seats) = tables.seats.get_mut(&args.p_room_id) {
            for seat in seats.iter_mut() {
                let before = seat.clone();
                seat.challenge_left_this_round = challenges;
                self.feed
                    .publish(ChangeEvent::new(
                        ChangeKind::Update,
                        PLAYERS_TABLE,
                        Some(&*seat),
                        Some(&before),
                    )?)
                    .await;
            }
        }
        debug!(
            room_id = %updated.id,
            round = updated.current_round,
            "memory backend: round started"
        );
        Ok(Some(updated))
    }
}

// ── Feed ────────────────────────────────────────────────────────────

#[derive(Debug, Default)]
struct FeedHub {
    next_id: AtomicU64,
    subscribers: Mutex<HashMap<SubscriptionId, Subscriber>>,
}

#[derive(Debug)]
struct Subscriber {
    filter: ChangeFilter,
    tx: mpsc::UnboundedSender<FeedMessage>,
}

/// In-process [`ChangeFeed`] fed by [`MemoryBackend`] writes.
///
/// Subscriptions acknowledge immediately (`Connecting` then `Subscribed`).
#[derive(Debug, Clone, Default)]
pub struct MemoryFeed {
    hub: Arc<FeedHub>,
}

impl MemoryFeed {
    /// A feed with no subscribers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Deliver a change to every subscription whose filter admits it.
    ///
    /// Subscribers whose receiver was dropped are pruned.
    pub async fn publish(&self, event: ChangeEvent) {
        let mut subscribers = self.hub.subscribers.lock().await;
        subscribers.retain(|id, sub| {
            if !sub.filter.matches(&event) {
                return !sub.tx.is_closed();
            }
            let delivered = sub.tx.send(FeedMessage::Change(event.clone())).is_ok();
            if !delivered {
                debug!(subscription = id, "memory feed: pruning closed subscriber");
            }
            delivered
        });
    }

    /// Number of live subscriptions.
    pub async fn subscriber_count(&self) -> usize {
        self.hub.subscribers.lock().await.len()
    }
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription> {
        let id = self.hub.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, messages) = mpsc::unbounded_channel();
        let _ = tx.send(FeedMessage::Status(SubscriptionStatus::Connecting));
        let _ = tx.send(FeedMessage::Status(SubscriptionStatus::Subscribed));
        self.hub.subscribers.lock().await.insert(
            id,
            Subscriber {
                filter: filter.clone(),
                tx,
            },
        );
        debug!(subscription = id, topic = %filter.topic(), "memory feed: subscribed");
        Ok(Subscription {
            id,
            filter,
            messages,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if let Some(sub) = self.hub.subscribers.lock().await.remove(&id) {
            let _ = sub.tx.send(FeedMessage::Status(SubscriptionStatus::Closed));
            debug!(subscription = id, "memory feed: unsubscribed");
        }
        Ok(())
    }

    async fn shutdown(&self) {
        let mut subscribers = self.hub.subscribers.lock().await;
        for (_, sub) in subscribers.drain() {
            let _ = sub.tx.send(FeedMessage::Status(SubscriptionStatus::Closed));
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;

    async fn signed_in(backend: &MemoryBackend) -> Identity {
        backend.sign_in_anonymously().await.unwrap()
    }

    fn join_args(room: &Room, identity: &Identity, name: &str) -> JoinRoomPlayerArgs {
        JoinRoomPlayerArgs {
            p_room_id: room.id,
            p_user_id: identity.id,
            p_name: name.into(),
            p_job: String::new(),
            p_personality: String::new(),
        }
    }

    #[tokio::test]
    async fn created_room_has_code_status_and_round() {
        let backend = MemoryBackend::new();
        let me = signed_in(&backend).await;
        let room = backend
            .insert_room(NewRoom {
                target_dead_cards: 8,
                created_by: me.id,
            })
            .await
            .unwrap();
        assert_eq!(room.room_code.len(), 6);
        assert!(room.room_code.bytes().all(|b| CODE_ALPHABET.contains(&b)));
        assert_eq!(room.status, RoomStatus::Lobby);
        assert_eq!(room.current_round, 0);

        let found = backend.find_room_by_code(&room.room_code).await.unwrap();
        assert_eq!(found, Some(room));
    }

    #[tokio::test]
    async fn insert_requires_matching_session() {
        let backend = MemoryBackend::new();
        let err = backend
            .insert_room(NewRoom {
                target_dead_cards: 8,
                created_by: Uuid::new_v4(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&crate::ErrorCode::Unauthorized));
    }

    #[tokio::test]
    async fn seat_is_reused_for_same_identity() {
        let backend = MemoryBackend::new();
        let me = signed_in(&backend).await;
        let room = backend
            .insert_room(NewRoom {
                target_dead_cards: 8,
                created_by: me.id,
            })
            .await
            .unwrap();
        let first = backend.join_room_player(join_args(&room, &me, "Alice")).await.unwrap();
        let second = backend.join_room_player(join_args(&room, &me, "Alice")).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(backend.list_players(room.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn start_round_advances_and_grants_challenges() {
        let backend = MemoryBackend::new().with_challenges_per_round(2);
        let me = signed_in(&backend).await;
        let room = backend
            .insert_room(NewRoom {
                target_dead_cards: 5,
                created_by: me.id,
            })
            .await
            .unwrap();
        backend.join_room_player(join_args(&room, &me, "Alice")).await.unwrap();

        let updated = backend
            .start_round(StartRoundArgs { p_room_id: room.id })
            .await
            .unwrap()
            .unwrap();
        assert_eq!(updated.status, RoomStatus::Active);
        assert_eq!(updated.current_round, 1);
        let players = backend.list_players(room.id).await.unwrap();
        assert_eq!(players[0].challenge_left_this_round, 2);
    }

    #[tokio::test]
    async fn feed_delivers_only_matching_scope() {
        let backend = MemoryBackend::new();
        let me = signed_in(&backend).await;
        let feed = backend.feed();
        let room = backend
            .insert_room(NewRoom {
                target_dead_cards: 8,
                created_by: me.id,
            })
            .await
            .unwrap();
        let mut mine = feed.subscribe(ChangeFilter::players_of(room.id)).await.unwrap();
        let mut other = feed
            .subscribe(ChangeFilter::players_of(Uuid::new_v4()))
            .await
            .unwrap();

        backend.join_room_player(join_args(&room, &me, "Alice")).await.unwrap();

        assert_eq!(
            mine.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::Connecting))
        );
        assert_eq!(
            mine.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::Subscribed))
        );
        let change = mine.messages.recv().await.unwrap();
        assert!(matches!(change, FeedMessage::Change(ref e) if e.kind == ChangeKind::Insert));

        let _ = other.messages.recv().await; // Connecting
        let _ = other.messages.recv().await; // Subscribed
        assert!(other.messages.try_recv().is_err());
    }

    #[tokio::test]
    async fn unsubscribe_closes_and_removes() {
        let feed = MemoryFeed::new();
        let mut sub = feed.subscribe(ChangeFilter::room(Uuid::nil())).await.unwrap();
        assert_eq!(feed.subscriber_count().await, 1);
        feed.unsubscribe(sub.id).await.unwrap();
        assert_eq!(feed.subscriber_count().await, 0);

        let _ = sub.messages.recv().await; // Connecting
        let _ = sub.messages.recv().await; // Subscribed
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::Closed))
        );
        assert_eq!(sub.messages.recv().await, None);
    }
}

//! Lobby client orchestrator.
//!
//! [`LobbyClient`] sequences every user-facing operation against a
//! [`Backend`] and a [`ChangeFeed`]: it makes sure a session identity exists,
//! performs the store or procedure call, folds the result into its
//! [`ViewModel`] and publishes [`LobbyEvent`]s on a bounded channel returned
//! from [`LobbyClient::start`].
//!
//! Live updates come from two subscriptions per room, one for the room row
//! and one for its seats. Each runs in its own pump task that feeds changes
//! back into the view-model.
//!
//! # Example
//!
//! ```rust,ignore
//! let backend = MemoryBackend::new();
//! let feed = backend.feed();
//! let (client, mut events) = LobbyClient::start(backend, feed, LobbyConfig::default());
//!
//! client.init().await;
//! let room = client.create_room_action("8").await;
//! let joined = client
//!     .join_room_action(JoinRoomRequest::new(room.unwrap().room_code, "Alice"))
//!     .await;
//!
//! while let Some(event) = events.recv().await {
//!     if let LobbyEvent::PlayersChanged { listing, .. } = event {
//!         println!("{listing}");
//!     }
//! }
//! ```

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, Mutex};
use tracing::{debug, info, warn};

use crate::backend::{Backend, Identity};
use crate::config::LobbyConfig;
use crate::error::{LobbyError, Result};
use crate::error_codes::ErrorCode;
use crate::event::{FeedScope, LobbyEvent};
use crate::feed::{ChangeFeed, FeedMessage, SubscriptionId, SubscriptionStatus};
use crate::protocol::{
    ChangeFilter, ChangeKind, JoinRoomPlayerArgs, NewRoom, Player, Room, RoomId,
    StartRoundArgs, JOIN_ROOM_PLAYER_RPC, START_ROUND_RPC,
};
use crate::validate::{
    normalize_room_code, parse_target_count, validate_target_count, PlayerProfile, MAX_SEATS,
};
use crate::view::{
    render_auth_status, render_players, render_room_info, Action, ActivityLog, Locale,
    LogEntry, Ticket, ViewModel,
};

// ── Requests ────────────────────────────────────────────────────────

/// Form input for [`LobbyClient::join_room`].
///
/// Only `code` and `name` are required; `job` and `personality` may be empty.
///
/// # Example
///
/// ```
/// use dead_card_lobby::JoinRoomRequest;
///
/// let request = JoinRoomRequest::new(" abc123 ", "Alice").with_job("Doctor");
/// assert_eq!(request.job, "Doctor");
/// assert!(request.personality.is_empty());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JoinRoomRequest {
    /// Room code as typed; trimmed and upper-cased before lookup.
    pub code: String,
    pub name: String,
    pub job: String,
    pub personality: String,
}

impl JoinRoomRequest {
    pub fn new(code: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            name: name.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn with_job(mut self, job: impl Into<String>) -> Self {
        self.job = job.into();
        self
    }

    #[must_use]
    pub fn with_personality(mut self, personality: impl Into<String>) -> Self {
        self.personality = personality.into();
        self
    }
}

/// Result of a successful [`LobbyClient::join_room`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JoinedRoom {
    pub room: Room,
    /// The caller's seat.
    pub player: Player,
}

// ── Shared state ────────────────────────────────────────────────────

/// A live subscription owned by the client.
#[derive(Debug)]
struct SubscriptionSlot {
    id: SubscriptionId,
    room_id: RoomId,
    task: tokio::task::JoinHandle<()>,
}

#[derive(Debug)]
struct ClientState {
    view: ViewModel,
    log: ActivityLog,
    room_sub: Option<SubscriptionSlot>,
    players_sub: Option<SubscriptionSlot>,
}

impl ClientState {
    fn slot_mut(&mut self, scope: FeedScope) -> &mut Option<SubscriptionSlot> {
        match scope {
            FeedScope::Room => &mut self.room_sub,
            FeedScope::Players => &mut self.players_sub,
        }
    }
}

/// State shared between the client handle and its pump tasks.
struct Inner<B> {
    backend: B,
    state: Mutex<ClientState>,
    event_tx: mpsc::Sender<LobbyEvent>,
    locale: Locale,
}

impl<B: Backend> Inner<B> {
    async fn log(&self, message: impl Into<String>) {
        let entry = self.state.lock().await.log.push(message);
        info!(target: "dead_card_lobby::activity", "{}", entry.message);
        emit_event(&self.event_tx, LobbyEvent::Log(entry)).await;
    }

    async fn room_ticket(&self) -> Ticket {
        self.state.lock().await.view.room_ticket()
    }

    /// Apply a room record taken under `ticket`; returns whether it landed.
    async fn apply_room(&self, ticket: Ticket, room: Room) -> bool {
        self.land_room(ticket, room, false).await
    }

    /// Apply a change notification; dropped unless `room` is the active room.
    async fn apply_room_update(&self, ticket: Ticket, room: Room) -> bool {
        self.land_room(ticket, room, true).await
    }

    async fn land_room(&self, ticket: Ticket, room: Room, update_only: bool) -> bool {
        let info = render_room_info(Some(&room), self.locale);
        let applied = {
            let mut state = self.state.lock().await;
            if update_only {
                state.view.apply_room_update(ticket, room.clone())
            } else {
                state.view.apply_room(ticket, room.clone())
            }
        };
        if applied {
            emit_event(&self.event_tx, LobbyEvent::RoomChanged { room, info }).await;
        } else {
            debug!(room = %room.id, "discarding stale room record");
        }
        applied
    }

    /// Fetch the seats of `room_id` and replace the view's list with them.
    ///
    /// The fetch is discarded if a newer one landed first, or if the view has
    /// moved on to another room.
    async fn refresh_players(&self, room_id: RoomId) -> Result<Vec<Player>> {
        let ticket = self.state.lock().await.view.players_ticket();
        let mut players = self.backend.list_players(room_id).await?;
        players.sort_by_key(|p| p.turn_order);

        let applied = {
            let mut state = self.state.lock().await;
            let same_room = state.view.room().is_none_or(|r| r.id == room_id);
            same_room && state.view.apply_players(ticket, players.clone())
        };
        if applied {
            let listing = render_players(&players, self.locale);
            emit_event(
                &self.event_tx,
                LobbyEvent::PlayersChanged {
                    players: players.clone(),
                    listing,
                },
            )
            .await;
        } else {
            debug!(room = %room_id, "discarding stale player list");
        }
        Ok(players)
    }

    async fn report_status(&self, scope: FeedScope, status: SubscriptionStatus) {
        self.log(format!("{} realtime: {status}", scope.as_str())).await;
        emit_event(&self.event_tx, LobbyEvent::SubscriptionStatus { scope, status }).await;
    }
}

// ── Client ──────────────────────────────────────────────────────────

/// Async lobby client.
///
/// Created via [`LobbyClient::start`], which returns the client handle and an
/// event receiver. All operations take `&self` and may be called
/// concurrently; seat allocation correctness rests on the backend's atomic
/// procedure, and stale fetch results are discarded by the view-model.
pub struct LobbyClient<B: Backend, F: ChangeFeed> {
    inner: Arc<Inner<B>>,
    feed: Arc<F>,
    shutdown_timeout: Duration,
}

impl<B: Backend, F: ChangeFeed> LobbyClient<B, F> {
    /// Create a client over `backend` and `feed` and return a handle plus
    /// event receiver.
    ///
    /// No network call is made until the first operation.
    #[must_use = "the event receiver must be used to receive events"]
    pub fn start(backend: B, feed: F, config: LobbyConfig) -> (Self, mpsc::Receiver<LobbyEvent>) {
        // Clamp capacity to at least 1 (tokio panics on 0).
        let capacity = config.event_channel_capacity.max(1);
        let (event_tx, event_rx) = mpsc::channel::<LobbyEvent>(capacity);

        let inner = Arc::new(Inner {
            backend,
            state: Mutex::new(ClientState {
                view: ViewModel::default(),
                log: ActivityLog::with_capacity(config.log_capacity),
                room_sub: None,
                players_sub: None,
            }),
            event_tx,
            locale: config.locale,
        });

        let client = Self {
            inner,
            feed: Arc::new(feed),
            shutdown_timeout: config.shutdown_timeout,
        };
        (client, event_rx)
    }

    /// The backend this client talks to.
    pub fn backend(&self) -> &B {
        &self.inner.backend
    }

    /// The change feed this client subscribes through.
    pub fn feed(&self) -> &F {
        &self.feed
    }

    pub fn locale(&self) -> Locale {
        self.inner.locale
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Make sure a session identity exists, reusing the persisted one.
    ///
    /// Updates the status readout and forwards the access token to the
    /// change feed when the identity changes.
    ///
    /// # Errors
    ///
    /// Propagates identity provider failures.
    pub async fn ensure_signed_in(&self) -> Result<Identity> {
        let identity = match self.inner.backend.current_identity().await? {
            Some(identity) => identity,
            None => {
                debug!("no persisted session, signing in anonymously");
                self.inner.backend.sign_in_anonymously().await?
            }
        };

        let changed = {
            let mut state = self.inner.state.lock().await;
            let changed = state.view.identity() != Some(&identity);
            if changed {
                state.view.set_identity(identity.clone());
            }
            changed
        };
        if changed {
            if let Err(e) = self
                .feed
                .set_access_token(identity.access_token.clone())
                .await
            {
                warn!("could not forward access token to change feed: {e}");
            }
            let status = render_auth_status(Some(&identity), self.inner.locale);
            emit_event(
                &self.inner.event_tx,
                LobbyEvent::IdentityChanged {
                    identity: identity.clone(),
                    status,
                },
            )
            .await;
        }
        Ok(identity)
    }

    /// Create a room ending at `target_dead_cards` and make it active.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::Validation`] without contacting the backend if
    /// the target is not a positive integer; otherwise propagates backend
    /// failures.
    pub async fn create_room(&self, target_dead_cards: f64) -> Result<Room> {
        let target = validate_target_count(target_dead_cards)?;
        self.create_validated_room(target).await
    }

    /// [`create_room`](Self::create_room) from free-text form input. Empty
    /// input selects the default target of 8.
    pub async fn create_room_from_input(&self, raw: &str) -> Result<Room> {
        let target = parse_target_count(raw)?;
        self.create_validated_room(target).await
    }

    async fn create_validated_room(&self, target_dead_cards: i32) -> Result<Room> {
        let identity = self.ensure_signed_in().await?;
        let ticket = self.inner.room_ticket().await;
        let room = self
            .inner
            .backend
            .insert_room(NewRoom {
                target_dead_cards,
                created_by: identity.id,
            })
            .await?;
        debug!(room = %room.id, code = %room.room_code, "room created");
        self.inner.apply_room(ticket, room.clone()).await;
        Ok(room)
    }

    /// Look up a room by its join code.
    ///
    /// # Errors
    ///
    /// - [`LobbyError::Validation`] if the code is empty or not 6 characters
    /// - [`LobbyError::RoomNotFound`] if no room has this code
    /// - backend failures otherwise
    pub async fn find_room_by_code(&self, raw_code: &str) -> Result<Room> {
        let code = normalize_room_code(raw_code)?;
        self.find_normalized_room(code).await
    }

    async fn find_normalized_room(&self, code: String) -> Result<Room> {
        self.ensure_signed_in().await?;
        match self.inner.backend.find_room_by_code(&code).await? {
            Some(room) => Ok(room),
            None => Err(LobbyError::RoomNotFound { code }),
        }
    }

    /// Return the caller's seat in `room_id`, allocating one if needed.
    ///
    /// An existing seat is returned untouched; otherwise the atomic
    /// `join_room_player` procedure assigns the next turn order.
    ///
    /// # Errors
    ///
    /// - [`LobbyError::RoomFull`] if every seat is taken
    /// - [`LobbyError::EmptyRpcResponse`] if the procedure answered without a record
    /// - backend failures otherwise
    pub async fn get_or_create_player(
        &self,
        room_id: RoomId,
        profile: &PlayerProfile,
    ) -> Result<Player> {
        let identity = self.ensure_signed_in().await?;
        if let Some(existing) = self.inner.backend.find_player(room_id, identity.id).await? {
            debug!(player = %existing.id, "reusing existing seat");
            return Ok(existing);
        }

        let args = JoinRoomPlayerArgs {
            p_room_id: room_id,
            p_user_id: identity.id,
            p_name: profile.name.clone(),
            p_job: profile.job.clone(),
            p_personality: profile.personality.clone(),
        };
        match self.inner.backend.join_room_player(args).await {
            Ok(Some(player)) => Ok(player),
            Ok(None) => Err(LobbyError::EmptyRpcResponse {
                procedure: JOIN_ROOM_PLAYER_RPC.into(),
            }),
            Err(e) if e.code() == Some(&ErrorCode::RoomFull) => {
                Err(LobbyError::RoomFull { capacity: MAX_SEATS })
            }
            Err(e) => Err(e),
        }
    }

    /// Full join flow: look up the room, make it active, take a seat and
    /// attach the room and player subscriptions.
    ///
    /// Code and profile are validated before any backend call.
    pub async fn join_room(&self, request: JoinRoomRequest) -> Result<JoinedRoom> {
        let code = normalize_room_code(&request.code)?;
        let profile = PlayerProfile::new(&request.name, &request.job, &request.personality)?;

        let ticket = self.inner.room_ticket().await;
        let room = self.find_normalized_room(code).await?;
        self.inner.apply_room(ticket, room.clone()).await;

        let player = self.get_or_create_player(room.id, &profile).await?;
        self.subscribe_players(room.id).await?;
        self.subscribe_room(room.id).await?;
        Ok(JoinedRoom { room, player })
    }

    /// Start the next round of the active room and adopt the returned record.
    ///
    /// # Errors
    ///
    /// - [`LobbyError::NoActiveRoom`] if no room is active
    /// - [`LobbyError::EmptyRpcResponse`] if the procedure answered without a record
    /// - backend failures otherwise, e.g. [`ErrorCode::InvalidRoomState`]
    pub async fn start_round(&self) -> Result<Room> {
        let room_id = self.active_room_id().await?;
        self.ensure_signed_in().await?;
        let ticket = self.inner.room_ticket().await;
        let room = self
            .inner
            .backend
            .start_round(StartRoundArgs { p_room_id: room_id })
            .await?
            .ok_or_else(|| LobbyError::EmptyRpcResponse {
                procedure: START_ROUND_RPC.into(),
            })?;
        self.inner.apply_room(ticket, room.clone()).await;
        Ok(room)
    }

    /// Re-fetch the active room's seats.
    pub async fn refresh_players(&self) -> Result<Vec<Player>> {
        let room_id = self.active_room_id().await?;
        self.inner.refresh_players(room_id).await
    }

    async fn active_room_id(&self) -> Result<RoomId> {
        self.inner
            .state
            .lock()
            .await
            .view
            .room()
            .map(|r| r.id)
            .ok_or(LobbyError::NoActiveRoom)
    }

    // ── Subscriptions ───────────────────────────────────────────────

    /// Attach the player-list subscription for `room_id`, replacing any
    /// previous one, and load the initial list.
    ///
    /// Every insert, update or delete in scope triggers a full re-fetch.
    pub async fn subscribe_players(&self, room_id: RoomId) -> Result<Vec<Player>> {
        self.release_scope(FeedScope::Players).await;
        let sub = self.feed.subscribe(ChangeFilter::players_of(room_id)).await?;
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(pump_players(inner, room_id, sub.messages));
        self.install(FeedScope::Players, SubscriptionSlot {
            id: sub.id,
            room_id,
            task,
        })
        .await;
        self.inner.refresh_players(room_id).await
    }

    /// Attach the room-row subscription for `room_id`, replacing any
    /// previous one. Update notifications are applied without a re-fetch.
    pub async fn subscribe_room(&self, room_id: RoomId) -> Result<()> {
        self.release_scope(FeedScope::Room).await;
        let sub = self.feed.subscribe(ChangeFilter::room(room_id)).await?;
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(pump_room(inner, room_id, sub.messages));
        self.install(FeedScope::Room, SubscriptionSlot {
            id: sub.id,
            room_id,
            task,
        })
        .await;
        Ok(())
    }

    /// Room id of the live subscription for `scope`, if any.
    pub async fn subscribed_room(&self, scope: FeedScope) -> Option<RoomId> {
        let mut state = self.inner.state.lock().await;
        state.slot_mut(scope).as_ref().map(|slot| slot.room_id)
    }

    async fn install(&self, scope: FeedScope, slot: SubscriptionSlot) {
        let displaced = self.inner.state.lock().await.slot_mut(scope).replace(slot);
        // A concurrent attach for the same scope may have landed in between.
        if let Some(old) = displaced {
            self.release(old).await;
        }
    }

    async fn release_scope(&self, scope: FeedScope) {
        let previous = self.inner.state.lock().await.slot_mut(scope).take();
        if let Some(slot) = previous {
            self.release(slot).await;
        }
    }

    async fn release(&self, slot: SubscriptionSlot) {
        slot.task.abort();
        if let Err(e) = self.feed.unsubscribe(slot.id).await {
            warn!(subscription = slot.id, "failed to release subscription: {e}");
        }
    }

    // ── User actions ────────────────────────────────────────────────

    /// Startup sign-in. Failures are logged, never returned.
    pub async fn init(&self) -> Option<Identity> {
        self.run_action(Action::Init, self.ensure_signed_in(), |_| String::new())
            .await
    }

    pub async fn sign_in_action(&self) -> Option<Identity> {
        self.run_action(Action::SignIn, self.ensure_signed_in(), |_| String::new())
            .await
    }

    /// Create a room from the target-count form field.
    pub async fn create_room_action(&self, raw_target: &str) -> Option<Room> {
        self.run_action(
            Action::CreateRoom,
            self.create_room_from_input(raw_target),
            |room| room.room_code.clone(),
        )
        .await
    }

    pub async fn join_room_action(&self, request: JoinRoomRequest) -> Option<JoinedRoom> {
        self.run_action(Action::JoinRoom, self.join_room(request), |joined| {
            format!(
                "room_code={} player_id={} turn_order={}",
                joined.room.room_code, joined.player.id, joined.player.turn_order
            )
        })
        .await
    }

    pub async fn start_round_action(&self) -> Option<Room> {
        self.run_action(Action::StartRound, self.start_round(), |room| {
            format!("current_round={}", room.current_round)
        })
        .await
    }

    async fn run_action<T>(
        &self,
        action: Action,
        op: impl std::future::Future<Output = Result<T>>,
        detail: impl FnOnce(&T) -> String,
    ) -> Option<T> {
        let locale = self.inner.locale;
        match op.await {
            Ok(value) => {
                let line = action.success_message(locale, &detail(&value));
                self.inner.log(line).await;
                Some(value)
            }
            Err(e) => {
                warn!(?action, "action failed: {e}");
                self.inner
                    .log(format!("{}{e}", action.failure_prefix(locale)))
                    .await;
                None
            }
        }
    }

    // ── State accessors ─────────────────────────────────────────────

    pub async fn identity(&self) -> Option<Identity> {
        self.inner.state.lock().await.view.identity().cloned()
    }

    pub async fn current_room(&self) -> Option<Room> {
        self.inner.state.lock().await.view.room().cloned()
    }

    /// Seats of the active room in ascending turn order.
    pub async fn players(&self) -> Vec<Player> {
        self.inner.state.lock().await.view.players().to_vec()
    }

    /// Activity log entries, newest first.
    pub async fn log_entries(&self) -> Vec<LogEntry> {
        self.inner.state.lock().await.log.entries().cloned().collect()
    }

    pub async fn render_log(&self) -> String {
        self.inner.state.lock().await.log.render()
    }

    pub async fn status_text(&self) -> String {
        let state = self.inner.state.lock().await;
        render_auth_status(state.view.identity(), self.inner.locale)
    }

    pub async fn room_info_text(&self) -> String {
        let state = self.inner.state.lock().await;
        render_room_info(state.view.room(), self.inner.locale)
    }

    pub async fn players_text(&self) -> String {
        let state = self.inner.state.lock().await;
        render_players(state.view.players(), self.inner.locale)
    }

    // ── Shutdown ────────────────────────────────────────────────────

    /// Release every subscription and shut the change feed down.
    ///
    /// The feed gets `shutdown_timeout` to close; after that it is left
    /// to its own `Drop`.
    pub async fn shutdown(&self) {
        debug!("LobbyClient: shutdown requested");
        self.release_scope(FeedScope::Players).await;
        self.release_scope(FeedScope::Room).await;
        if tokio::time::timeout(self.shutdown_timeout, self.feed.shutdown())
            .await
            .is_err()
        {
            warn!("change feed did not shut down within timeout");
        }
    }
}

impl<B: Backend, F: ChangeFeed> std::fmt::Debug for LobbyClient<B, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LobbyClient")
            .field("locale", &self.inner.locale)
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl<B: Backend, F: ChangeFeed> Drop for LobbyClient<B, F> {
    fn drop(&mut self) {
        // No executor is available to unsubscribe here; stopping the pumps
        // is enough to stop view updates.
        if let Ok(mut state) = self.inner.state.try_lock() {
            for slot in [state.room_sub.take(), state.players_sub.take()]
                .into_iter()
                .flatten()
            {
                slot.task.abort();
            }
        }
    }
}

// ── Pump tasks ──────────────────────────────────────────────────────

async fn pump_players<B: Backend>(
    inner: Arc<Inner<B>>,
    room_id: RoomId,
    mut messages: mpsc::UnboundedReceiver<FeedMessage>,
) {
    while let Some(msg) = messages.recv().await {
        match msg {
            FeedMessage::Status(status) => inner.report_status(FeedScope::Players, status).await,
            FeedMessage::Change(change) => {
                debug!(kind = ?change.kind, room = %room_id, "player change");
                if let Err(e) = inner.refresh_players(room_id).await {
                    warn!(room = %room_id, "player re-fetch failed: {e}");
                }
            }
        }
    }
    debug!(room = %room_id, "player pump finished");
}

async fn pump_room<B: Backend>(
    inner: Arc<Inner<B>>,
    room_id: RoomId,
    mut messages: mpsc::UnboundedReceiver<FeedMessage>,
) {
    while let Some(msg) = messages.recv().await {
        match msg {
            FeedMessage::Status(status) => inner.report_status(FeedScope::Room, status).await,
            FeedMessage::Change(change) if change.kind == ChangeKind::Delete => {
                debug!(room = %room_id, "ignoring room delete");
            }
            FeedMessage::Change(change) => match change.decode_record::<Room>() {
                Ok(Some(room)) if room.id == room_id => {
                    let ticket = inner.room_ticket().await;
                    inner.apply_room_update(ticket, room).await;
                }
                Ok(_) => debug!(room = %room_id, "room change without matching record"),
                Err(e) => warn!(room = %room_id, "undecodable room change: {e}"),
            },
        }
    }
    debug!(room = %room_id, "room pump finished");
}

// ── Event emission ──────────────────────────────────────────────────

/// Emit an event, dropping it with a warning if the channel is full.
async fn emit_event(event_tx: &mpsc::Sender<LobbyEvent>, event: LobbyEvent) {
    match event_tx.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(dropped)) => {
            warn!(
                "event channel full, dropping event: {:?}",
                std::mem::discriminant(&dropped)
            );
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {
            debug!("event channel closed, receiver dropped");
        }
    }
}

// ── Tests ───────────────────────────────────────────────────────────

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::memory::{MemoryBackend, MemoryFeed};
    use crate::protocol::RoomStatus;

    fn client() -> (
        LobbyClient<MemoryBackend, MemoryFeed>,
        mpsc::Receiver<LobbyEvent>,
    ) {
        let backend = MemoryBackend::new();
        let feed = backend.feed();
        LobbyClient::start(backend, feed, LobbyConfig::default())
    }

    #[test]
    fn join_request_builder() {
        let request = JoinRoomRequest::new("abc123", "Bob")
            .with_job("Chef")
            .with_personality("calm");
        assert_eq!(request.code, "abc123");
        assert_eq!(request.name, "Bob");
        assert_eq!(request.job, "Chef");
        assert_eq!(request.personality, "calm");
    }

    #[tokio::test]
    async fn ensure_signed_in_reuses_session() {
        let (client, mut events) = client();
        let first = client.ensure_signed_in().await.unwrap();
        let second = client.ensure_signed_in().await.unwrap();
        assert_eq!(first, second);

        match events.try_recv().unwrap() {
            LobbyEvent::IdentityChanged { identity, status } => {
                assert_eq!(identity, first);
                assert!(status.starts_with("signed in (anonymous): "));
            }
            other => panic!("expected IdentityChanged, got {other:?}"),
        }
        // Unchanged identity is not re-announced.
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn create_room_becomes_active() {
        let (client, _events) = client();
        let room = client.create_room(8.0).await.unwrap();
        assert_eq!(room.room_code.chars().count(), 6);
        assert_eq!(room.status, RoomStatus::Lobby);
        assert_eq!(client.current_room().await, Some(room.clone()));
        assert!(client.room_info_text().await.contains(&room.room_code));
    }

    #[tokio::test]
    async fn start_round_without_room_fails() {
        let (client, _events) = client();
        assert!(matches!(
            client.start_round().await,
            Err(LobbyError::NoActiveRoom)
        ));
    }

    #[tokio::test]
    async fn failed_action_logs_prefixed_message() {
        let (client, _events) = client();
        assert!(client.create_room_action("-3").await.is_none());
        let entries = client.log_entries().await;
        assert_eq!(entries.len(), 1);
        assert!(entries[0].message.starts_with("create room failed: "));
    }

    #[tokio::test]
    async fn successful_action_logs_code() {
        let (client, _events) = client();
        let room = client.create_room_action("").await.unwrap();
        assert_eq!(room.target_dead_cards, 8);
        let log = client.render_log().await;
        assert!(log.contains(&format!("room created, code: {}", room.room_code)));
    }

    #[tokio::test]
    async fn shutdown_releases_subscriptions() {
        let (client, _events) = client();
        let room = client.create_room(4.0).await.unwrap();
        client.subscribe_players(room.id).await.unwrap();
        client.subscribe_room(room.id).await.unwrap();
        assert_eq!(client.feed().subscriber_count().await, 2);
        assert_eq!(client.subscribed_room(FeedScope::Room).await, Some(room.id));

        client.shutdown().await;
        assert_eq!(client.feed().subscriber_count().await, 0);
        assert_eq!(client.subscribed_room(FeedScope::Players).await, None);
    }
}

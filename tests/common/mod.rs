#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::indexing_slicing,
    dead_code
)]
//! Shared test utilities for lobby integration tests.
//!
//! Provides a channel-backed [`MockTransport`] whose other half plays the
//! realtime server, a [`CountingBackend`] wrapper that records every backend
//! call and can inject faults, and JSON fixture helpers.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use dead_card_lobby::backend::{IdentityProvider, PlayerStore, Procedures, RoomStore};
use dead_card_lobby::protocol::{
    IdentityId, JoinRoomPlayerArgs, NewRoom, RoomId, StartRoundArgs,
};
use dead_card_lobby::realtime::RealtimeMessage;
use dead_card_lobby::{Backend, Identity, LobbyError, Player, Room, Transport};
use tokio::sync::mpsc;

// ── Tracing ─────────────────────────────────────────────────────────

/// Install a test subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

// ── MockTransport ───────────────────────────────────────────────────

/// A channel-based mock transport for integration testing.
///
/// Frames sent by the client are forwarded to the paired [`MockServer`];
/// frames pushed by the server are yielded by `recv()`.
pub struct MockTransport {
    to_server: mpsc::UnboundedSender<String>,
    from_server: mpsc::UnboundedReceiver<Option<String>>,
    /// Whether `close()` has been called.
    pub closed: Arc<AtomicBool>,
}

/// Server half of a [`MockTransport`].
pub struct MockServer {
    from_client: mpsc::UnboundedReceiver<String>,
    to_client: mpsc::UnboundedSender<Option<String>>,
    /// Every frame the client sent, in order.
    pub sent: Arc<StdMutex<Vec<RealtimeMessage>>>,
}

impl MockTransport {
    /// Create a connected transport/server pair.
    pub fn pair() -> (Self, MockServer, Arc<AtomicBool>) {
        let (to_server, from_client) = mpsc::unbounded_channel();
        let (to_client, from_server) = mpsc::unbounded_channel();
        let closed = Arc::new(AtomicBool::new(false));
        let transport = Self {
            to_server,
            from_server,
            closed: Arc::clone(&closed),
        };
        let server = MockServer {
            from_client,
            to_client,
            sent: Arc::new(StdMutex::new(Vec::new())),
        };
        (transport, server, closed)
    }
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&mut self, message: String) -> Result<(), LobbyError> {
        self.to_server
            .send(message)
            .map_err(|e| LobbyError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LobbyError>> {
        match self.from_server.recv().await {
            Some(Some(text)) => Some(Ok(text)),
            Some(None) => None,
            // Server half dropped: hang so the loop stays alive until shutdown.
            None => std::future::pending().await,
        }
    }

    async fn close(&mut self) -> Result<(), LobbyError> {
        self.closed.store(true, Ordering::Relaxed);
        Ok(())
    }
}

impl MockServer {
    /// Next frame sent by the client.
    pub async fn next_frame(&mut self) -> RealtimeMessage {
        let text = tokio::time::timeout(std::time::Duration::from_secs(5), self.from_client.recv())
            .await
            .expect("timed out waiting for a client frame")
            .expect("client transport dropped");
        let frame: RealtimeMessage = serde_json::from_str(&text).unwrap();
        self.sent.lock().unwrap().push(frame.clone());
        frame
    }

    /// Next frame with the given event, skipping others (e.g. heartbeats).
    pub async fn next_event(&mut self, event: &str) -> RealtimeMessage {
        loop {
            let frame = self.next_frame().await;
            if frame.event == event {
                return frame;
            }
        }
    }

    pub fn push(&self, frame: serde_json::Value) {
        self.to_client.send(Some(frame.to_string())).unwrap();
    }

    /// Acknowledge a join.
    pub fn reply_ok(&self, join: &RealtimeMessage) {
        self.push(serde_json::json!({
            "topic": join.topic,
            "event": "phx_reply",
            "payload": { "status": "ok", "response": { "postgres_changes": [] } },
            "ref": join.reference,
        }));
    }

    /// Close the connection from the server side.
    pub fn close(&self) {
        let _ = self.to_client.send(None);
    }
}

// ── CountingBackend ─────────────────────────────────────────────────

/// Wraps a backend, counting calls and optionally injecting faults.
pub struct CountingBackend<B> {
    inner: B,
    calls: AtomicUsize,
    log: StdMutex<Vec<&'static str>>,
    empty_procedures: bool,
    lookup_error: Option<(String, Option<String>)>,
    insert_delay: Option<std::time::Duration>,
}

impl<B: Backend> CountingBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            calls: AtomicUsize::new(0),
            log: StdMutex::new(Vec::new()),
            empty_procedures: false,
            lookup_error: None,
            insert_delay: None,
        }
    }

    /// Procedures answer `Ok(None)`.
    pub fn with_empty_procedures(mut self) -> Self {
        self.empty_procedures = true;
        self
    }

    /// Room lookups fail with the given backend message and code.
    pub fn with_lookup_error(mut self, message: &str, code: Option<&str>) -> Self {
        self.lookup_error = Some((message.to_owned(), code.map(str::to_owned)));
        self
    }

    /// Room inserts sleep for `delay` before reaching the inner backend.
    pub fn with_insert_delay(mut self, delay: std::time::Duration) -> Self {
        self.insert_delay = Some(delay);
        self
    }

    /// Total number of backend calls.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Names of the calls made, in order.
    pub fn call_log(&self) -> Vec<&'static str> {
        self.log.lock().unwrap().clone()
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }

    fn record(&self, name: &'static str) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.log.lock().unwrap().push(name);
    }
}

#[async_trait]
impl<B: Backend> IdentityProvider for CountingBackend<B> {
    async fn current_identity(&self) -> dead_card_lobby::error::Result<Option<Identity>> {
        self.record("current_identity");
        self.inner.current_identity().await
    }

    async fn sign_in_anonymously(&self) -> dead_card_lobby::error::Result<Identity> {
        self.record("sign_in_anonymously");
        self.inner.sign_in_anonymously().await
    }
}

#[async_trait]
impl<B: Backend> RoomStore for CountingBackend<B> {
    async fn insert_room(&self, room: NewRoom) -> dead_card_lobby::error::Result<Room> {
        self.record("insert_room");
        if let Some(delay) = self.insert_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.insert_room(room).await
    }

    async fn find_room_by_code(&self, code: &str) -> dead_card_lobby::error::Result<Option<Room>> {
        self.record("find_room_by_code");
        if let Some((message, raw)) = &self.lookup_error {
            return Err(LobbyError::backend(message.clone(), raw.as_deref()));
        }
        self.inner.find_room_by_code(code).await
    }
}

#[async_trait]
impl<B: Backend> PlayerStore for CountingBackend<B> {
    async fn find_player(
        &self,
        room_id: RoomId,
        user_id: IdentityId,
    ) -> dead_card_lobby::error::Result<Option<Player>> {
        self.record("find_player");
        self.inner.find_player(room_id, user_id).await
    }

    async fn list_players(&self, room_id: RoomId) -> dead_card_lobby::error::Result<Vec<Player>> {
        self.record("list_players");
        self.inner.list_players(room_id).await
    }
}

#[async_trait]
impl<B: Backend> Procedures for CountingBackend<B> {
    async fn join_room_player(
        &self,
        args: JoinRoomPlayerArgs,
    ) -> dead_card_lobby::error::Result<Option<Player>> {
        self.record("join_room_player");
        if self.empty_procedures {
            return Ok(None);
        }
        self.inner.join_room_player(args).await
    }

    async fn start_round(&self, args: StartRoundArgs) -> dead_card_lobby::error::Result<Option<Room>> {
        self.record("start_round");
        if self.empty_procedures {
            return Ok(None);
        }
        self.inner.start_round(args).await
    }
}

// ── JSON fixtures ───────────────────────────────────────────────────

/// A `rooms` row as the REST API returns it.
pub fn room_json(id: uuid::Uuid, code: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "room_code": code,
        "created_by": uuid::Uuid::from_u128(1),
        "target_dead_cards": 8,
        "status": "lobby",
        "current_round": 0,
        "created_at": "2026-01-01T12:00:00+00:00"
    })
}

/// A `players` row as the REST API returns it.
pub fn player_json(room_id: uuid::Uuid, name: &str, turn_order: i32) -> serde_json::Value {
    serde_json::json!({
        "id": uuid::Uuid::from_u128(1000 + turn_order as u128),
        "room_id": room_id,
        "user_id": uuid::Uuid::from_u128(2000 + turn_order as u128),
        "name": name,
        "job": "",
        "personality": null,
        "suspicion_total": 0,
        "innocence_total": 0,
        "challenge_left_this_round": 1,
        "turn_order": turn_order
    })
}

/// A `postgres_changes` frame on `topic`.
pub fn change_frame(
    topic: &str,
    kind: &str,
    table: &str,
    record: serde_json::Value,
) -> serde_json::Value {
    serde_json::json!({
        "topic": topic,
        "event": "postgres_changes",
        "payload": {
            "data": {
                "type": kind,
                "schema": "public",
                "table": table,
                "record": record,
                "old_record": null,
                "commit_timestamp": "2026-01-01T12:00:01Z",
                "columns": [],
                "errors": null
            },
            "ids": [1]
        },
        "ref": null
    })
}

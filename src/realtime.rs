//! Realtime change feed over the Phoenix channel protocol.
//!
//! [`RealtimeFeed`] is a thin handle that talks to a background connection
//! loop over an unbounded MPSC channel, in the same shape as a signaling
//! client: the loop owns the [`Transport`], multiplexes outgoing commands,
//! incoming frames and a heartbeat timer with `tokio::select!`, and routes
//! each `postgres_changes` frame to the subscription whose channel topic it
//! names.
//!
//! Each subscription is one channel (`realtime:<table>:<value>:<id>`), joined
//! with a `postgres_changes` config built from its [`ChangeFilter`].
//!
//! # Example
//!
//! ```rust,ignore
//! let transport = WebSocketTransport::connect_realtime(url, anon_key).await?;
//! let feed = RealtimeFeed::start(transport, RealtimeConfig::default());
//! let mut sub = feed.subscribe(ChangeFilter::players_of(room_id)).await?;
//! while let Some(msg) = sub.messages.recv().await {
//!     // FeedMessage::Status(..) / FeedMessage::Change(..)
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::{LobbyError, Result};
use crate::feed::{ChangeFeed, FeedMessage, Subscription, SubscriptionId, SubscriptionStatus};
use crate::protocol::{ChangeEvent, ChangeFilter};
use crate::transport::Transport;

/// Default interval between heartbeats.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Default time a join may stay unacknowledged.
const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(10);

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Topic of connection-level messages.
const PHOENIX_TOPIC: &str = "phoenix";

// ── Wire format ─────────────────────────────────────────────────────

/// Channel protocol events used by the feed.
pub mod events {
    pub const JOIN: &str = "phx_join";
    pub const LEAVE: &str = "phx_leave";
    pub const REPLY: &str = "phx_reply";
    pub const ERROR: &str = "phx_error";
    pub const CLOSE: &str = "phx_close";
    pub const HEARTBEAT: &str = "heartbeat";
    pub const ACCESS_TOKEN: &str = "access_token";
    pub const POSTGRES_CHANGES: &str = "postgres_changes";
    pub const SYSTEM: &str = "system";
}

/// One frame of the channel protocol (JSON serializer, vsn 1.0.0).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RealtimeMessage {
    pub topic: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub join_ref: Option<String>,
}

/// Payload of a `phx_join` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinPayload {
    pub config: JoinConfig,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token: Option<String>,
}

/// Channel configuration sent on join.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JoinConfig {
    #[serde(default)]
    pub postgres_changes: Vec<ChangeFilter>,
}

/// Payload of a `phx_reply` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyPayload {
    pub status: String,
    #[serde(default)]
    pub response: serde_json::Value,
}

/// Payload of a `postgres_changes` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangesPayload {
    pub data: ChangeEvent,
    #[serde(default)]
    pub ids: Vec<u64>,
}

/// Payload of a `system` frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemPayload {
    pub status: String,
    #[serde(default)]
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<String>,
}

impl ReplyPayload {
    fn is_ok(&self) -> bool {
        self.status == "ok"
    }

    /// Best-effort reason text of an error reply.
    fn reason(&self) -> String {
        self.response
            .get("reason")
            .or_else(|| self.response.get("message"))
            .and_then(serde_json::Value::as_str)
            .map_or_else(|| self.response.to_string(), str::to_owned)
    }
}

// ── Configuration ───────────────────────────────────────────────────

/// Configuration for a [`RealtimeFeed`] connection.
///
/// ```
/// use dead_card_lobby::RealtimeConfig;
/// use std::time::Duration;
///
/// let config = RealtimeConfig::default()
///     .with_heartbeat_interval(Duration::from_secs(10))
///     .with_access_token("jwt");
/// assert_eq!(config.join_timeout, Duration::from_secs(10));
/// ```
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// Interval between `heartbeat` frames. Defaults to **25 seconds**.
    pub heartbeat_interval: Duration,
    /// How long a join may stay unacknowledged before the subscription is
    /// reported as [`SubscriptionStatus::TimedOut`]. Defaults to **10 seconds**.
    pub join_timeout: Duration,
    /// Timeout for the graceful shutdown. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Token sent with joins, if already known.
    pub access_token: Option<String>,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            access_token: None,
        }
    }
}

impl RealtimeConfig {
    /// Set the heartbeat interval. Zero is raised to one millisecond.
    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval.max(Duration::from_millis(1));
        self
    }

    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_access_token(mut self, token: impl Into<String>) -> Self {
        self.access_token = Some(token.into());
        self
    }
}

// ── Handle ──────────────────────────────────────────────────────────

enum Command {
    Subscribe {
        id: SubscriptionId,
        filter: ChangeFilter,
        tx: mpsc::UnboundedSender<FeedMessage>,
    },
    Unsubscribe(SubscriptionId),
    SetAccessToken(Option<String>),
}

/// [`ChangeFeed`] backed by a realtime server connection.
pub struct RealtimeFeed {
    cmd_tx: mpsc::UnboundedSender<Command>,
    next_id: AtomicU64,
    connected: Arc<AtomicBool>,
    task: Mutex<Option<tokio::task::JoinHandle<()>>>,
    shutdown_tx: Mutex<Option<oneshot::Sender<()>>>,
    shutdown_timeout: Duration,
}

impl RealtimeFeed {
    /// Start the connection loop on a connected transport.
    pub fn start(transport: impl Transport, config: RealtimeConfig) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let connected = Arc::new(AtomicBool::new(true));

        let task = tokio::spawn(connection_loop(
            transport,
            cmd_rx,
            shutdown_rx,
            LoopState::new(&config),
            Arc::clone(&connected),
            config.heartbeat_interval,
        ));

        Self {
            cmd_tx,
            next_id: AtomicU64::new(0),
            connected,
            task: Mutex::new(Some(task)),
            shutdown_tx: Mutex::new(Some(shutdown_tx)),
            shutdown_timeout: config.shutdown_timeout,
        }
    }

    /// Returns `true` while the connection loop is running.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn send(&self, cmd: Command) -> Result<()> {
        if !self.is_connected() {
            return Err(LobbyError::TransportClosed);
        }
        self.cmd_tx.send(cmd).map_err(|_| LobbyError::TransportClosed)
    }
}

#[async_trait]
impl ChangeFeed for RealtimeFeed {
    async fn subscribe(&self, filter: ChangeFilter) -> Result<Subscription> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, messages) = mpsc::unbounded_channel();
        self.send(Command::Subscribe {
            id,
            filter: filter.clone(),
            tx,
        })?;
        Ok(Subscription {
            id,
            filter,
            messages,
        })
    }

    async fn unsubscribe(&self, id: SubscriptionId) -> Result<()> {
        if !self.is_connected() {
            // Nothing left to leave.
            return Ok(());
        }
        self.send(Command::Unsubscribe(id))
    }

    async fn set_access_token(&self, token: Option<String>) -> Result<()> {
        self.send(Command::SetAccessToken(token))
    }

    async fn shutdown(&self) {
        debug!("RealtimeFeed: shutdown requested");
        if let Some(tx) = self.shutdown_tx.lock().await.take() {
            let _ = tx.send(());
        }
        if let Some(mut task) = self.task.lock().await.take() {
            match tokio::time::timeout(self.shutdown_timeout, &mut task).await {
                Ok(Ok(())) => {}
                Ok(Err(join_err)) => warn!("realtime loop terminated with join error: {join_err}"),
                Err(_) => {
                    warn!("realtime loop did not exit within timeout; aborting task");
                    task.abort();
                }
            }
        }
        self.connected.store(false, Ordering::Release);
    }
}

impl std::fmt::Debug for RealtimeFeed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RealtimeFeed")
            .field("connected", &self.is_connected())
            .finish_non_exhaustive()
    }
}

impl Drop for RealtimeFeed {
    fn drop(&mut self) {
        // No executor is available to await a graceful close here.
        if let Ok(mut task) = self.task.try_lock() {
            if let Some(task) = task.take() {
                task.abort();
            }
        }
    }
}

// ── Connection loop ─────────────────────────────────────────────────

struct Channel {
    id: SubscriptionId,
    topic: String,
    tx: mpsc::UnboundedSender<FeedMessage>,
    join_ref: String,
    /// Set while the join is unacknowledged.
    join_deadline: Option<Instant>,
}

impl Channel {
    fn notify(&self, status: SubscriptionStatus) {
        debug!(subscription = self.id, topic = %self.topic, %status, "realtime: status");
        let _ = self.tx.send(FeedMessage::Status(status));
    }
}

struct LoopState {
    channels: HashMap<SubscriptionId, Channel>,
    by_topic: HashMap<String, SubscriptionId>,
    next_ref: u64,
    access_token: Option<String>,
    pending_heartbeat: Option<String>,
    join_timeout: Duration,
}

impl LoopState {
    fn new(config: &RealtimeConfig) -> Self {
        Self {
            channels: HashMap::new(),
            by_topic: HashMap::new(),
            next_ref: 0,
            access_token: config.access_token.clone(),
            pending_heartbeat: None,
            join_timeout: config.join_timeout,
        }
    }

    fn next_ref(&mut self) -> String {
        self.next_ref += 1;
        self.next_ref.to_string()
    }

    fn frame(&mut self, topic: &str, event: &str, payload: serde_json::Value) -> RealtimeMessage {
        RealtimeMessage {
            topic: topic.to_owned(),
            event: event.to_owned(),
            payload,
            reference: Some(self.next_ref()),
            join_ref: None,
        }
    }

    /// Register a subscription and build its join frame.
    fn join(
        &mut self,
        id: SubscriptionId,
        filter: ChangeFilter,
        tx: mpsc::UnboundedSender<FeedMessage>,
    ) -> Result<RealtimeMessage> {
        let topic = format!("realtime:{}:{id}", filter.topic());
        let payload = serde_json::to_value(JoinPayload {
            config: JoinConfig {
                postgres_changes: vec![filter],
            },
            access_token: self.access_token.clone(),
        })?;
        let mut frame = self.frame(&topic, events::JOIN, payload);
        frame.join_ref = frame.reference.clone();

        let channel = Channel {
            id,
            topic: topic.clone(),
            tx,
            join_ref: frame.reference.clone().unwrap_or_default(),
            join_deadline: Some(Instant::now() + self.join_timeout),
        };
        channel.notify(SubscriptionStatus::Connecting);
        self.by_topic.insert(topic, id);
        self.channels.insert(id, channel);
        Ok(frame)
    }

    /// Drop a subscription and build its leave frame.
    fn leave(&mut self, id: SubscriptionId) -> Option<RealtimeMessage> {
        let channel = self.channels.remove(&id)?;
        self.by_topic.remove(&channel.topic);
        channel.notify(SubscriptionStatus::Closed);
        let mut frame = self.frame(&channel.topic, events::LEAVE, serde_json::json!({}));
        frame.join_ref = Some(channel.join_ref);
        Some(frame)
    }

    fn token_frames(&mut self) -> Vec<RealtimeMessage> {
        let Some(token) = self.access_token.clone() else {
            return Vec::new();
        };
        let topics: Vec<String> = self.channels.values().map(|c| c.topic.clone()).collect();
        topics
            .iter()
            .map(|topic| {
                self.frame(
                    topic,
                    events::ACCESS_TOKEN,
                    serde_json::json!({ "access_token": token }),
                )
            })
            .collect()
    }

    fn channel_for(&self, topic: &str) -> Option<&Channel> {
        self.by_topic.get(topic).and_then(|id| self.channels.get(id))
    }

    /// Report joins that outlived their deadline.
    fn expire_joins(&mut self, now: Instant) {
        for channel in self.channels.values_mut() {
            if channel.join_deadline.is_some_and(|deadline| deadline <= now) {
                channel.join_deadline = None;
                channel.notify(SubscriptionStatus::TimedOut);
            }
        }
    }

    /// Apply an incoming frame.
    fn handle(&mut self, msg: RealtimeMessage) {
        match msg.event.as_str() {
            events::REPLY => self.handle_reply(msg),
            events::POSTGRES_CHANGES => {
                let Some(channel) = self.channel_for(&msg.topic) else {
                    debug!(topic = %msg.topic, "realtime: change for unknown topic");
                    return;
                };
                match serde_json::from_value::<ChangesPayload>(msg.payload) {
                    Ok(payload) => {
                        let _ = channel.tx.send(FeedMessage::Change(payload.data));
                    }
                    Err(e) => warn!(topic = %msg.topic, "realtime: malformed change payload: {e}"),
                }
            }
            events::SYSTEM => {
                let Ok(system) = serde_json::from_value::<SystemPayload>(msg.payload) else {
                    return;
                };
                if system.status != "ok" {
                    if let Some(channel) = self.channel_for(&msg.topic) {
                        channel.notify(SubscriptionStatus::ChannelError(system.message));
                    }
                } else {
                    debug!(topic = %msg.topic, message = %system.message, "realtime: system ok");
                }
            }
            events::ERROR => {
                if let Some(channel) = self.channel_for(&msg.topic) {
                    channel.notify(SubscriptionStatus::ChannelError("channel error".into()));
                }
            }
            events::CLOSE => {
                if let Some(id) = self.by_topic.remove(&msg.topic) {
                    if let Some(channel) = self.channels.remove(&id) {
                        channel.notify(SubscriptionStatus::Closed);
                    }
                }
            }
            other => debug!(topic = %msg.topic, event = other, "realtime: ignoring frame"),
        }
    }

    fn handle_reply(&mut self, msg: RealtimeMessage) {
        if msg.topic == PHOENIX_TOPIC {
            if msg.reference.is_some() && msg.reference == self.pending_heartbeat {
                self.pending_heartbeat = None;
            }
            return;
        }
        let Some(id) = self.by_topic.get(&msg.topic).copied() else {
            return;
        };
        let Some(channel) = self.channels.get_mut(&id) else {
            return;
        };
        // Only the join reply changes status; other replies are acks.
        if msg.reference.as_deref() != Some(channel.join_ref.as_str()) {
            return;
        }
        channel.join_deadline = None;
        match serde_json::from_value::<ReplyPayload>(msg.payload) {
            Ok(reply) if reply.is_ok() => channel.notify(SubscriptionStatus::Subscribed),
            Ok(reply) => channel.notify(SubscriptionStatus::ChannelError(reply.reason())),
            Err(e) => channel.notify(SubscriptionStatus::ChannelError(e.to_string())),
        }
    }

    /// Tell every subscriber the connection is gone.
    fn close_all(&mut self, status: &SubscriptionStatus) {
        for (_, channel) in self.channels.drain() {
            channel.notify(status.clone());
        }
        self.by_topic.clear();
    }
}

async fn send_frame(transport: &mut impl Transport, frame: &RealtimeMessage) -> Result<()> {
    let json = serde_json::to_string(frame)?;
    transport.send(json).await
}

/// Background loop that multiplexes commands, frames and heartbeats.
///
/// Exits when the handle is dropped or shut down, the server closes the
/// connection, or a transport error occurs.
async fn connection_loop(
    mut transport: impl Transport,
    mut cmd_rx: mpsc::UnboundedReceiver<Command>,
    mut shutdown_rx: oneshot::Receiver<()>,
    mut state: LoopState,
    connected: Arc<AtomicBool>,
    heartbeat_interval: Duration,
) {
    debug!("realtime loop started");
    let mut heartbeat = tokio::time::interval_at(
        Instant::now() + heartbeat_interval,
        heartbeat_interval,
    );

    let exit_status = loop {
        tokio::select! {
            cmd = cmd_rx.recv() => {
                let frames = match cmd {
                    Some(Command::Subscribe { id, filter, tx }) => match state.join(id, filter, tx) {
                        Ok(frame) => vec![frame],
                        Err(e) => {
                            error!("failed to build join frame: {e}");
                            Vec::new()
                        }
                    },
                    Some(Command::Unsubscribe(id)) => state.leave(id).into_iter().collect(),
                    Some(Command::SetAccessToken(token)) => {
                        state.access_token = token;
                        state.token_frames()
                    }
                    None => {
                        debug!("command channel closed, shutting down realtime loop");
                        let _ = transport.close().await;
                        break SubscriptionStatus::Closed;
                    }
                };
                let mut failed = None;
                for frame in &frames {
                    if let Err(e) = send_frame(&mut transport, frame).await {
                        error!("realtime send error: {e}");
                        failed = Some(e);
                        break;
                    }
                }
                if let Some(e) = failed {
                    break SubscriptionStatus::ChannelError(e.to_string());
                }
            }

            _ = &mut shutdown_rx => {
                debug!("shutdown signal received");
                let ids: Vec<_> = state.channels.keys().copied().collect();
                for id in ids {
                    if let Some(frame) = state.leave(id) {
                        let _ = send_frame(&mut transport, &frame).await;
                    }
                }
                let _ = transport.close().await;
                break SubscriptionStatus::Closed;
            }

            _ = heartbeat.tick() => {
                state.expire_joins(Instant::now());
                if state.pending_heartbeat.is_some() {
                    warn!("previous realtime heartbeat was not acknowledged");
                }
                let frame = state.frame(PHOENIX_TOPIC, events::HEARTBEAT, serde_json::json!({}));
                state.pending_heartbeat = frame.reference.clone();
                if let Err(e) = send_frame(&mut transport, &frame).await {
                    error!("realtime heartbeat failed: {e}");
                    break SubscriptionStatus::ChannelError(e.to_string());
                }
            }

            incoming = transport.recv() => {
                match incoming {
                    Some(Ok(text)) => match serde_json::from_str::<RealtimeMessage>(&text) {
                        Ok(msg) => state.handle(msg),
                        Err(e) => warn!("failed to decode realtime frame: {e}, raw: {text}"),
                    },
                    Some(Err(e)) => {
                        error!("realtime receive error: {e}");
                        break SubscriptionStatus::ChannelError(e.to_string());
                    }
                    None => {
                        debug!("realtime connection closed by server");
                        break SubscriptionStatus::Closed;
                    }
                }
            }
        }
    };

    connected.store(false, Ordering::Release);
    state.close_all(&exit_status);
    debug!("realtime loop exited");
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]
mod tests {
    use super::*;
    use crate::protocol::ChangeKind;
    use uuid::Uuid;

    /// Channel-backed transport; the test plays the server.
    struct Loopback {
        tx: mpsc::UnboundedSender<String>,
        rx: mpsc::UnboundedReceiver<Option<String>>,
    }

    struct Server {
        rx: mpsc::UnboundedReceiver<String>,
        tx: mpsc::UnboundedSender<Option<String>>,
    }

    impl Server {
        async fn next_frame(&mut self) -> RealtimeMessage {
            let text = self.rx.recv().await.expect("client frame");
            serde_json::from_str(&text).unwrap()
        }

        fn push(&self, msg: serde_json::Value) {
            self.tx.send(Some(msg.to_string())).unwrap();
        }

        fn reply_ok(&self, to: &RealtimeMessage) {
            self.push(serde_json::json!({
                "topic": to.topic,
                "event": "phx_reply",
                "payload": { "status": "ok", "response": { "postgres_changes": [] } },
                "ref": to.reference,
            }));
        }
    }

    fn loopback() -> (Loopback, Server) {
        let (client_tx, server_rx) = mpsc::unbounded_channel();
        let (server_tx, client_rx) = mpsc::unbounded_channel();
        (
            Loopback {
                tx: client_tx,
                rx: client_rx,
            },
            Server {
                rx: server_rx,
                tx: server_tx,
            },
        )
    }

    #[async_trait]
    impl Transport for Loopback {
        async fn send(&mut self, message: String) -> Result<()> {
            self.tx
                .send(message)
                .map_err(|e| LobbyError::TransportSend(e.to_string()))
        }

        async fn recv(&mut self) -> Option<Result<String>> {
            match self.rx.recv().await {
                Some(Some(text)) => Some(Ok(text)),
                // Explicit close, or the test dropped its server half.
                Some(None) | None => None,
            }
        }

        async fn close(&mut self) -> Result<()> {
            Ok(())
        }
    }

    fn quiet_config() -> RealtimeConfig {
        RealtimeConfig::default().with_heartbeat_interval(Duration::from_secs(3600))
    }

    #[tokio::test]
    async fn join_carries_filter_and_token() {
        let (transport, mut server) = loopback();
        let feed = RealtimeFeed::start(transport, quiet_config().with_access_token("jwt-1"));
        let room = Uuid::from_u128(9);

        let mut sub = feed.subscribe(ChangeFilter::players_of(room)).await.unwrap();
        let join = server.next_frame().await;
        assert_eq!(join.event, events::JOIN);
        assert_eq!(join.topic, format!("realtime:players:{room}:0"));
        assert_eq!(join.join_ref, join.reference);
        let payload: JoinPayload = serde_json::from_value(join.payload.clone()).unwrap();
        assert_eq!(payload.access_token.as_deref(), Some("jwt-1"));
        assert_eq!(payload.config.postgres_changes, vec![ChangeFilter::players_of(room)]);

        server.reply_ok(&join);
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::Connecting))
        );
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::Subscribed))
        );

        feed.shutdown().await;
    }

    #[tokio::test]
    async fn changes_are_routed_by_topic() {
        let (transport, mut server) = loopback();
        let feed = RealtimeFeed::start(transport, quiet_config());
        let room = Uuid::from_u128(3);

        let mut players = feed.subscribe(ChangeFilter::players_of(room)).await.unwrap();
        let mut rooms = feed.subscribe(ChangeFilter::room(room)).await.unwrap();
        let players_join = server.next_frame().await;
        let rooms_join = server.next_frame().await;
        server.reply_ok(&players_join);
        server.reply_ok(&rooms_join);

        server.push(serde_json::json!({
            "topic": players_join.topic,
            "event": "postgres_changes",
            "payload": {
                "data": {
                    "type": "INSERT",
                    "schema": "public",
                    "table": "players",
                    "record": { "id": Uuid::from_u128(1), "room_id": room },
                    "commit_timestamp": "2026-01-01T00:00:00Z"
                },
                "ids": [1]
            },
            "ref": null
        }));

        let _ = players.messages.recv().await; // Connecting
        let _ = players.messages.recv().await; // Subscribed
        match players.messages.recv().await.unwrap() {
            FeedMessage::Change(change) => {
                assert_eq!(change.kind, ChangeKind::Insert);
                assert_eq!(change.table, "players");
            }
            other => panic!("expected change, got {other:?}"),
        }

        let _ = rooms.messages.recv().await; // Connecting
        let _ = rooms.messages.recv().await; // Subscribed
        assert!(rooms.messages.try_recv().is_err());

        feed.shutdown().await;
    }

    #[tokio::test]
    async fn error_reply_reports_channel_error() {
        let (transport, mut server) = loopback();
        let feed = RealtimeFeed::start(transport, quiet_config());
        let mut sub = feed.subscribe(ChangeFilter::room(Uuid::nil())).await.unwrap();
        let join = server.next_frame().await;
        server.push(serde_json::json!({
            "topic": join.topic,
            "event": "phx_reply",
            "payload": { "status": "error", "response": { "reason": "unauthorized" } },
            "ref": join.reference,
        }));

        let _ = sub.messages.recv().await; // Connecting
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::ChannelError(
                "unauthorized".into()
            )))
        );
        feed.shutdown().await;
    }

    #[tokio::test]
    async fn unsubscribe_sends_leave_and_closes() {
        let (transport, mut server) = loopback();
        let feed = RealtimeFeed::start(transport, quiet_config());
        let mut sub = feed.subscribe(ChangeFilter::room(Uuid::nil())).await.unwrap();
        let join = server.next_frame().await;

        feed.unsubscribe(sub.id).await.unwrap();
        let leave = server.next_frame().await;
        assert_eq!(leave.event, events::LEAVE);
        assert_eq!(leave.topic, join.topic);

        let _ = sub.messages.recv().await; // Connecting
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::Closed))
        );
        feed.shutdown().await;
    }

    #[tokio::test]
    async fn token_update_is_pushed_to_joined_channels() {
        let (transport, mut server) = loopback();
        let feed = RealtimeFeed::start(transport, quiet_config());
        let _sub = feed.subscribe(ChangeFilter::room(Uuid::nil())).await.unwrap();
        let join = server.next_frame().await;

        feed.set_access_token(Some("jwt-2".into())).await.unwrap();
        let frame = server.next_frame().await;
        assert_eq!(frame.event, events::ACCESS_TOKEN);
        assert_eq!(frame.topic, join.topic);
        assert_eq!(frame.payload["access_token"], "jwt-2");
        feed.shutdown().await;
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeat_and_join_timeout() {
        let (transport, mut server) = loopback();
        let config = RealtimeConfig::default()
            .with_heartbeat_interval(Duration::from_secs(5))
            .with_join_timeout(Duration::from_secs(3));
        let feed = RealtimeFeed::start(transport, config);
        let mut sub = feed.subscribe(ChangeFilter::room(Uuid::nil())).await.unwrap();
        let _join = server.next_frame().await;

        let heartbeat = server.next_frame().await;
        assert_eq!(heartbeat.topic, PHOENIX_TOPIC);
        assert_eq!(heartbeat.event, events::HEARTBEAT);

        let _ = sub.messages.recv().await; // Connecting
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::TimedOut))
        );
        feed.shutdown().await;
    }

    #[tokio::test]
    async fn server_close_ends_feed() {
        let (transport, mut server) = loopback();
        let feed = RealtimeFeed::start(transport, quiet_config());
        let mut sub = feed.subscribe(ChangeFilter::room(Uuid::nil())).await.unwrap();
        let _join = server.next_frame().await;
        server.tx.send(None).unwrap();

        let _ = sub.messages.recv().await; // Connecting
        assert_eq!(
            sub.messages.recv().await,
            Some(FeedMessage::Status(SubscriptionStatus::Closed))
        );
        assert_eq!(sub.messages.recv().await, None);
        assert!(!feed.is_connected());
        assert!(matches!(
            feed.subscribe(ChangeFilter::room(Uuid::nil())).await,
            Err(LobbyError::TransportClosed)
        ));
    }
}

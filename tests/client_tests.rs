//! Integration tests for `LobbyClient`.
//!
//! Most tests run against `MemoryBackend`, whose seat allocation is atomic,
//! wrapped in the `CountingBackend` from `tests/common` where the number of
//! backend calls matters. The realtime tests drive `RealtimeFeed` through the
//! shared `MockTransport`, with the test playing the server.

#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::indexing_slicing
)]

mod common;

use std::collections::BTreeSet;
use std::time::Duration;

use dead_card_lobby::feed::ChangeFeed;
use dead_card_lobby::view::{Ticket, ViewModel};
use dead_card_lobby::{
    ErrorCode, FeedScope, JoinRoomRequest, LobbyClient, LobbyConfig, LobbyError, LobbyEvent,
    Locale, MemoryBackend, MemoryFeed, PlayerProfile, RealtimeConfig, RealtimeFeed, RoomStatus,
    SubscriptionStatus,
};
use tokio::sync::mpsc;
use tokio_test::{assert_err, assert_ok};

use common::{change_frame, init_tracing, CountingBackend, MockTransport};

// ════════════════════════════════════════════════════════════════════
// Helpers
// ════════════════════════════════════════════════════════════════════

type MemoryClient = LobbyClient<MemoryBackend, MemoryFeed>;

fn memory_client(backend: &MemoryBackend) -> (MemoryClient, mpsc::Receiver<LobbyEvent>) {
    LobbyClient::start(backend.session(), backend.feed(), LobbyConfig::default())
}

fn counting_client(
    backend: CountingBackend<MemoryBackend>,
) -> (
    LobbyClient<CountingBackend<MemoryBackend>, MemoryFeed>,
    mpsc::Receiver<LobbyEvent>,
) {
    let feed = backend.inner().feed();
    LobbyClient::start(backend, feed, LobbyConfig::default())
}

/// Receive events until one satisfies `pred`, failing after five seconds.
async fn wait_for(
    events: &mut mpsc::Receiver<LobbyEvent>,
    mut pred: impl FnMut(&LobbyEvent) -> bool,
) -> LobbyEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if pred(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

// ════════════════════════════════════════════════════════════════════
// Lookup and validation
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn valid_code_without_room_is_not_found() {
    let (client, _events) = counting_client(CountingBackend::new(MemoryBackend::new()));
    let err = client.find_room_by_code("  zzz999 ").await.unwrap_err();
    match err {
        LobbyError::RoomNotFound { code } => assert_eq!(code, "ZZZ999"),
        other => panic!("expected RoomNotFound, got {other:?}"),
    }
}

#[tokio::test]
async fn lookup_failure_is_a_backend_error_not_not_found() {
    let backend = CountingBackend::new(MemoryBackend::new())
        .with_lookup_error("upstream connect error", Some("500"));
    let (client, _events) = counting_client(backend);
    let err = client.find_room_by_code("ABC123").await.unwrap_err();
    assert!(matches!(err, LobbyError::Backend { .. }), "got {err:?}");
    assert_eq!(err.code(), Some(&ErrorCode::InternalError));
    assert_eq!(err.to_string(), "upstream connect error");
}

#[tokio::test]
async fn invalid_targets_make_no_backend_call() {
    let (client, _events) = counting_client(CountingBackend::new(MemoryBackend::new()));
    for bad in [0.0, -1.0, 2.5, f64::NAN, f64::INFINITY] {
        let err = assert_err!(client.create_room(bad).await);
        assert!(err.is_validation(), "{bad} gave {err:?}");
    }
    for bad in ["abc", "0", "-4", "1.5", "NaN"] {
        let err = assert_err!(client.create_room_from_input(bad).await);
        assert!(err.is_validation(), "{bad:?} gave {err:?}");
    }
    assert_eq!(client.backend().calls(), 0);
}

#[tokio::test]
async fn invalid_join_input_makes_no_backend_call() {
    let (client, _events) = counting_client(CountingBackend::new(MemoryBackend::new()));

    let cases = [
        JoinRoomRequest::new("", "Alice"),
        JoinRoomRequest::new("   ", "Alice"),
        JoinRoomRequest::new("ABC12", "Alice"),
        JoinRoomRequest::new("ABC1234", "Alice"),
        JoinRoomRequest::new("ABC123", "  "),
    ];
    for request in cases {
        let err = client.join_room(request.clone()).await.unwrap_err();
        assert!(err.is_validation(), "{request:?} gave {err:?}");
    }
    assert_eq!(client.backend().calls(), 0);
}

#[tokio::test]
async fn empty_input_creates_room_with_default_target() {
    let (client, _events) = counting_client(CountingBackend::new(MemoryBackend::new()));
    let room = client.create_room_from_input("").await.unwrap();
    assert_eq!(room.target_dead_cards, 8);
    assert_eq!(
        client.backend().call_log(),
        vec!["current_identity", "sign_in_anonymously", "insert_room"]
    );
}

// ════════════════════════════════════════════════════════════════════
// Seats
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn join_is_idempotent() {
    let backend = MemoryBackend::new();
    let (host, _h) = memory_client(&backend);
    let room = host.create_room(8.0).await.unwrap();

    let (alice, _a) = memory_client(&backend);
    let request = JoinRoomRequest::new(room.room_code.to_lowercase(), "Alice");
    let first = assert_ok!(alice.join_room(request.clone()).await);
    let second = assert_ok!(alice.join_room(request).await);
    assert_eq!(first.player, second.player);
    assert_eq!(alice.refresh_players().await.unwrap().len(), 1);
}

#[tokio::test]
async fn existing_seat_skips_the_procedure() {
    let backend = CountingBackend::new(MemoryBackend::new());
    let (client, _events) = counting_client(backend);
    let room = client.create_room(8.0).await.unwrap();
    let profile = PlayerProfile::new(" Alice ", " Doctor ", "").unwrap();

    let first = client.get_or_create_player(room.id, &profile).await.unwrap();
    assert_eq!(first.name, "Alice");
    assert_eq!(first.job.as_deref(), Some("Doctor"));

    let procedures_before = count(&client.backend().call_log(), "join_room_player");
    let again = client.get_or_create_player(room.id, &profile).await.unwrap();
    assert_eq!(again, first);
    assert_eq!(
        count(&client.backend().call_log(), "join_room_player"),
        procedures_before
    );
}

fn count(log: &[&str], name: &str) -> usize {
    log.iter().filter(|c| **c == name).count()
}

#[tokio::test]
async fn concurrent_joins_get_unique_turns_and_seventh_is_full() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (host, _h) = memory_client(&backend);
    let room = host.create_room(8.0).await.unwrap();

    let mut tasks = Vec::new();
    for i in 0..7 {
        let (client, _events) = memory_client(&backend);
        let code = room.room_code.clone();
        tasks.push(tokio::spawn(async move {
            let result = client
                .join_room(JoinRoomRequest::new(code, format!("player-{i}")))
                .await;
            client.shutdown().await;
            result
        }));
    }

    let mut turns = BTreeSet::new();
    let mut full = 0;
    for task in tasks {
        match task.await.unwrap() {
            Ok(joined) => assert!(turns.insert(joined.player.turn_order)),
            Err(LobbyError::RoomFull { capacity }) => {
                assert_eq!(capacity, 6);
                full += 1;
            }
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(turns, (0..6).collect::<BTreeSet<_>>());
    assert_eq!(full, 1);
}

#[tokio::test]
async fn empty_procedure_responses_are_reported() {
    let backend = CountingBackend::new(MemoryBackend::new()).with_empty_procedures();
    let (client, _events) = counting_client(backend);
    let room = client.create_room(8.0).await.unwrap();

    let err = client
        .join_room(JoinRoomRequest::new(&room.room_code, "Alice"))
        .await
        .unwrap_err();
    assert!(
        matches!(&err, LobbyError::EmptyRpcResponse { procedure } if procedure == "join_room_player"),
        "got {err:?}"
    );

    let err = client.start_round().await.unwrap_err();
    assert!(
        matches!(&err, LobbyError::EmptyRpcResponse { procedure } if procedure == "start_round"),
        "got {err:?}"
    );
}

// ════════════════════════════════════════════════════════════════════
// Example flow
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn create_join_fill_and_start() {
    let backend = MemoryBackend::new();
    let (host, _h) = memory_client(&backend);
    let room = host.create_room(8.0).await.unwrap();
    assert_eq!(room.room_code.chars().count(), 6);
    assert_eq!(room.status, RoomStatus::Lobby);
    assert_eq!(room.current_round, 0);

    let (alice, mut alice_events) = memory_client(&backend);
    let joined = alice
        .join_room(
            JoinRoomRequest::new(&room.room_code, "Alice")
                .with_job("Doctor")
                .with_personality("calm"),
        )
        .await
        .unwrap();
    assert_eq!(joined.player.turn_order, 0);

    let (bob, _b) = memory_client(&backend);
    let bob_seat = bob
        .join_room(JoinRoomRequest::new(&room.room_code, "Bob"))
        .await
        .unwrap();
    assert_eq!(bob_seat.player.turn_order, 1);

    let mut others = Vec::new();
    for name in ["Carol", "Dave", "Erin", "Frank"] {
        let (client, _events) = memory_client(&backend);
        client
            .join_room(JoinRoomRequest::new(&room.room_code, name))
            .await
            .unwrap();
        others.push(client);
    }

    let (grace, _g) = memory_client(&backend);
    let err = grace
        .join_room(JoinRoomRequest::new(&room.room_code, "Grace"))
        .await
        .unwrap_err();
    assert!(matches!(err, LobbyError::RoomFull { capacity: 6 }));

    let started = alice.start_round().await.unwrap();
    assert_eq!(started.status, RoomStatus::Active);
    assert_eq!(started.current_round, 1);
    assert_eq!(alice.current_room().await.unwrap().current_round, 1);

    wait_for(&mut alice_events, |e| {
        matches!(e, LobbyEvent::PlayersChanged { players, .. } if players.len() == 6)
    })
    .await;
    // Bob learns about the round through the room subscription.
    tokio::time::timeout(Duration::from_secs(5), async {
        while bob.current_room().await.map(|r| r.current_round) != Some(1) {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("bob never saw the new round");
}

// ════════════════════════════════════════════════════════════════════
// Live synchronization
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn player_list_matches_fresh_fetch_after_notifications() {
    let backend = MemoryBackend::new();
    let (host, _h) = memory_client(&backend);
    let room = host.create_room(8.0).await.unwrap();

    let (alice, mut events) = memory_client(&backend);
    alice
        .join_room(JoinRoomRequest::new(&room.room_code, "Alice"))
        .await
        .unwrap();

    let mut guests = Vec::new();
    for name in ["Bob", "Carol"] {
        let (client, _events) = memory_client(&backend);
        client
            .join_room(JoinRoomRequest::new(&room.room_code, name))
            .await
            .unwrap();
        guests.push(client);
    }

    wait_for(&mut events, |e| {
        matches!(e, LobbyEvent::PlayersChanged { players, .. } if players.len() == 3)
    })
    .await;

    let fresh = host.subscribe_players(room.id).await.unwrap();
    let view = alice.players().await;
    assert_eq!(view, fresh);
    assert!(view.windows(2).all(|w| w[0].turn_order < w[1].turn_order));
    assert!(alice.players_text().await.contains("Carol (turn 2)"));
}

#[tokio::test]
async fn resubscribing_leaves_one_subscription_per_scope() {
    let backend = MemoryBackend::new();
    let feed = backend.feed();
    let (client, _events) = memory_client(&backend);
    let room = client.create_room(8.0).await.unwrap();

    client.subscribe_players(room.id).await.unwrap();
    client.subscribe_players(room.id).await.unwrap();
    assert_eq!(feed.subscriber_count().await, 1);

    client.subscribe_room(room.id).await.unwrap();
    client.subscribe_room(room.id).await.unwrap();
    assert_eq!(feed.subscriber_count().await, 2);

    // Joining again replaces both.
    client
        .join_room(JoinRoomRequest::new(&room.room_code, "Alice"))
        .await
        .unwrap();
    assert_eq!(feed.subscriber_count().await, 2);

    client.shutdown().await;
    assert_eq!(feed.subscriber_count().await, 0);
}

#[tokio::test]
async fn subscription_status_is_logged_and_emitted() {
    let backend = MemoryBackend::new();
    let (client, mut events) = memory_client(&backend);
    let room = client.create_room(8.0).await.unwrap();
    client.subscribe_players(room.id).await.unwrap();

    let event = wait_for(&mut events, |e| {
        matches!(
            e,
            LobbyEvent::SubscriptionStatus {
                status: SubscriptionStatus::Subscribed,
                ..
            }
        )
    })
    .await;
    assert!(matches!(
        event,
        LobbyEvent::SubscriptionStatus {
            scope: FeedScope::Players,
            ..
        }
    ));
    assert!(client.render_log().await.contains("players realtime: SUBSCRIBED"));
}

#[tokio::test]
async fn created_room_wins_over_updates_for_the_old_room() {
    let backend = MemoryBackend::new();
    let (host, _h) = memory_client(&backend);
    let old = host.create_room(8.0).await.unwrap();

    let (alice, mut alice_events) = counting_client(
        CountingBackend::new(backend.session()).with_insert_delay(Duration::from_millis(300)),
    );
    alice
        .join_room(JoinRoomRequest::new(&old.room_code, "Alice"))
        .await
        .unwrap();

    // The old room changes while Alice's insert is still in flight.
    let create = alice.create_room(5.0);
    let start = async {
        tokio::time::sleep(Duration::from_millis(100)).await;
        host.start_round().await.unwrap();
        wait_for(&mut alice_events, |e| {
            matches!(e, LobbyEvent::RoomChanged { room, .. } if room.current_round == 1)
        })
        .await;
    };
    let (created, ()) = tokio::join!(create, start);
    let created = created.unwrap();

    assert_ne!(created.id, old.id);
    assert_eq!(alice.current_room().await.map(|r| r.id), Some(created.id));
    assert!(alice.room_info_text().await.contains(&created.room_code));

    // A late update for the room Alice left does not switch her back.
    host.start_round().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(alice.current_room().await.map(|r| r.id), Some(created.id));
}

#[test]
fn stale_tickets_never_overwrite_newer_state() {
    let mut view = ViewModel::default();
    let older: Ticket = view.players_ticket();
    let newer: Ticket = view.players_ticket();

    assert!(view.apply_players(newer, Vec::new()));
    assert!(!view.apply_players(older, Vec::new()));
    assert!(!view.apply_players(newer, Vec::new()));
}

#[tokio::test]
async fn realtime_notification_triggers_refetch() {
    init_tracing();
    let backend = MemoryBackend::new();
    let (transport, mut server, _closed) = MockTransport::pair();
    let feed = RealtimeFeed::start(
        transport,
        RealtimeConfig::default().with_heartbeat_interval(Duration::from_secs(3600)),
    );
    let (client, mut events) =
        LobbyClient::start(backend.session(), feed, LobbyConfig::default());
    let room = client.create_room(8.0).await.unwrap();

    client.subscribe_players(room.id).await.unwrap();
    let join = server.next_event("phx_join").await;
    assert!(join.topic.starts_with(&format!("realtime:players:{}", room.id)));
    server.reply_ok(&join);
    wait_for(&mut events, |e| {
        matches!(
            e,
            LobbyEvent::SubscriptionStatus {
                status: SubscriptionStatus::Subscribed,
                ..
            }
        )
    })
    .await;

    // Someone else takes a seat; the server announces it.
    let (bob, _b) = memory_client(&backend);
    let seat = bob
        .join_room(JoinRoomRequest::new(&room.room_code, "Bob"))
        .await
        .unwrap();
    server.push(change_frame(
        &join.topic,
        "INSERT",
        "players",
        serde_json::to_value(&seat.player).unwrap(),
    ));

    let event = wait_for(&mut events, |e| {
        matches!(e, LobbyEvent::PlayersChanged { players, .. } if !players.is_empty())
    })
    .await;
    match event {
        LobbyEvent::PlayersChanged { players, listing } => {
            assert_eq!(players, vec![seat.player]);
            assert!(listing.contains("Bob (turn 0)"));
        }
        other => panic!("unexpected {other:?}"),
    }

    client.shutdown().await;
    let leave = server.next_event("phx_leave").await;
    assert_eq!(leave.topic, join.topic);
}

#[tokio::test]
async fn feed_shutdown_is_reported_as_closed() {
    let backend = MemoryBackend::new();
    let (transport, mut server, closed) = MockTransport::pair();
    let feed = RealtimeFeed::start(transport, RealtimeConfig::default());
    let (client, mut events) =
        LobbyClient::start(backend.session(), feed, LobbyConfig::default());
    let room = client.create_room(8.0).await.unwrap();
    client.subscribe_room(room.id).await.unwrap();
    let join = server.next_event("phx_join").await;
    server.reply_ok(&join);

    server.close();
    wait_for(&mut events, |e| {
        matches!(
            e,
            LobbyEvent::SubscriptionStatus {
                scope: FeedScope::Room,
                status: SubscriptionStatus::Closed,
            }
        )
    })
    .await;
    assert!(!client.feed().is_connected());
    assert!(!closed.load(std::sync::atomic::Ordering::Relaxed));
}

// ════════════════════════════════════════════════════════════════════
// Actions and events
// ════════════════════════════════════════════════════════════════════

#[tokio::test]
async fn actions_log_in_configured_locale() {
    let backend = MemoryBackend::new();
    let (client, _events) = LobbyClient::start(
        backend.session(),
        backend.feed(),
        LobbyConfig::default().with_locale(Locale::ZhTw),
    );

    assert!(client.init().await.is_some());
    assert!(client
        .join_room_action(JoinRoomRequest::new("ZZZ999", "Alice"))
        .await
        .is_none());
    assert!(client.start_round_action().await.is_none());

    let entries = client.log_entries().await;
    assert!(entries[0].message.starts_with("開始回合失敗："));
    assert!(entries[1].message.starts_with("加入房間失敗："));
    assert_eq!(entries[2].message, "初始化完成：已匿名登入");
    assert!(client.status_text().await.starts_with("已登入（匿名）: "));
}

#[tokio::test]
async fn join_action_logs_seat_details() {
    let backend = MemoryBackend::new();
    let (client, _events) = memory_client(&backend);
    let room = client.create_room_action("5").await.unwrap();
    let joined = client
        .join_room_action(JoinRoomRequest::new(&room.room_code, "Alice"))
        .await
        .unwrap();

    let log = client.render_log().await;
    assert!(log.contains(&format!(
        "joined room: room_code={} player_id={} turn_order=0",
        room.room_code, joined.player.id
    )));
    let started = client.start_round_action().await.unwrap();
    assert_eq!(started.current_round, 1);
    assert!(client.render_log().await.contains("round started: current_round=1"));
}

#[tokio::test]
async fn full_event_channel_never_blocks() {
    let backend = MemoryBackend::new();
    let (client, _events) = LobbyClient::start(
        backend.session(),
        backend.feed(),
        LobbyConfig::default().with_event_channel_capacity(1),
    );
    tokio::time::timeout(Duration::from_secs(5), async {
        let room = client.create_room(3.0).await.unwrap();
        client
            .join_room(JoinRoomRequest::new(&room.room_code, "Alice"))
            .await
            .unwrap();
        client.start_round().await.unwrap();
    })
    .await
    .expect("operations blocked on a full event channel");
}

#[tokio::test]
async fn memory_feed_is_usable_as_trait_object_seam() {
    // The client only needs the trait; a bare feed works without a backend.
    let feed = MemoryFeed::new();
    let sub = feed
        .subscribe(dead_card_lobby::ChangeFilter::room(uuid::Uuid::nil()))
        .await
        .unwrap();
    feed.unsubscribe(sub.id).await.unwrap();
    assert_eq!(feed.subscriber_count().await, 0);
}

//! # Offline Lobby Example
//!
//! Runs a whole lobby in-process on [`MemoryBackend`]: one host creates a
//! room, seven guests try to take a seat (the seventh is turned away), and
//! the host starts the first round while every guest sees it live.
//!
//! ## Running
//!
//! ```sh
//! cargo run --example offline_lobby
//! ```

use std::time::Duration;

use dead_card_lobby::{JoinRoomRequest, LobbyClient, LobbyConfig, LobbyError, MemoryBackend};

const GUESTS: [(&str, &str, &str); 7] = [
    ("Alice", "Doctor", "Calm"),
    ("Bob", "Chef", ""),
    ("Carol", "Pilot", "Nervous"),
    ("Dave", "", ""),
    ("Erin", "Artist", "Cheerful"),
    ("Frank", "Sailor", "Grumpy"),
    ("Grace", "Lawyer", "Sharp"),
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let tables = MemoryBackend::new();

    // ── Host ────────────────────────────────────────────────────────
    let (host, _host_events) =
        LobbyClient::start(tables.session(), tables.feed(), LobbyConfig::default());
    let room = host.create_room(10.0).await?;
    println!("room created: {}", room.room_code);

    // ── Guests ──────────────────────────────────────────────────────
    let mut guests = Vec::new();
    for (name, job, personality) in GUESTS {
        let (guest, _events) =
            LobbyClient::start(tables.session(), tables.feed(), LobbyConfig::default());
        let request = JoinRoomRequest::new(&room.room_code, name)
            .with_job(job)
            .with_personality(personality);
        match guest.join_room(request).await {
            Ok(joined) => {
                println!("{name} took seat {}", joined.player.turn_order);
                guests.push(guest);
            }
            Err(LobbyError::RoomFull { capacity }) => {
                println!("{name} was turned away: room is full ({capacity} seats)");
                guest.shutdown().await;
            }
            Err(e) => return Err(e.into()),
        }
    }

    // ── Round start ─────────────────────────────────────────────────
    let started = host.start_round().await?;
    println!("round {} started", started.current_round);

    // Give the change pumps a moment to deliver the room update.
    tokio::time::sleep(Duration::from_millis(50)).await;
    if let Some(first) = guests.first() {
        println!("{}", first.room_info_text().await);
        println!("{}", first.players_text().await);
    }

    for guest in &guests {
        guest.shutdown().await;
    }
    host.shutdown().await;
    Ok(())
}

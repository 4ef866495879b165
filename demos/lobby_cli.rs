//! # Lobby CLI Example
//!
//! A line-oriented lobby against a hosted backend:
//!
//! 1. Load the backend URL and anon key from the environment
//! 2. Sign in anonymously (the session is reused if `LOBBY_SESSION_FILE` is set)
//! 3. Read commands from stdin while printing live room and seat updates
//!
//! ## Running
//!
//! ```sh
//! LOBBY_BACKEND_URL=https://<project>.supabase.co \
//! LOBBY_ANON_KEY=<anon key> \
//! cargo run --example lobby_cli --features websocket-tls
//! ```
//!
//! Commands:
//!
//! ```text
//! signin
//! create [target]
//! join CODE NAME [job] [personality]
//! start
//! players | room | status | log
//! quit
//! ```

use dead_card_lobby::{
    HttpBackend, JoinRoomRequest, LobbyClient, LobbyConfig, LobbyEvent, RealtimeConfig,
    RealtimeFeed, WebSocketTransport,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // ── Logging ─────────────────────────────────────────────────────
    // Set `RUST_LOG=debug` to see realtime frames and HTTP calls.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    // ── Configuration ───────────────────────────────────────────────
    let config = LobbyConfig::from_env()?;
    let backend = HttpBackend::from_config(&config);

    // ── Connect ─────────────────────────────────────────────────────
    let transport = WebSocketTransport::connect_realtime(&config.backend_url, &config.anon_key).await?;
    let feed = RealtimeFeed::start(
        transport,
        RealtimeConfig::default().with_heartbeat_interval(config.heartbeat_interval),
    );

    let (client, mut events) = LobbyClient::start(backend, feed, config);
    client.init().await;
    println!("{}", client.status_text().await);

    // ── Command loop ────────────────────────────────────────────────
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            event = events.recv() => {
                let Some(event) = event else { break };
                match event {
                    LobbyEvent::Log(entry) => println!("{entry}"),
                    LobbyEvent::RoomChanged { info, .. } => println!("{info}"),
                    LobbyEvent::PlayersChanged { listing, .. } => println!("{listing}"),
                    LobbyEvent::IdentityChanged { status, .. } => println!("{status}"),
                    LobbyEvent::SubscriptionStatus { .. } => {}
                }
            }

            line = lines.next_line() => {
                let Some(line) = line? else { break };
                let words: Vec<&str> = line.split_whitespace().collect();
                match words.as_slice() {
                    [] => {}
                    ["signin"] => {
                        client.sign_in_action().await;
                    }
                    ["create"] => {
                        client.create_room_action("").await;
                    }
                    ["create", target] => {
                        client.create_room_action(target).await;
                    }
                    ["join", code, name, rest @ ..] => {
                        let mut request = JoinRoomRequest::new(*code, *name);
                        if let Some(job) = rest.first() {
                            request = request.with_job(*job);
                        }
                        if let Some(personality) = rest.get(1) {
                            request = request.with_personality(*personality);
                        }
                        client.join_room_action(request).await;
                    }
                    ["start"] => {
                        client.start_round_action().await;
                    }
                    ["players"] => println!("{}", client.players_text().await),
                    ["room"] => println!("{}", client.room_info_text().await),
                    ["status"] => println!("{}", client.status_text().await),
                    ["log"] => println!("{}", client.render_log().await),
                    ["quit"] | ["exit"] => break,
                    _ => println!("unknown command: {line}"),
                }
            }

            _ = tokio::signal::ctrl_c() => break,
        }
    }

    // ── Cleanup ─────────────────────────────────────────────────────
    client.shutdown().await;
    Ok(())
}

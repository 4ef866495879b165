//! Local view-model and plain-text readouts.
//!
//! [`ViewModel`] is a non-authoritative cache of what the client last learned
//! from the backend. Room and player list are replaced wholesale, never
//! patched. Each scope carries a ticket counter: a fetch takes a
//! [`Ticket`] when it is issued and its result is applied only if no newer
//! ticket has been applied since, so a slow response cannot overwrite a
//! fresher one.

use std::collections::VecDeque;
use std::fmt::Write as _;

use crate::backend::Identity;
use crate::protocol::{Player, Room};

/// Default number of entries retained by an [`ActivityLog`].
pub const DEFAULT_LOG_CAPACITY: usize = 200;

// ── Locale ──────────────────────────────────────────────────────────

/// Language of readouts and log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Locale {
    #[default]
    En,
    ZhTw,
}

impl Locale {
    /// Parse a locale tag such as `en`, `en-US`, `zh-TW` or `zh_tw`.
    pub fn from_tag(tag: &str) -> Option<Self> {
        let tag = tag.trim().to_ascii_lowercase().replace('_', "-");
        match tag.as_str() {
            "zh-tw" | "zh-hant" | "zh" => Some(Self::ZhTw),
            t if t == "en" || t.starts_with("en-") => Some(Self::En),
            _ => None,
        }
    }
}

/// A user-triggered action, used to prefix log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Init,
    SignIn,
    CreateRoom,
    JoinRoom,
    StartRound,
}

impl Action {
    /// Prefix written before the error message of a failed action.
    pub fn failure_prefix(self, locale: Locale) -> &'static str {
        match (locale, self) {
            (Locale::En, Self::Init) => "startup failed: ",
            (Locale::En, Self::SignIn) => "anonymous sign-in failed: ",
            (Locale::En, Self::CreateRoom) => "create room failed: ",
            (Locale::En, Self::JoinRoom) => "join room failed: ",
            (Locale::En, Self::StartRound) => "start round failed: ",
            (Locale::ZhTw, Self::Init) => "初始化失敗：",
            (Locale::ZhTw, Self::SignIn) => "匿名登入失敗：",
            (Locale::ZhTw, Self::CreateRoom) => "建立房間失敗：",
            (Locale::ZhTw, Self::JoinRoom) => "加入房間失敗：",
            (Locale::ZhTw, Self::StartRound) => "開始回合失敗：",
        }
    }

    /// Log line written when the action succeeds.
    pub fn success_message(self, locale: Locale, detail: &str) -> String {
        let head = match (locale, self) {
            (Locale::En, Self::Init) => "ready: signed in anonymously",
            (Locale::En, Self::SignIn) => "anonymous sign-in succeeded",
            (Locale::En, Self::CreateRoom) => "room created, code:",
            (Locale::En, Self::JoinRoom) => "joined room:",
            (Locale::En, Self::StartRound) => "round started:",
            (Locale::ZhTw, Self::Init) => "初始化完成：已匿名登入",
            (Locale::ZhTw, Self::SignIn) => "匿名登入成功",
            (Locale::ZhTw, Self::CreateRoom) => "建立房間成功，房號：",
            (Locale::ZhTw, Self::JoinRoom) => "加入房間成功：",
            (Locale::ZhTw, Self::StartRound) => "回合開始：",
        };
        if detail.is_empty() {
            head.to_owned()
        } else {
            format!("{head} {detail}")
        }
    }
}

// ── Readouts ────────────────────────────────────────────────────────

/// Status readout for the current identity.
pub fn render_auth_status(identity: Option<&Identity>, locale: Locale) -> String {
    match (identity, locale) {
        (Some(id), Locale::En) => format!("signed in (anonymous): {}", id.short_label()),
        (Some(id), Locale::ZhTw) => format!("已登入（匿名）: {}", id.short_label()),
        (None, Locale::En) => "not signed in".to_owned(),
        (None, Locale::ZhTw) => "尚未登入".to_owned(),
    }
}

/// Room-info readout.
pub fn render_room_info(room: Option<&Room>, locale: Locale) -> String {
    let Some(room) = room else {
        return match locale {
            Locale::En => "not in a room".to_owned(),
            Locale::ZhTw => "尚未進入房間".to_owned(),
        };
    };
    format!(
        "room_code={}\nroom_id={}\nstatus={}\ntarget_dead_cards={}\ncurrent_round={}\n",
        room.room_code, room.id, room.status, room.target_dead_cards, room.current_round
    )
}

/// Player-list readout, one block per seat in the order given.
pub fn render_players(players: &[Player], locale: Locale) -> String {
    if players.is_empty() {
        return match locale {
            Locale::En => "no players yet".to_owned(),
            Locale::ZhTw => "目前沒有玩家".to_owned(),
        };
    }
    let mut out = String::new();
    for p in players {
        let job = p.job.as_deref().unwrap_or("");
        let personality = p.personality.as_deref().unwrap_or("");
        // Writing to a String cannot fail.
        let _ = match locale {
            Locale::En => writeln!(
                out,
                "{} (turn {})\n  job: {job}\n  personality: {personality}\n  \
                 suspicion: {}  innocence: {}  challenges left: {}",
                p.name,
                p.turn_order,
                p.suspicion_total,
                p.innocence_total,
                p.challenge_left_this_round
            ),
            Locale::ZhTw => writeln!(
                out,
                "{}（順序: {}）\n  職業：{job}\n  個性：{personality}\n  \
                 嫌疑：{}　清白：{}　測謊剩餘：{}",
                p.name,
                p.turn_order,
                p.suspicion_total,
                p.innocence_total,
                p.challenge_left_this_round
            ),
        };
    }
    out
}

// ── Activity log ────────────────────────────────────────────────────

/// One timestamped log line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    /// Local wall-clock time, `HH:MM:SS`.
    pub time: String,
    pub message: String,
}

impl std::fmt::Display for LogEntry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.time, self.message)
    }
}

/// Bounded chronological log, newest entry first.
#[derive(Debug, Clone)]
pub struct ActivityLog {
    entries: VecDeque<LogEntry>,
    capacity: usize,
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_LOG_CAPACITY)
    }
}

impl ActivityLog {
    /// A log retaining at most `capacity` entries (at least 1).
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            entries: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    /// Prepend a message stamped with the current local time.
    pub fn push(&mut self, message: impl Into<String>) -> LogEntry {
        let entry = LogEntry {
            time: chrono::Local::now().format("%H:%M:%S").to_string(),
            message: message.into(),
        };
        self.entries.push_front(entry.clone());
        self.entries.truncate(self.capacity);
        entry
    }

    /// Entries, newest first.
    pub fn entries(&self) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// The whole log as text, newest line first.
    pub fn render(&self) -> String {
        self.entries
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ── View-model ──────────────────────────────────────────────────────

/// Proof that a fetch was issued at a given point in a scope's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Ticket(u64);

#[derive(Debug, Default, Clone, Copy)]
struct TicketCounter {
    issued: u64,
    applied: u64,
}

impl TicketCounter {
    fn issue(&mut self) -> Ticket {
        self.issued += 1;
        Ticket(self.issued)
    }

    /// Record `ticket` as applied without discarding a newer one.
    fn raise(&mut self, ticket: Ticket) {
        self.applied = self.applied.max(ticket.0);
    }

    fn accept(&mut self, ticket: Ticket) -> bool {
        if ticket.0 <= self.applied {
            return false;
        }
        self.applied = ticket.0;
        true
    }
}

/// Latest known identity, room and seats.
#[derive(Debug, Default, Clone)]
pub struct ViewModel {
    identity: Option<Identity>,
    room: Option<Room>,
    players: Vec<Player>,
    room_tickets: TicketCounter,
    player_tickets: TicketCounter,
}

impl ViewModel {
    pub fn identity(&self) -> Option<&Identity> {
        self.identity.as_ref()
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    pub fn players(&self) -> &[Player] {
        &self.players
    }

    pub fn set_identity(&mut self, identity: Identity) {
        self.identity = Some(identity);
    }

    /// Take a ticket before fetching or receiving a room record.
    pub fn room_ticket(&mut self) -> Ticket {
        self.room_tickets.issue()
    }

    /// Take a ticket before fetching a player list.
    pub fn players_ticket(&mut self) -> Ticket {
        self.player_tickets.issue()
    }

    /// Replace the room if `ticket` is newer than the last applied one.
    ///
    /// A record for a different room is a switch and always lands, whatever
    /// its ticket. Switching clears the player list, since the old seats no
    /// longer describe the active room.
    pub fn apply_room(&mut self, ticket: Ticket, room: Room) -> bool {
        let switched = self.room.as_ref().is_some_and(|r| r.id != room.id);
        if switched {
            self.room_tickets.raise(ticket);
        } else if !self.room_tickets.accept(ticket) {
            return false;
        }
        self.room = Some(room);
        if switched {
            self.players.clear();
            // Fetches issued for the previous room must not land.
            let next = self.player_tickets.issue();
            self.player_tickets.accept(next);
        }
        true
    }

    /// Apply a change notification for the active room.
    ///
    /// Notifications for any other room are dropped, so a late update from a
    /// room the view has left never switches back to it.
    pub fn apply_room_update(&mut self, ticket: Ticket, room: Room) -> bool {
        if self.room.as_ref().is_none_or(|r| r.id != room.id) {
            return false;
        }
        self.apply_room(ticket, room)
    }

    /// Replace the player list if `ticket` is newer than the last applied one.
    ///
    /// The list is stored in ascending turn order.
    pub fn apply_players(&mut self, ticket: Ticket, mut players: Vec<Player>) -> bool {
        if !self.player_tickets.accept(ticket) {
            return false;
        }
        players.sort_by_key(|p| p.turn_order);
        self.players = players;
        true
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::protocol::RoomStatus;
    use uuid::Uuid;

    fn room(n: u128, round: i32) -> Room {
        Room {
            id: Uuid::from_u128(n),
            room_code: "ABC123".into(),
            created_by: Uuid::nil(),
            target_dead_cards: 8,
            status: RoomStatus::Lobby,
            current_round: round,
            created_at: None,
        }
    }

    fn player(name: &str, turn_order: i32) -> Player {
        Player {
            id: Uuid::new_v4(),
            room_id: Uuid::from_u128(1),
            user_id: Uuid::new_v4(),
            name: name.into(),
            job: Some("cook".into()),
            personality: None,
            suspicion_total: 2,
            innocence_total: 1,
            challenge_left_this_round: 1,
            turn_order,
            created_at: None,
        }
    }

    #[test]
    fn stale_room_ticket_is_discarded() {
        let mut view = ViewModel::default();
        let older = view.room_ticket();
        let newer = view.room_ticket();
        assert!(view.apply_room(newer, room(1, 2)));
        assert!(!view.apply_room(older, room(1, 1)));
        assert_eq!(view.room().unwrap().current_round, 2);
    }

    #[test]
    fn players_are_stored_in_turn_order() {
        let mut view = ViewModel::default();
        let t = view.players_ticket();
        view.apply_players(t, vec![player("Bob", 1), player("Alice", 0)]);
        let names: Vec<_> = view.players().iter().map(|p| p.name.as_str()).collect();
        assert_eq!(names, ["Alice", "Bob"]);
    }

    #[test]
    fn switching_room_drops_old_seats_and_pending_fetches() {
        let mut view = ViewModel::default();
        let t = view.room_ticket();
        view.apply_room(t, room(1, 0));
        let pending = view.players_ticket();
        let t = view.room_ticket();
        view.apply_room(t, room(2, 0));
        assert!(view.players().is_empty());
        assert!(!view.apply_players(pending, vec![player("Ghost", 0)]));
    }

    #[test]
    fn switch_lands_even_with_an_older_ticket() {
        let mut view = ViewModel::default();
        let t = view.room_ticket();
        view.apply_room(t, room(1, 0));
        let create = view.room_ticket();
        let update = view.room_ticket();
        assert!(view.apply_room_update(update, room(1, 1)));
        assert!(view.apply_room(create, room(2, 0)));
        assert_eq!(view.room().unwrap().id, Uuid::from_u128(2));
    }

    #[test]
    fn updates_for_other_rooms_are_dropped() {
        let mut view = ViewModel::default();
        let t = view.room_ticket();
        assert!(!view.apply_room_update(t, room(1, 0)));
        let t = view.room_ticket();
        view.apply_room(t, room(2, 0));
        let t = view.room_ticket();
        assert!(!view.apply_room_update(t, room(1, 4)));
        assert_eq!(view.room().unwrap().id, Uuid::from_u128(2));
    }

    #[test]
    fn room_info_lists_fields() {
        let text = render_room_info(Some(&room(1, 3)), Locale::En);
        assert!(text.contains("room_code=ABC123\n"));
        assert!(text.contains("status=lobby\n"));
        assert!(text.contains("current_round=3\n"));
        assert_eq!(render_room_info(None, Locale::ZhTw), "尚未進入房間");
    }

    #[test]
    fn player_readout_shows_counters() {
        let text = render_players(&[player("Alice", 0)], Locale::En);
        assert!(text.starts_with("Alice (turn 0)"));
        assert!(text.contains("job: cook"));
        assert!(text.contains("suspicion: 2  innocence: 1  challenges left: 1"));
        assert_eq!(render_players(&[], Locale::En), "no players yet");
    }

    #[test]
    fn log_is_newest_first_and_bounded() {
        let mut log = ActivityLog::with_capacity(2);
        log.push("one");
        log.push("two");
        log.push("three");
        let messages: Vec<_> = log.entries().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, ["three", "two"]);
        assert!(log.render().starts_with('['));
    }

    #[test]
    fn locale_tags() {
        assert_eq!(Locale::from_tag("zh_TW"), Some(Locale::ZhTw));
        assert_eq!(Locale::from_tag("en-US"), Some(Locale::En));
        assert_eq!(Locale::from_tag("fr"), None);
    }

    #[test]
    fn failure_prefix_is_localized() {
        assert_eq!(Action::JoinRoom.failure_prefix(Locale::En), "join room failed: ");
        assert_eq!(Action::JoinRoom.failure_prefix(Locale::ZhTw), "加入房間失敗：");
    }
}

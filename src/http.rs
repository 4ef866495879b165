//! HTTP backend for a hosted Supabase-style project.
//!
//! Endpoints used:
//!
//! | Contract                         | Request                                         |
//! |----------------------------------|-------------------------------------------------|
//! | `sign_in_anonymously`            | `POST /auth/v1/signup`                          |
//! | `current_identity`               | `GET /auth/v1/user`                             |
//! | (expired access token)           | `POST /auth/v1/token?grant_type=refresh_token`  |
//! | `insert_room`                    | `POST /rest/v1/rooms` (`return=representation`) |
//! | `find_room_by_code`              | `GET /rest/v1/rooms?room_code=eq.<code>`        |
//! | `find_player` / `list_players`   | `GET /rest/v1/players?room_id=eq.<id>...`       |
//! | `join_room_player`/`start_round` | `POST /rest/v1/rpc/<name>`                      |
//!
//! Every request carries the public `apikey` header and a bearer token: the
//! session's access token once signed in, the API key before that.

use std::path::PathBuf;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::RwLock;
use tracing::{debug, warn};

use crate::backend::{Identity, IdentityProvider, PlayerStore, Procedures, RoomStore};
use crate::config::LobbyConfig;
use crate::error::{LobbyError, Result};
use crate::protocol::{
    IdentityId, JoinRoomPlayerArgs, NewRoom, Player, Room, RoomId, StartRoundArgs,
    JOIN_ROOM_PLAYER_RPC, PLAYERS_TABLE, ROOMS_TABLE, START_ROUND_RPC,
};

/// Persisted anonymous session.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
struct Session {
    access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    refresh_token: Option<String>,
    user: AuthUser,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
struct AuthUser {
    id: IdentityId,
}

impl Session {
    fn identity(&self) -> Identity {
        Identity::new(self.user.id).with_access_token(self.access_token.clone())
    }
}

/// [`Backend`](crate::Backend) over the project's REST and auth APIs.
pub struct HttpBackend {
    client: Client,
    base_url: String,
    anon_key: String,
    session: RwLock<Option<Session>>,
    session_file: Option<PathBuf>,
}

impl HttpBackend {
    /// Create a backend for `base_url` (e.g. `https://<project>.supabase.co`).
    pub fn new(base_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            anon_key: anon_key.into(),
            session: RwLock::new(None),
            session_file: None,
        }
    }

    /// Create a backend from a [`LobbyConfig`], including its session file.
    pub fn from_config(config: &LobbyConfig) -> Self {
        let backend = Self::new(config.backend_url.clone(), config.anon_key.clone());
        match &config.session_file {
            Some(path) => backend.with_session_file(path.clone()),
            None => backend,
        }
    }

    /// Persist the anonymous session to `path` and restore it from there.
    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Use a preconfigured HTTP client.
    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    /// Access token of the current session, if signed in.
    pub async fn access_token(&self) -> Option<String> {
        self.session
            .read()
            .await
            .as_ref()
            .map(|s| s.access_token.clone())
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    async fn authorized(&self, builder: RequestBuilder) -> RequestBuilder {
        let bearer = self
            .access_token()
            .await
            .unwrap_or_else(|| self.anon_key.clone());
        builder
            .header("apikey", &self.anon_key)
            .bearer_auth(bearer)
    }

    async fn select<T: DeserializeOwned>(&self, table: &str, query: &[(&str, String)]) -> Result<Vec<T>> {
        let request = self
            .authorized(self.client.get(self.url(&format!("/rest/v1/{table}"))))
            .await
            .query(&[("select", "*")])
            .query(query);
        let value = read_json(request.send().await?).await?;
        Ok(serde_json::from_value(value)?)
    }

    async fn rpc<A: Serialize + Sync, T: DeserializeOwned>(&self, name: &str, args: &A) -> Result<Option<T>> {
        debug!(procedure = name, "calling procedure");
        let request = self
            .authorized(self.client.post(self.url(&format!("/rest/v1/rpc/{name}"))))
            .await
            .json(args);
        first_record(read_json(request.send().await?).await?)
    }

    /// Trade `refresh_token` for a new session. `Ok(None)` if the auth
    /// server rejects the token.
    async fn refresh_session(&self, refresh_token: &str) -> Result<Option<Session>> {
        let response = self
            .client
            .post(self.url("/auth/v1/token"))
            .query(&[("grant_type", "refresh_token")])
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(&serde_json::json!({ "refresh_token": refresh_token }))
            .send()
            .await?;
        if response.status() == StatusCode::BAD_REQUEST || is_rejection(response.status()) {
            debug!(status = %response.status(), "refresh token was rejected");
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(read_json(response).await?)?))
    }

    async fn load_session(&self) -> Option<Session> {
        let path = self.session_file.as_ref()?;
        let text = match tokio::fs::read_to_string(path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return None,
            Err(e) => {
                warn!(path = %path.display(), "could not read session file: {e}");
                return None;
            }
        };
        match serde_json::from_str(&text) {
            Ok(session) => Some(session),
            Err(e) => {
                warn!(path = %path.display(), "ignoring malformed session file: {e}");
                None
            }
        }
    }

    async fn store_session(&self, session: Option<Session>) -> Result<()> {
        if let Some(path) = &self.session_file {
            match &session {
                Some(s) => tokio::fs::write(path, serde_json::to_vec(s)?).await?,
                None => match tokio::fs::remove_file(path).await {
                    Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                    _ => {}
                },
            }
        }
        *self.session.write().await = session;
        Ok(())
    }
}

impl std::fmt::Debug for HttpBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpBackend")
            .field("base_url", &self.base_url)
            .field("session_file", &self.session_file)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl IdentityProvider for HttpBackend {
    async fn current_identity(&self) -> Result<Option<Identity>> {
        let cached = self.session.read().await.clone();
        let session = match cached {
            Some(session) => Some(session),
            None => self.load_session().await,
        };
        let Some(session) = session else {
            return Ok(None);
        };

        let response = self
            .client
            .get(self.url("/auth/v1/user"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&session.access_token)
            .send()
            .await?;
        if is_rejection(response.status()) {
            let refreshed = match &session.refresh_token {
                Some(token) => self.refresh_session(token).await?,
                None => None,
            };
            let Some(refreshed) = refreshed else {
                debug!("stored session was rejected; signing out");
                self.store_session(None).await?;
                return Ok(None);
            };
            if refreshed.user.id != session.user.id {
                warn!(old = %session.user.id, new = %refreshed.user.id, "refresh changed the user id");
            }
            let identity = refreshed.identity();
            debug!(user = %identity.id, "access token refreshed");
            self.store_session(Some(refreshed)).await?;
            return Ok(Some(identity));
        }
        let user: AuthUser = serde_json::from_value(read_json(response).await?)?;
        let session = Session { user, ..session };
        let identity = session.identity();
        *self.session.write().await = Some(session);
        Ok(Some(identity))
    }

    async fn sign_in_anonymously(&self) -> Result<Identity> {
        let response = self
            .client
            .post(self.url("/auth/v1/signup"))
            .header("apikey", &self.anon_key)
            .bearer_auth(&self.anon_key)
            .json(&serde_json::json!({ "data": {} }))
            .send()
            .await?;
        let session: Session = serde_json::from_value(read_json(response).await?)?;
        let identity = session.identity();
        debug!(user = %identity.id, "anonymous session issued");
        self.store_session(Some(session)).await?;
        Ok(identity)
    }
}

#[async_trait]
impl RoomStore for HttpBackend {
    async fn insert_room(&self, room: NewRoom) -> Result<Room> {
        let request = self
            .authorized(self.client.post(self.url(&format!("/rest/v1/{ROOMS_TABLE}"))))
            .await
            .header("Prefer", "return=representation")
            .json(&room);
        first_record(read_json(request.send().await?).await?)?.ok_or_else(|| {
            LobbyError::EmptyRpcResponse {
                procedure: format!("insert {ROOMS_TABLE}"),
            }
        })
    }

    async fn find_room_by_code(&self, code: &str) -> Result<Option<Room>> {
        let rows: Vec<Room> = self
            .select(
                ROOMS_TABLE,
                &[("room_code", format!("eq.{code}")), ("limit", "1".into())],
            )
            .await?;
        Ok(rows.into_iter().next())
    }
}

#[async_trait]
impl PlayerStore for HttpBackend {
    async fn find_player(&self, room_id: RoomId, user_id: IdentityId) -> Result<Option<Player>> {
        let rows: Vec<Player> = self
            .select(
                PLAYERS_TABLE,
                &[
                    ("room_id", format!("eq.{room_id}")),
                    ("user_id", format!("eq.{user_id}")),
                    ("limit", "1".into()),
                ],
            )
            .await?;
        Ok(rows.into_iter().next())
    }

    async fn list_players(&self, room_id: RoomId) -> Result<Vec<Player>> {
        self.select(
            PLAYERS_TABLE,
            &[
                ("room_id", format!("eq.{room_id}")),
                ("order", "turn_order.asc".into()),
            ],
        )
        .await
    }
}

#[async_trait]
impl Procedures for HttpBackend {
    async fn join_room_player(&self, args: JoinRoomPlayerArgs) -> Result<Option<Player>> {
        self.rpc(JOIN_ROOM_PLAYER_RPC, &args).await
    }

    async fn start_round(&self, args: StartRoundArgs) -> Result<Option<Room>> {
        self.rpc(START_ROUND_RPC, &args).await
    }
}

// ── Response decoding ───────────────────────────────────────────────

fn is_rejection(status: StatusCode) -> bool {
    matches!(status, StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN)
}

/// Read a response body as JSON, mapping non-success statuses to errors.
async fn read_json(response: reqwest::Response) -> Result<Value> {
    let status = response.status();
    let body = response.text().await?;
    if !status.is_success() {
        return Err(api_error(status, &body));
    }
    if body.trim().is_empty() {
        return Ok(Value::Null);
    }
    Ok(serde_json::from_str(&body)?)
}

/// Map an error response onto [`LobbyError::Backend`].
///
/// REST errors carry `{code, message}`; auth errors carry `msg` or
/// `error_description` and an `error_code`. The HTTP status stands in for a
/// missing code.
fn api_error(status: StatusCode, body: &str) -> LobbyError {
    let parsed: Value = serde_json::from_str(body).unwrap_or(Value::Null);
    let text = |key: &str| parsed.get(key).and_then(Value::as_str).map(str::to_owned);

    let message = text("message")
        .or_else(|| text("msg"))
        .or_else(|| text("error_description"))
        .or_else(|| text("error"))
        .unwrap_or_else(|| {
            let trimmed = body.trim();
            if trimmed.is_empty() {
                status.canonical_reason().unwrap_or("request failed").to_owned()
            } else {
                trimmed.to_owned()
            }
        });
    let code = text("code")
        .or_else(|| text("error_code"))
        .unwrap_or_else(|| status.as_u16().to_string());
    LobbyError::backend(message, Some(&code))
}

/// First record of a response that may be `null`, an object or an array.
fn first_record<T: DeserializeOwned>(value: Value) -> Result<Option<T>> {
    let record = match value {
        Value::Null => return Ok(None),
        Value::Array(rows) => match rows.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        },
        other => other,
    };
    Ok(Some(serde_json::from_value(record)?))
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
    use crate::ErrorCode;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;
    use uuid::Uuid;

    /// Serve the given `(status, body)` responses, one connection each, and
    /// return the raw requests received.
    async fn serve(
        responses: Vec<(u16, String)>,
    ) -> (String, tokio::task::JoinHandle<Vec<String>>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let handle = tokio::spawn(async move {
            let mut requests = Vec::new();
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                requests.push(read_request(&mut socket).await);
                let reply = format!(
                    "HTTP/1.1 {status} Test\r\ncontent-type: application/json\r\n\
                     content-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                let _ = socket.shutdown().await;
            }
            requests
        });
        (format!("http://{addr}"), handle)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) -> String {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 1024];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                break;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(head_end) = text.find("\r\n\r\n") {
                let length = text[..head_end]
                    .lines()
                    .find_map(|l| {
                        let (name, value) = l.split_once(':')?;
                        name.eq_ignore_ascii_case("content-length")
                            .then(|| value.trim().parse::<usize>().ok())
                            .flatten()
                    })
                    .unwrap_or(0);
                if buf.len() >= head_end + 4 + length {
                    return text;
                }
            }
        }
        String::from_utf8_lossy(&buf).to_string()
    }

    fn session_json(id: Uuid) -> String {
        serde_json::json!({
            "access_token": "jwt-abc",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh",
            "user": { "id": id, "is_anonymous": true }
        })
        .to_string()
    }

    #[test]
    fn rest_error_keeps_message_and_code() {
        let err = api_error(
            StatusCode::BAD_REQUEST,
            r#"{"code":"P0001","message":"room is full (max 6 players)","details":null}"#,
        );
        assert_eq!(err.to_string(), "room is full (max 6 players)");
        assert_eq!(err.code(), Some(&ErrorCode::RoomFull));
    }

    #[test]
    fn auth_error_falls_back_to_status() {
        let err = api_error(StatusCode::TOO_MANY_REQUESTS, r#"{"msg":"slow down"}"#);
        assert_eq!(err.to_string(), "slow down");
        assert_eq!(err.code(), Some(&ErrorCode::RateLimitExceeded));

        let err = api_error(StatusCode::INTERNAL_SERVER_ERROR, "");
        assert_eq!(err.to_string(), "Internal Server Error");
    }

    #[test]
    fn first_record_accepts_null_object_and_array() {
        let none: Option<Value> = first_record(Value::Null).unwrap();
        assert!(none.is_none());
        let none: Option<Value> = first_record(serde_json::json!([])).unwrap();
        assert!(none.is_none());
        let one: Option<Value> = first_record(serde_json::json!([{"a": 1}, {"a": 2}])).unwrap();
        assert_eq!(one.unwrap()["a"], 1);
        let obj: Option<Value> = first_record(serde_json::json!({"a": 3})).unwrap();
        assert_eq!(obj.unwrap()["a"], 3);
    }

    #[tokio::test]
    async fn sign_in_uses_token_for_later_requests() {
        let user = Uuid::from_u128(42);
        let (url, server) = serve(vec![
            (200, session_json(user)),
            (200, "[]".to_owned()),
        ])
        .await;
        let backend = HttpBackend::new(format!("{url}/"), "anon-key");

        let identity = backend.sign_in_anonymously().await.unwrap();
        assert_eq!(identity.id, user);
        assert_eq!(backend.access_token().await.as_deref(), Some("jwt-abc"));

        let room = backend.find_room_by_code("ABC123").await.unwrap();
        assert!(room.is_none());

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /auth/v1/signup "));
        assert!(requests[0].to_ascii_lowercase().contains("apikey: anon-key"));
        assert!(requests[1].starts_with("GET /rest/v1/rooms?select=*&room_code=eq.ABC123&limit=1 "));
        assert!(requests[1].contains("Bearer jwt-abc"));
    }

    #[tokio::test]
    async fn rpc_null_is_none_and_error_is_classified() {
        let (url, server) = serve(vec![
            (200, "null".to_owned()),
            (
                400,
                r#"{"code":"P0001","message":"room is full"}"#.to_owned(),
            ),
        ])
        .await;
        let backend = HttpBackend::new(url, "anon-key");
        let args = StartRoundArgs {
            p_room_id: Uuid::nil(),
        };
        assert!(backend.start_round(args.clone()).await.unwrap().is_none());

        let err = backend
            .join_room_player(JoinRoomPlayerArgs {
                p_room_id: Uuid::nil(),
                p_user_id: Uuid::nil(),
                p_name: "Alice".into(),
                p_job: String::new(),
                p_personality: String::new(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.code(), Some(&ErrorCode::RoomFull));

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("POST /rest/v1/rpc/start_round "));
        assert!(requests[0].contains(r#"{"p_room_id":"00000000-0000-0000-0000-000000000000"}"#));
        assert!(requests[1].starts_with("POST /rest/v1/rpc/join_room_player "));
    }

    #[tokio::test]
    async fn session_is_persisted_and_restored() {
        let path = std::env::temp_dir().join(format!("lobby-session-{}.json", Uuid::new_v4()));
        let user = Uuid::from_u128(7);
        let (url, server) = serve(vec![
            (200, session_json(user)),
            (200, serde_json::json!({ "id": user }).to_string()),
        ])
        .await;

        let first = HttpBackend::new(url.clone(), "anon-key").with_session_file(&path);
        first.sign_in_anonymously().await.unwrap();
        assert!(path.exists());

        let second = HttpBackend::new(url, "anon-key").with_session_file(&path);
        let restored = second.current_identity().await.unwrap().unwrap();
        assert_eq!(restored.id, user);
        assert_eq!(restored.access_token.as_deref(), Some("jwt-abc"));

        let requests = server.await.unwrap();
        assert!(requests[1].starts_with("GET /auth/v1/user "));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn rejected_session_signs_out() {
        let path = std::env::temp_dir().join(format!("lobby-session-{}.json", Uuid::new_v4()));
        std::fs::write(&path, session_json(Uuid::from_u128(1))).unwrap();
        let (url, server) = serve(vec![
            (401, r#"{"msg":"invalid JWT"}"#.to_owned()),
            (
                400,
                r#"{"error_code":"refresh_token_not_found","msg":"Invalid Refresh Token"}"#
                    .to_owned(),
            ),
        ])
        .await;

        let backend = HttpBackend::new(url, "anon-key").with_session_file(&path);
        assert!(backend.current_identity().await.unwrap().is_none());
        assert!(!path.exists());
        assert!(backend.access_token().await.is_none());
        server.await.unwrap();
    }

    #[tokio::test]
    async fn expired_token_is_refreshed_for_the_same_user() {
        let path = std::env::temp_dir().join(format!("lobby-session-{}.json", Uuid::new_v4()));
        let user = Uuid::from_u128(9);
        std::fs::write(&path, session_json(user)).unwrap();
        let renewed = serde_json::json!({
            "access_token": "jwt-new",
            "token_type": "bearer",
            "expires_in": 3600,
            "refresh_token": "refresh-2",
            "user": { "id": user, "is_anonymous": true }
        })
        .to_string();
        let (url, server) = serve(vec![
            (401, r#"{"msg":"JWT expired"}"#.to_owned()),
            (200, renewed),
        ])
        .await;

        let backend = HttpBackend::new(url, "anon-key").with_session_file(&path);
        let identity = backend.current_identity().await.unwrap().unwrap();
        assert_eq!(identity.id, user);
        assert_eq!(identity.access_token.as_deref(), Some("jwt-new"));
        assert_eq!(backend.access_token().await.as_deref(), Some("jwt-new"));

        let stored: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(stored["refresh_token"], "refresh-2");

        let requests = server.await.unwrap();
        assert!(requests[0].starts_with("GET /auth/v1/user "));
        assert!(requests[1].starts_with("POST /auth/v1/token?grant_type=refresh_token "));
        assert!(requests[1].contains(r#"{"refresh_token":"refresh"}"#));
        let _ = std::fs::remove_file(&path);
    }

    #[tokio::test]
    async fn session_without_refresh_token_signs_out_on_rejection() {
        let path = std::env::temp_dir().join(format!("lobby-session-{}.json", Uuid::new_v4()));
        let session = serde_json::json!({
            "access_token": "jwt-old",
            "user": { "id": Uuid::from_u128(3) }
        });
        std::fs::write(&path, session.to_string()).unwrap();
        let (url, server) = serve(vec![(403, r#"{"msg":"forbidden"}"#.to_owned())]).await;

        let backend = HttpBackend::new(url, "anon-key").with_session_file(&path);
        assert!(backend.current_identity().await.unwrap().is_none());
        assert!(!path.exists());
        assert_eq!(server.await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn no_session_means_no_identity_and_no_request() {
        let backend = HttpBackend::new("http://127.0.0.1:9", "anon-key");
        assert!(backend.current_identity().await.unwrap().is_none());
    }
}

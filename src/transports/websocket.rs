//! WebSocket transport implementation using `tokio-tungstenite`.
//!
//! This module provides [`WebSocketTransport`], a [`Transport`]
//! implementation that carries realtime channel frames over a WebSocket
//! connection. `ws://` works out of the box; `wss://` needs the
//! `websocket-tls` feature.
//!
//! # Feature gate
//!
//! This module is only available when the `transport-websocket` feature is enabled
//! (it is enabled by default).
//!
//! # Example
//!
//! ```rust,no_run
//! # async fn example() -> Result<(), dead_card_lobby::LobbyError> {
//! use dead_card_lobby::{Transport, WebSocketTransport};
//!
//! let mut transport =
//!     WebSocketTransport::connect_realtime("http://localhost:54321", "anon-key").await?;
//! transport.send(r#"{"topic":"phoenix","event":"heartbeat","payload":{},"ref":"1"}"#.into()).await?;
//!
//! if let Some(Ok(msg)) = transport.recv().await {
//!     println!("received: {msg}");
//! }
//!
//! transport.close().await?;
//! # Ok(())
//! # }
//! ```

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::protocol::Message;

use crate::error::LobbyError;
use crate::transport::Transport;

/// Type alias for the underlying WebSocket stream.
///
/// Made public so that callers can construct a [`WebSocketTransport`] from an
/// existing stream via [`WebSocketTransport::from_stream`].
pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// A [`Transport`] implementation backed by a WebSocket connection.
///
/// Wraps a `tokio-tungstenite` [`WebSocketStream`](tokio_tungstenite::WebSocketStream)
/// and translates between realtime JSON frames and WebSocket frames.
///
/// # Construction
///
/// Use [`WebSocketTransport::connect`] to establish a new connection:
///
/// ```rust,no_run
/// # async fn example() -> Result<(), dead_card_lobby::LobbyError> {
/// use dead_card_lobby::WebSocketTransport;
///
/// let transport = WebSocketTransport::connect("ws://localhost:54321/realtime/v1/websocket").await?;
/// # Ok(())
/// # }
/// ```
///
/// For advanced use-cases (custom TLS, proxy, headers) construct the stream
/// yourself and use [`WebSocketTransport::from_stream`].
///
/// # Cancel Safety
///
/// The [`recv`](Transport::recv) method is cancel-safe. Dropping the future
/// returned by `recv` before it completes will not consume or lose any messages,
/// making it safe to use inside `tokio::select!`.
#[derive(Debug)]
pub struct WebSocketTransport {
    stream: WsStream,
    closed: bool,
}

impl WebSocketTransport {
    /// Establish a new WebSocket connection to the given URL.
    ///
    /// `wss://` URLs require the `websocket-tls` feature; TLS is then handled
    /// by `tokio-tungstenite` via [`MaybeTlsStream`](tokio_tungstenite::MaybeTlsStream).
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::Io`] if the URL is invalid or the connection
    /// cannot be established. When the underlying error is an I/O error its
    /// [`ErrorKind`](std::io::ErrorKind) is preserved; all other errors are
    /// mapped to [`ErrorKind::Other`](std::io::ErrorKind::Other).
    pub async fn connect(url: &str) -> Result<Self, LobbyError> {
        // The query string carries the api key; keep it out of logs.
        let endpoint = url.split('?').next().unwrap_or(url);
        tracing::debug!(endpoint = %endpoint, "connecting to realtime server");

        let (stream, _response) = tokio_tungstenite::connect_async(url).await.map_err(|e| {
            let kind = match &e {
                tokio_tungstenite::tungstenite::Error::Io(io) => io.kind(),
                _ => std::io::ErrorKind::Other,
            };
            LobbyError::Io(std::io::Error::new(kind, e))
        })?;

        tracing::info!(endpoint = %endpoint, "realtime connection established");

        Ok(Self {
            stream,
            closed: false,
        })
    }

    /// Create a [`WebSocketTransport`] from an already-established WebSocket stream.
    ///
    /// This is useful when you need custom TLS configuration, proxy headers, or
    /// any other connection setup that [`connect`](Self::connect) does not expose.
    pub fn from_stream(stream: WsStream) -> Self {
        Self {
            stream,
            closed: false,
        }
    }

    /// Establish a new WebSocket connection with a timeout.
    ///
    /// Behaves identically to [`connect`](Self::connect) but fails with
    /// [`LobbyError::Timeout`] if the connection is not established within
    /// the given duration.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::Timeout`] if the deadline elapses, or any
    /// error that [`connect`](Self::connect) may return.
    pub async fn connect_with_timeout(
        url: &str,
        timeout: std::time::Duration,
    ) -> Result<Self, LobbyError> {
        tokio::time::timeout(timeout, Self::connect(url))
            .await
            .map_err(|_| LobbyError::Timeout)?
    }

    /// Connect to the realtime endpoint of a hosted backend.
    ///
    /// `base_url` is the project URL (`https://…` or `http://…`); the scheme
    /// is switched to `wss`/`ws` and the realtime path and `apikey` query are
    /// appended. See [`realtime_url`].
    ///
    /// # Errors
    ///
    /// Same as [`connect`](Self::connect).
    pub async fn connect_realtime(base_url: &str, api_key: &str) -> Result<Self, LobbyError> {
        Self::connect(&realtime_url(base_url, api_key)).await
    }
}

/// Protocol version requested from the realtime server.
pub const REALTIME_VSN: &str = "1.0.0";

/// Build the realtime WebSocket URL for a backend project URL. The key is
/// percent-encoded into the query.
///
/// ```
/// use dead_card_lobby::transports::websocket::realtime_url;
///
/// assert_eq!(
///     realtime_url("https://demo.example.co/", "key"),
///     "wss://demo.example.co/realtime/v1/websocket?apikey=key&vsn=1.0.0"
/// );
/// ```
pub fn realtime_url(base_url: &str, api_key: &str) -> String {
    let base = base_url.trim().trim_end_matches('/');
    let base = if let Some(rest) = base.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = base.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        base.to_owned()
    };
    let api_key = encode_query_value(api_key);
    format!("{base}/realtime/v1/websocket?apikey={api_key}&vsn={REALTIME_VSN}")
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_query_value(value: &str) -> String {
    use std::fmt::Write as _;

    let mut encoded = String::with_capacity(value.len());
    for byte in value.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'-' | b'.' | b'_' | b'~') {
            encoded.push(char::from(byte));
        } else {
            let _ = write!(encoded, "%{byte:02X}");
        }
    }
    encoded
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, message: String) -> Result<(), LobbyError> {
        if self.closed {
            return Err(LobbyError::TransportClosed);
        }
        self.stream
            .send(Message::Text(message.into()))
            .await
            .map_err(|e| LobbyError::TransportSend(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, LobbyError>> {
        while let Some(frame) = self.stream.next().await {
            match frame {
                Ok(Message::Text(text)) => return Some(Ok(text.to_string())),
                Ok(Message::Close(close)) => {
                    tracing::debug!(?close, "realtime server sent close frame");
                    return None;
                }
                // Pongs are queued by tungstenite itself.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {}
                Ok(Message::Binary(bytes)) => {
                    // Protocol 1.0.0 is text-only; binary frames belong to 2.0.0.
                    tracing::warn!(len = bytes.len(), "skipping binary realtime frame");
                }
                Err(e) => return Some(Err(LobbyError::TransportReceive(e.to_string()))),
            }
        }
        None
    }

    async fn close(&mut self) -> Result<(), LobbyError> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream
            .close(None)
            .await
            .map_err(|e| LobbyError::TransportSend(e.to_string()))
    }
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
    use tokio::net::TcpListener;

    #[test]
    fn realtime_url_switches_scheme() {
        assert_eq!(
            realtime_url("http://127.0.0.1:54321", "anon"),
            "ws://127.0.0.1:54321/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
        assert_eq!(
            realtime_url("ws://already/", "anon"),
            "ws://already/realtime/v1/websocket?apikey=anon&vsn=1.0.0"
        );
    }

    #[test]
    fn realtime_url_encodes_the_key() {
        assert_eq!(
            realtime_url("https://demo.example.co", "a+b/c=&d"),
            "wss://demo.example.co/realtime/v1/websocket?apikey=a%2Bb%2Fc%3D%26d&vsn=1.0.0"
        );
        let jwt = "eyJhbGci.eyJyb2xl-_x.sig";
        assert!(realtime_url("https://demo.example.co", jwt).contains(&format!("apikey={jwt}&")));
    }

    #[tokio::test]
    async fn connect_fails_with_unreachable_host() {
        let err = WebSocketTransport::connect("ws://127.0.0.1:1").await.unwrap_err();
        assert!(matches!(err, LobbyError::Io(_)));
    }

    /// Serve one WebSocket connection with `handler`; returns its URL.
    async fn serve_once<F, Fut>(handler: F) -> String
    where
        F: FnOnce(tokio_tungstenite::WebSocketStream<tokio::net::TcpStream>) -> Fut
            + Send
            + 'static,
        Fut: std::future::Future<Output = ()> + Send,
    {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (tcp, _) = listener.accept().await.unwrap();
            let ws = tokio_tungstenite::accept_async(tcp).await.unwrap();
            handler(ws).await;
        });
        format!("ws://{addr}")
    }

    #[tokio::test]
    async fn frames_are_echoed_and_binary_is_skipped() {
        let url = serve_once(|mut ws| async move {
            if let Some(Ok(Message::Text(text))) = ws.next().await {
                ws.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
                ws.send(Message::Text(text)).await.unwrap();
            }
            ws.close(None).await.unwrap();
        })
        .await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport
            .send(r#"{"topic":"phoenix","event":"heartbeat","payload":{},"ref":"1"}"#.into())
            .await
            .unwrap();
        let echoed = transport.recv().await.unwrap().unwrap();
        assert!(echoed.contains("heartbeat"));
        assert!(transport.recv().await.is_none());
    }

    #[tokio::test]
    async fn send_after_close_is_rejected() {
        let url = serve_once(|mut ws| async move { while let Some(Ok(_)) = ws.next().await {} }).await;

        let mut transport = WebSocketTransport::connect(&url).await.unwrap();
        transport.close().await.unwrap();
        transport.close().await.unwrap();
        let err = transport.send("late".into()).await.unwrap_err();
        assert!(matches!(err, LobbyError::TransportClosed));
    }
}

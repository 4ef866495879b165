//! Client configuration.
//!
//! [`LobbyConfig`] is built in code with `new` + `with_*`, read from the
//! environment with [`LobbyConfig::from_env`], or parsed from a TOML document
//! with [`LobbyConfig::from_toml_str`].

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::error::{LobbyError, Result};
use crate::view::{Locale, DEFAULT_LOG_CAPACITY};

/// Default capacity of the bounded event channel.
const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Default timeout for the graceful shutdown.
const DEFAULT_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(1);

/// Default realtime heartbeat interval.
const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(25);

/// Environment variable holding the backend base URL.
pub const ENV_BACKEND_URL: &str = "LOBBY_BACKEND_URL";
/// Environment variable holding the public API key.
pub const ENV_ANON_KEY: &str = "LOBBY_ANON_KEY";
/// Environment variable holding the locale tag.
pub const ENV_LOCALE: &str = "LOBBY_LOCALE";
/// Environment variable holding the session file path.
pub const ENV_SESSION_FILE: &str = "LOBBY_SESSION_FILE";

/// Configuration for a [`LobbyClient`](crate::LobbyClient) and the adapters
/// it is wired to.
///
/// # Example
///
/// ```
/// use dead_card_lobby::{LobbyConfig, Locale};
///
/// let config = LobbyConfig::new("https://demo.supabase.co", "anon-key")
///     .with_locale(Locale::ZhTw)
///     .with_event_channel_capacity(0);
/// assert_eq!(config.event_channel_capacity, 1);
/// ```
#[derive(Debug, Clone)]
pub struct LobbyConfig {
    /// Backend base URL, e.g. `https://<project>.supabase.co`.
    pub backend_url: String,
    /// Public (anon) API key sent with every request.
    pub anon_key: String,
    /// Language of readouts and log lines. Defaults to English.
    pub locale: Locale,
    /// Capacity of the bounded event channel.
    ///
    /// When the consumer falls behind, events are dropped with a warning
    /// instead of blocking the client. Defaults to **256**. Values below 1
    /// are clamped to 1.
    pub event_channel_capacity: usize,
    /// Timeout for the graceful shutdown. Defaults to **1 second**.
    pub shutdown_timeout: Duration,
    /// Entries retained by the activity log. Defaults to **200**.
    pub log_capacity: usize,
    /// Realtime heartbeat interval. Defaults to **25 seconds**.
    pub heartbeat_interval: Duration,
    /// Where the HTTP backend persists the anonymous session, if anywhere.
    pub session_file: Option<PathBuf>,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self::new("", "")
    }
}

impl LobbyConfig {
    /// Create a configuration for the given backend with default values.
    pub fn new(backend_url: impl Into<String>, anon_key: impl Into<String>) -> Self {
        Self {
            backend_url: backend_url.into(),
            anon_key: anon_key.into(),
            locale: Locale::default(),
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            shutdown_timeout: DEFAULT_SHUTDOWN_TIMEOUT,
            log_capacity: DEFAULT_LOG_CAPACITY,
            heartbeat_interval: DEFAULT_HEARTBEAT_INTERVAL,
            session_file: None,
        }
    }

    #[must_use]
    pub fn with_locale(mut self, locale: Locale) -> Self {
        self.locale = locale;
        self
    }

    /// Set the capacity of the bounded event channel. Values below 1 are
    /// clamped to 1.
    #[must_use]
    pub fn with_event_channel_capacity(mut self, capacity: usize) -> Self {
        self.event_channel_capacity = capacity.max(1);
        self
    }

    /// Set the timeout for the graceful shutdown. A zero timeout aborts
    /// background tasks without waiting.
    #[must_use]
    pub fn with_shutdown_timeout(mut self, timeout: Duration) -> Self {
        self.shutdown_timeout = timeout;
        self
    }

    /// Set the activity log capacity. Values below 1 are clamped to 1.
    #[must_use]
    pub fn with_log_capacity(mut self, capacity: usize) -> Self {
        self.log_capacity = capacity.max(1);
        self
    }

    #[must_use]
    pub fn with_heartbeat_interval(mut self, interval: Duration) -> Self {
        self.heartbeat_interval = interval;
        self
    }

    #[must_use]
    pub fn with_session_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.session_file = Some(path.into());
        self
    }

    /// Read the configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::Config`] if the backend URL or API key is
    /// missing, or the locale tag is not recognised.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let require = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| LobbyError::Config(format!("{key} is not set")))
        };
        let mut config = Self::new(require(ENV_BACKEND_URL)?, require(ENV_ANON_KEY)?);
        if let Some(tag) = lookup(ENV_LOCALE) {
            config.locale = parse_locale(&tag)?;
        }
        if let Some(path) = lookup(ENV_SESSION_FILE).filter(|p| !p.trim().is_empty()) {
            config.session_file = Some(PathBuf::from(path));
        }
        Ok(config)
    }

    /// Parse a TOML document.
    ///
    /// ```
    /// use dead_card_lobby::LobbyConfig;
    ///
    /// let config = LobbyConfig::from_toml_str(r#"
    ///     backend_url = "https://demo.supabase.co"
    ///     anon_key = "anon"
    ///     locale = "zh-TW"
    ///     shutdown_timeout_ms = 250
    /// "#).unwrap();
    /// assert_eq!(config.shutdown_timeout.as_millis(), 250);
    /// ```
    ///
    /// # Errors
    ///
    /// Returns [`LobbyError::Config`] if the document is malformed, a
    /// required key is missing, or the locale tag is not recognised.
    pub fn from_toml_str(source: &str) -> Result<Self> {
        let file: ConfigFile =
            toml::from_str(source).map_err(|e| LobbyError::Config(e.to_string()))?;
        let mut config = Self::new(file.backend_url, file.anon_key);
        if let Some(tag) = file.locale {
            config.locale = parse_locale(&tag)?;
        }
        if let Some(capacity) = file.event_channel_capacity {
            config = config.with_event_channel_capacity(capacity);
        }
        if let Some(ms) = file.shutdown_timeout_ms {
            config.shutdown_timeout = Duration::from_millis(ms);
        }
        if let Some(capacity) = file.log_capacity {
            config = config.with_log_capacity(capacity);
        }
        if let Some(secs) = file.heartbeat_interval_secs {
            config.heartbeat_interval = Duration::from_secs(secs);
        }
        config.session_file = file.session_file;
        Ok(config)
    }
}

fn parse_locale(tag: &str) -> Result<Locale> {
    Locale::from_tag(tag).ok_or_else(|| LobbyError::Config(format!("unknown locale `{tag}`")))
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ConfigFile {
    backend_url: String,
    anon_key: String,
    locale: Option<String>,
    event_channel_capacity: Option<usize>,
    shutdown_timeout_ms: Option<u64>,
    log_capacity: Option<usize>,
    heartbeat_interval_secs: Option<u64>,
    session_file: Option<PathBuf>,
}

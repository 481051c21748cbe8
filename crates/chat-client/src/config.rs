//! Chat client configuration.
//!
//! Configuration is loaded from environment variables. Nothing here is
//! secret; credentials live in the credential store, not in config.

use std::collections::HashMap;
use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Default REST base URL.
pub const DEFAULT_API_URL: &str = "http://localhost:5000";

/// Path appended to the API host when no socket URL is configured.
pub const DEFAULT_SOCKET_PATH: &str = "/ws";

/// Default credential file, relative to the working directory.
pub const DEFAULT_CREDENTIALS_PATH: &str = ".chat-credentials.json";

/// Default total request timeout for REST calls.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default TCP connect timeout for REST calls and the socket handshake.
pub const DEFAULT_CONNECT_TIMEOUT_SECONDS: u64 = 5;

/// Default time to wait for a `joined_rooms` confirmation.
pub const DEFAULT_JOIN_TIMEOUT_SECONDS: u64 = 10;

/// Server-side limit on message body length, in characters.
pub const DEFAULT_MAX_MESSAGE_LENGTH: usize = 1000;

/// Default number of live messages kept per room that is joined but not open.
pub const DEFAULT_LIVE_QUEUE_LIMIT: usize = 200;

/// Default capacity of the socket event and presentation event channels.
pub const DEFAULT_EVENT_CHANNEL_CAPACITY: usize = 256;

/// Chat client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// REST base URL, without trailing slash (default: `http://localhost:5000`).
    pub api_url: String,

    /// WebSocket URL for the persistent connection.
    pub socket_url: String,

    /// Where the credential pair and display name are persisted.
    pub credentials_path: PathBuf,

    /// Total timeout for a single REST request.
    pub http_timeout: Duration,

    /// Connect timeout for REST and socket.
    pub connect_timeout: Duration,

    /// How long `enter_and_wait` waits for a join confirmation.
    pub join_timeout: Duration,

    /// Longest accepted message body, in characters.
    pub max_message_length: usize,

    /// Live messages queued per non-open room before the oldest are dropped.
    pub live_queue_limit: usize,

    /// Capacity of internal event channels.
    pub event_channel_capacity: usize,

    /// Prometheus scrape address. Metrics are not exported when unset.
    pub metrics_addr: Option<SocketAddr>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            socket_url: derive_socket_url(DEFAULT_API_URL),
            credentials_path: PathBuf::from(DEFAULT_CREDENTIALS_PATH),
            http_timeout: Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECONDS),
            connect_timeout: Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECONDS),
            join_timeout: Duration::from_secs(DEFAULT_JOIN_TIMEOUT_SECONDS),
            max_message_length: DEFAULT_MAX_MESSAGE_LENGTH,
            live_queue_limit: DEFAULT_LIVE_QUEUE_LIMIT,
            event_channel_capacity: DEFAULT_EVENT_CHANNEL_CAPACITY,
            metrics_addr: None,
        }
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let api_url = vars
            .get("CHAT_API_URL")
            .map(|s| s.trim_end_matches('/').to_string())
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());

        if !(api_url.starts_with("http://") || api_url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue(format!(
                "CHAT_API_URL must start with http:// or https://, got '{api_url}'"
            )));
        }

        let socket_url = vars
            .get("CHAT_SOCKET_URL")
            .cloned()
            .unwrap_or_else(|| derive_socket_url(&api_url));

        if !(socket_url.starts_with("ws://") || socket_url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue(format!(
                "CHAT_SOCKET_URL must start with ws:// or wss://, got '{socket_url}'"
            )));
        }

        let credentials_path = vars
            .get("CHAT_CREDENTIALS_PATH")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CREDENTIALS_PATH));

        let http_timeout = Duration::from_secs(parse_positive(
            vars,
            "CHAT_HTTP_TIMEOUT_SECONDS",
            DEFAULT_HTTP_TIMEOUT_SECONDS,
        )?);

        let connect_timeout = Duration::from_secs(parse_positive(
            vars,
            "CHAT_CONNECT_TIMEOUT_SECONDS",
            DEFAULT_CONNECT_TIMEOUT_SECONDS,
        )?);

        let join_timeout = Duration::from_secs(parse_positive(
            vars,
            "CHAT_JOIN_TIMEOUT_SECONDS",
            DEFAULT_JOIN_TIMEOUT_SECONDS,
        )?);

        let max_message_length = parse_positive(
            vars,
            "CHAT_MAX_MESSAGE_LENGTH",
            DEFAULT_MAX_MESSAGE_LENGTH,
        )?;

        let live_queue_limit =
            parse_positive(vars, "CHAT_LIVE_QUEUE_LIMIT", DEFAULT_LIVE_QUEUE_LIMIT)?;

        let event_channel_capacity = parse_positive(
            vars,
            "CHAT_EVENT_CHANNEL_CAPACITY",
            DEFAULT_EVENT_CHANNEL_CAPACITY,
        )?;

        let metrics_addr = vars
            .get("CHAT_METRICS_ADDR")
            .map(|raw| {
                raw.trim().parse::<SocketAddr>().map_err(|e| {
                    ConfigError::InvalidValue(format!(
                        "CHAT_METRICS_ADDR must be a socket address, got '{raw}': {e}"
                    ))
                })
            })
            .transpose()?;

        Ok(Config {
            api_url,
            socket_url,
            credentials_path,
            http_timeout,
            connect_timeout,
            join_timeout,
            max_message_length,
            live_queue_limit,
            event_channel_capacity,
            metrics_addr,
        })
    }

    /// Point the client at a different REST base URL, re-deriving the socket URL.
    #[must_use]
    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = api_url.into().trim_end_matches('/').to_string();
        self.socket_url = derive_socket_url(&self.api_url);
        self
    }

    /// Override the socket URL.
    #[must_use]
    pub fn with_socket_url(mut self, socket_url: impl Into<String>) -> Self {
        self.socket_url = socket_url.into();
        self
    }

    /// Override the join confirmation timeout.
    #[must_use]
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }
}

/// `http://host:port` becomes `ws://host:port/ws`; `https` becomes `wss`.
fn derive_socket_url(api_url: &str) -> String {
    let base = if let Some(rest) = api_url.strip_prefix("https://") {
        format!("wss://{rest}")
    } else if let Some(rest) = api_url.strip_prefix("http://") {
        format!("ws://{rest}")
    } else {
        api_url.to_string()
    };
    format!("{}{DEFAULT_SOCKET_PATH}", base.trim_end_matches('/'))
}

fn parse_positive<T>(
    vars: &HashMap<String, String>,
    key: &str,
    default: T,
) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
{
    match vars.get(key) {
        None => Ok(default),
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) if value > T::default() => Ok(value),
            _ => Err(ConfigError::InvalidValue(format!(
                "{key} must be a positive integer, got '{raw}'"
            ))),
        },
    }
}

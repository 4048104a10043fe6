//! Session configuration.

use crate::backoff::ReconnectPolicy;
use std::env;
use std::time::Duration;
use thiserror::Error;

pub const ENV_WS_PATH: &str = "CHAT_SESSION_WS_PATH";
pub const ENV_RECONNECT_BASE_MS: &str = "CHAT_SESSION_RECONNECT_BASE_MS";
pub const ENV_RECONNECT_MAX_MS: &str = "CHAT_SESSION_RECONNECT_MAX_MS";
pub const ENV_RECONNECT_MAX_ATTEMPTS: &str = "CHAT_SESSION_RECONNECT_MAX_ATTEMPTS";
pub const ENV_CONNECT_TIMEOUT_MS: &str = "CHAT_SESSION_CONNECT_TIMEOUT_MS";

pub const DEFAULT_WS_PATH: &str = "/ws";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionConfig {
    /// Fixed endpoint path on the page's origin.
    pub ws_path: String,
    pub reconnect: ReconnectPolicy,
    /// Upper bound on the WebSocket opening handshake.
    pub connect_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            ws_path: DEFAULT_WS_PATH.to_string(),
            reconnect: ReconnectPolicy::default(),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid CHAT_SESSION_WS_PATH: {0}")]
    InvalidWsPath(String),
    #[error("invalid CHAT_SESSION_RECONNECT_BASE_MS: {0}")]
    InvalidReconnectBaseMs(String),
    #[error("invalid CHAT_SESSION_RECONNECT_MAX_MS: {0}")]
    InvalidReconnectMaxMs(String),
    #[error("invalid CHAT_SESSION_RECONNECT_MAX_ATTEMPTS: {0}")]
    InvalidReconnectMaxAttempts(String),
    #[error("invalid CHAT_SESSION_CONNECT_TIMEOUT_MS: {0}")]
    InvalidConnectTimeoutMs(String),
}

impl SessionConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let value = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|raw| !raw.is_empty())
        };

        let ws_path = value(ENV_WS_PATH).unwrap_or(defaults.ws_path);
        if !ws_path.starts_with('/') {
            return Err(ConfigError::InvalidWsPath(format!(
                "path must start with '/': {ws_path}"
            )));
        }

        let base_ms = parse_u64(value(ENV_RECONNECT_BASE_MS), 1_000)
            .map_err(ConfigError::InvalidReconnectBaseMs)?;
        if base_ms == 0 {
            return Err(ConfigError::InvalidReconnectBaseMs(
                "must be greater than zero".to_string(),
            ));
        }
        let max_ms = parse_u64(value(ENV_RECONNECT_MAX_MS), 30_000)
            .map_err(ConfigError::InvalidReconnectMaxMs)?;
        if max_ms < base_ms {
            return Err(ConfigError::InvalidReconnectMaxMs(format!(
                "{max_ms} is below the base delay {base_ms}"
            )));
        }
        let max_attempts = parse_u64(value(ENV_RECONNECT_MAX_ATTEMPTS), 5)
            .map_err(ConfigError::InvalidReconnectMaxAttempts)
            .and_then(|raw| {
                u32::try_from(raw)
                    .map_err(|error| ConfigError::InvalidReconnectMaxAttempts(error.to_string()))
            })?;
        let connect_timeout_ms = parse_u64(value(ENV_CONNECT_TIMEOUT_MS), 10_000)
            .map_err(ConfigError::InvalidConnectTimeoutMs)?;

        Ok(Self {
            ws_path,
            reconnect: ReconnectPolicy {
                base_delay: Duration::from_millis(base_ms),
                max_delay: Duration::from_millis(max_ms),
                max_attempts,
            },
            connect_timeout: Duration::from_millis(connect_timeout_ms),
        })
    }
}

fn parse_u64(raw: Option<String>, default: u64) -> Result<u64, String> {
    match raw {
        Some(raw) => raw.parse::<u64>().map_err(|error| format!("{raw}: {error}")),
        None => Ok(default),
    }
}

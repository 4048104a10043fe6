//! Session error types.

use thiserror::Error;

/// Errors raised while setting a session up.
///
/// Runtime operations on the session never return these; they report through
/// status updates and events instead.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid origin: {0}")]
    InvalidOrigin(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("frame decode error: {0}")]
    Decode(String),

    #[error("session runtime stopped")]
    RuntimeStopped,
}

/// Session result type.
pub type Result<T> = std::result::Result<T, SessionError>;

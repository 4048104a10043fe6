//! Interfaces the session consumes from the rest of the application.

use std::sync::{Arc, PoisonError, RwLock};
use tracing::info;

/// Source of the bearer credential used to authenticate the session.
///
/// Read on every connect attempt, retries included.
pub trait CredentialProvider: Send + Sync {
    fn current_credential(&self) -> Option<String>;
}

/// Fixed credential, mostly useful for tools and tests.
#[derive(Debug, Clone)]
pub struct StaticCredential(Option<String>);

impl StaticCredential {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Some(token.into()))
    }

    pub fn absent() -> Self {
        Self(None)
    }
}

impl CredentialProvider for StaticCredential {
    fn current_credential(&self) -> Option<String> {
        self.0.clone()
    }
}

/// Replaceable credential shared with whatever refreshes tokens.
#[derive(Debug, Clone, Default)]
pub struct SharedCredential {
    inner: Arc<RwLock<Option<String>>>,
}

impl SharedCredential {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, token: impl Into<String>) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = Some(token.into());
    }

    pub fn clear(&self) {
        *self.inner.write().unwrap_or_else(PoisonError::into_inner) = None;
    }
}

impl CredentialProvider for SharedCredential {
    fn current_credential(&self) -> Option<String> {
        self.inner
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .filter(|token| !token.is_empty())
    }
}

/// Connection status keyword shown by the status indicator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Waiting,
    Connecting,
    Connected,
    Authorized,
    Reconnecting,
    Disconnected,
    Error,
    Failed,
}

impl ConnectionStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authorized => "authorized",
            Self::Reconnecting => "reconnecting",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
            Self::Failed => "failed",
        }
    }

    /// Default human-readable text for the indicator.
    #[must_use]
    pub fn display_text(self) -> &'static str {
        match self {
            Self::Waiting => "Waiting for sign-in",
            Self::Connecting => "Connecting...",
            Self::Connected => "Connected",
            Self::Authorized => "Authorized",
            Self::Reconnecting => "Reconnecting...",
            Self::Disconnected => "Disconnected",
            Self::Error => "Connection error",
            Self::Failed => "Connection failed",
        }
    }
}

/// Visual connection indicator.
pub trait StatusSink: Send + Sync {
    fn update(&self, status: ConnectionStatus, text: &str);
}

/// Status sink that only logs.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn update(&self, status: ConnectionStatus, text: &str) {
        info!(status = status.as_str(), "{}", text);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn shared_credential_tracks_updates() {
        let credential = SharedCredential::new();
        assert_eq!(credential.current_credential(), None);

        credential.set("first");
        let reader = credential.clone();
        assert_eq!(reader.current_credential().as_deref(), Some("first"));

        credential.set("");
        assert_eq!(reader.current_credential(), None);

        credential.set("second");
        credential.clear();
        assert_eq!(reader.current_credential(), None);
    }

    #[test]
    fn status_keywords_are_stable() {
        assert_eq!(ConnectionStatus::Authorized.as_str(), "authorized");
        assert_eq!(ConnectionStatus::Authorized.display_text(), "Authorized");
        assert_eq!(ConnectionStatus::Error.as_str(), "error");
        assert_eq!(StaticCredential::absent().current_credential(), None);
    }
}

//! Higher-level events the session publishes to the rest of the UI.

use serde_json::Value;
use std::time::Duration;

/// Event kind, used as the subscription key on the event bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Connected,
    Disconnected,
    Reconnecting,
    ReconnectFailed,
    Authorized,
    AuthFailed,
    NewMessage,
    MessageAck,
    UserTyping,
    UserStopTyping,
    MessageRead,
    MessageDelivered,
    UserStatus,
    FriendRequest,
    FriendAccepted,
    FriendRejected,
}

impl EventKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Reconnecting => "reconnecting",
            Self::ReconnectFailed => "reconnectFailed",
            Self::Authorized => "authorized",
            Self::AuthFailed => "authError",
            Self::NewMessage => "newMessage",
            Self::MessageAck => "messageAck",
            Self::UserTyping => "userTyping",
            Self::UserStopTyping => "userStopTyping",
            Self::MessageRead => "messageRead",
            Self::MessageDelivered => "messageDelivered",
            Self::UserStatus => "userStatus",
            Self::FriendRequest => "friendRequest",
            Self::FriendAccepted => "friendAccepted",
            Self::FriendRejected => "friendRejected",
        }
    }
}

/// Event published on the session's bus.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Transport opened and the auth frame was sent; not yet authorized.
    Connected,
    Disconnected,
    Reconnecting { attempt: u32, delay: Duration },
    ReconnectFailed { attempts: u32 },
    Authorized,
    AuthFailed { payload: Value },
    /// A classified inbound frame, carrying its full payload.
    Frame { kind: EventKind, payload: Value },
}

impl SessionEvent {
    #[must_use]
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Connected => EventKind::Connected,
            Self::Disconnected => EventKind::Disconnected,
            Self::Reconnecting { .. } => EventKind::Reconnecting,
            Self::ReconnectFailed { .. } => EventKind::ReconnectFailed,
            Self::Authorized => EventKind::Authorized,
            Self::AuthFailed { .. } => EventKind::AuthFailed,
            Self::Frame { kind, .. } => *kind,
        }
    }

    /// Frame payload for frame-derived events.
    #[must_use]
    pub fn payload(&self) -> Option<&Value> {
        match self {
            Self::AuthFailed { payload } | Self::Frame { payload, .. } => Some(payload),
            _ => None,
        }
    }
}

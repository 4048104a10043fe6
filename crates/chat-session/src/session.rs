//! Session manager: one authenticated real-time connection with bounded,
//! backed-off recovery.
//!
//! The manager is sans-IO. It opens transports through a [`Connector`], is
//! fed their [`TransportEvent`]s, and schedules reconnects through a
//! [`RetryScheduler`]. Nothing here blocks, returns an error, or panics;
//! outcomes surface as state, status updates and [`SessionEvent`]s.

use crate::collaborator::{ConnectionStatus, CredentialProvider, StatusSink};
use crate::config::SessionConfig;
use crate::event::{EventKind, SessionEvent};
use crate::frame::{FrameKind, InboundFrame, OutboundFrame, decode_frame};
use crate::listener::{EventBus, FrameListeners, Listener};
use crate::origin::PageOrigin;
use crate::transport::{
    CloseInfo, ConnectionId, Connector, NORMAL_CLOSURE, RetryScheduler, RetryTicket, Transport,
    TransportEvent,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Key that registers a frame listener for every frame type.
pub const WILDCARD: &str = "*";

/// Session lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    /// No credential was available; try again later.
    Waiting,
    Connecting,
    /// Transport open, authentication pending or rejected.
    Connected,
    Authorized,
    /// A reconnect is scheduled.
    Reconnecting,
    /// Reconnect attempts exhausted. Only `connect()` leaves this state.
    Failed,
}

impl SessionState {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Waiting => "waiting",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authorized => "authorized",
            Self::Reconnecting => "reconnecting",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_connected(self) -> bool {
        matches!(self, Self::Connected | Self::Authorized)
    }

    #[must_use]
    pub fn is_authorized(self) -> bool {
        self == Self::Authorized
    }
}

/// Point-in-time view of the session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    pub connection_id: Option<ConnectionId>,
    pub reconnect_attempts: u32,
    pub pending_friend_requests: u32,
    pub unread_messages: u32,
}

struct ActiveConnection {
    id: ConnectionId,
    transport: Box<dyn Transport>,
}

/// Owns the session's single transport and its state machine.
pub struct SessionManager {
    origin: PageOrigin,
    config: SessionConfig,
    credentials: Arc<dyn CredentialProvider>,
    status: Arc<dyn StatusSink>,
    connector: Box<dyn Connector>,
    scheduler: Box<dyn RetryScheduler>,
    connection: Option<ActiveConnection>,
    credential: Option<String>,
    state: SessionState,
    reconnect_attempts: u32,
    retry_generation: u64,
    next_connection_id: u64,
    frames: FrameListeners,
    events: EventBus,
    pending_friend_requests: u32,
    unread_messages: u32,
}

impl SessionManager {
    /// Build an idle session. Nothing is opened until [`Self::connect`].
    pub fn new(
        origin: PageOrigin,
        config: SessionConfig,
        credentials: Arc<dyn CredentialProvider>,
        status: Arc<dyn StatusSink>,
        connector: Box<dyn Connector>,
        scheduler: Box<dyn RetryScheduler>,
    ) -> Self {
        Self {
            origin,
            config,
            credentials,
            status,
            connector,
            scheduler,
            connection: None,
            credential: None,
            state: SessionState::Idle,
            reconnect_attempts: 0,
            retry_generation: 0,
            next_connection_id: 0,
            frames: FrameListeners::new(),
            events: EventBus::new(),
            pending_friend_requests: 0,
            unread_messages: 0,
        }
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Transport open, authorized or not.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.state.is_connected()
    }

    /// Server accepted the credential on the current transport.
    #[must_use]
    pub fn is_authorized(&self) -> bool {
        self.state.is_authorized()
    }

    /// Reconnects scheduled since the last successful open.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts
    }

    /// Identifier of the transport currently held, if any.
    #[must_use]
    pub fn connection_id(&self) -> Option<ConnectionId> {
        self.connection.as_ref().map(|connection| connection.id)
    }

    /// Friend requests received since the last clear.
    #[must_use]
    pub fn pending_friend_requests(&self) -> u32 {
        self.pending_friend_requests
    }

    /// Reset the friend-request counter.
    pub fn clear_pending_friend_requests(&mut self) {
        self.pending_friend_requests = 0;
    }

    /// Chat messages received since the last clear.
    #[must_use]
    pub fn unread_messages(&self) -> u32 {
        self.unread_messages
    }

    /// Reset the unread-message counter.
    pub fn clear_unread(&mut self) {
        self.unread_messages = 0;
    }

    /// Copy of the state and counters.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            state: self.state,
            connection_id: self.connection_id(),
            reconnect_attempts: self.reconnect_attempts,
            pending_friend_requests: self.pending_friend_requests,
            unread_messages: self.unread_messages,
        }
    }

    /// Shared handle to the raw frame listeners.
    #[must_use]
    pub fn frame_listeners(&self) -> FrameListeners {
        self.frames.clone()
    }

    /// Shared handle to the typed event bus.
    #[must_use]
    pub fn event_bus(&self) -> EventBus {
        self.events.clone()
    }

    /// Listen for raw frames of `frame_type` (or every frame with `"*"`).
    pub fn on(&self, frame_type: &str, listener: Listener<InboundFrame>) {
        if frame_type == WILDCARD {
            self.frames.on_any(listener);
        } else {
            self.frames.on(frame_type.to_string(), listener);
        }
    }

    /// Remove the first registration of `listener` for `frame_type`.
    pub fn off(&self, frame_type: &str, listener: &Listener<InboundFrame>) -> bool {
        if frame_type == WILDCARD {
            self.frames.off_any(listener)
        } else {
            self.frames.off(&frame_type.to_string(), listener)
        }
    }

    /// Listen for every raw frame.
    pub fn on_any(&self, listener: Listener<InboundFrame>) {
        self.frames.on_any(listener);
    }

    /// Remove the first wildcard registration of `listener`.
    pub fn off_any(&self, listener: &Listener<InboundFrame>) -> bool {
        self.frames.off_any(listener)
    }

    /// Listen for one kind of session event.
    pub fn subscribe(&self, kind: EventKind, listener: Listener<SessionEvent>) {
        self.events.on(kind, listener);
    }

    /// Listen for every session event.
    pub fn subscribe_all(&self, listener: Listener<SessionEvent>) {
        self.events.on_any(listener);
    }

    /// Remove the first registration of `listener` for `kind`.
    pub fn unsubscribe(&self, kind: EventKind, listener: &Listener<SessionEvent>) -> bool {
        self.events.off(&kind, listener)
    }

    /// Remove the first catch-all registration of `listener`.
    pub fn unsubscribe_all(&self, listener: &Listener<SessionEvent>) -> bool {
        self.events.off_any(listener)
    }

    /// Start (or restart) the session.
    ///
    /// Resets the reconnect counter and invalidates any pending retry.
    pub fn connect(&mut self) {
        self.reconnect_attempts = 0;
        self.retry_generation = self.retry_generation.wrapping_add(1);
        self.attempt_connect();
    }

    /// Close the session on request. Never schedules a reconnect.
    pub fn disconnect(&mut self) {
        self.retry_generation = self.retry_generation.wrapping_add(1);
        self.reconnect_attempts = 0;
        self.release_connection("client disconnect");
        self.credential = None;
        let previous = self.state;
        self.state = SessionState::Idle;
        self.set_status(ConnectionStatus::Disconnected);
        if previous != SessionState::Idle {
            info!(from = previous.as_str(), "session disconnected");
            self.emit(SessionEvent::Disconnected);
        }
    }

    /// Serialize and write `frame` if the transport is open.
    pub fn send<T: Serialize>(&mut self, frame: &T) -> bool {
        if !self.state.is_connected() {
            debug!(state = self.state.as_str(), "send skipped: not connected");
            return false;
        }
        let Some(connection) = self.connection.as_mut() else {
            return false;
        };
        match serde_json::to_string(frame) {
            Ok(text) => connection.transport.send_text(text),
            Err(error) => {
                warn!("failed to serialize outbound frame: {}", error);
                false
            }
        }
    }

    /// Apply a notification from transport `id`.
    ///
    /// Notifications for anything but the current transport are ignored.
    pub fn handle_transport_event(&mut self, id: ConnectionId, event: TransportEvent) {
        if self.connection_id() != Some(id) {
            debug!(%id, "ignoring event from released transport: {:?}", event);
            return;
        }
        match event {
            TransportEvent::Opened => self.on_open(),
            TransportEvent::Message(text) => self.on_text(&text),
            TransportEvent::Error(message) => self.on_error(&message),
            TransportEvent::Closed(close) => self.on_close(close),
        }
    }

    /// A reconnect timer fired.
    ///
    /// Stale tickets (superseded by `connect`/`disconnect` or another
    /// attempt) are ignored.
    pub fn handle_retry(&mut self, ticket: RetryTicket) {
        if ticket.generation != self.retry_generation
            || ticket.attempt != self.reconnect_attempts
            || self.state != SessionState::Reconnecting
        {
            debug!(
                attempt = ticket.attempt,
                state = self.state.as_str(),
                "ignoring stale reconnect timer"
            );
            return;
        }
        info!(
            attempt = ticket.attempt,
            max_attempts = self.config.reconnect.max_attempts,
            "reconnecting"
        );
        self.attempt_connect();
    }

    fn attempt_connect(&mut self) {
        self.release_connection("reconnecting");

        let Some(token) = self.credentials.current_credential() else {
            debug!("no credential available, waiting");
            self.credential = None;
            self.state = SessionState::Waiting;
            self.set_status(ConnectionStatus::Waiting);
            return;
        };

        let url = match self.origin.websocket_url(&self.config.ws_path, &token) {
            Ok(url) => url,
            Err(error) => {
                warn!("cannot build session URL: {}", error);
                self.state = SessionState::Failed;
                self.set_status(ConnectionStatus::Error);
                return;
            }
        };

        self.next_connection_id = self.next_connection_id.wrapping_add(1);
        let id = ConnectionId(self.next_connection_id);
        debug!(
            %id,
            host = self.origin.authority(),
            secure = self.origin.is_secure(),
            "opening transport"
        );
        let transport = self.connector.open(id, &url);
        self.connection = Some(ActiveConnection { id, transport });
        self.credential = Some(token);
        self.state = SessionState::Connecting;
        self.set_status(ConnectionStatus::Connecting);
    }

    fn release_connection(&mut self, reason: &str) {
        if let Some(mut connection) = self.connection.take() {
            debug!(id = %connection.id, reason, "releasing transport");
            connection.transport.close(NORMAL_CLOSURE, reason);
        }
    }

    fn on_open(&mut self) {
        info!("session transport open");
        self.reconnect_attempts = 0;
        self.state = SessionState::Connected;
        let token = self.credential.clone().unwrap_or_default();
        if !self.send(&OutboundFrame::auth(token)) {
            warn!("failed to send auth frame");
        }
        self.set_status(ConnectionStatus::Connected);
        self.emit(SessionEvent::Connected);
    }

    fn on_text(&mut self, text: &str) {
        let frame = match decode_frame(text) {
            Ok(frame) => frame,
            Err(error) => {
                warn!("dropping undecodable frame: {}", error);
                return;
            }
        };
        self.apply_frame(&frame);
        let delivered = self
            .frames
            .dispatch(&frame.type_str().to_string(), &frame);
        if delivered == 0 {
            debug!(frame_type = frame.type_str(), "no listener for frame");
        }
    }

    fn apply_frame(&mut self, frame: &InboundFrame) {
        match &frame.kind {
            FrameKind::AuthSuccess => {
                if self.state.is_connected() {
                    self.state = SessionState::Authorized;
                    self.set_status(ConnectionStatus::Authorized);
                    self.emit(SessionEvent::Authorized);
                } else {
                    warn!(state = self.state.as_str(), "auth_success outside an open session");
                }
            }
            FrameKind::AuthError => {
                warn!("authentication rejected: {}", frame.payload);
                if self.state == SessionState::Authorized {
                    self.state = SessionState::Connected;
                }
                self.set_status(ConnectionStatus::Error);
                self.emit(SessionEvent::AuthFailed {
                    payload: frame.payload.clone(),
                });
            }
            FrameKind::Pong => {}
            FrameKind::Error => warn!("server error frame: {}", frame.payload),
            FrameKind::Unknown(frame_type) => debug!("unrecognized frame type: {}", frame_type),
            kind if kind.is_call_signal() => {}
            kind => {
                match kind {
                    FrameKind::Message => {
                        self.unread_messages = self.unread_messages.saturating_add(1);
                    }
                    FrameKind::FriendRequest => {
                        debug!(from = ?frame.field("from"), "friend request");
                        self.pending_friend_requests =
                            self.pending_friend_requests.saturating_add(1);
                    }
                    _ => {}
                }
                if let Some(event_kind) = kind.event_kind() {
                    self.emit(SessionEvent::Frame {
                        kind: event_kind,
                        payload: frame.payload.clone(),
                    });
                }
            }
        }
    }

    fn on_error(&mut self, message: &str) {
        warn!("transport error: {}", message);
        self.set_status(ConnectionStatus::Error);
    }

    fn on_close(&mut self, close: CloseInfo) {
        self.connection = None;
        self.credential = None;

        if close.clean {
            info!(code = close.code, reason = %close.reason, "session closed");
            self.state = SessionState::Idle;
            self.set_status(ConnectionStatus::Disconnected);
            self.emit(SessionEvent::Disconnected);
            return;
        }

        warn!(code = close.code, reason = %close.reason, "session dropped");
        let policy = self.config.reconnect;
        if !policy.allows(self.reconnect_attempts) {
            warn!(
                attempts = self.reconnect_attempts,
                "reconnect attempts exhausted"
            );
            self.state = SessionState::Failed;
            self.set_status(ConnectionStatus::Failed);
            self.emit(SessionEvent::ReconnectFailed {
                attempts: self.reconnect_attempts,
            });
            return;
        }

        self.reconnect_attempts += 1;
        let attempt = self.reconnect_attempts;
        let delay = policy.delay_for(attempt);
        self.state = SessionState::Reconnecting;
        self.status.update(
            ConnectionStatus::Reconnecting,
            &format!(
                "Reconnecting in {}s ({}/{})",
                delay.as_secs_f64(),
                attempt,
                policy.max_attempts
            ),
        );
        self.emit(SessionEvent::Reconnecting { attempt, delay });
        self.scheduler.schedule(
            delay,
            RetryTicket {
                generation: self.retry_generation,
                attempt,
            },
        );
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status.update(status, status.display_text());
    }

    fn emit(&self, event: SessionEvent) {
        self.events.dispatch(&event.kind(), &event);
    }
}

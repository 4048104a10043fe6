//! Tokio host for a [`SessionManager`].
//!
//! One task owns the manager and applies commands, transport events and
//! retry firings strictly one at a time, in arrival order. Callers talk to it
//! through a cloneable [`SessionHandle`]; listener registration goes straight
//! to the shared registries and needs no round trip.

use crate::collaborator::{CredentialProvider, StatusSink};
use crate::config::SessionConfig;
use crate::error::{Result, SessionError};
use crate::event::{EventKind, SessionEvent};
use crate::frame::InboundFrame;
use crate::listener::{EventBus, FrameListeners, Listener};
use crate::origin::PageOrigin;
use crate::session::{SessionManager, SessionSnapshot, WILDCARD};
use crate::transport::{ConnectionId, RetryTicket, TransportEvent};
use crate::ws::{ConnectionTasks, TokioRetryScheduler, WsConnector};
use serde::Serialize;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// How long shutdown waits for released connections to finish closing.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

enum Command {
    Connect,
    Disconnect,
    Send(Value, oneshot::Sender<bool>),
    Snapshot(oneshot::Sender<SessionSnapshot>),
    ClearPendingFriendRequests,
    ClearUnread,
    Shutdown,
}

/// Cloneable handle to a running session.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::UnboundedSender<Command>,
    frames: FrameListeners,
    events: EventBus,
}

impl SessionHandle {
    /// Build a session over tokio-tungstenite and start its task.
    ///
    /// Must be called from within a tokio runtime. The session stays idle
    /// until [`SessionHandle::connect`].
    pub fn spawn(
        origin: PageOrigin,
        config: SessionConfig,
        credentials: Arc<dyn CredentialProvider>,
        status: Arc<dyn StatusSink>,
    ) -> (Self, JoinHandle<()>) {
        let (transport_tx, transport_rx) = mpsc::unbounded_channel();
        let (retry_tx, retry_rx) = mpsc::unbounded_channel();
        let connector = WsConnector::new(transport_tx, config.connect_timeout);
        let connections = connector.tasks();
        let scheduler = TokioRetryScheduler::new(retry_tx);
        let session = SessionManager::new(
            origin,
            config,
            credentials,
            status,
            Box::new(connector),
            Box::new(scheduler),
        );

        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let handle = Self {
            commands: command_tx,
            frames: session.frame_listeners(),
            events: session.event_bus(),
        };
        let task = tokio::spawn(drive(
            session,
            connections,
            command_rx,
            transport_rx,
            retry_rx,
        ));
        (handle, task)
    }

    /// Ask the session to (re)connect. Returns `false` if it has stopped.
    pub fn connect(&self) -> bool {
        self.commands.send(Command::Connect).is_ok()
    }

    /// Ask the session to close. Returns `false` if it has stopped.
    pub fn disconnect(&self) -> bool {
        self.commands.send(Command::Disconnect).is_ok()
    }

    /// Disconnect and stop the session task.
    ///
    /// The task finishes once the released connection has sent its close
    /// frame, or after a short grace period.
    pub fn shutdown(&self) {
        let _ = self.commands.send(Command::Shutdown);
    }

    /// Send `frame` if the transport is open; `false` otherwise.
    pub async fn send<T: Serialize>(&self, frame: &T) -> bool {
        let value = match serde_json::to_value(frame) {
            Ok(value) => value,
            Err(error) => {
                warn!("failed to serialize outbound frame: {}", error);
                return false;
            }
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        if self.commands.send(Command::Send(value, reply_tx)).is_err() {
            return false;
        }
        reply_rx.await.unwrap_or(false)
    }

    /// Current state and counters, read on the session task.
    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Snapshot(reply_tx))
            .map_err(|_| SessionError::RuntimeStopped)?;
        reply_rx.await.map_err(|_| SessionError::RuntimeStopped)
    }

    /// Reset the friend-request counter.
    pub fn clear_pending_friend_requests(&self) {
        let _ = self.commands.send(Command::ClearPendingFriendRequests);
    }

    /// Reset the unread-message counter.
    pub fn clear_unread(&self) {
        let _ = self.commands.send(Command::ClearUnread);
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
}

async fn drive(
    mut session: SessionManager,
    connections: ConnectionTasks,
    mut commands: mpsc::UnboundedReceiver<Command>,
    mut transport_events: mpsc::UnboundedReceiver<(ConnectionId, TransportEvent)>,
    mut retries: mpsc::UnboundedReceiver<RetryTicket>,
) {
    loop {
        tokio::select! {
            command = commands.recv() => match command {
                Some(Command::Connect) => session.connect(),
                Some(Command::Disconnect) => session.disconnect(),
                Some(Command::Send(frame, reply)) => {
                    let _ = reply.send(session.send(&frame));
                }
                Some(Command::Snapshot(reply)) => {
                    let _ = reply.send(session.snapshot());
                }
                Some(Command::ClearPendingFriendRequests) => session.clear_pending_friend_requests(),
                Some(Command::ClearUnread) => session.clear_unread(),
                Some(Command::Shutdown) | None => {
                    session.disconnect();
                    connections.drain(SHUTDOWN_GRACE).await;
                    debug!("session task stopped");
                    return;
                }
            },
            Some((id, event)) = transport_events.recv() => {
                session.handle_transport_event(id, event);
            }
            Some(ticket) = retries.recv() => {
                session.handle_retry(ticket);
            }
        }
    }
}

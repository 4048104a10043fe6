//! Transport and timer seams the session is driven through.
//!
//! The session never blocks: it asks a [`Connector`] to open a connection and
//! learns the outcome later through [`TransportEvent`]s tagged with the
//! [`ConnectionId`] it allocated. Reconnect delays go through a
//! [`RetryScheduler`] that hands the [`RetryTicket`] back when it fires.

use std::fmt;
use std::time::Duration;
use url::Url;

/// Normal closure status code.
pub const NORMAL_CLOSURE: u16 = 1000;
/// Status reported when a connection dropped without a closing handshake.
pub const ABNORMAL_CLOSURE: u16 = 1006;

/// Identifier of one transport instance opened by the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// How a transport closed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CloseInfo {
    pub code: u16,
    pub reason: String,
    /// The closing handshake completed.
    pub clean: bool,
}

impl CloseInfo {
    pub fn clean(code: u16, reason: impl Into<String>) -> Self {
        Self {
            code,
            reason: reason.into(),
            clean: true,
        }
    }

    pub fn abnormal(reason: impl Into<String>) -> Self {
        Self {
            code: ABNORMAL_CLOSURE,
            reason: reason.into(),
            clean: false,
        }
    }
}

/// Notification from an open or opening transport.
///
/// An `Error` is always followed by a `Closed` for the same connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Opened,
    Message(String),
    Error(String),
    Closed(CloseInfo),
}

/// Write half of a transport owned by the session.
pub trait Transport: Send {
    /// Queue a text frame. Returns `false` if the transport can no longer
    /// accept writes.
    fn send_text(&mut self, text: String) -> bool;

    /// Start the closing handshake.
    fn close(&mut self, code: u16, reason: &str);
}

/// Opens transports; the outcome arrives as [`TransportEvent`]s.
pub trait Connector: Send {
    fn open(&mut self, id: ConnectionId, url: &Url) -> Box<dyn Transport>;
}

/// Pending reconnect, handed back to the session when its delay elapses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryTicket {
    pub generation: u64,
    pub attempt: u32,
}

/// Timer used for reconnect backoff.
pub trait RetryScheduler: Send {
    fn schedule(&mut self, delay: Duration, ticket: RetryTicket);
}

//! Persistent real-time chat session.
//!
//! Owns a single WebSocket connection to the chat server:
//! - authenticates it with an `auth` frame as soon as it opens
//! - classifies inbound frames and fans them out to listeners and a typed
//!   event bus
//! - recovers from abnormal drops with bounded exponential backoff
//!
//! [`SessionManager`] is the synchronous state machine; [`SessionHandle`]
//! hosts it on a tokio task over tokio-tungstenite.

pub mod backoff;
pub mod collaborator;
pub mod config;
pub mod error;
pub mod event;
pub mod frame;
pub mod listener;
pub mod origin;
pub mod runtime;
pub mod session;
pub mod transport;
pub mod ws;

pub use backoff::ReconnectPolicy;
pub use collaborator::{
    ConnectionStatus, CredentialProvider, SharedCredential, StaticCredential, StatusSink,
    TracingStatusSink,
};
pub use config::{ConfigError, SessionConfig};
pub use error::{Result, SessionError};
pub use event::{EventKind, SessionEvent};
pub use frame::{FrameKind, InboundFrame, OutboundFrame, decode_frame};
pub use listener::{EventBus, FrameListeners, Listener, ListenerRegistry, listener};
pub use origin::PageOrigin;
pub use runtime::SessionHandle;
pub use session::{SessionManager, SessionSnapshot, SessionState, WILDCARD};
pub use transport::{
    CloseInfo, ConnectionId, Connector, RetryScheduler, RetryTicket, Transport, TransportEvent,
};
pub use ws::{TokioRetryScheduler, WsConnector};

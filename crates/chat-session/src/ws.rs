//! WebSocket transport over tokio-tungstenite.
//!
//! Each opened connection runs on its own task that owns both halves of the
//! socket. Writes and the close request reach it over an unbounded channel;
//! everything it observes goes back as `(ConnectionId, TransportEvent)`.
//! A close request is honoured during the handshake too: the pending connect
//! is dropped along with its socket.

use crate::transport::{
    CloseInfo, ConnectionId, Connector, RetryScheduler, RetryTicket, Transport, TransportEvent,
};
use futures_util::{SinkExt, StreamExt};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::timeout;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tracing::{debug, warn};
use url::Url;

/// Channel the transports report on.
pub type TransportEvents = mpsc::UnboundedSender<(ConnectionId, TransportEvent)>;

/// Close status reported when the peer's close frame had no code.
const NO_STATUS_RECEIVED: u16 = 1005;

enum Outgoing {
    Text(String),
    Close(u16, String),
}

/// Connection tasks spawned by a [`WsConnector`].
///
/// Cloning shares the same set. Finished tasks are reaped on the next spawn.
#[derive(Clone, Default)]
pub struct ConnectionTasks {
    inner: Arc<Mutex<JoinSet<()>>>,
}

impl ConnectionTasks {
    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    /// Wait up to `grace` for every connection task to finish, then abort
    /// whatever is left.
    pub async fn drain(&self, grace: Duration) {
        let mut tasks = std::mem::take(&mut *self.tasks());
        let joined = timeout(grace, async {
            while tasks.join_next().await.is_some() {}
        })
        .await;
        if joined.is_err() {
            warn!(
                remaining = tasks.len(),
                "connection tasks still running after {:?}, aborting", grace
            );
            tasks.abort_all();
        }
    }

    fn tasks(&self) -> MutexGuard<'_, JoinSet<()>> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Opens tokio-tungstenite connections on the current runtime.
pub struct WsConnector {
    events: TransportEvents,
    connect_timeout: Duration,
    tasks: ConnectionTasks,
}

impl WsConnector {
    pub fn new(events: TransportEvents, connect_timeout: Duration) -> Self {
        // Fails only when a provider is already installed for the process.
        let _ = rustls::crypto::ring::default_provider().install_default();
        Self {
            events,
            connect_timeout,
            tasks: ConnectionTasks::default(),
        }
    }

    /// Handle to the connection tasks this connector spawns.
    #[must_use]
    pub fn tasks(&self) -> ConnectionTasks {
        self.tasks.clone()
    }
}

impl Connector for WsConnector {
    fn open(&mut self, id: ConnectionId, url: &Url) -> Box<dyn Transport> {
        let (outgoing_tx, outgoing_rx) = mpsc::unbounded_channel();
        self.tasks.spawn(run_connection(
            id,
            url.clone(),
            self.connect_timeout,
            self.events.clone(),
            outgoing_rx,
        ));
        Box::new(WsTransport {
            outgoing: outgoing_tx,
        })
    }
}

struct WsTransport {
    outgoing: mpsc::UnboundedSender<Outgoing>,
}

impl Transport for WsTransport {
    fn send_text(&mut self, text: String) -> bool {
        self.outgoing.send(Outgoing::Text(text)).is_ok()
    }

    fn close(&mut self, code: u16, reason: &str) {
        let _ = self
            .outgoing
            .send(Outgoing::Close(code, reason.to_string()));
    }
}

async fn run_connection(
    id: ConnectionId,
    url: Url,
    connect_timeout: Duration,
    events: TransportEvents,
    mut outgoing: mpsc::UnboundedReceiver<Outgoing>,
) {
    let report = |event: TransportEvent| {
        let _ = events.send((id, event));
    };

    let connect = timeout(connect_timeout, connect_async(url.as_str()));
    tokio::pin!(connect);
    let stream = loop {
        tokio::select! {
            result = &mut connect => match result {
                Ok(Ok((stream, _response))) => break stream,
                Ok(Err(error)) => {
                    report(TransportEvent::Error(error.to_string()));
                    report(TransportEvent::Closed(CloseInfo::abnormal(error.to_string())));
                    return;
                }
                Err(_) => {
                    let message = format!("connection timeout after {:?}", connect_timeout);
                    report(TransportEvent::Error(message.clone()));
                    report(TransportEvent::Closed(CloseInfo::abnormal(message)));
                    return;
                }
            },
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(_)) => {
                    debug!(%id, "dropping write queued before the handshake completed");
                }
                Some(Outgoing::Close(code, reason)) => {
                    debug!(%id, reason = %reason, "released while connecting");
                    report(TransportEvent::Closed(CloseInfo::clean(code, reason)));
                    return;
                }
                None => {
                    debug!(%id, "transport dropped while connecting");
                    return;
                }
            },
        }
    };

    debug!(%id, "websocket open");
    report(TransportEvent::Opened);
    let (mut writer, mut reader) = stream.split();

    loop {
        tokio::select! {
            command = outgoing.recv() => match command {
                Some(Outgoing::Text(text)) => {
                    if let Err(error) = writer.send(Message::Text(text.into())).await {
                        warn!(%id, "websocket write error: {}", error);
                        report(TransportEvent::Error(error.to_string()));
                        report(TransportEvent::Closed(CloseInfo::abnormal(error.to_string())));
                        return;
                    }
                }
                Some(Outgoing::Close(code, reason)) => {
                    let frame = CloseFrame {
                        code: CloseCode::from(code),
                        reason: reason.clone().into(),
                    };
                    if let Err(error) = writer.send(Message::Close(Some(frame))).await {
                        debug!(%id, "close frame not delivered: {}", error);
                    }
                    report(TransportEvent::Closed(CloseInfo::clean(code, reason)));
                    return;
                }
                None => {
                    let _ = writer.close().await;
                    return;
                }
            },
            frame = reader.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    report(TransportEvent::Message(text.as_str().to_owned()));
                }
                Some(Ok(Message::Binary(payload))) => {
                    debug!(%id, "ignoring binary frame ({} bytes)", payload.len());
                }
                Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                Some(Ok(Message::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|frame| (u16::from(frame.code), frame.reason.to_string()))
                        .unwrap_or((NO_STATUS_RECEIVED, String::new()));
                    let _ = writer.close().await;
                    report(TransportEvent::Closed(CloseInfo::clean(code, reason)));
                    return;
                }
                Some(Err(error)) => {
                    warn!(%id, "websocket read error: {}", error);
                    report(TransportEvent::Error(error.to_string()));
                    report(TransportEvent::Closed(CloseInfo::abnormal(error.to_string())));
                    return;
                }
                None => {
                    report(TransportEvent::Closed(CloseInfo::abnormal("stream ended")));
                    return;
                }
            },
        }
    }
}

/// Reconnect timer backed by `tokio::time::sleep`.
///
/// Fired tickets are delivered on `retries`; the session decides whether they
/// are still current.
pub struct TokioRetryScheduler {
    retries: mpsc::UnboundedSender<RetryTicket>,
}

impl TokioRetryScheduler {
    pub fn new(retries: mpsc::UnboundedSender<RetryTicket>) -> Self {
        Self { retries }
    }
}

impl RetryScheduler for TokioRetryScheduler {
    fn schedule(&mut self, delay: Duration, ticket: RetryTicket) {
        let retries = self.retries.clone();
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = retries.send(ticket);
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retry_ticket_arrives_after_delay() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut scheduler = TokioRetryScheduler::new(tx);
        let ticket = RetryTicket {
            generation: 3,
            attempt: 1,
        };
        scheduler.schedule(Duration::from_millis(1_000), ticket);

        tokio::time::sleep(Duration::from_millis(999)).await;
        assert!(rx.try_recv().is_err());

        tokio::time::sleep(Duration::from_millis(2)).await;
        assert_eq!(rx.recv().await, Some(ticket));
    }

    #[tokio::test]
    async fn refused_connection_reports_error_then_abnormal_close() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        drop(listener);

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new(tx, Duration::from_secs(5));
        let url = Url::parse(&format!("ws://{addr}/ws"))?;
        let _transport = connector.open(ConnectionId(1), &url);

        let first = rx.recv().await;
        assert!(matches!(
            first,
            Some((ConnectionId(1), TransportEvent::Error(_)))
        ));
        let second = rx.recv().await;
        match second {
            Some((ConnectionId(1), TransportEvent::Closed(close))) => {
                assert!(!close.clean);
                assert_eq!(close.code, crate::transport::ABNORMAL_CLOSURE);
            }
            other => panic!("expected abnormal close, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn secure_url_reaches_the_tls_handshake() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            if let Ok((stream, _)) = listener.accept().await {
                drop(stream);
            }
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new(tx, Duration::from_secs(5));
        let url = Url::parse(&format!("wss://{addr}/ws?token=t"))?;
        let _transport = connector.open(ConnectionId(1), &url);

        match timeout(Duration::from_secs(5), rx.recv()).await? {
            Some((ConnectionId(1), TransportEvent::Error(message))) => {
                assert!(
                    !message.contains("TLS support not compiled in"),
                    "unexpected error: {message}"
                );
            }
            other => panic!("expected a handshake error, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn close_during_handshake_drops_the_socket() -> anyhow::Result<()> {
        use tokio::io::AsyncReadExt;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new(tx, Duration::from_secs(30));
        let url = Url::parse(&format!("ws://{addr}/ws"))?;
        let mut transport = connector.open(ConnectionId(7), &url);

        // accept the TCP connection but never answer the upgrade
        let (mut server, _) = timeout(Duration::from_secs(5), listener.accept()).await??;
        transport.close(1000, "reconnecting");
        drop(transport);

        let mut buf = [0_u8; 1024];
        let eof = timeout(Duration::from_secs(2), async {
            loop {
                match server.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(_) => {}
                }
            }
        })
        .await;
        assert!(eof.is_ok(), "released socket still open");

        match timeout(Duration::from_secs(5), rx.recv()).await? {
            Some((ConnectionId(7), TransportEvent::Closed(close))) => {
                assert!(close.clean);
                assert_eq!(close.code, 1000);
                assert_eq!(close.reason, "reconnecting");
            }
            other => panic!("expected a close report, got {other:?}"),
        }
        Ok(())
    }

    #[tokio::test]
    async fn drain_waits_for_released_connections() -> anyhow::Result<()> {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        tokio::spawn(async move {
            let Ok((stream, _)) = listener.accept().await else {
                return;
            };
            let Ok(mut ws) = tokio_tungstenite::accept_async(stream).await else {
                return;
            };
            while let Some(Ok(_)) = ws.next().await {}
        });

        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut connector = WsConnector::new(tx, Duration::from_secs(5));
        let tasks = connector.tasks();
        let url = Url::parse(&format!("ws://{addr}/ws"))?;
        let mut transport = connector.open(ConnectionId(2), &url);

        let opened = timeout(Duration::from_secs(5), rx.recv()).await?;
        assert!(matches!(
            opened,
            Some((ConnectionId(2), TransportEvent::Opened))
        ));

        transport.close(1000, "client disconnect");
        drop(transport);
        tasks.drain(Duration::from_secs(5)).await;

        match rx.try_recv() {
            Ok((ConnectionId(2), TransportEvent::Closed(close))) => {
                assert!(close.clean);
                assert_eq!(close.code, 1000);
            }
            other => panic!("expected the close to be reported before drain returned, got {other:?}"),
        }
        Ok(())
    }
}

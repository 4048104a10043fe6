use std::sync::Arc;

use anyhow::{Context, Result};
use chat_session::{
    CredentialProvider, InboundFrame, PageOrigin, SessionConfig, SessionEvent, SessionHandle,
    StaticCredential, TracingStatusSink, WILDCARD, listener,
};
use clap::Parser;
use tracing::{debug, info};

const ENV_ORIGIN: &str = "CHAT_SESSION_ORIGIN";
const ENV_TOKEN: &str = "CHAT_SESSION_TOKEN";

#[derive(Parser, Debug)]
#[command(name = "chat-session")]
#[command(about = "Hold an authenticated chat session open and log what arrives")]
struct Args {
    /// Page origin the chat is served from, e.g. https://chat.example.com.
    /// Defaults to CHAT_SESSION_ORIGIN.
    #[arg(long)]
    origin: Option<String>,

    /// Bearer credential. Defaults to CHAT_SESSION_TOKEN.
    #[arg(long)]
    token: Option<String>,

    /// Override the real-time endpoint path.
    #[arg(long)]
    path: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let mut config = SessionConfig::from_env().context("load session config")?;
    if let Some(path) = args.path {
        config.ws_path = path;
    }

    let raw_origin = args
        .origin
        .or_else(|| std::env::var(ENV_ORIGIN).ok())
        .with_context(|| format!("--origin or {ENV_ORIGIN} is required"))?;
    let origin = PageOrigin::parse(&raw_origin).context("parse origin")?;

    let credentials: Arc<dyn CredentialProvider> =
        match args.token.or_else(|| std::env::var(ENV_TOKEN).ok()) {
            Some(token) => Arc::new(StaticCredential::new(token)),
            None => Arc::new(StaticCredential::absent()),
        };

    let (session, task) =
        SessionHandle::spawn(origin, config, credentials, Arc::new(TracingStatusSink));

    session.subscribe_all(listener(|event: &SessionEvent| match event.payload() {
        Some(payload) => info!(event = event.kind().as_str(), %payload, "session event"),
        None => info!(event = event.kind().as_str(), "session event"),
    }));
    session.on(
        WILDCARD,
        listener(|frame: &InboundFrame| debug!(frame_type = frame.type_str(), "frame")),
    );

    session.connect();
    tokio::signal::ctrl_c()
        .await
        .context("wait for ctrl-c")?;
    info!("shutting down");
    session.shutdown();
    task.await.context("join session task")?;
    Ok(())
}

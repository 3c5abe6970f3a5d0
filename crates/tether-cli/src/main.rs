//! Tether command-line client.
//!
//! Opens a realtime session, joins rooms, and logs chat and call-signaling
//! traffic until interrupted. Useful for watching a room or smoke-testing a
//! deployment.
//!
//! # Usage
//!
//! ```bash
//! # Watch a cohort room
//! TETHER_TOKEN=... tether --endpoint wss://example.org/realtime cohort-7
//!
//! # Post one message to every joined room, then keep listening
//! tether --token "$TOKEN" --send "office hours start now" cohort-7 inbox-42
//! ```

use std::time::Duration;

use clap::Parser;
use tether_client::{
    DEFAULT_ENDPOINT, Session, SessionConfig, SessionError, SystemEnv,
    websocket::WebSocketTransport,
};
use tether_proto::{OutgoingMessage, SignalKind, event};
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Tether realtime client
#[derive(Parser, Debug)]
#[command(name = "tether")]
#[command(about = "Connect to the realtime channel and log room traffic")]
#[command(version)]
struct Args {
    /// Rooms to join after connecting
    rooms: Vec<String>,

    /// WebSocket endpoint
    #[arg(short, long, default_value = DEFAULT_ENDPOINT)]
    endpoint: String,

    /// Bearer token for the handshake
    #[arg(short, long, env = "TETHER_TOKEN", hide_env_values = true)]
    token: String,

    /// Message to send to every joined room once connected
    #[arg(short, long)]
    send: Option<String>,

    /// Seconds without inbound traffic before reconnecting
    #[arg(long, default_value = "60")]
    idle_timeout: u64,

    /// Seconds between heartbeats
    #[arg(long, default_value = "20")]
    heartbeat_interval: u64,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&args.log_level));

    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();

    let config = SessionConfig::new(&args.endpoint)
        .with_idle_timeout(Duration::from_secs(args.idle_timeout))
        .with_heartbeat_interval(Duration::from_secs(args.heartbeat_interval));

    let mut session = Session::new(WebSocketTransport::new(), SystemEnv::new(), config);

    let canceller = session.canceller();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, disconnecting");
            canceller.cancel();
        }
    });

    session.on(event::CONNECTION_STATE_CHANGED, |payload| {
        tracing::info!(%payload, "state");
        Ok(())
    });

    let mut relay = session.relay();
    let _messages = relay.on_message(None, |message| {
        tracing::info!(
            room = %message.room_id,
            from = %message.sender_id,
            title = message.title.as_deref().unwrap_or(""),
            "{}",
            message.content
        );
    });
    let _signals: Vec<_> = [SignalKind::Offer, SignalKind::Answer, SignalKind::IceCandidate]
        .into_iter()
        .map(|kind| {
            relay.on_signal(kind, move |signal| {
                tracing::info!(
                    ?kind,
                    call = %signal.session_id,
                    from = %signal.sender_id,
                    payload = %signal.payload,
                    "signal"
                );
            })
        })
        .collect();

    for room in &args.rooms {
        session.join(room).await?;
    }

    match session.connect(&args.token).await {
        Ok(()) => {},
        Err(SessionError::Cancelled) => return Ok(()),
        Err(e) => return Err(e.into()),
    }
    tracing::info!(session_id = session.session_id().unwrap_or("-"), "connected");

    if let Some(text) = &args.send {
        for room in &args.rooms {
            session.relay().send_message(OutgoingMessage::new(room.as_str(), text.as_str())).await?;
        }
    }

    match session.run().await {
        Ok(()) => {
            if let Some(error) = session.last_error() {
                tracing::error!(%error, "session ended");
                return Err(error.clone().into());
            }
            Ok(())
        },
        Err(SessionError::Cancelled) => Ok(()),
        Err(e) => Err(e.into()),
    }
}

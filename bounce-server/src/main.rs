//! bounced — the bounce message-broadcast server.
//!
//! Clients attach to `/g/<room>` over a WebSocket and every payload they
//! send is bounced to the other members of the room.

use std::time::Duration;

use clap::Parser;
use tokio::net::TcpListener;

use bounce_core::{Config, Registry};

#[derive(Parser, Debug)]
#[command(name = "bounced", version, about = "Multi-room message-broadcast server")]
struct Args {
    /// Port to listen on (falls back to $PORT, then 8080)
    #[arg(long, short)]
    port: Option<u16>,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: String,

    /// Reconnection grace in milliseconds
    #[arg(long)]
    grace_ms: Option<u64>,

    /// Maximum sessions per room
    #[arg(long)]
    max_clients: Option<usize>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();
    let args = Args::parse();

    let port = args
        .port
        .or_else(|| std::env::var("PORT").ok().and_then(|p| p.parse().ok()))
        .unwrap_or(8080);

    let mut config = Config::default();
    if let Some(ms) = args.grace_ms {
        config.reconnection_grace = Duration::from_millis(ms);
    }
    if let Some(max) = args.max_clients {
        config.max_clients_per_room = max;
    }

    let registry = Registry::new(config);
    let addr = format!("{}:{port}", args.bind);
    let listener = TcpListener::bind(&addr).await?;
    log::info!("bounced v{} listening on {addr}", env!("CARGO_PKG_VERSION"));

    bounce_server::serve(listener, registry).await?;
    Ok(())
}

//! Relay server demo
//!
//! Run with: cargo run --example relay_server [BIND_ADDR]
//!
//! Examples:
//!   cargo run --example relay_server                  # binds to 0.0.0.0:8000
//!   cargo run --example relay_server 127.0.0.1:9000   # binds to 127.0.0.1:9000
//!
//! Point clients at it with `SyncConfig::with_relay(addr)`. Stop with
//! Ctrl-C; connected clients receive a `bye` frame and do not reconnect.

use std::net::SocketAddr;
use std::time::Duration;

use roomsync::{RelayConfig, RelayServer};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomsync=info")),
        )
        .init();

    let addr: SocketAddr = match std::env::args().nth(1) {
        Some(arg) => arg.parse()?,
        None => "0.0.0.0:8000".parse()?,
    };

    let config = RelayConfig::with_addr(addr)
        .idle_timeout(Duration::from_secs(120))
        .room_history(500);
    let server = RelayServer::new(config);

    println!("Relay listening on {}", server.bind_addr());
    server
        .run_until(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    let stats = server.stats().await;
    println!(
        "Stats: connections={} rejected={} rooms={} messages={}",
        stats.total_connections, stats.rejected_connections, stats.rooms, stats.messages_relayed
    );
    Ok(())
}

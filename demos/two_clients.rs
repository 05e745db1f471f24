//! Two clients chatting in one process
//!
//! Run with: cargo run --example two_clients [RELAY_ADDR]
//!
//! Without an address both clients share an in-process room registry.
//! With one (see the `relay_server` demo) they talk through the relay and
//! fall back to a shared polling store if it goes away.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use roomsync::{
    Participant, PollingStore, RoomRegistry, SessionEvent, SyncConfig, SyncSession,
    TransportKind, TransportResources,
};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("roomsync=info")),
        )
        .init();

    let relay: Option<SocketAddr> = std::env::args().nth(1).map(|a| a.parse()).transpose()?;

    let resources = TransportResources::new()
        .with_registry(Arc::new(RoomRegistry::new()))
        .with_polling(Arc::new(PollingStore::default()));
    let config = match relay {
        Some(addr) => SyncConfig::with_relay(addr)
            .transport_order(vec![TransportKind::Relay, TransportKind::Polling]),
        None => SyncConfig::default(),
    };

    let mut alice = SyncSession::new(
        config.clone(),
        Participant::new("alice", "Alice"),
        resources.clone(),
    );
    let mut bob = SyncSession::new(config, Participant::new("bob", "Bob"), resources);

    let mut bob_events = bob.subscribe();
    let printer = tokio::spawn(async move {
        while let Ok(event) = bob_events.recv().await {
            match event {
                SessionEvent::MessagesAdded(messages) => {
                    for m in messages {
                        println!("[bob] {} <{}>: {}", m.timestamp, m.author, m.body);
                    }
                }
                SessionEvent::PresenceChanged(online) => {
                    let names: Vec<_> = online.iter().map(|p| p.display_name.as_str()).collect();
                    println!("[bob] online: {:?}", names);
                }
                SessionEvent::StatusChanged { status, method } => {
                    println!("[bob] {} via {:?}", status, method);
                }
                SessionEvent::RoomChanged(room) => println!("[bob] room: {:?}", room),
                SessionEvent::ExistingPeers(_)
                | SessionEvent::NewPeer(_)
                | SessionEvent::Signal(_) => {}
            }
        }
    });

    alice.join("lobby").await;
    bob.join("lobby").await;
    alice.wait_connected(Duration::from_secs(5)).await;
    bob.wait_connected(Duration::from_secs(5)).await;

    alice.send("hello").await?;
    bob.send("hi").await?;
    tokio::time::sleep(Duration::from_millis(500)).await;

    for m in alice.messages().await {
        println!("[alice] {}: {}", m.author, m.body);
    }
    let stats = alice.stats().await;
    println!(
        "[alice] sent={} received={} duplicates={}",
        stats.messages_sent, stats.messages_received, stats.duplicates_dropped
    );

    alice.leave().await;
    bob.leave().await;
    drop(bob);
    let _ = printer.await;
    Ok(())
}

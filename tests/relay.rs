#[macro_use]
mod common;

use std::sync::Arc;
use std::time::Duration;

use roomsync::{ConnectionStatus, PollingStore, RoomId, SyncConfig, TransportKind, TransportResources};

use common::{free_addr, init_tracing, session, RunningRelay};

fn relay_only(addr: std::net::SocketAddr) -> SyncConfig {
    SyncConfig::with_relay(addr)
        .transport_order(vec![TransportKind::Relay])
        .reconnect_base_delay(Duration::from_millis(100))
        .connect_timeout(Duration::from_millis(500))
}

#[tokio::test]
async fn sessions_exchange_messages_through_relay() {
    init_tracing();
    let relay = RunningRelay::start("127.0.0.1:0".parse().unwrap()).await;

    let mut alice = session("alice", relay_only(relay.addr), TransportResources::new());
    let mut bob = session("bob", relay_only(relay.addr), TransportResources::new());
    alice.join("standup").await;
    bob.join("standup").await;
    assert!(alice.wait_connected(Duration::from_secs(2)).await);
    assert!(bob.wait_connected(Duration::from_secs(2)).await);
    assert_eq!(alice.connection_method().await, Some(TransportKind::Relay));

    let hello = alice.send("hello").await.unwrap();
    eventually!("bob receives hello", bob.messages().await.contains(&hello));

    // The relay echoes to the sender too; the copy is dropped as a duplicate
    eventually!("echo dropped", alice.stats().await.duplicates_dropped >= 1);
    assert_eq!(alice.messages().await.len(), 1);

    eventually!("relay rosters", {
        alice.online_users().await.len() == 1 && bob.online_users().await.len() == 1
    });
    assert_eq!(alice.online_users().await[0].id.as_str(), "bob");

    let stats = relay.server.stats().await;
    assert_eq!(stats.active_connections, 2);
    assert_eq!(stats.messages_relayed, 1);

    alice.leave().await;
    eventually!("bob sees alice leave", bob.online_users().await.is_empty());
    bob.leave().await;
    relay.stop().await;
}

#[tokio::test]
async fn offline_message_is_delivered_after_reconnect() {
    init_tracing();
    let addr = free_addr().await;

    let mut alice = session("alice", relay_only(addr), TransportResources::new());
    alice.join("r").await;

    let queued = alice.send("sent while offline").await.unwrap();
    assert_eq!(alice.messages().await, vec![queued.clone()]);
    eventually!("message queued", alice.pending().await == 1);
    assert!(!alice.is_connected().await);

    let relay = RunningRelay::start(addr).await;
    assert!(alice.wait_connected(Duration::from_secs(5)).await);

    let room = RoomId::new("r");
    eventually!("relay stores message", {
        relay.server.rooms().messages(&room).await.contains(&queued)
    });
    assert_eq!(alice.pending().await, 0);

    alice.leave().await;
    relay.stop().await;
}

#[tokio::test]
async fn rejoining_after_giving_up_connects_again() {
    init_tracing();
    let addr = free_addr().await;
    let config = relay_only(addr).max_reconnect_attempts(1);

    let mut alice = session("alice", config, TransportResources::new());
    alice.join("r").await;
    let queued = alice.send("sent before the relay existed").await.unwrap();

    // Two failed rounds and the pump stops trying
    tokio::time::sleep(Duration::from_millis(600)).await;
    assert_eq!(alice.status().await, ConnectionStatus::Offline);

    let relay = RunningRelay::start(addr).await;
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert!(!alice.is_connected().await);

    alice.join("r").await;
    assert!(alice.wait_connected(Duration::from_secs(2)).await);

    let room = RoomId::new("r");
    eventually!("relay stores message", {
        relay.server.rooms().messages(&room).await.contains(&queued)
    });
    assert_eq!(alice.messages().await, vec![queued]);
    assert_eq!(alice.stats().await.rooms_joined, 1);

    alice.leave().await;
    relay.stop().await;
}

#[tokio::test]
async fn relay_shutdown_falls_back_to_polling() {
    init_tracing();
    let relay = RunningRelay::start("127.0.0.1:0".parse().unwrap()).await;
    let store = Arc::new(PollingStore::default());

    let config = SyncConfig::with_relay(relay.addr)
        .transport_order(vec![TransportKind::Relay, TransportKind::Polling])
        .poll_interval(Duration::from_millis(50));
    let resources = TransportResources::new().with_polling(Arc::clone(&store));

    let mut alice = session("alice", config, resources);
    alice.join("r").await;
    assert!(alice.wait_connected(Duration::from_secs(2)).await);
    assert_eq!(alice.connection_method().await, Some(TransportKind::Relay));

    // Shutdown sends Bye, which is never retried
    relay.stop().await;
    eventually!(
        "fallback to polling",
        alice.connection_method().await == Some(TransportKind::Polling)
    );
    assert_eq!(alice.status().await, ConnectionStatus::Connected);
    assert_eq!(alice.stats().await.fallbacks, 1);

    let sent = alice.send("via polling").await.unwrap();
    eventually!(
        "polling store receives message",
        store.messages(&RoomId::new("r")).contains(&sent)
    );
    alice.leave().await;
}

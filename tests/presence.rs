#[macro_use]
mod common;

use std::sync::Arc;
use std::time::Duration;

use bytes::BytesMut;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use roomsync::server::{FrameCodec, RelayConfig, RelayFrame};
use roomsync::transport::PollingStore;
use roomsync::{Participant, RoomId, SyncConfig, TransportKind, TransportResources};

use common::{init_tracing, session, RunningRelay};

#[tokio::test]
async fn silent_participant_expires() {
    let store = Arc::new(PollingStore::new(100));
    let config = SyncConfig::default()
        .transport_order(vec![TransportKind::Polling])
        .poll_interval(Duration::from_millis(30))
        .heartbeat_interval(Duration::from_millis(30))
        .liveness_window(Duration::from_millis(300));

    let mut alice = session("alice", config, TransportResources::new().with_polling(Arc::clone(&store)));
    alice.join("r").await;
    assert!(alice.wait_connected(Duration::from_secs(2)).await);

    // A participant who announces once and then goes silent
    let room = RoomId::new("r");
    store.touch(&room, &Participant::new("ghost", "Ghost"));
    eventually!("ghost online", alice.online_users().await.len() == 1);

    eventually!("ghost expired", alice.online_users().await.is_empty());
    assert!(alice
        .online_users()
        .await
        .iter()
        .all(|p| p.id.as_str() != "alice"));

    alice.leave().await;
}

#[tokio::test]
async fn silent_relay_member_expires() {
    init_tracing();
    let relay = RunningRelay::start("127.0.0.1:0".parse().unwrap()).await;
    let config = SyncConfig::with_relay(relay.addr)
        .transport_order(vec![TransportKind::Relay])
        .heartbeat_interval(Duration::from_millis(50))
        .liveness_window(Duration::from_millis(300));

    let mut alice = session("alice", config, TransportResources::new());
    alice.join("r").await;
    assert!(alice.wait_connected(Duration::from_secs(2)).await);

    // Joins over a raw socket and never pings
    let mut ghost = TcpStream::connect(relay.addr).await.unwrap();
    let codec = FrameCodec::new(RelayConfig::default().max_frame_size);
    let mut buf = BytesMut::new();
    codec
        .encode(
            &RelayFrame::JoinRoom {
                room: RoomId::new("r"),
                user: Participant::new("ghost", "Ghost"),
            },
            &mut buf,
        )
        .unwrap();
    ghost.write_all(&buf).await.unwrap();

    eventually!("ghost online", {
        alice
            .online_users()
            .await
            .iter()
            .any(|p| p.id.as_str() == "ghost")
    });
    eventually!("ghost expired", alice.online_users().await.is_empty());

    // Still connected, only silent
    assert_eq!(relay.server.rooms().member_count(&RoomId::new("r")).await, 2);

    alice.leave().await;
    drop(ghost);
    relay.stop().await;
}

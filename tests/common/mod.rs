#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use roomsync::{Participant, RelayConfig, RelayServer, SyncConfig, SyncSession, TransportResources};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;

/// Poll `$cond` until it holds, failing after five seconds
macro_rules! eventually {
    ($what:expr, $cond:expr) => {{
        let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
        loop {
            if $cond {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting for {}",
                $what
            );
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
    }};
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn session(id: &str, config: SyncConfig, resources: TransportResources) -> SyncSession {
    SyncSession::new(config, Participant::new(id, id.to_uppercase()), resources)
}

/// A relay running in the background
pub struct RunningRelay {
    pub server: Arc<RelayServer>,
    pub addr: SocketAddr,
    stop: Option<oneshot::Sender<()>>,
    task: JoinHandle<roomsync::Result<()>>,
}

impl RunningRelay {
    pub async fn start(addr: SocketAddr) -> Self {
        let server = Arc::new(RelayServer::new(RelayConfig::with_addr(addr)));
        let listener = server.bind().await.expect("bind relay");
        let addr = listener.local_addr().expect("local addr");

        let (stop, stopped) = oneshot::channel::<()>();
        let task = tokio::spawn({
            let server = Arc::clone(&server);
            async move {
                server
                    .serve_until(listener, async {
                        let _ = stopped.await;
                    })
                    .await
            }
        });

        Self {
            server,
            addr,
            stop: Some(stop),
            task,
        }
    }

    pub async fn stop(mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        let _ = self.task.await;
    }
}

/// An address nobody listens on (yet)
pub async fn free_addr() -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    listener.local_addr().unwrap()
}

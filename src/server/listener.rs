//! Relay server listener
//!
//! Handles the TCP accept loop and spawns connection handlers.

use std::future::Future;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, Semaphore};

use crate::error::Result;
use crate::stats::RelayStats;

use super::config::RelayConfig;
use super::connection::Connection;
use super::rooms::RelayRooms;

#[derive(Default)]
struct Counters {
    total_connections: AtomicU64,
    active_connections: AtomicU64,
    rejected_connections: AtomicU64,
}

/// Relay server
pub struct RelayServer {
    config: RelayConfig,
    rooms: Arc<RelayRooms>,
    next_session_id: AtomicU64,
    connection_semaphore: Option<Arc<Semaphore>>,
    shutdown: broadcast::Sender<()>,
    counters: Arc<Counters>,
}

impl RelayServer {
    /// Create a new server with the given configuration
    pub fn new(config: RelayConfig) -> Self {
        let connection_semaphore = if config.max_connections > 0 {
            Some(Arc::new(Semaphore::new(config.max_connections)))
        } else {
            None
        };
        let (shutdown, _) = broadcast::channel(1);

        Self {
            rooms: Arc::new(RelayRooms::new(config.room_history)),
            config,
            next_session_id: AtomicU64::new(1),
            connection_semaphore,
            shutdown,
            counters: Arc::new(Counters::default()),
        }
    }

    /// Get a reference to the room state
    pub fn rooms(&self) -> &Arc<RelayRooms> {
        &self.rooms
    }

    /// Bind the configured address
    pub async fn bind(&self) -> Result<TcpListener> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        tracing::info!(addr = %listener.local_addr()?, "Relay server listening");
        Ok(listener)
    }

    /// Run the server
    ///
    /// This method blocks until the listener fails.
    pub async fn run(&self) -> Result<()> {
        let listener = self.bind().await?;
        self.accept_loop(&listener).await
    }

    /// Run the server with graceful shutdown
    pub async fn run_until<F>(&self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let listener = self.bind().await?;
        self.serve_until(listener, shutdown).await
    }

    /// Serve an already bound listener until `shutdown` resolves
    ///
    /// Connected clients receive a `Bye` frame on shutdown.
    pub async fn serve_until<F>(&self, listener: TcpListener, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        let result = tokio::select! {
            _ = shutdown => {
                tracing::info!("Shutdown signal received");
                Ok(())
            }
            result = self.accept_loop(&listener) => result,
        };

        let _ = self.shutdown.send(());
        result
    }

    async fn accept_loop(&self, listener: &TcpListener) -> Result<()> {
        loop {
            match listener.accept().await {
                Ok((socket, peer_addr)) => {
                    self.handle_connection(socket, peer_addr);
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to accept connection");
                }
            }
        }
    }

    fn handle_connection(&self, socket: TcpStream, peer_addr: SocketAddr) {
        // Check connection limit
        let permit = match self.connection_semaphore {
            Some(ref sem) => match sem.clone().try_acquire_owned() {
                Ok(permit) => Some(permit),
                Err(_) => {
                    self.counters
                        .rejected_connections
                        .fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(peer = %peer_addr, "Connection rejected: limit reached");
                    return;
                }
            },
            None => None,
        };

        let session_id = self.next_session_id.fetch_add(1, Ordering::Relaxed);

        tracing::debug!(session_id = session_id, peer = %peer_addr, "New connection");

        if self.config.tcp_nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                tracing::error!(error = %e, "Failed to configure socket");
                return;
            }
        }

        let config = self.config.clone();
        let rooms = Arc::clone(&self.rooms);
        let shutdown = self.shutdown.subscribe();
        let counters = Arc::clone(&self.counters);

        counters.total_connections.fetch_add(1, Ordering::Relaxed);
        counters.active_connections.fetch_add(1, Ordering::Relaxed);

        tokio::spawn(async move {
            let _permit = permit;
            let mut connection =
                Connection::new(session_id, socket, peer_addr, config, rooms, shutdown);

            if let Err(e) = connection.run().await {
                tracing::debug!(session_id = session_id, error = %e, "Connection error");
            }

            counters.active_connections.fetch_sub(1, Ordering::Relaxed);
            tracing::debug!(session_id = session_id, "Connection closed");
        });
    }

    /// Get the configured bind address
    pub fn bind_addr(&self) -> SocketAddr {
        self.config.bind_addr
    }

    /// Snapshot of server counters
    pub async fn stats(&self) -> RelayStats {
        RelayStats {
            total_connections: self.counters.total_connections.load(Ordering::Relaxed),
            active_connections: self.counters.active_connections.load(Ordering::Relaxed),
            rejected_connections: self.counters.rejected_connections.load(Ordering::Relaxed),
            rooms: self.rooms.room_count().await as u64,
            messages_relayed: self.rooms.messages_relayed(),
            members_evicted: self.rooms.members_evicted(),
        }
    }
}

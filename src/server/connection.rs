//! Per-connection relay handler
//!
//! One task reads and dispatches frames, a second drains the outbound
//! queue onto the socket. A connection joins at most one room at a time.
//! A connection evicted for falling behind is closed without `Bye`, so its
//! client reconnects.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::OwnedWriteHalf;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;
use crate::model::RoomId;

use super::codec::FrameCodec;
use super::config::RelayConfig;
use super::frame::RelayFrame;
use super::rooms::{MemberLink, RelayRooms};

/// Why the read loop ended
enum Exit {
    /// Peer closed the socket
    Closed,
    /// No traffic within the idle timeout
    Idle,
    /// Relay is shutting down
    Shutdown,
    /// Outbound queue overflowed
    Evicted,
}

pub(super) struct Connection {
    session_id: u64,
    socket: Option<TcpStream>,
    peer_addr: SocketAddr,
    config: RelayConfig,
    rooms: Arc<RelayRooms>,
    shutdown: broadcast::Receiver<()>,
    joined: Option<RoomId>,
}

impl Connection {
    pub(super) fn new(
        session_id: u64,
        socket: TcpStream,
        peer_addr: SocketAddr,
        config: RelayConfig,
        rooms: Arc<RelayRooms>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            session_id,
            socket: Some(socket),
            peer_addr,
            config,
            rooms,
            shutdown,
            joined: None,
        }
    }

    pub(super) async fn run(&mut self) -> Result<()> {
        let Some(socket) = self.socket.take() else {
            return Ok(());
        };
        let (mut reader, writer) = socket.into_split();
        let codec = FrameCodec::new(self.config.max_frame_size);

        let (tx, rx) = mpsc::channel(self.config.outbound_queue);
        let link = MemberLink::new(tx.clone());
        let evicted = link.evicted();
        let writer_task = tokio::spawn(write_loop(writer, rx, codec, self.session_id));

        let mut buf = BytesMut::with_capacity(self.config.read_buffer_size);
        let result = loop {
            match codec.decode(&mut buf) {
                Ok(Some(frame)) => {
                    self.dispatch(frame, &tx, &link).await;
                    continue;
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(session_id = self.session_id, error = %e, "Bad frame");
                    let _ = tx
                        .send(RelayFrame::Error {
                            message: e.to_string(),
                        })
                        .await;
                    break Err(e.into());
                }
            }

            let exit = tokio::select! {
                _ = self.shutdown.recv() => Some(Exit::Shutdown),
                _ = evicted.notified() => Some(Exit::Evicted),
                read = tokio::time::timeout(self.config.idle_timeout, reader.read_buf(&mut buf)) => {
                    match read {
                        Err(_) => Some(Exit::Idle),
                        Ok(Ok(0)) => Some(Exit::Closed),
                        Ok(Ok(_)) => None,
                        Ok(Err(e)) => break Err(e.into()),
                    }
                }
            };

            match exit {
                None => {}
                Some(Exit::Closed) => break Ok(()),
                Some(Exit::Idle) => {
                    tracing::debug!(session_id = self.session_id, peer = %self.peer_addr, "Idle timeout");
                    let _ = tx
                        .send(RelayFrame::Bye {
                            reason: "idle timeout".into(),
                        })
                        .await;
                    break Ok(());
                }
                Some(Exit::Shutdown) => {
                    let _ = tx
                        .send(RelayFrame::Bye {
                            reason: "server shutting down".into(),
                        })
                        .await;
                    break Ok(());
                }
                Some(Exit::Evicted) => {
                    tracing::info!(session_id = self.session_id, peer = %self.peer_addr, "Evicted, closing");
                    writer_task.abort();
                    break Ok(());
                }
            }
        };

        if let Some(room) = self.joined.take() {
            self.rooms.leave(self.session_id, &room).await;
        }

        drop(tx);
        let _ = writer_task.await;

        result
    }

    async fn dispatch(&mut self, frame: RelayFrame, tx: &mpsc::Sender<RelayFrame>, link: &MemberLink) {
        tracing::debug!(session_id = self.session_id, frame = frame.name(), "Frame received");

        match frame {
            RelayFrame::JoinRoom { room, user } => {
                if room.is_empty() {
                    self.reply_error(tx, "room id must not be empty").await;
                    return;
                }
                if let Some(previous) = self.joined.take() {
                    self.rooms.leave(self.session_id, &previous).await;
                }

                let (messages, online_users) = self
                    .rooms
                    .join(self.session_id, &room, user, link.clone())
                    .await;
                self.joined = Some(room.clone());

                let _ = tx
                    .send(RelayFrame::RoomState {
                        room,
                        messages,
                        online_users,
                    })
                    .await;
            }

            RelayFrame::LeaveRoom { room } => {
                if self.joined.as_ref() == Some(&room) {
                    self.joined = None;
                    self.rooms.leave(self.session_id, &room).await;
                }
            }

            RelayFrame::SendMessage {
                room,
                id,
                body,
                timestamp,
            } => {
                if self.joined.as_ref() != Some(&room) {
                    self.reply_error(tx, "not joined to this room").await;
                    return;
                }
                if let Err(reason) = self
                    .rooms
                    .post(self.session_id, &room, id, &body, timestamp)
                    .await
                {
                    self.reply_error(tx, &reason).await;
                }
            }

            RelayFrame::Ping => {
                let online_users = match &self.joined {
                    Some(room) => self.rooms.ping(self.session_id, room).await,
                    None => Vec::new(),
                };
                let _ = tx.send(RelayFrame::Pong { online_users }).await;
            }

            RelayFrame::JoinCall { room } => {
                if self.joined.as_ref() != Some(&room) {
                    self.reply_error(tx, "not joined to this room").await;
                    return;
                }
                match self.rooms.join_call(self.session_id, &room).await {
                    Ok(peers) => {
                        let _ = tx.send(RelayFrame::ExistingPeers { peers }).await;
                    }
                    Err(reason) => self.reply_error(tx, &reason).await,
                }
            }

            RelayFrame::LeaveCall { room } => {
                if self.joined.as_ref() == Some(&room) {
                    if let Err(reason) = self.rooms.leave_call(self.session_id, &room).await {
                        self.reply_error(tx, &reason).await;
                    }
                }
            }

            RelayFrame::Signal { room, signal } => {
                if self.joined.as_ref() != Some(&room) {
                    self.reply_error(tx, "not joined to this room").await;
                    return;
                }
                if let Err(reason) = self.rooms.signal(self.session_id, &room, signal).await {
                    self.reply_error(tx, &reason).await;
                }
            }

            other => {
                let message = format!("unexpected frame from client: {}", other.name());
                self.reply_error(tx, &message).await;
            }
        }
    }

    async fn reply_error(&self, tx: &mpsc::Sender<RelayFrame>, message: &str) {
        let _ = tx
            .send(RelayFrame::Error {
                message: message.to_string(),
            })
            .await;
    }
}

async fn write_loop(
    mut writer: OwnedWriteHalf,
    mut rx: mpsc::Receiver<RelayFrame>,
    codec: FrameCodec,
    session_id: u64,
) {
    let mut buf = BytesMut::new();

    while let Some(frame) = rx.recv().await {
        buf.clear();
        if let Err(e) = codec.encode(&frame, &mut buf) {
            tracing::warn!(session_id = session_id, error = %e, "Failed to encode frame");
            continue;
        }
        if let Err(e) = writer.write_all(&buf).await {
            tracing::debug!(session_id = session_id, error = %e, "Write failed");
            break;
        }
        if matches!(frame, RelayFrame::Bye { .. }) {
            break;
        }
    }

    let _ = writer.shutdown().await;
}

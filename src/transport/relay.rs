//! Relay client transport
//!
//! Speaks the length-prefixed frame protocol of [`crate::server`] over TCP.
//! When the link drops, the reader task reconnects with linear backoff
//! (`base_delay * attempt`) up to `max_attempts` times, re-joining the room
//! each time. A `Bye` from the server ends the link for good. Call
//! signaling shares the link; the session re-enters the call after a
//! reconnect.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::BytesMut;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;

use crate::error::{Result, TransportError};
use crate::model::{Message, Participant, RoomId};
use crate::peer::SignalMessage;
use crate::server::{FrameCodec, RelayFrame};
use crate::session::SyncConfig;

use super::{ConnectionStrategy, TransportEvent, TransportKind};

/// Connection parameters of a relay transport
#[derive(Debug, Clone)]
pub struct RelaySettings {
    pub addr: SocketAddr,
    pub connect_timeout: Duration,
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_frame_size: usize,
}

impl RelaySettings {
    pub fn new(addr: SocketAddr) -> Self {
        Self::from_config(addr, &SyncConfig::default())
    }

    pub fn from_config(addr: SocketAddr, config: &SyncConfig) -> Self {
        Self {
            addr,
            connect_timeout: config.connect_timeout,
            max_attempts: config.max_reconnect_attempts,
            base_delay: config.reconnect_base_delay,
            max_frame_size: config.max_frame_size,
        }
    }

    /// Delay before reconnect attempt `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }
}

type SharedWriter = Arc<Mutex<Option<OwnedWriteHalf>>>;

/// State shared between the transport and its reader task
struct LinkContext {
    settings: RelaySettings,
    codec: FrameCodec,
    room: RoomId,
    local: Participant,
    writer: SharedWriter,
    connected: Arc<AtomicBool>,
    events: mpsc::Sender<TransportEvent>,
}

/// How a read loop ended
enum LinkEnd {
    /// Socket closed or broken
    Dropped,
    /// Server said goodbye
    Bye(String),
    /// Nobody listens to our events anymore
    Abandoned,
}

enum Flow {
    Continue,
    Stop(LinkEnd),
}

struct RelayLink {
    ctx: Arc<LinkContext>,
    reader_task: JoinHandle<()>,
}

/// Transport backed by a relay server
pub struct RelayTransport {
    settings: RelaySettings,
    link: Option<RelayLink>,
}

impl RelayTransport {
    pub fn new(settings: RelaySettings) -> Self {
        Self {
            settings,
            link: None,
        }
    }

    pub fn settings(&self) -> &RelaySettings {
        &self.settings
    }

    async fn write(&self, frame: &RelayFrame) -> Result<()> {
        let link = self.link.as_ref().ok_or(TransportError::NotConnected)?;
        link.ctx.write(frame).await
    }

    fn room(&self) -> Result<RoomId> {
        match &self.link {
            Some(link) => Ok(link.ctx.room.clone()),
            None => Err(TransportError::NotConnected.into()),
        }
    }
}

#[async_trait]
impl ConnectionStrategy for RelayTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Relay
    }

    fn is_connected(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|l| l.ctx.connected.load(Ordering::Relaxed))
    }

    async fn connect(
        &mut self,
        room: &RoomId,
        local: &Participant,
        events: mpsc::Sender<TransportEvent>,
    ) -> Result<()> {
        self.disconnect().await;

        let ctx = Arc::new(LinkContext {
            settings: self.settings.clone(),
            codec: FrameCodec::new(self.settings.max_frame_size),
            room: room.clone(),
            local: local.clone(),
            writer: Arc::new(Mutex::new(None)),
            connected: Arc::new(AtomicBool::new(false)),
            events,
        });

        let reader = ctx.open().await?;
        ctx.emit(TransportEvent::Connected(TransportKind::Relay)).await;

        let reader_task = tokio::spawn(run_link(reader, Arc::clone(&ctx)));
        self.link = Some(RelayLink { ctx, reader_task });

        tracing::info!(addr = %self.settings.addr, room = %room, "Relay transport connected");
        Ok(())
    }

    async fn send(&mut self, message: &Message) -> Result<()> {
        let room = self.room()?;
        self.write(&RelayFrame::send_message(&room, message)).await
    }

    async fn heartbeat(&mut self) -> Result<()> {
        self.write(&RelayFrame::Ping).await
    }

    async fn join_call(&mut self) -> Result<()> {
        let room = self.room()?;
        self.write(&RelayFrame::JoinCall { room }).await
    }

    async fn leave_call(&mut self) -> Result<()> {
        let room = self.room()?;
        self.write(&RelayFrame::LeaveCall { room }).await
    }

    async fn signal(&mut self, signal: &SignalMessage) -> Result<()> {
        let room = self.room()?;
        self.write(&RelayFrame::Signal {
            room,
            signal: signal.clone(),
        })
        .await
    }

    async fn disconnect(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };

        link.reader_task.abort();
        let _ = link.reader_task.await;

        let leave = RelayFrame::LeaveRoom {
            room: link.ctx.room.clone(),
        };
        if let Err(e) = link.ctx.write(&leave).await {
            tracing::debug!(error = %e, "Leave not delivered");
        }
        if let Some(mut writer) = link.ctx.writer.lock().await.take() {
            let _ = writer.shutdown().await;
        }
        link.ctx.connected.store(false, Ordering::Relaxed);

        tracing::info!(room = %link.ctx.room, "Relay transport disconnected");
    }
}

impl LinkContext {
    /// Dial the relay, join the room and install the write half
    async fn open(&self) -> Result<OwnedReadHalf> {
        let stream = tokio::time::timeout(
            self.settings.connect_timeout,
            TcpStream::connect(self.settings.addr),
        )
        .await
        .map_err(|_| TransportError::Timeout)??;
        stream.set_nodelay(true)?;

        let (reader, mut writer) = stream.into_split();
        let join = RelayFrame::JoinRoom {
            room: self.room.clone(),
            user: self.local.clone(),
        };
        write_frame(&mut writer, &self.codec, &join).await?;

        *self.writer.lock().await = Some(writer);
        self.connected.store(true, Ordering::Relaxed);
        Ok(reader)
    }

    async fn write(&self, frame: &RelayFrame) -> Result<()> {
        let mut guard = self.writer.lock().await;
        let writer = guard.as_mut().ok_or(TransportError::NotConnected)?;

        if let Err(e) = write_frame(writer, &self.codec, frame).await {
            guard.take();
            self.connected.store(false, Ordering::Relaxed);
            return Err(e);
        }
        Ok(())
    }

    async fn emit(&self, event: TransportEvent) -> bool {
        self.events.send(event).await.is_ok()
    }

    async fn handle(&self, frame: RelayFrame) -> Flow {
        let delivered = match frame {
            RelayFrame::RoomState {
                messages,
                online_users,
                ..
            } => {
                (messages.is_empty() || self.emit(TransportEvent::Messages(messages)).await)
                    && self.emit(TransportEvent::Roster(online_users)).await
            }
            RelayFrame::NewMessage { message } => {
                self.emit(TransportEvent::Messages(vec![message])).await
            }
            RelayFrame::UserJoined { online_users, .. }
            | RelayFrame::UserLeft { online_users, .. }
            | RelayFrame::Pong { online_users } => {
                self.emit(TransportEvent::Roster(online_users)).await
            }
            RelayFrame::Signal { signal, .. } => self.emit(TransportEvent::Signal(signal)).await,
            RelayFrame::ExistingPeers { peers } => {
                self.emit(TransportEvent::ExistingPeers(peers)).await
            }
            RelayFrame::NewPeer { peer } => self.emit(TransportEvent::NewPeer(peer)).await,
            RelayFrame::Error { message } => {
                tracing::warn!(room = %self.room, error = %message, "Relay reported an error");
                true
            }
            RelayFrame::Bye { reason } => return Flow::Stop(LinkEnd::Bye(reason)),
            other => {
                tracing::debug!(frame = other.name(), "Ignoring client frame from relay");
                true
            }
        };

        if delivered {
            Flow::Continue
        } else {
            Flow::Stop(LinkEnd::Abandoned)
        }
    }

    async fn read_frames(&self, reader: &mut OwnedReadHalf) -> LinkEnd {
        let mut buf = BytesMut::with_capacity(8 * 1024);
        loop {
            loop {
                match self.codec.decode(&mut buf) {
                    Ok(Some(frame)) => {
                        if let Flow::Stop(end) = self.handle(frame).await {
                            return end;
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        tracing::warn!(error = %e, "Undecodable frame from relay");
                        return LinkEnd::Dropped;
                    }
                }
            }

            match reader.read_buf(&mut buf).await {
                Ok(0) => return LinkEnd::Dropped,
                Ok(_) => {}
                Err(e) => {
                    tracing::debug!(error = %e, "Relay read failed");
                    return LinkEnd::Dropped;
                }
            }
        }
    }

    async fn reconnect(&self) -> Option<OwnedReadHalf> {
        for attempt in 1..=self.settings.max_attempts {
            let delay = self.settings.backoff(attempt);
            tracing::info!(attempt, delay_ms = delay.as_millis() as u64, "Reconnecting to relay");
            tokio::time::sleep(delay).await;

            match self.open().await {
                Ok(reader) => return Some(reader),
                Err(e) => tracing::warn!(attempt, error = %e, "Relay reconnect failed"),
            }
        }
        None
    }
}

async fn run_link(mut reader: OwnedReadHalf, ctx: Arc<LinkContext>) {
    loop {
        let end = ctx.read_frames(&mut reader).await;
        ctx.connected.store(false, Ordering::Relaxed);
        ctx.writer.lock().await.take();

        match end {
            LinkEnd::Abandoned => return,
            LinkEnd::Bye(reason) => {
                tracing::info!(room = %ctx.room, reason = %reason, "Relay closed the connection");
                ctx.emit(TransportEvent::Disconnected {
                    kind: TransportKind::Relay,
                    permanent: true,
                })
                .await;
                return;
            }
            LinkEnd::Dropped => {}
        }

        let lost = TransportEvent::Disconnected {
            kind: TransportKind::Relay,
            permanent: false,
        };
        if !ctx.emit(lost).await {
            return;
        }

        match ctx.reconnect().await {
            Some(next) => {
                reader = next;
                if !ctx.emit(TransportEvent::Connected(TransportKind::Relay)).await {
                    return;
                }
            }
            None => {
                let err = TransportError::ReconnectExhausted {
                    attempts: ctx.settings.max_attempts,
                };
                tracing::warn!(room = %ctx.room, error = %err, "Relay link lost");
                ctx.emit(TransportEvent::Disconnected {
                    kind: TransportKind::Relay,
                    permanent: true,
                })
                .await;
                return;
            }
        }
    }
}

async fn write_frame(
    writer: &mut OwnedWriteHalf,
    codec: &FrameCodec,
    frame: &RelayFrame,
) -> Result<()> {
    let mut buf = BytesMut::new();
    codec.encode(frame, &mut buf)?;
    writer.write_all(&buf).await?;
    Ok(())
}

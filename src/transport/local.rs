//! In-process transport
//!
//! Every connection is a pair of channels: client messages flow into one
//! shared [`InboundEvent`] queue, server messages are JSON-encoded and pushed
//! into the connection's own unbounded outbox, which preserves per-connection
//! order.

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::traits::{InboundEvent, SyncChannel};
use crate::error::{Error, Result};
use crate::protocol::codec;
use crate::protocol::{ClientMessage, ConnectionId, RoomId, ServerMessage};

/// In-memory [`SyncChannel`]
pub struct LocalChannel {
    next_id: AtomicU64,
    outboxes: DashMap<ConnectionId, mpsc::UnboundedSender<Bytes>>,
    rooms: DashMap<RoomId, HashSet<ConnectionId>>,
    inbound: mpsc::Sender<InboundEvent>,
}

impl LocalChannel {
    /// Create the channel and the inbound queue the hub consumes
    pub fn new(inbound_capacity: usize) -> (Arc<Self>, mpsc::Receiver<InboundEvent>) {
        let (inbound, inbound_rx) = mpsc::channel(inbound_capacity.max(1));
        let channel = Arc::new(Self {
            next_id: AtomicU64::new(1),
            outboxes: DashMap::new(),
            rooms: DashMap::new(),
            inbound,
        });
        (channel, inbound_rx)
    }

    /// Open a new connection
    pub fn connect(&self) -> LocalClient {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (tx, rx) = mpsc::unbounded_channel();
        self.outboxes.insert(id, tx);
        debug!(connection = %id, "Local connection opened");
        LocalClient {
            id,
            frames: rx,
            inbound: self.inbound.clone(),
        }
    }

    /// Drop a connection: it leaves every room and the hub is told
    pub async fn disconnect(&self, conn: ConnectionId) -> Result<()> {
        self.outboxes.remove(&conn);
        self.rooms.iter_mut().for_each(|mut members| {
            members.value_mut().remove(&conn);
        });
        self.rooms.retain(|_, members| !members.is_empty());
        debug!(connection = %conn, "Local connection closed");

        self.inbound
            .send(InboundEvent::Disconnected { connection: conn })
            .await
            .map_err(|_| Error::Transport("inbound queue closed".to_string()))
    }

    pub fn is_connected(&self, conn: ConnectionId) -> bool {
        self.outboxes.contains_key(&conn)
    }

    /// Connections currently subscribed to `room_id`, in id order
    pub fn members(&self, room_id: RoomId) -> Vec<ConnectionId> {
        let mut members: Vec<ConnectionId> = self
            .rooms
            .get(&room_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        members.sort();
        members
    }

    /// Every open connection
    pub fn connections(&self) -> Vec<ConnectionId> {
        self.outboxes.iter().map(|entry| *entry.key()).collect()
    }

    fn deliver(&self, conn: ConnectionId, frame: Bytes) -> Result<()> {
        let outbox = self
            .outboxes
            .get(&conn)
            .ok_or_else(|| Error::Transport(format!("{} is closed", conn)))?;
        outbox
            .send(frame)
            .map_err(|_| Error::Transport(format!("{} is closed", conn)))
    }
}

#[async_trait]
impl SyncChannel for LocalChannel {
    async fn join_room(&self, conn: ConnectionId, room_id: RoomId) -> Result<()> {
        if !self.is_connected(conn) {
            return Err(Error::Transport(format!("{} is closed", conn)));
        }
        self.rooms.entry(room_id).or_default().insert(conn);
        Ok(())
    }

    async fn leave_room(&self, conn: ConnectionId, room_id: RoomId) -> Result<()> {
        if let Some(mut members) = self.rooms.get_mut(&room_id) {
            members.remove(&conn);
        }
        self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        Ok(())
    }

    async fn broadcast_to_room(&self, room_id: RoomId, message: &ServerMessage) -> Result<()> {
        let frame = codec::encode(message)?;
        let members = self.members(room_id);
        trace!(room_id = %room_id, recipients = members.len(), "Broadcast");
        for conn in members {
            // A member that vanished mid-broadcast is cleaned up on disconnect
            if let Err(e) = self.deliver(conn, frame.clone()) {
                debug!(room_id = %room_id, error = %e, "Skipping closed member");
            }
        }
        Ok(())
    }

    async fn send_to(&self, conn: ConnectionId, message: &ServerMessage) -> Result<()> {
        self.deliver(conn, codec::encode(message)?)
    }
}

/// Client end of a local connection
pub struct LocalClient {
    id: ConnectionId,
    frames: mpsc::UnboundedReceiver<Bytes>,
    inbound: mpsc::Sender<InboundEvent>,
}

impl LocalClient {
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub async fn send(&self, message: ClientMessage) -> Result<()> {
        self.inbound
            .send(InboundEvent::Message {
                connection: self.id,
                message,
            })
            .await
            .map_err(|_| Error::Transport("inbound queue closed".to_string()))
    }

    /// Wait for the next server message
    pub async fn recv(&mut self) -> Result<ServerMessage> {
        let frame = self
            .frames
            .recv()
            .await
            .ok_or_else(|| Error::Transport(format!("{} is closed", self.id)))?;
        codec::decode(&frame)
    }

    /// Next server message if one is already queued
    pub fn try_recv(&mut self) -> Option<ServerMessage> {
        let frame = self.frames.try_recv().ok()?;
        codec::decode(&frame).ok()
    }

    /// Everything queued right now
    pub fn drain(&mut self) -> Vec<ServerMessage> {
        std::iter::from_fn(|| self.try_recv()).collect()
    }
}

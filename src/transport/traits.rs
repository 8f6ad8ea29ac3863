//! Transport trait definitions

use async_trait::async_trait;

use crate::error::Result;
use crate::protocol::{ClientMessage, ConnectionId, RoomId, ServerMessage};

/// Pub/sub channel between the server and its connections.
///
/// Rooms are broadcast groups keyed by [`RoomId`]. Implementations must
/// deliver messages to a single connection in the order they were sent.
#[async_trait]
pub trait SyncChannel: Send + Sync {
    /// Subscribe a connection to a room's broadcasts
    async fn join_room(&self, conn: ConnectionId, room_id: RoomId) -> Result<()>;

    /// Unsubscribe; a no-op if the connection was not subscribed
    async fn leave_room(&self, conn: ConnectionId, room_id: RoomId) -> Result<()>;

    /// Deliver to every connection subscribed to `room_id`
    async fn broadcast_to_room(&self, room_id: RoomId, message: &ServerMessage) -> Result<()>;

    /// Deliver to one connection
    async fn send_to(&self, conn: ConnectionId, message: &ServerMessage) -> Result<()>;
}

/// What a transport reports about its connections
#[derive(Debug, Clone, PartialEq)]
pub enum InboundEvent {
    Message {
        connection: ConnectionId,
        message: ClientMessage,
    },
    Disconnected {
        connection: ConnectionId,
    },
}

impl InboundEvent {
    pub fn connection(&self) -> ConnectionId {
        match self {
            InboundEvent::Message { connection, .. } | InboundEvent::Disconnected { connection } => *connection,
        }
    }
}

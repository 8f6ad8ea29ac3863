//! Reconnection coordinator
//!
//! Routes every `Join` to its room and makes sure the joining connection ends
//! up with a catch-up snapshot, whether it is a returning participant or a
//! spectator. A join can arrive before the room exists (the accept and the
//! join race on different connections); such joins are queued per connection
//! and replayed as soon as the room is created.
//!
//! Queue rules:
//! - at most one queued join per connection; a newer join replaces it
//! - queued joins expire after `pending_join_ttl` and are answered `NotFound`
//! - the queue is bounded by `max_pending_joins`

use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::task::JoinHandle;
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::CoordinatorConfig;
use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::identity::IdentityLookup;
use crate::protocol::{ConnectionId, Profile, RoleAssignment, RoomId, ServerMessage, SessionSnapshot, UserId};
use crate::session::{RoomHandle, SessionRegistry};
use crate::transport::SyncChannel;

#[derive(Debug, Clone)]
struct PendingJoin {
    room_id: RoomId,
    user: Option<UserId>,
    queued_at: Instant,
}

#[derive(Debug, Clone, PartialEq)]
pub enum JoinOutcome {
    /// Subscribed; the snapshot was also sent to the connection
    Joined(SessionSnapshot),
    /// Room does not exist yet; the join will be replayed
    Queued,
}

pub struct ReconnectionCoordinator {
    registry: Arc<SessionRegistry>,
    identity: Arc<dyn IdentityLookup>,
    channel: Arc<dyn SyncChannel>,
    pending: DashMap<ConnectionId, PendingJoin>,
    config: CoordinatorConfig,
}

impl ReconnectionCoordinator {
    pub fn new(
        registry: Arc<SessionRegistry>,
        identity: Arc<dyn IdentityLookup>,
        channel: Arc<dyn SyncChannel>,
        config: CoordinatorConfig,
    ) -> Self {
        Self {
            registry,
            identity,
            channel,
            pending: DashMap::new(),
            config,
        }
    }

    /// Join `room_id` now, or queue the join until the room exists
    pub async fn join(&self, conn: ConnectionId, user: Option<UserId>, room_id: RoomId) -> Result<JoinOutcome> {
        // Whatever this connection was waiting for before is stale now
        self.pending.remove(&conn);

        match self.registry.get_session(&room_id) {
            Ok(handle) => return self.replay(conn, user, &handle).await.map(JoinOutcome::Joined),
            Err(Error::NotFound(_)) => {}
            Err(e) => return Err(e),
        }

        if self.pending.len() >= self.config.max_pending_joins {
            warn!(room_id = %room_id, connection = %conn, "Pending join queue is full");
            return Err(Error::NotFound(room_id));
        }

        self.pending.insert(
            conn,
            PendingJoin {
                room_id,
                user,
                queued_at: Instant::now(),
            },
        );
        debug!(room_id = %room_id, connection = %conn, "Join queued until the room exists");

        // The room may have been created between the lookup and the insert
        if let Ok(handle) = self.registry.get_session(&room_id) {
            if let Some((_, queued)) = self.pending.remove_if(&conn, |_, p| p.room_id == room_id) {
                return self
                    .replay(conn, queued.user, &handle)
                    .await
                    .map(JoinOutcome::Joined);
            }
        }

        Ok(JoinOutcome::Queued)
    }

    /// Replay every join queued for `room_id`. Returns how many were replayed.
    pub async fn session_available(&self, room_id: RoomId) -> usize {
        let handle = match self.registry.get_session(&room_id) {
            Ok(handle) => handle,
            Err(_) => return 0,
        };

        let waiting: Vec<ConnectionId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().room_id == room_id)
            .map(|entry| *entry.key())
            .collect();

        let mut replayed = 0;
        for conn in waiting {
            let Some((_, queued)) = self.pending.remove_if(&conn, |_, p| p.room_id == room_id) else {
                continue;
            };
            match self.replay(conn, queued.user, &handle).await {
                Ok(_) => replayed += 1,
                Err(e) => {
                    debug!(room_id = %room_id, connection = %conn, error = %e, "Queued join failed");
                    self.reject(conn, room_id, &e).await;
                }
            }
        }

        if replayed > 0 {
            info!(room_id = %room_id, replayed, "Replayed queued joins");
        }
        replayed
    }

    /// Answer expired queued joins with `NotFound`. Returns how many expired.
    pub async fn sweep_expired(&self) -> usize {
        let ttl = self.config.pending_join_ttl;
        let now = Instant::now();
        let expired: Vec<(ConnectionId, RoomId)> = self
            .pending
            .iter()
            .filter(|entry| now.duration_since(entry.value().queued_at) >= ttl)
            .map(|entry| (*entry.key(), entry.value().room_id))
            .collect();

        let mut count = 0;
        for (conn, room_id) in expired {
            let removed = self
                .pending
                .remove_if(&conn, |_, p| p.room_id == room_id && now.duration_since(p.queued_at) >= ttl);
            if removed.is_some() {
                count += 1;
                self.reject(conn, room_id, &Error::NotFound(room_id)).await;
            }
        }
        count
    }

    /// Forget whatever `conn` was waiting for
    pub fn cancel(&self, conn: ConnectionId) -> Option<RoomId> {
        self.pending.remove(&conn).map(|(_, p)| p.room_id)
    }

    pub fn pending_room(&self, conn: ConnectionId) -> Option<RoomId> {
        self.pending.get(&conn).map(|entry| entry.value().room_id)
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    /// Replay queued joins as rooms are created and expire old ones
    pub fn spawn_listener(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let mut events = self.registry.events().subscribe();
        let sweep_every = (self.config.pending_join_ttl / 2).max(std::time::Duration::from_millis(10));

        tokio::spawn(async move {
            let mut sweep = interval(sweep_every);
            sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    event = events.recv() => match event {
                        Ok(envelope) => {
                            if let SessionEvent::SessionStarted { room_id, .. } = envelope.event {
                                coordinator.session_available(room_id).await;
                            }
                        }
                        Err(RecvError::Lagged(missed)) => {
                            warn!(missed, "Coordinator lagged behind session events");
                            coordinator.replay_all_available().await;
                        }
                        Err(RecvError::Closed) => break,
                    },
                    _ = sweep.tick() => {
                        let expired = coordinator.sweep_expired().await;
                        if expired > 0 {
                            debug!(expired, "Expired queued joins");
                        }
                    }
                }
            }
        })
    }

    async fn replay_all_available(&self) {
        let mut rooms: Vec<RoomId> = self.pending.iter().map(|entry| entry.value().room_id).collect();
        rooms.sort();
        rooms.dedup();
        for room_id in rooms {
            self.session_available(room_id).await;
        }
    }

    async fn replay(&self, conn: ConnectionId, user: Option<UserId>, handle: &RoomHandle) -> Result<SessionSnapshot> {
        // Resolve outside the room so a slow lookup never blocks its mailbox
        let profiles = self.profiles_for(handle.roles()).await;
        handle.join(conn, user, profiles).await
    }

    async fn profiles_for(&self, roles: &RoleAssignment) -> HashMap<UserId, Profile> {
        let mut profiles = HashMap::new();
        for user in roles.users() {
            if let Some(profile) = self.identity.resolve(user).await {
                profiles.insert(user.clone(), profile);
            }
        }
        profiles
    }

    async fn reject(&self, conn: ConnectionId, room_id: RoomId, err: &Error) {
        let message = ServerMessage::rejection(Some(room_id), err, None);
        if let Err(e) = self.channel.send_to(conn, &message).await {
            debug!(connection = %conn, error = %e, "Could not deliver rejection");
        }
    }
}

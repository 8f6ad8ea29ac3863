//! Session registry
//!
//! Owns the map from [`RoomId`] to running rooms. Creating a session claims
//! both users in the [`PresenceTracker`] first, so a user can never hold two
//! seats at once, then starts the room task. Rooms remove themselves once
//! they retire.

use dashmap::{DashMap, DashSet};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::info;

use super::room::{self, RoomContext, RoomHandle};
use super::{Ended, GameSession};
use crate::config::SessionConfig;
use crate::engine::EngineRegistry;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::presence::PresenceTracker;
use crate::protocol::{GameKind, Role, RoleAssignment, RoomId, TerminationReason, UserId};
use crate::transport::SyncChannel;

/// Lifetime counters
#[derive(Debug, Default)]
pub(crate) struct RegistryStats {
    sessions_created: AtomicU64,
    sessions_finished: AtomicU64,
    actions_applied: AtomicU64,
    actions_rejected: AtomicU64,
}

impl RegistryStats {
    pub(crate) fn record_created(&self) {
        self.sessions_created.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_finished(&self) {
        self.sessions_finished.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_applied(&self) {
        self.actions_applied.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_rejected(&self) {
        self.actions_rejected.fetch_add(1, Ordering::Relaxed);
    }
}

/// Point-in-time copy of the registry counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct RegistryStatistics {
    pub sessions_created: u64,
    pub active_sessions: u64,
    pub sessions_finished: u64,
    /// Rooms still addressable, including finished ones being retained
    pub open_rooms: usize,
    pub actions_applied: u64,
    pub actions_rejected: u64,
}

/// Creates rooms and looks them up
pub struct SessionRegistry {
    engines: EngineRegistry,
    ctx: Arc<RoomContext>,
    /// Every room id ever handed to a session
    allocated: DashSet<RoomId>,
}

impl SessionRegistry {
    pub fn new(
        config: SessionConfig,
        engines: EngineRegistry,
        presence: Arc<PresenceTracker>,
        channel: Arc<dyn SyncChannel>,
        events: EventBus,
    ) -> Self {
        Self {
            engines,
            ctx: Arc::new(RoomContext {
                channel,
                presence,
                events,
                rooms: Arc::new(DashMap::new()),
                stats: Arc::new(RegistryStats::default()),
                config,
            }),
            allocated: DashSet::new(),
        }
    }

    /// Start a session between two available users.
    ///
    /// The initiator takes `First`, the accepter `Second`. Fails with
    /// `AlreadyBusy` if either already holds a seat; in that case neither is
    /// claimed. Must be called from within a tokio runtime.
    pub fn create_session(&self, initiator: &UserId, accepter: &UserId, kind: GameKind) -> Result<RoomId> {
        self.create_session_in(RoomId::new(), initiator, accepter, kind)
    }

    /// Like [`create_session`](Self::create_session) with a room id the caller
    /// already handed out. Joins queued for that id are replayed once it exists.
    /// An id that already named a session, live or retired, is refused with
    /// `InvalidChallenge`.
    pub fn create_session_in(
        &self,
        room_id: RoomId,
        initiator: &UserId,
        accepter: &UserId,
        kind: GameKind,
    ) -> Result<RoomId> {
        if initiator == accepter {
            return Err(Error::InvalidChallenge(format!(
                "{} cannot play against themselves",
                initiator
            )));
        }
        let engine = self.engines.get(kind)?;

        // Ids are never reused, even after the room retires
        if !self.allocated.insert(room_id) {
            return Err(Error::InvalidChallenge(format!("room {} was already used", room_id)));
        }

        if let Err(e) = self.ctx.presence.claim_pair(initiator, accepter, room_id) {
            self.allocated.remove(&room_id);
            return Err(e);
        }

        let state = match engine.initial_state() {
            Ok(state) => state,
            Err(e) => {
                self.ctx.presence.release(initiator, room_id);
                self.ctx.presence.release(accepter, room_id);
                self.allocated.remove(&room_id);
                return Err(e);
            }
        };

        let roles = RoleAssignment::from_challenge(initiator.clone(), accepter.clone());
        let session = GameSession::new(room_id, kind, roles.clone(), state.clone());
        room::spawn(session, engine, self.ctx.clone());
        self.ctx.stats.record_created();

        info!(
            room_id = %room_id,
            kind = %kind,
            first = %roles.first,
            second = %roles.second,
            "Session created"
        );
        self.ctx.events.publish(SessionEvent::SessionStarted {
            room_id,
            kind,
            roles,
            state,
            turn_owner: Role::First,
        });

        Ok(room_id)
    }

    pub fn get_session(&self, room_id: &RoomId) -> Result<RoomHandle> {
        self.ctx
            .rooms
            .get(room_id)
            .map(|entry| entry.value().clone())
            .ok_or(Error::NotFound(*room_id))
    }

    /// End a session from outside (admin action, shutdown)
    pub async fn terminate_session(&self, room_id: &RoomId, reason: TerminationReason) -> Result<Ended> {
        self.get_session(room_id)?.terminate(reason).await
    }

    pub fn contains(&self, room_id: &RoomId) -> bool {
        self.ctx.rooms.contains_key(room_id)
    }

    pub fn room_ids(&self) -> Vec<RoomId> {
        self.ctx.rooms.iter().map(|entry| *entry.key()).collect()
    }

    pub fn len(&self) -> usize {
        self.ctx.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ctx.rooms.is_empty()
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        &self.ctx.presence
    }

    pub fn events(&self) -> &EventBus {
        &self.ctx.events
    }

    pub fn stats(&self) -> RegistryStatistics {
        let stats = &self.ctx.stats;
        let created = stats.sessions_created.load(Ordering::Relaxed);
        let finished = stats.sessions_finished.load(Ordering::Relaxed);
        RegistryStatistics {
            sessions_created: created,
            active_sessions: created.saturating_sub(finished),
            sessions_finished: finished,
            open_rooms: self.ctx.rooms.len(),
            actions_applied: stats.actions_applied.load(Ordering::Relaxed),
            actions_rejected: stats.actions_rejected.load(Ordering::Relaxed),
        }
    }
}

//! Room actor
//!
//! Every room is one tokio task that owns its [`GameSession`] outright.
//! Submissions, joins, disconnects and timers all arrive through the same
//! mailbox and are handled one at a time, which gives us:
//! - a single total order of actions per room
//! - broadcasts that leave in the order actions were applied
//! - catch-up snapshots that never interleave with a half-applied move
//!
//! Rooms never share state with each other, so independent rooms run fully
//! in parallel. A finished room lingers for `retain_finished_for` so late
//! joiners still get the final snapshot, then removes itself from the
//! registry and stops.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{sleep_until, Instant};
use tracing::{debug, info, warn};

use super::registry::RegistryStats;
use super::{Applied, Ended, GameSession};
use crate::config::SessionConfig;
use crate::engine::{ActionPayload, RuleEngine};
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::presence::PresenceTracker;
use crate::protocol::{
    ConnectionId, GameKind, Profile, Role, RoleAssignment, RoomId, ServerMessage, SessionSnapshot,
    TerminationReason, UserId,
};
use crate::transport::SyncChannel;

type Reply<T> = oneshot::Sender<Result<T>>;

/// Services every room needs, shared by the registry and all actors
pub(crate) struct RoomContext {
    pub channel: Arc<dyn SyncChannel>,
    pub presence: Arc<PresenceTracker>,
    pub events: EventBus,
    pub rooms: Arc<DashMap<RoomId, RoomHandle>>,
    pub stats: Arc<RegistryStats>,
    pub config: SessionConfig,
}

pub(crate) enum RoomCommand {
    Submit {
        conn: Option<ConnectionId>,
        user: UserId,
        action: ActionPayload,
        reply: Reply<Applied>,
    },
    Join {
        conn: ConnectionId,
        user: Option<UserId>,
        profiles: HashMap<UserId, Profile>,
        reply: Reply<SessionSnapshot>,
    },
    Resign {
        user: UserId,
        reply: Reply<Ended>,
    },
    Leave {
        conn: ConnectionId,
        user: Option<UserId>,
        still_connected: bool,
        reply: Reply<Option<Ended>>,
    },
    ConnectionLost {
        conn: ConnectionId,
        user: Option<UserId>,
        /// The user still has another connection in this room
        still_connected: bool,
    },
    Terminate {
        reason: TerminationReason,
        reply: Reply<Ended>,
    },
    Snapshot {
        reply: Reply<SessionSnapshot>,
    },
}

/// Cloneable address of a running room
#[derive(Debug, Clone)]
pub struct RoomHandle {
    room_id: RoomId,
    kind: GameKind,
    roles: RoleAssignment,
    mailbox: mpsc::Sender<RoomCommand>,
}

impl RoomHandle {
    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn roles(&self) -> &RoleAssignment {
        &self.roles
    }

    /// The room task has stopped
    pub fn is_closed(&self) -> bool {
        self.mailbox.is_closed()
    }

    /// Submit an action. A rejection is also sent to `conn`, tagged with the
    /// current version.
    pub async fn submit(&self, conn: Option<ConnectionId>, user: UserId, action: ActionPayload) -> Result<Applied> {
        self.request(|reply| RoomCommand::Submit {
            conn,
            user,
            action,
            reply,
        })
        .await
    }

    /// Subscribe `conn` and send it a catch-up snapshot
    pub async fn join(
        &self,
        conn: ConnectionId,
        user: Option<UserId>,
        profiles: HashMap<UserId, Profile>,
    ) -> Result<SessionSnapshot> {
        self.request(|reply| RoomCommand::Join {
            conn,
            user,
            profiles,
            reply,
        })
        .await
    }

    pub async fn resign(&self, user: UserId) -> Result<Ended> {
        self.request(|reply| RoomCommand::Resign { user, reply }).await
    }

    /// Explicit navigation away. A participant leaving an active game forfeits it.
    pub async fn leave(
        &self,
        conn: ConnectionId,
        user: Option<UserId>,
        still_connected: bool,
    ) -> Result<Option<Ended>> {
        self.request(|reply| RoomCommand::Leave {
            conn,
            user,
            still_connected,
            reply,
        })
        .await
    }

    /// Transport-level drop; does not wait for the room
    pub async fn connection_lost(&self, conn: ConnectionId, user: Option<UserId>, still_connected: bool) -> Result<()> {
        self.mailbox
            .send(RoomCommand::ConnectionLost {
                conn,
                user,
                still_connected,
            })
            .await
            .map_err(|_| Error::NotFound(self.room_id))
    }

    pub async fn terminate(&self, reason: TerminationReason) -> Result<Ended> {
        self.request(|reply| RoomCommand::Terminate { reason, reply }).await
    }

    pub async fn snapshot(&self) -> Result<SessionSnapshot> {
        self.request(|reply| RoomCommand::Snapshot { reply }).await
    }

    async fn request<T>(&self, command: impl FnOnce(Reply<T>) -> RoomCommand) -> Result<T> {
        let (tx, rx) = oneshot::channel();
        self.mailbox
            .send(command(tx))
            .await
            .map_err(|_| Error::NotFound(self.room_id))?;
        rx.await.map_err(|_| Error::Shutdown(self.room_id))?
    }
}

/// Register and start the task for `session`
pub(crate) fn spawn(session: GameSession, engine: Arc<dyn RuleEngine>, ctx: Arc<RoomContext>) -> RoomHandle {
    let (tx, rx) = mpsc::channel(ctx.config.room_mailbox_capacity.max(1));
    let handle = RoomHandle {
        room_id: session.room_id(),
        kind: session.kind(),
        roles: session.roles().clone(),
        mailbox: tx,
    };
    ctx.rooms.insert(handle.room_id, handle.clone());

    let now = Instant::now();
    // Seats start empty; one nobody takes within the window is abandoned
    let reconnect_deadlines = match ctx.config.reconnect_window {
        Some(window) => [Some(now + window); 2],
        None => [None, None],
    };
    let turn_deadline = ctx.config.turn_clock.map(|clock| now + clock);
    let actor = RoomActor {
        session,
        engine,
        ctx,
        mailbox: rx,
        profiles: HashMap::new(),
        seats: [HashSet::new(), HashSet::new()],
        reconnect_deadlines,
        turn_deadline,
        retire_at: None,
    };
    tokio::spawn(actor.run());

    handle
}

struct RoomActor {
    session: GameSession,
    engine: Arc<dyn RuleEngine>,
    ctx: Arc<RoomContext>,
    mailbox: mpsc::Receiver<RoomCommand>,
    /// Last profiles resolved for the two participants
    profiles: HashMap<UserId, Profile>,
    /// Subscribed connections of each participant
    seats: [HashSet<ConnectionId>; 2],
    reconnect_deadlines: [Option<Instant>; 2],
    turn_deadline: Option<Instant>,
    retire_at: Option<Instant>,
}

async fn sleep_until_some(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl RoomActor {
    async fn run(mut self) {
        let room_id = self.session.room_id();
        info!(room_id = %room_id, kind = %self.session.kind(), "Room started");

        loop {
            let deadline = self.next_deadline();
            tokio::select! {
                command = self.mailbox.recv() => match command {
                    Some(command) => self.handle(command).await,
                    None => break,
                },
                _ = sleep_until_some(deadline) => self.on_timer().await,
            }

            if self.retire_at.map_or(false, |at| at <= Instant::now()) {
                break;
            }
        }

        self.retire();
    }

    fn next_deadline(&self) -> Option<Instant> {
        self.reconnect_deadlines
            .iter()
            .flatten()
            .chain(self.turn_deadline.iter())
            .chain(self.retire_at.iter())
            .min()
            .copied()
    }

    async fn handle(&mut self, command: RoomCommand) {
        match command {
            RoomCommand::Submit {
                conn,
                user,
                action,
                reply,
            } => {
                let result = self.submit(conn, &user, &action).await;
                let _ = reply.send(result);
            }
            RoomCommand::Join {
                conn,
                user,
                profiles,
                reply,
            } => {
                let result = self.join(conn, user, profiles).await;
                let _ = reply.send(result);
            }
            RoomCommand::Resign { user, reply } => {
                let result = self.session.resign(&user);
                if let Ok(ended) = &result {
                    info!(room_id = %self.session.room_id(), user_id = %user, "Participant resigned");
                    self.conclude(ended.clone()).await;
                }
                let _ = reply.send(result);
            }
            RoomCommand::Leave {
                conn,
                user,
                still_connected,
                reply,
            } => {
                let result = self.leave(conn, user, still_connected).await;
                let _ = reply.send(result);
            }
            RoomCommand::ConnectionLost {
                conn,
                user,
                still_connected,
            } => self.connection_lost(conn, user, still_connected).await,
            RoomCommand::Terminate { reason, reply } => {
                let result = self.session.terminate(reason, None);
                if let Ok(ended) = &result {
                    self.conclude(ended.clone()).await;
                }
                let _ = reply.send(result);
            }
            RoomCommand::Snapshot { reply } => {
                let _ = reply.send(Ok(self.session.snapshot(&self.profiles)));
            }
        }
    }

    async fn submit(&mut self, conn: Option<ConnectionId>, user: &UserId, action: &ActionPayload) -> Result<Applied> {
        let room_id = self.session.room_id();

        let applied = match self.session.submit(self.engine.as_ref(), user, action) {
            Ok(applied) => applied,
            Err(e) => {
                self.ctx.stats.record_rejected();
                debug!(room_id = %room_id, user_id = %user, error = %e, "Action rejected");
                if let Some(conn) = conn {
                    let version = Some(self.session.version());
                    self.send(conn, &ServerMessage::rejection(Some(room_id), &e, version))
                        .await;
                }
                return Err(e);
            }
        };

        self.ctx.stats.record_applied();
        debug!(
            room_id = %room_id,
            actor = %applied.actor,
            version = applied.version,
            extra_turn = applied.extra_turn,
            "Action applied"
        );

        self.broadcast(&ServerMessage::ActionApplied {
            room_id,
            roles: self.session.roles().clone(),
            state: applied.state.clone(),
            turn_owner: applied.turn_owner,
            status: applied.status,
            version: applied.version,
            result: applied.result.clone(),
        })
        .await;
        self.ctx.events.publish(SessionEvent::ActionApplied {
            room_id,
            actor: applied.actor,
            turn_owner: applied.turn_owner,
            version: applied.version,
        });

        if applied.ended() {
            self.conclude(Ended {
                reason: TerminationReason::NormalCompletion,
                result: applied.result.clone(),
            })
            .await;
        } else {
            self.restart_turn_clock();
        }

        Ok(applied)
    }

    async fn join(
        &mut self,
        conn: ConnectionId,
        user: Option<UserId>,
        profiles: HashMap<UserId, Profile>,
    ) -> Result<SessionSnapshot> {
        let room_id = self.session.room_id();
        self.profiles.extend(profiles);

        let your_role = user.as_ref().and_then(|u| self.session.role_of(u));
        match (&user, your_role) {
            (Some(user), Some(role)) => {
                self.seats[role.index()].insert(conn);
                self.reconnect_deadlines[role.index()] = None;
                let changed = self.session.set_connected(user, true).is_some();
                if changed && !self.session.is_over() {
                    info!(room_id = %room_id, user_id = %user, role = %role, "Participant connected");
                    self.broadcast(&ServerMessage::ParticipantStatus {
                        room_id,
                        user_id: user.clone(),
                        role,
                        connected: true,
                    })
                    .await;
                }
            }
            _ => {
                if self.session.add_spectator(conn) {
                    debug!(room_id = %room_id, connection = %conn, "Spectator joined");
                }
            }
        }

        self.ctx.channel.join_room(conn, room_id).await?;

        let snapshot = self.session.snapshot(&self.profiles);
        self.send(
            conn,
            &ServerMessage::CatchUp {
                snapshot: snapshot.clone(),
                your_role,
            },
        )
        .await;

        Ok(snapshot)
    }

    async fn leave(&mut self, conn: ConnectionId, user: Option<UserId>, still_connected: bool) -> Result<Option<Ended>> {
        let room_id = self.session.room_id();
        if let Err(e) = self.ctx.channel.leave_room(conn, room_id).await {
            debug!(room_id = %room_id, connection = %conn, error = %e, "Leave on transport failed");
        }

        let role = user.as_ref().and_then(|u| self.session.role_of(u));
        if let Some(role) = role {
            self.seats[role.index()].remove(&conn);
        }
        match (user, role) {
            (Some(user), Some(role)) if !self.session.is_over() => {
                let ended = self.session.forfeit(role, TerminationReason::OpponentLeft)?;
                info!(room_id = %room_id, user_id = %user, "Participant left the game");
                self.conclude(ended.clone()).await;
                Ok(Some(ended))
            }
            (Some(user), Some(role)) => {
                if !still_connected && self.seats[role.index()].is_empty() {
                    self.session.set_connected(&user, false);
                }
                Ok(None)
            }
            _ => {
                self.session.remove_spectator(conn);
                Ok(None)
            }
        }
    }

    async fn connection_lost(&mut self, conn: ConnectionId, user: Option<UserId>, still_connected: bool) {
        let room_id = self.session.room_id();
        if let Err(e) = self.ctx.channel.leave_room(conn, room_id).await {
            debug!(room_id = %room_id, connection = %conn, error = %e, "Leave on transport failed");
        }

        let role = user.as_ref().and_then(|u| self.session.role_of(u));
        let (user, role) = match (user, role) {
            (Some(user), Some(role)) => (user, role),
            _ => {
                self.session.remove_spectator(conn);
                return;
            }
        };

        let seat = &mut self.seats[role.index()];
        seat.remove(&conn);
        if still_connected || !seat.is_empty() {
            return;
        }
        if self.session.set_connected(&user, false).is_none() {
            return;
        }
        if self.session.is_over() {
            return;
        }

        info!(room_id = %room_id, user_id = %user, role = %role, "Participant disconnected");
        self.broadcast(&ServerMessage::ParticipantStatus {
            room_id,
            user_id: user,
            role,
            connected: false,
        })
        .await;

        if let Some(window) = self.ctx.config.reconnect_window {
            self.reconnect_deadlines[role.index()] = Some(Instant::now() + window);
        }
    }

    async fn on_timer(&mut self) {
        let now = Instant::now();
        let room_id = self.session.room_id();

        let expired: Vec<Role> = Role::BOTH
            .into_iter()
            .filter(|role| self.reconnect_deadlines[role.index()].map_or(false, |at| at <= now))
            .collect();
        if !expired.is_empty() {
            for role in &expired {
                self.reconnect_deadlines[role.index()] = None;
            }
            // Nobody to award the game to when both seats are empty
            let ended = match expired.as_slice() {
                [loser] => self.session.forfeit(*loser, TerminationReason::Disconnected),
                _ => self.session.terminate(TerminationReason::Disconnected, None),
            };
            if let Ok(ended) = ended {
                info!(room_id = %room_id, abandoned = ?expired, "Reconnection window expired");
                self.conclude(ended).await;
            }
            return;
        }

        if self.turn_deadline.map_or(false, |at| at <= now) {
            self.turn_deadline = None;
            if let Some(owner) = self.session.turn_owner() {
                if let Ok(ended) = self.session.forfeit(owner, TerminationReason::TimedOut) {
                    info!(room_id = %room_id, role = %owner, "Turn clock expired");
                    self.conclude(ended).await;
                }
            }
        }
    }

    fn restart_turn_clock(&mut self) {
        self.turn_deadline = self.ctx.config.turn_clock.map(|clock| Instant::now() + clock);
    }

    /// Side effects of the session reaching `Over`
    async fn conclude(&mut self, ended: Ended) {
        let room_id = self.session.room_id();
        let roles = self.session.roles().clone();

        self.reconnect_deadlines = [None, None];
        self.turn_deadline = None;
        self.retire_at = Some(Instant::now() + self.ctx.config.retain_finished_for);

        for user in roles.users() {
            self.ctx.presence.release(user, room_id);
        }
        self.ctx.stats.record_finished();

        info!(
            room_id = %room_id,
            reason = %ended.reason,
            winner = ?ended.result.as_ref().and_then(|r| r.winner),
            "Session ended"
        );

        self.broadcast(&ServerMessage::SessionEnded {
            room_id,
            roles: roles.clone(),
            reason: ended.reason,
            result: ended.result.clone(),
        })
        .await;
        self.ctx.events.publish(SessionEvent::SessionEnded {
            room_id,
            roles,
            reason: ended.reason,
            result: ended.result,
        });
    }

    fn retire(&mut self) {
        let room_id = self.session.room_id();
        self.ctx.rooms.remove(&room_id);
        self.mailbox.close();

        if !self.session.is_over() {
            warn!(room_id = %room_id, "Room stopped while the session was still active");
            for user in self.session.roles().users() {
                self.ctx.presence.release(user, room_id);
            }
        }
        debug!(room_id = %room_id, "Room retired");
    }

    async fn broadcast(&self, message: &ServerMessage) {
        let room_id = self.session.room_id();
        if let Err(e) = self.ctx.channel.broadcast_to_room(room_id, message).await {
            warn!(room_id = %room_id, error = %e, "Broadcast failed");
        }
    }

    async fn send(&self, conn: ConnectionId, message: &ServerMessage) {
        if let Err(e) = self.ctx.channel.send_to(conn, message).await {
            debug!(connection = %conn, error = %e, "Send failed");
        }
    }
}

//! Game sessions
//!
//! A [`GameSession`] is the authoritative state of one room: the fixed role
//! assignment, the opaque game state, whose turn it is and whether the game
//! is over. It is plain synchronous data; all concurrency lives in
//! [`room`], which owns exactly one session per task.
//!
//! Turn rules:
//! - only the turn owner may act; everyone else gets `NotYourTurn`
//! - a rejected action changes nothing, not even the version
//! - an accepted action flips the turn unless the engine grants an extra turn
//! - once `Over`, the session never changes again

pub mod registry;
pub mod room;

use std::collections::{HashMap, HashSet};

use crate::engine::{ActionPayload, GameState, Outcome, RuleEngine};
use crate::error::{Error, Result};
use crate::protocol::{
    ConnectionId, GameKind, GameResult, ParticipantView, Profile, Role, RoleAssignment, RoomId,
    SessionSnapshot, SessionStatus, TerminationReason, UserId,
};

pub use registry::{RegistryStatistics, SessionRegistry};
pub use room::RoomHandle;

/// One of the two seats
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Participant {
    pub user_id: UserId,
    pub role: Role,
    /// At least one live connection is subscribed to the room
    pub connected: bool,
}

/// Result of an accepted action
#[derive(Debug, Clone, PartialEq)]
pub struct Applied {
    pub actor: Role,
    pub state: GameState,
    pub turn_owner: Option<Role>,
    pub status: SessionStatus,
    pub version: u64,
    pub result: Option<GameResult>,
    pub extra_turn: bool,
}

impl Applied {
    pub fn ended(&self) -> bool {
        self.status == SessionStatus::Over
    }
}

/// How a session ended
#[derive(Debug, Clone, PartialEq)]
pub struct Ended {
    pub reason: TerminationReason,
    pub result: Option<GameResult>,
}

/// Authoritative state of one room
#[derive(Debug, Clone)]
pub struct GameSession {
    room_id: RoomId,
    kind: GameKind,
    roles: RoleAssignment,
    participants: [Participant; 2],
    state: GameState,
    turn_owner: Role,
    status: SessionStatus,
    termination: Option<TerminationReason>,
    result: Option<GameResult>,
    spectators: HashSet<ConnectionId>,
    version: u64,
}

impl GameSession {
    /// New active session. `First` moves first.
    pub fn new(room_id: RoomId, kind: GameKind, roles: RoleAssignment, state: GameState) -> Self {
        let participants = Role::BOTH.map(|role| Participant {
            user_id: roles.user(role).clone(),
            role,
            connected: false,
        });
        Self {
            room_id,
            kind,
            roles,
            participants,
            state,
            turn_owner: Role::First,
            status: SessionStatus::Active,
            termination: None,
            result: None,
            spectators: HashSet::new(),
            version: 0,
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    pub fn kind(&self) -> GameKind {
        self.kind
    }

    pub fn roles(&self) -> &RoleAssignment {
        &self.roles
    }

    pub fn state(&self) -> &GameState {
        &self.state
    }

    /// `None` once the session is over
    pub fn turn_owner(&self) -> Option<Role> {
        (self.status == SessionStatus::Active).then_some(self.turn_owner)
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn is_over(&self) -> bool {
        self.status == SessionStatus::Over
    }

    pub fn termination(&self) -> Option<TerminationReason> {
        self.termination
    }

    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        self.roles.role_of(user)
    }

    pub fn participant(&self, role: Role) -> &Participant {
        &self.participants[role.index()]
    }

    /// Apply `action` on behalf of whoever holds `user`'s seat
    pub fn submit(&mut self, engine: &dyn RuleEngine, user: &UserId, action: &ActionPayload) -> Result<Applied> {
        let actor = self
            .role_of(user)
            .ok_or_else(|| Error::NotAParticipant(user.to_string()))?;
        self.apply_action(engine, actor, action)
    }

    /// Validate and apply one action. Nothing changes unless it is accepted.
    pub fn apply_action(&mut self, engine: &dyn RuleEngine, actor: Role, action: &ActionPayload) -> Result<Applied> {
        if self.is_over() {
            return Err(Error::SessionOver(self.room_id));
        }
        if actor != self.turn_owner {
            return Err(Error::NotYourTurn {
                expected: self.turn_owner,
                actual: actor,
            });
        }

        let (new_state, extra_turn, terminal) = match engine.apply(&self.state, actor, action)? {
            Outcome::Rejected { reason } => return Err(Error::IllegalAction(reason)),
            Outcome::Accepted {
                new_state,
                extra_turn_granted,
                terminal,
            } => (new_state, extra_turn_granted, terminal),
        };

        self.state = new_state;
        self.version += 1;

        if let Some(result) = terminal {
            self.status = SessionStatus::Over;
            self.termination = Some(TerminationReason::NormalCompletion);
            self.result = Some(result);
        } else if !extra_turn {
            self.turn_owner = actor.other();
        }

        Ok(Applied {
            actor,
            state: self.state.clone(),
            turn_owner: self.turn_owner(),
            status: self.status,
            version: self.version,
            result: self.result.clone(),
            extra_turn,
        })
    }

    /// Move to `Over` for a reason other than a terminal move
    pub fn terminate(&mut self, reason: TerminationReason, result: Option<GameResult>) -> Result<Ended> {
        if self.is_over() {
            return Err(Error::SessionOver(self.room_id));
        }
        self.status = SessionStatus::Over;
        self.termination = Some(reason);
        self.result = result.clone();
        Ok(Ended { reason, result })
    }

    /// `user` gives up; the opponent wins
    pub fn resign(&mut self, user: &UserId) -> Result<Ended> {
        let role = self
            .role_of(user)
            .ok_or_else(|| Error::NotAParticipant(user.to_string()))?;
        self.forfeit(role, TerminationReason::Resignation)
    }

    /// `loser` stops playing for `reason`; the opponent wins
    pub fn forfeit(&mut self, loser: Role, reason: TerminationReason) -> Result<Ended> {
        self.terminate(reason, Some(GameResult::forfeit(loser, reason)))
    }

    /// Record connectivity. Returns the seat if its flag actually changed.
    pub fn set_connected(&mut self, user: &UserId, connected: bool) -> Option<Role> {
        let role = self.role_of(user)?;
        let participant = &mut self.participants[role.index()];
        if participant.connected == connected {
            return None;
        }
        participant.connected = connected;
        Some(role)
    }

    pub fn add_spectator(&mut self, conn: ConnectionId) -> bool {
        self.spectators.insert(conn)
    }

    pub fn remove_spectator(&mut self, conn: ConnectionId) -> bool {
        self.spectators.remove(&conn)
    }

    pub fn spectator_count(&self) -> usize {
        self.spectators.len()
    }

    /// Full picture for a (re)joining connection
    pub fn snapshot(&self, profiles: &HashMap<UserId, Profile>) -> SessionSnapshot {
        SessionSnapshot {
            room_id: self.room_id,
            kind: self.kind,
            roles: self.roles.clone(),
            participants: self
                .participants
                .iter()
                .map(|p| ParticipantView {
                    user_id: p.user_id.clone(),
                    role: p.role,
                    connected: p.connected,
                    profile: profiles.get(&p.user_id).cloned(),
                })
                .collect(),
            state: self.state.clone(),
            turn_owner: self.turn_owner(),
            status: self.status,
            termination: self.termination,
            result: self.result.clone(),
            version: self.version,
        }
    }
}

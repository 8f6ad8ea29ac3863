//! Client and server message envelopes
//!
//! Every room-scoped server message a client can act on carries the room's
//! [`RoleAssignment`], so a client never has to fall back to a cached or
//! default role.

use serde::{Deserialize, Serialize};

use super::{
    ChallengeId, ConnectionId, GameKind, GameResult, Role, RoleAssignment, RoomId, SessionStatus,
    TerminationReason, UserId,
};
use crate::engine::{ActionPayload, GameState};
use crate::error::ErrorKind;

/// Display data resolved through the identity lookup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub display_name: String,
    pub avatar_url: Option<String>,
}

/// One seat as shown to (re)joining connections
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParticipantView {
    pub user_id: UserId,
    pub role: Role,
    pub connected: bool,
    pub profile: Option<Profile>,
}

/// Authoritative picture of a room, sent on every join
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub room_id: RoomId,
    pub kind: GameKind,
    pub roles: RoleAssignment,
    pub participants: Vec<ParticipantView>,
    pub state: GameState,
    /// `None` once the session is over
    pub turn_owner: Option<Role>,
    pub status: SessionStatus,
    pub termination: Option<TerminationReason>,
    pub result: Option<GameResult>,
    pub version: u64,
}

/// Messages a client sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Bind this connection to an authenticated user
    Hello { user_id: UserId },
    Challenge { to: UserId, kind: GameKind },
    AcceptChallenge { challenge_id: ChallengeId },
    DeclineChallenge { challenge_id: ChallengeId },
    CancelChallenge { challenge_id: ChallengeId },
    /// Subscribe to a room; answered with a `CatchUp`
    Join { room_id: RoomId },
    Submit { room_id: RoomId, action: ActionPayload },
    Resign { room_id: RoomId },
    /// Explicit navigation away from the room
    Leave { room_id: RoomId },
}

/// Messages the server sends
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Welcome {
        user_id: UserId,
        connection_id: ConnectionId,
    },
    ChallengeIssued {
        challenge_id: ChallengeId,
        to: UserId,
        kind: GameKind,
    },
    ChallengeReceived {
        challenge_id: ChallengeId,
        from: UserId,
        kind: GameKind,
    },
    ChallengeAccepted {
        challenge_id: ChallengeId,
        room_id: RoomId,
        kind: GameKind,
        roles: RoleAssignment,
    },
    ChallengeDeclined {
        challenge_id: ChallengeId,
        by: UserId,
    },
    CatchUp {
        snapshot: SessionSnapshot,
        your_role: Option<Role>,
    },
    ActionApplied {
        room_id: RoomId,
        roles: RoleAssignment,
        state: GameState,
        turn_owner: Option<Role>,
        status: SessionStatus,
        version: u64,
        result: Option<GameResult>,
    },
    Rejected {
        room_id: Option<RoomId>,
        kind: ErrorKind,
        reason: String,
        /// Current session version, so the client knows what to resync to
        version: Option<u64>,
    },
    ParticipantStatus {
        room_id: RoomId,
        user_id: UserId,
        role: Role,
        connected: bool,
    },
    SessionEnded {
        room_id: RoomId,
        roles: RoleAssignment,
        reason: TerminationReason,
        result: Option<GameResult>,
    },
    Presence {
        user_id: UserId,
        busy: bool,
    },
}

impl ServerMessage {
    /// Room this message is scoped to, if any
    pub fn room_id(&self) -> Option<RoomId> {
        match self {
            ServerMessage::ChallengeAccepted { room_id, .. }
            | ServerMessage::ActionApplied { room_id, .. }
            | ServerMessage::ParticipantStatus { room_id, .. }
            | ServerMessage::SessionEnded { room_id, .. } => Some(*room_id),
            ServerMessage::CatchUp { snapshot, .. } => Some(snapshot.room_id),
            ServerMessage::Rejected { room_id, .. } => *room_id,
            _ => None,
        }
    }

    /// Authoritative role mapping carried by this message
    pub fn roles(&self) -> Option<&RoleAssignment> {
        match self {
            ServerMessage::ChallengeAccepted { roles, .. }
            | ServerMessage::ActionApplied { roles, .. }
            | ServerMessage::SessionEnded { roles, .. } => Some(roles),
            ServerMessage::CatchUp { snapshot, .. } => Some(&snapshot.roles),
            _ => None,
        }
    }

    pub fn rejection(room_id: Option<RoomId>, err: &crate::Error, version: Option<u64>) -> Self {
        ServerMessage::Rejected {
            room_id,
            kind: err.kind(),
            reason: err.to_string(),
            version,
        }
    }
}

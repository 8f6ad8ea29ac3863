//! Wire protocol for Matchroom
//!
//! This module defines everything that crosses the transport boundary:
//! - Identifiers for rooms, users, connections and challenges
//! - The two-seat role model and session status enums
//! - Client and server message envelopes (see [`messages`])
//! - JSON framing into `Bytes` (see [`codec`])

pub mod codec;
pub mod messages;

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

pub use messages::{ClientMessage, ParticipantView, Profile, ServerMessage, SessionSnapshot};

/// Room identifier - a fresh v4 UUID per accepted challenge, never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomId(Uuid);

impl RoomId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for RoomId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RoomId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// User identifier as issued by the (external) authentication layer
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for UserId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for UserId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Transport connection identifier. One user may hold several over time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Challenge identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChallengeId(Uuid);

impl ChallengeId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ChallengeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ChallengeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Seat in a two-player session.
///
/// What the seats mean is up to the rule engine (white/black, asker order).
/// The challenger always sits in `First`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    First,
    Second,
}

impl Role {
    pub const BOTH: [Role; 2] = [Role::First, Role::Second];

    pub fn other(self) -> Role {
        match self {
            Role::First => Role::Second,
            Role::Second => Role::First,
        }
    }

    pub fn index(self) -> usize {
        match self {
            Role::First => 0,
            Role::Second => 1,
        }
    }

    /// Role expected after `moves` strictly alternating moves
    pub fn after_moves(moves: u64) -> Role {
        if moves % 2 == 0 {
            Role::First
        } else {
            Role::Second
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::First => f.write_str("first"),
            Role::Second => f.write_str("second"),
        }
    }
}

/// The fixed user-to-role mapping of one room
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RoleAssignment {
    pub first: UserId,
    pub second: UserId,
}

impl RoleAssignment {
    /// Challenger gets `First`, accepter gets `Second`
    pub fn from_challenge(initiator: UserId, accepter: UserId) -> Self {
        Self {
            first: initiator,
            second: accepter,
        }
    }

    pub fn role_of(&self, user: &UserId) -> Option<Role> {
        if &self.first == user {
            Some(Role::First)
        } else if &self.second == user {
            Some(Role::Second)
        } else {
            None
        }
    }

    pub fn user(&self, role: Role) -> &UserId {
        match role {
            Role::First => &self.first,
            Role::Second => &self.second,
        }
    }

    pub fn users(&self) -> [&UserId; 2] {
        [&self.first, &self.second]
    }
}

/// Game variety a room plays; selects the rule engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameKind {
    /// Alternating single moves on a board
    Board,
    /// Ask/answer card game with extra turns
    GoFish,
}

impl fmt::Display for GameKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GameKind::Board => f.write_str("board"),
            GameKind::GoFish => f.write_str("go-fish"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Over,
}

/// Why a session moved to `Over`. Recorded exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminationReason {
    NormalCompletion,
    Resignation,
    OpponentLeft,
    Disconnected,
    TimedOut,
}

impl fmt::Display for TerminationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TerminationReason::NormalCompletion => "normal-completion",
            TerminationReason::Resignation => "resignation",
            TerminationReason::OpponentLeft => "opponent-left",
            TerminationReason::Disconnected => "disconnected",
            TerminationReason::TimedOut => "timed-out",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Scores {
    pub first: u32,
    pub second: u32,
}

/// Final outcome of a session. `winner: None` is a draw.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameResult {
    pub winner: Option<Role>,
    pub scores: Option<Scores>,
    pub summary: String,
}

impl GameResult {
    pub fn win(winner: Role, summary: impl Into<String>) -> Self {
        Self {
            winner: Some(winner),
            scores: None,
            summary: summary.into(),
        }
    }

    pub fn draw(summary: impl Into<String>) -> Self {
        Self {
            winner: None,
            scores: None,
            summary: summary.into(),
        }
    }

    pub fn with_scores(mut self, scores: Scores) -> Self {
        self.scores = Some(scores);
        self
    }

    /// Outcome when `loser` stops playing before the game concludes
    pub fn forfeit(loser: Role, reason: TerminationReason) -> Self {
        Self::win(loser.other(), format!("{} by {}", reason, loser))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_role_alternation() {
        assert_eq!(Role::after_moves(0), Role::First);
        assert_eq!(Role::after_moves(1), Role::Second);
        assert_eq!(Role::after_moves(10), Role::First);
        assert_eq!(Role::First.other(), Role::Second);
        assert_eq!(Role::Second.other().other(), Role::Second);
    }

    #[test]
    fn test_role_assignment_lookup() {
        let roles = RoleAssignment::from_challenge("alice".into(), "bob".into());
        assert_eq!(roles.role_of(&"alice".into()), Some(Role::First));
        assert_eq!(roles.role_of(&"bob".into()), Some(Role::Second));
        assert_eq!(roles.role_of(&"carol".into()), None);
        assert_eq!(roles.user(Role::Second).as_str(), "bob");
    }

    #[test]
    fn test_room_ids_are_unique() {
        let a = RoomId::new();
        let b = RoomId::new();
        assert_ne!(a, b);
    }

    #[test]
    fn test_forfeit_awards_opponent() {
        let result = GameResult::forfeit(Role::First, TerminationReason::Resignation);
        assert_eq!(result.winner, Some(Role::Second));
        assert_eq!(result.summary, "resignation by first");
    }
}

//! Client-side room cache
//!
//! [`RoomView`] is what a client keeps for one room. The server's messages
//! are the source of truth: any authoritative state for the room replaces
//! whatever the view held, including a move the client applied
//! optimistically. The role mapping is recorded the first time it is seen
//! and never replaced afterwards; a message carrying a different mapping is
//! reported as a protocol violation.

use tracing::{debug, warn};

use crate::engine::GameState;
use crate::error::{Error, Result};
use crate::protocol::{GameResult, Role, RoleAssignment, RoomId, ServerMessage, SessionStatus, UserId};

#[derive(Debug, Clone)]
pub struct RoomView {
    room_id: RoomId,
    local_user: UserId,
    roles: Option<RoleAssignment>,
    confirmed: Option<GameState>,
    optimistic: Option<GameState>,
    turn_owner: Option<Role>,
    status: SessionStatus,
    result: Option<GameResult>,
    version: u64,
    opponent_connected: Option<bool>,
    /// A rejection showed the view is stale; rejoin for a fresh catch-up
    needs_resync: bool,
    violations: u64,
}

impl RoomView {
    pub fn new(room_id: RoomId, local_user: UserId) -> Self {
        Self {
            room_id,
            local_user,
            roles: None,
            confirmed: None,
            optimistic: None,
            turn_owner: None,
            status: SessionStatus::Active,
            result: None,
            version: 0,
            opponent_connected: None,
            needs_resync: false,
            violations: 0,
        }
    }

    pub fn room_id(&self) -> RoomId {
        self.room_id
    }

    /// Fold one server message into the view.
    ///
    /// Messages for other rooms are ignored. A role conflict is returned as
    /// `ProtocolViolation` after the rest of the message has been applied.
    pub fn observe(&mut self, message: &ServerMessage) -> Result<()> {
        if message.room_id() != Some(self.room_id) {
            return Ok(());
        }

        let mut conflict = match message.roles() {
            Some(roles) => self.record_roles(roles),
            None => None,
        };

        match message {
            ServerMessage::CatchUp { snapshot, your_role } => {
                if conflict.is_none() && *your_role != self.my_role() {
                    conflict = Some(self.violation(format!(
                        "catch-up seats {} as {:?}, ledger says {:?}",
                        self.local_user,
                        your_role,
                        self.my_role()
                    )));
                }
                self.confirmed = Some(snapshot.state.clone());
                self.optimistic = None;
                self.needs_resync = false;
                self.turn_owner = snapshot.turn_owner;
                self.status = snapshot.status;
                self.result = snapshot.result.clone();
                self.version = snapshot.version;
                self.opponent_connected = self.my_role().and_then(|mine| {
                    snapshot
                        .participants
                        .iter()
                        .find(|p| p.role == mine.other())
                        .map(|p| p.connected)
                });
            }
            ServerMessage::ActionApplied {
                state,
                turn_owner,
                status,
                version,
                result,
                ..
            } => {
                self.confirmed = Some(state.clone());
                self.optimistic = None;
                self.turn_owner = *turn_owner;
                self.status = *status;
                self.result = result.clone();
                self.version = *version;
            }
            ServerMessage::SessionEnded { result, .. } => {
                self.optimistic = None;
                self.turn_owner = None;
                self.status = SessionStatus::Over;
                self.result = result.clone();
            }
            ServerMessage::Rejected {
                kind, reason, version, ..
            } => {
                if self.optimistic.take().is_some() {
                    debug!(room_id = %self.room_id, reason = %reason, "Rolled back optimistic move");
                }
                let behind = version.map_or(false, |v| v > self.version);
                if behind || kind.is_retryable() {
                    debug!(
                        room_id = %self.room_id,
                        kind = ?kind,
                        local = self.version,
                        remote = ?version,
                        "View needs a fresh catch-up"
                    );
                    self.needs_resync = true;
                }
            }
            ServerMessage::ParticipantStatus {
                user_id,
                role,
                connected,
                ..
            } => {
                if let Some(roles) = &self.roles {
                    if roles.role_of(user_id) != Some(*role) && conflict.is_none() {
                        conflict = Some(self.violation(format!("{} reported in seat {}", user_id, role)));
                    }
                }
                if user_id != &self.local_user {
                    self.opponent_connected = Some(*connected);
                }
            }
            _ => {}
        }

        conflict.map_or(Ok(()), Err)
    }

    /// Show `state` before the server confirms it
    pub fn apply_optimistic(&mut self, state: GameState) -> Result<()> {
        if self.status == SessionStatus::Over {
            return Err(Error::SessionOver(self.room_id));
        }
        match (self.my_role(), self.turn_owner) {
            (None, _) => Err(Error::NotAParticipant(self.local_user.to_string())),
            (Some(mine), Some(owner)) if mine == owner => {
                self.optimistic = Some(state);
                Ok(())
            }
            (Some(mine), Some(owner)) => Err(Error::NotYourTurn {
                expected: owner,
                actual: mine,
            }),
            (Some(_), None) => Err(Error::ProtocolViolation(format!(
                "no state received for room {} yet",
                self.room_id
            ))),
        }
    }

    /// The local user's seat, once any role-carrying message has arrived
    pub fn my_role(&self) -> Option<Role> {
        self.roles.as_ref().and_then(|roles| roles.role_of(&self.local_user))
    }

    pub fn roles(&self) -> Option<&RoleAssignment> {
        self.roles.as_ref()
    }

    /// Optimistic state if there is one, otherwise the last confirmed state
    pub fn displayed_state(&self) -> Option<&GameState> {
        self.optimistic.as_ref().or(self.confirmed.as_ref())
    }

    pub fn confirmed_state(&self) -> Option<&GameState> {
        self.confirmed.as_ref()
    }

    pub fn has_pending_move(&self) -> bool {
        self.optimistic.is_some()
    }

    /// Our turn, the game is live and no move is in flight
    pub fn can_act(&self) -> bool {
        self.status == SessionStatus::Active
            && self.optimistic.is_none()
            && self.my_role().is_some()
            && self.turn_owner == self.my_role()
    }

    /// Set by a rejection that a rejoin and retry can fix
    pub fn needs_resync(&self) -> bool {
        self.needs_resync
    }

    pub fn turn_owner(&self) -> Option<Role> {
        self.turn_owner
    }

    pub fn status(&self) -> SessionStatus {
        self.status
    }

    pub fn result(&self) -> Option<&GameResult> {
        self.result.as_ref()
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub fn opponent_connected(&self) -> Option<bool> {
        self.opponent_connected
    }

    /// Protocol violations seen so far
    pub fn violations(&self) -> u64 {
        self.violations
    }

    fn record_roles(&mut self, roles: &RoleAssignment) -> Option<Error> {
        match &self.roles {
            None => {
                self.roles = Some(roles.clone());
                None
            }
            Some(known) if known == roles => None,
            Some(known) => {
                let detail = format!(
                    "roles changed from {}/{} to {}/{}",
                    known.first, known.second, roles.first, roles.second
                );
                Some(self.violation(detail))
            }
        }
    }

    fn violation(&mut self, detail: String) -> Error {
        self.violations += 1;
        warn!(room_id = %self.room_id, user_id = %self.local_user, "{}", detail);
        Error::ProtocolViolation(detail)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{GameKind, ParticipantView, SessionSnapshot};
    use serde_json::json;

    fn roles() -> RoleAssignment {
        RoleAssignment::from_challenge("alice".into(), "bob".into())
    }

    fn snapshot(room_id: RoomId, version: u64, turn_owner: Role) -> SessionSnapshot {
        let roles = roles();
        SessionSnapshot {
            room_id,
            kind: GameKind::Board,
            participants: Role::BOTH
                .iter()
                .map(|&role| ParticipantView {
                    user_id: roles.user(role).clone(),
                    role,
                    connected: true,
                    profile: None,
                })
                .collect(),
            roles,
            state: GameState::new(json!({ "v": version })),
            turn_owner: Some(turn_owner),
            status: SessionStatus::Active,
            termination: None,
            result: None,
            version,
        }
    }

    fn applied(room_id: RoomId, version: u64, turn_owner: Role) -> ServerMessage {
        ServerMessage::ActionApplied {
            room_id,
            roles: roles(),
            state: GameState::new(json!({ "v": version })),
            turn_owner: Some(turn_owner),
            status: SessionStatus::Active,
            version,
            result: None,
        }
    }

    #[test]
    fn test_role_from_either_message_order() {
        let room_id = RoomId::new();
        let accepted = ServerMessage::ChallengeAccepted {
            challenge_id: crate::protocol::ChallengeId::new(),
            room_id,
            kind: GameKind::Board,
            roles: roles(),
        };
        let catch_up = ServerMessage::CatchUp {
            snapshot: snapshot(room_id, 0, Role::First),
            your_role: Some(Role::Second),
        };

        let mut a = RoomView::new(room_id, "bob".into());
        a.observe(&accepted).unwrap();
        a.observe(&catch_up).unwrap();

        let mut b = RoomView::new(room_id, "bob".into());
        b.observe(&catch_up).unwrap();
        b.observe(&accepted).unwrap();

        assert_eq!(a.my_role(), Some(Role::Second));
        assert_eq!(b.my_role(), Some(Role::Second));
        assert_eq!(a.displayed_state(), b.displayed_state());
    }

    #[test]
    fn test_conflicting_roles_keep_first_mapping() {
        let room_id = RoomId::new();
        let mut view = RoomView::new(room_id, "alice".into());
        view.observe(&applied(room_id, 1, Role::Second)).unwrap();

        let swapped = ServerMessage::SessionEnded {
            room_id,
            roles: RoleAssignment::from_challenge("bob".into(), "alice".into()),
            reason: crate::protocol::TerminationReason::Resignation,
            result: None,
        };
        assert!(matches!(view.observe(&swapped), Err(Error::ProtocolViolation(_))));
        assert_eq!(view.my_role(), Some(Role::First));
        assert_eq!(view.violations(), 1);
        // The rest of the message still counts
        assert_eq!(view.status(), SessionStatus::Over);
    }

    #[test]
    fn test_rejection_rolls_back_optimistic_move() {
        let room_id = RoomId::new();
        let mut view = RoomView::new(room_id, "alice".into());
        view.observe(&ServerMessage::CatchUp {
            snapshot: snapshot(room_id, 0, Role::First),
            your_role: Some(Role::First),
        })
        .unwrap();
        assert!(view.can_act());

        view.apply_optimistic(GameState::new(json!({ "v": "guess" })))
            .unwrap();
        assert!(!view.can_act());
        assert_eq!(view.displayed_state().unwrap().as_value(), &json!({ "v": "guess" }));

        view.observe(&ServerMessage::Rejected {
            room_id: Some(room_id),
            kind: crate::ErrorKind::IllegalAction,
            reason: "no".into(),
            version: Some(0),
        })
        .unwrap();
        assert!(!view.has_pending_move());
        assert_eq!(view.displayed_state().unwrap().as_value(), &json!({ "v": 0 }));
        assert!(!view.needs_resync());
    }

    #[test]
    fn test_stale_rejection_asks_for_resync() {
        let room_id = RoomId::new();
        let mut view = RoomView::new(room_id, "alice".into());
        view.observe(&ServerMessage::CatchUp {
            snapshot: snapshot(room_id, 0, Role::First),
            your_role: Some(Role::First),
        })
        .unwrap();

        view.observe(&ServerMessage::Rejected {
            room_id: Some(room_id),
            kind: crate::ErrorKind::NotYourTurn,
            reason: "turn passed".into(),
            version: Some(0),
        })
        .unwrap();
        assert!(view.needs_resync());

        view.observe(&ServerMessage::CatchUp {
            snapshot: snapshot(room_id, 1, Role::Second),
            your_role: Some(Role::First),
        })
        .unwrap();
        assert!(!view.needs_resync());

        // A newer version behind an otherwise final rejection also means we are behind
        view.observe(&ServerMessage::Rejected {
            room_id: Some(room_id),
            kind: crate::ErrorKind::IllegalAction,
            reason: "no".into(),
            version: Some(4),
        })
        .unwrap();
        assert!(view.needs_resync());
    }

    #[test]
    fn test_authoritative_state_overwrites_optimistic() {
        let room_id = RoomId::new();
        let mut view = RoomView::new(room_id, "alice".into());
        view.observe(&applied(room_id, 2, Role::First)).unwrap();
        view.apply_optimistic(GameState::new(json!({ "v": "mine" })))
            .unwrap();

        view.observe(&applied(room_id, 3, Role::Second)).unwrap();
        assert_eq!(view.version(), 3);
        assert_eq!(view.displayed_state().unwrap().as_value(), &json!({ "v": 3 }));
        assert!(matches!(
            view.apply_optimistic(GameState::new(json!({}))),
            Err(Error::NotYourTurn { .. })
        ));
    }

    #[test]
    fn test_other_rooms_are_ignored() {
        let room_id = RoomId::new();
        let mut view = RoomView::new(room_id, "alice".into());
        view.observe(&applied(RoomId::new(), 5, Role::First)).unwrap();
        assert_eq!(view.version(), 0);
        assert!(view.roles().is_none());
        assert!(view.displayed_state().is_none());
    }

    #[test]
    fn test_tracks_opponent_connectivity() {
        let room_id = RoomId::new();
        let mut view = RoomView::new(room_id, "alice".into());
        view.observe(&ServerMessage::CatchUp {
            snapshot: snapshot(room_id, 0, Role::First),
            your_role: Some(Role::First),
        })
        .unwrap();
        assert_eq!(view.opponent_connected(), Some(true));

        view.observe(&ServerMessage::ParticipantStatus {
            room_id,
            user_id: "bob".into(),
            role: Role::Second,
            connected: false,
        })
        .unwrap();
        assert_eq!(view.opponent_connected(), Some(false));
    }
}

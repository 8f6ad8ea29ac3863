//! Property tests for role convergence and turn alternation

mod common;

use common::{tally, Tally};
use matchroom::protocol::ChallengeId;
use matchroom::{
    Error, GameKind, GameSession, Role, RoleAssignment, RoomId, RoomView, RuleEngine, ServerMessage, SessionStatus,
    UserId,
};
use proptest::prelude::*;
use std::collections::HashMap;

fn roles() -> RoleAssignment {
    RoleAssignment::from_challenge("alice".into(), "bob".into())
}

fn new_session(room_id: RoomId) -> GameSession {
    let state = RuleEngine::initial_state(&Tally).unwrap();
    GameSession::new(room_id, GameKind::Board, roles(), state)
}

/// Every role-carrying message a client may see for one room
fn deliveries(room_id: RoomId, user: &UserId) -> Vec<ServerMessage> {
    let mut session = new_session(room_id);
    let catch_up = ServerMessage::CatchUp {
        snapshot: session.snapshot(&HashMap::new()),
        your_role: session.role_of(user),
    };
    let applied = session.apply_action(&Tally, Role::First, &tally(false, false, false)).unwrap();

    vec![
        ServerMessage::ChallengeAccepted {
            challenge_id: ChallengeId::new(),
            room_id,
            kind: GameKind::Board,
            roles: roles(),
        },
        catch_up,
        ServerMessage::ActionApplied {
            room_id,
            roles: roles(),
            state: applied.state,
            turn_owner: applied.turn_owner,
            status: applied.status,
            version: applied.version,
            result: applied.result,
        },
        ServerMessage::ParticipantStatus {
            room_id,
            user_id: "bob".into(),
            role: Role::Second,
            connected: true,
        },
    ]
}

proptest! {
    #[test]
    fn prop_roles_converge_under_any_delivery_order(
        order_a in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle(),
        order_b in Just((0..4usize).collect::<Vec<_>>()).prop_shuffle(),
    ) {
        let room_id = RoomId::new();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let for_alice = deliveries(room_id, &alice);
        let for_bob = deliveries(room_id, &bob);

        let mut alice_view = RoomView::new(room_id, alice);
        let mut bob_view = RoomView::new(room_id, bob);
        for i in order_a {
            prop_assert!(alice_view.observe(&for_alice[i]).is_ok());
        }
        for i in order_b {
            prop_assert!(bob_view.observe(&for_bob[i]).is_ok());
        }

        prop_assert_eq!(alice_view.my_role(), Some(Role::First));
        prop_assert_eq!(bob_view.my_role(), Some(Role::Second));
        prop_assert_eq!(alice_view.roles(), bob_view.roles());
        prop_assert_eq!(alice_view.violations() + bob_view.violations(), 0);
    }

    #[test]
    fn prop_conflicting_mapping_never_replaces_the_first(swapped_first in any::<bool>()) {
        let room_id = RoomId::new();
        let honest = roles();
        let swapped = RoleAssignment::from_challenge("bob".into(), "alice".into());
        let (earliest, later) = if swapped_first { (swapped, honest) } else { (honest, swapped) };

        let accepted = |roles: &RoleAssignment| ServerMessage::ChallengeAccepted {
            challenge_id: ChallengeId::new(),
            room_id,
            kind: GameKind::Board,
            roles: roles.clone(),
        };

        let mut view = RoomView::new(room_id, "alice".into());
        prop_assert!(view.observe(&accepted(&earliest)).is_ok());
        let conflict = view.observe(&accepted(&later));
        prop_assert!(matches!(conflict, Err(Error::ProtocolViolation(_))));
        prop_assert_eq!(view.roles(), Some(&earliest));
        prop_assert_eq!(view.violations(), 1);
    }

    #[test]
    fn prop_turns_alternate_after_plain_moves(n in 0u64..60) {
        let mut session = new_session(RoomId::new());
        for i in 0..n {
            let actor = Role::after_moves(i);
            session.apply_action(&Tally, actor, &tally(false, false, false)).unwrap();
        }
        prop_assert_eq!(session.turn_owner(), Some(Role::after_moves(n)));
        prop_assert_eq!(session.version(), n);
    }

    #[test]
    fn prop_rejections_never_mutate(
        moves in prop::collection::vec((any::<bool>(), any::<bool>(), any::<bool>()), 1..40),
    ) {
        let mut session = new_session(RoomId::new());
        let mut accepted = 0u64;

        for (illegal, extra, wrong_seat) in moves {
            if session.status() == SessionStatus::Over {
                break;
            }
            let owner = session.turn_owner().unwrap();
            let actor = if wrong_seat { owner.other() } else { owner };
            let before = (session.state().clone(), session.turn_owner(), session.status(), session.version());

            match session.apply_action(&Tally, actor, &tally(illegal, extra, false)) {
                Ok(applied) => {
                    prop_assert!(!illegal && !wrong_seat);
                    accepted += 1;
                    let expected_owner = if extra { owner } else { owner.other() };
                    prop_assert_eq!(applied.turn_owner, Some(expected_owner));
                }
                Err(_) => {
                    prop_assert!(illegal || wrong_seat);
                    let after = (session.state().clone(), session.turn_owner(), session.status(), session.version());
                    prop_assert_eq!(before, after);
                }
            }
        }
        prop_assert_eq!(session.version(), accepted);
    }
}

//! Reconnection, catch-up replay and room retention

mod common;

use common::{plain_move, TestServer};
use matchroom::{ClientMessage, Config, ErrorKind, GameKind, Role, RoomId, ServerMessage, SessionStatus, TerminationReason};
use std::time::Duration;

fn participant_status(message: &ServerMessage) -> Option<(String, bool)> {
    match message {
        ServerMessage::ParticipantStatus { user_id, connected, .. } => Some((user_id.to_string(), *connected)),
        _ => None,
    }
}

#[tokio::test]
async fn test_repeated_join_sends_identical_catch_up() {
    let server = TestServer::start();
    let mut alice = server.client("alice").await;
    let mut bob = server.client("bob").await;
    let room_id = server.seated_match(&mut alice, &mut bob).await;

    alice.submit(room_id, plain_move()).await;
    alice.applied().await;

    let (first, first_role) = alice.join(room_id).await;
    let (second, second_role) = alice.join(room_id).await;

    assert_eq!(first_role, Some(Role::First));
    assert_eq!(first_role, second_role);
    assert_eq!(first, second);
    assert_eq!(
        serde_json::to_vec(&first.state).unwrap(),
        serde_json::to_vec(&second.state).unwrap()
    );
    assert_eq!(first.version, 1);
}

#[tokio::test(start_paused = true)]
async fn test_reconnect_inside_the_window_keeps_the_game() {
    let server = TestServer::start();
    let mut alice = server.client("alice").await;
    let mut bob = server.client("bob").await;
    let room_id = server.seated_match(&mut alice, &mut bob).await;

    alice.submit(room_id, plain_move()).await;
    bob.applied().await;

    server.disconnect(&alice).await;
    assert_eq!(
        bob.expect(participant_status).await,
        ("alice".to_string(), false)
    );

    tokio::time::sleep(Duration::from_secs(3)).await;

    let mut alice = server.client("alice").await;
    let (snapshot, role) = alice.join(room_id).await;
    assert_eq!(role, Some(Role::First));
    assert_eq!(snapshot.status, SessionStatus::Active);
    assert_eq!(snapshot.version, 1);
    assert_eq!(snapshot.turn_owner, Some(Role::Second));
    assert_eq!(bob.expect(participant_status).await, ("alice".to_string(), true));

    // Well past the original deadline
    tokio::time::sleep(Duration::from_secs(10)).await;
    bob.submit(room_id, plain_move()).await;
    assert_eq!(alice.applied().await, (Some(Role::First), 2));
}

#[tokio::test(start_paused = true)]
async fn test_abandoned_game_is_forfeited() {
    let server = TestServer::start();
    let mut alice = server.client("alice").await;
    let mut bob = server.client("bob").await;
    let room_id = server.seated_match(&mut alice, &mut bob).await;

    server.disconnect(&bob).await;

    let (reason, result) = alice.ended().await;
    assert_eq!(reason, TerminationReason::Disconnected);
    assert_eq!(result.and_then(|r| r.winner), Some(Role::First));
    assert!(!server.hub.presence().is_busy(&alice.user));
    assert!(!server.hub.presence().is_busy(&bob.user));

    let snapshot = server
        .hub
        .registry()
        .get_session(&room_id)
        .unwrap()
        .snapshot()
        .await
        .unwrap();
    assert_eq!(snapshot.termination, Some(TerminationReason::Disconnected));
}

#[tokio::test(start_paused = true)]
async fn test_second_connection_keeps_player_seated() {
    let server = TestServer::start();
    let mut alice = server.client("alice").await;
    let mut bob = server.client("bob").await;
    let room_id = server.seated_match(&mut alice, &mut bob).await;

    let mut alice_tab = server.client("alice").await;
    let (_, role) = alice_tab.join(room_id).await;
    assert_eq!(role, Some(Role::First));

    server.disconnect(&alice).await;
    tokio::time::sleep(Duration::from_secs(20)).await;

    let snapshot = server
        .hub
        .registry()
        .get_session(&room_id)
        .unwrap()
        .snapshot()
        .await
        .unwrap();
    assert_eq!(snapshot.status, SessionStatus::Active);
    assert!(snapshot.participants.iter().all(|p| p.connected));

    alice_tab.submit(room_id, plain_move()).await;
    assert_eq!(bob.applied().await, (Some(Role::Second), 1));
}

#[tokio::test]
async fn test_join_before_room_exists_is_replayed() {
    let server = TestServer::start();
    let mut bob = server.client("bob").await;
    let room_id = RoomId::new();

    server.hub.handle_message(bob.id(), ClientMessage::Join { room_id }).await;
    assert_eq!(server.hub.coordinator().pending_room(bob.id()), Some(room_id));

    server
        .hub
        .registry()
        .create_session_in(room_id, &"alice".into(), &bob.user, GameKind::Board)
        .unwrap();

    let (snapshot, role) = bob.catch_up().await;
    assert_eq!(snapshot.room_id, room_id);
    assert_eq!(role, Some(Role::Second));
    assert_eq!(server.hub.coordinator().pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_join_for_a_room_that_never_appears_times_out() {
    let server = TestServer::start();
    let mut carol = server.client("carol").await;
    let room_id = RoomId::new();

    carol.send(ClientMessage::Join { room_id }).await;

    let (kind, _) = carol.rejected().await;
    assert_eq!(kind, ErrorKind::NotFound);
    assert_eq!(server.hub.coordinator().pending_len(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_finished_room_is_retained_then_retired() {
    let server = TestServer::start();
    let mut alice = server.client("alice").await;
    let mut bob = server.client("bob").await;
    let room_id = server.seated_match(&mut alice, &mut bob).await;

    alice.send(ClientMessage::Resign { room_id }).await;
    bob.ended().await;

    // Late joiners still get the final position for a while
    let mut carol = server.client("carol").await;
    let (snapshot, _) = carol.join(room_id).await;
    assert_eq!(snapshot.termination, Some(TerminationReason::Resignation));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!server.hub.registry().contains(&room_id));
    assert_eq!(server.hub.registry().stats().open_rooms, 0);
}

#[tokio::test(start_paused = true)]
async fn test_turn_clock_forfeits_idle_player() {
    let mut config = Config::testing_defaults();
    config.session.turn_clock = Some(Duration::from_secs(10));
    let server = TestServer::start_with(config);
    let mut alice = server.client("alice").await;
    let mut bob = server.client("bob").await;
    let room_id = server.seated_match(&mut alice, &mut bob).await;

    alice.submit(room_id, plain_move()).await;
    alice.applied().await;

    let (reason, result) = alice.ended().await;
    assert_eq!(reason, TerminationReason::TimedOut);
    assert_eq!(result.and_then(|r| r.winner), Some(Role::First));
}

#[tokio::test(start_paused = true)]
async fn test_match_nobody_joins_is_abandoned() {
    let server = TestServer::start();
    let mut alice = server.client("alice").await;
    let mut bob = server.client("bob").await;
    let room_id = server.start_match(&mut alice, &mut bob, GameKind::Board).await;

    server.disconnect(&alice).await;
    server.disconnect(&bob).await;
    tokio::time::sleep(Duration::from_secs(6)).await;

    let snapshot = server
        .hub
        .registry()
        .get_session(&room_id)
        .unwrap()
        .snapshot()
        .await
        .unwrap();
    assert_eq!(snapshot.status, SessionStatus::Over);
    assert_eq!(snapshot.termination, Some(TerminationReason::Disconnected));
    assert!(snapshot.result.and_then(|r| r.winner).is_none());
    assert!(!server.hub.presence().is_busy(&"alice".into()));
    assert!(!server.hub.presence().is_busy(&"bob".into()));

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(!server.hub.registry().contains(&room_id));
}

#[tokio::test(start_paused = true)]
async fn test_tab_closing_while_another_joins_keeps_the_game() {
    let server = TestServer::start();
    let mut alice = server.client("alice").await;
    let mut bob = server.client("bob").await;
    let room_id = server.seated_match(&mut alice, &mut bob).await;
    bob.drain();

    // The new tab reaches the room before the hub records it, and the old
    // tab drops in between
    let mut alice_tab = server.client("alice").await;
    server
        .hub
        .coordinator()
        .join(alice_tab.id(), Some("alice".into()), room_id)
        .await
        .unwrap();
    server.hub.handle_disconnect(alice.id()).await;

    tokio::time::sleep(Duration::from_secs(10)).await;

    let snapshot = server
        .hub
        .registry()
        .get_session(&room_id)
        .unwrap()
        .snapshot()
        .await
        .unwrap();
    assert_eq!(snapshot.status, SessionStatus::Active);
    assert!(snapshot.participants.iter().all(|p| p.connected));
    assert!(server.channel.members(room_id).contains(&alice_tab.id()));
    assert!(bob.drain().iter().all(|m| !matches!(
        m,
        ServerMessage::SessionEnded { .. } | ServerMessage::ParticipantStatus { connected: false, .. }
    )));

    alice_tab.catch_up().await;
    alice_tab.submit(room_id, plain_move()).await;
    assert_eq!(bob.applied().await, (Some(Role::Second), 1));
}

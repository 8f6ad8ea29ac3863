//! Inbound message dispatch
//!
//! [`GameHub`] owns the registry, presence, challenge book and reconnection
//! coordinator and turns the transport's [`InboundEvent`]s into calls on
//! them. Each connection gets its own worker task so a connection's
//! messages are handled in the order it sent them, while different
//! connections (and therefore different rooms) are handled concurrently.
//!
//! Any failure is answered with a `Rejected` message to the sending
//! connection; nothing a client sends can end a session by mistake.

use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::challenge::ChallengeBook;
use crate::config::Config;
use crate::engine::EngineRegistry;
use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::identity::IdentityLookup;
use crate::presence::PresenceTracker;
use crate::protocol::{ClientMessage, ConnectionId, RoomId, ServerMessage, UserId};
use crate::reconnect::{JoinOutcome, ReconnectionCoordinator};
use crate::session::SessionRegistry;
use crate::transport::{InboundEvent, SyncChannel};

/// What the hub knows about one connection
#[derive(Debug, Default, Clone)]
struct Binding {
    user: Option<UserId>,
    rooms: HashSet<RoomId>,
}

pub struct GameHub {
    registry: Arc<SessionRegistry>,
    coordinator: Arc<ReconnectionCoordinator>,
    challenges: ChallengeBook,
    channel: Arc<dyn SyncChannel>,
    connections: DashMap<ConnectionId, Binding>,
}

impl GameHub {
    pub fn new(
        config: &Config,
        engines: EngineRegistry,
        channel: Arc<dyn SyncChannel>,
        identity: Arc<dyn IdentityLookup>,
    ) -> Self {
        let events = EventBus::new(config.events.channel_capacity);
        let presence = Arc::new(PresenceTracker::new(events.clone()));
        let registry = Arc::new(SessionRegistry::new(
            config.session.clone(),
            engines,
            presence,
            channel.clone(),
            events,
        ));
        let coordinator = Arc::new(ReconnectionCoordinator::new(
            registry.clone(),
            identity,
            channel.clone(),
            config.coordinator.clone(),
        ));
        let challenges = ChallengeBook::new(registry.clone());

        Self {
            registry,
            coordinator,
            challenges,
            channel,
            connections: DashMap::new(),
        }
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn presence(&self) -> &Arc<PresenceTracker> {
        self.registry.presence()
    }

    pub fn coordinator(&self) -> &Arc<ReconnectionCoordinator> {
        &self.coordinator
    }

    pub fn challenges(&self) -> &ChallengeBook {
        &self.challenges
    }

    pub fn events(&self) -> &EventBus {
        self.registry.events()
    }

    /// Start background work: join replay and presence fan-out
    pub fn start(self: &Arc<Self>) -> Vec<JoinHandle<()>> {
        vec![self.coordinator.spawn_listener(), self.spawn_presence_forwarder()]
    }

    /// Consume the transport's inbound queue until it closes
    pub async fn run(self: Arc<Self>, mut inbound: mpsc::Receiver<InboundEvent>) {
        let mut workers: HashMap<ConnectionId, mpsc::UnboundedSender<InboundEvent>> = HashMap::new();

        while let Some(event) = inbound.recv().await {
            let conn = event.connection();
            let closing = matches!(event, InboundEvent::Disconnected { .. });

            let worker = workers
                .entry(conn)
                .or_insert_with(|| self.spawn_connection_worker(conn));
            if worker.send(event).is_err() {
                warn!(connection = %conn, "Connection worker is gone");
            }
            if closing {
                workers.remove(&conn);
            }
        }

        info!("Inbound queue closed, hub stopping");
    }

    fn spawn_connection_worker(self: &Arc<Self>, conn: ConnectionId) -> mpsc::UnboundedSender<InboundEvent> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let hub = Arc::clone(self);
        tokio::spawn(async move {
            while let Some(event) = rx.recv().await {
                match event {
                    InboundEvent::Message { message, .. } => hub.handle_message(conn, message).await,
                    InboundEvent::Disconnected { .. } => {
                        hub.handle_disconnect(conn).await;
                        break;
                    }
                }
            }
        });
        tx
    }

    /// Handle one client message; failures go back to `conn` as `Rejected`
    pub async fn handle_message(&self, conn: ConnectionId, message: ClientMessage) {
        let room_id = message_room(&message);
        if let Err(e) = self.dispatch(conn, message).await {
            debug!(connection = %conn, error = %e, "Request rejected");
            self.send(conn, &ServerMessage::rejection(room_id, &e, None)).await;
        }
    }

    /// Tell every room `conn` was in that it is gone
    pub async fn handle_disconnect(&self, conn: ConnectionId) {
        self.coordinator.cancel(conn);
        let Some((_, binding)) = self.connections.remove(&conn) else {
            return;
        };
        debug!(connection = %conn, rooms = binding.rooms.len(), "Connection dropped");

        for room_id in binding.rooms {
            let still_connected = binding
                .user
                .as_ref()
                .map_or(false, |user| self.user_in_room(user, room_id));
            if let Ok(handle) = self.registry.get_session(&room_id) {
                if let Err(e) = handle
                    .connection_lost(conn, binding.user.clone(), still_connected)
                    .await
                {
                    debug!(room_id = %room_id, error = %e, "Room already gone");
                }
            }
        }
    }

    async fn dispatch(&self, conn: ConnectionId, message: ClientMessage) -> Result<()> {
        match message {
            ClientMessage::Hello { user_id } => {
                let mut binding = self.connections.entry(conn).or_default();
                match &binding.user {
                    Some(existing) if existing != &user_id => {
                        return Err(Error::ProtocolViolation(format!(
                            "{} is already bound to {}",
                            conn, existing
                        )));
                    }
                    _ => binding.user = Some(user_id.clone()),
                }
                drop(binding);
                info!(connection = %conn, user_id = %user_id, "Connection identified");
                self.send(
                    conn,
                    &ServerMessage::Welcome {
                        user_id,
                        connection_id: conn,
                    },
                )
                .await;
                Ok(())
            }

            ClientMessage::Challenge { to, kind } => {
                let user = self.user_of(conn)?;
                let challenge = self.challenges.issue(&user, &to, kind)?;
                self.send(
                    conn,
                    &ServerMessage::ChallengeIssued {
                        challenge_id: challenge.id,
                        to: to.clone(),
                        kind,
                    },
                )
                .await;
                self.send_to_user(
                    &to,
                    &ServerMessage::ChallengeReceived {
                        challenge_id: challenge.id,
                        from: user,
                        kind,
                    },
                )
                .await;
                Ok(())
            }

            ClientMessage::AcceptChallenge { challenge_id } => {
                let user = self.user_of(conn)?;
                let accepted = self.challenges.accept(challenge_id, &user)?;
                let message = ServerMessage::ChallengeAccepted {
                    challenge_id,
                    room_id: accepted.room_id,
                    kind: accepted.challenge.kind,
                    roles: accepted.roles.clone(),
                };
                for player in accepted.roles.users() {
                    self.send_to_user(player, &message).await;
                }
                Ok(())
            }

            ClientMessage::DeclineChallenge { challenge_id } => {
                let user = self.user_of(conn)?;
                let challenge = self.challenges.decline(challenge_id, &user)?;
                let message = ServerMessage::ChallengeDeclined {
                    challenge_id,
                    by: user,
                };
                self.send_to_user(&challenge.from, &message).await;
                self.send(conn, &message).await;
                Ok(())
            }

            ClientMessage::CancelChallenge { challenge_id } => {
                let user = self.user_of(conn)?;
                let challenge = self.challenges.cancel(challenge_id, &user)?;
                let message = ServerMessage::ChallengeDeclined {
                    challenge_id,
                    by: user,
                };
                self.send_to_user(&challenge.to, &message).await;
                self.send(conn, &message).await;
                Ok(())
            }

            ClientMessage::Join { room_id } => {
                let user = self.user_of(conn)?;
                // Bound before the room marks the seat connected, so a sibling
                // connection dropping meanwhile sees this one
                let fresh = self.connections.entry(conn).or_default().rooms.insert(room_id);
                let outcome = match self.coordinator.join(conn, Some(user), room_id).await {
                    Ok(outcome) => outcome,
                    Err(e) => {
                        if fresh {
                            if let Some(mut binding) = self.connections.get_mut(&conn) {
                                binding.rooms.remove(&room_id);
                            }
                        }
                        return Err(e);
                    }
                };
                if matches!(outcome, JoinOutcome::Queued) {
                    debug!(connection = %conn, room_id = %room_id, "Join waiting for room");
                }
                Ok(())
            }

            ClientMessage::Submit { room_id, action } => {
                let user = self.user_of(conn)?;
                let handle = self.registry.get_session(&room_id)?;
                match handle.submit(Some(conn), user, action).await {
                    Ok(_) => Ok(()),
                    // The room never saw the request, so nobody answered it
                    Err(e @ Error::NotFound(_)) | Err(e @ Error::Shutdown(_)) => Err(e),
                    // The room already sent the rejection with its version
                    Err(_) => Ok(()),
                }
            }

            ClientMessage::Resign { room_id } => {
                let user = self.user_of(conn)?;
                self.registry.get_session(&room_id)?.resign(user).await?;
                Ok(())
            }

            ClientMessage::Leave { room_id } => {
                let user = self.user_of(conn)?;
                if let Some(mut binding) = self.connections.get_mut(&conn) {
                    binding.rooms.remove(&room_id);
                }
                if self.coordinator.pending_room(conn) == Some(room_id) {
                    self.coordinator.cancel(conn);
                    return Ok(());
                }

                let still_connected = self.user_in_room(&user, room_id);
                self.registry
                    .get_session(&room_id)?
                    .leave(conn, Some(user), still_connected)
                    .await?;
                Ok(())
            }
        }
    }

    fn user_of(&self, conn: ConnectionId) -> Result<UserId> {
        self.connections
            .get(&conn)
            .and_then(|binding| binding.user.clone())
            .ok_or_else(|| Error::ProtocolViolation(format!("{} has not said hello", conn)))
    }

    /// Another connection of `user` is subscribed to `room_id`
    fn user_in_room(&self, user: &UserId, room_id: RoomId) -> bool {
        self.connections
            .iter()
            .any(|entry| entry.value().user.as_ref() == Some(user) && entry.value().rooms.contains(&room_id))
    }

    fn connections_of(&self, user: &UserId) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| entry.value().user.as_ref() == Some(user))
            .map(|entry| *entry.key())
            .collect()
    }

    async fn send(&self, conn: ConnectionId, message: &ServerMessage) {
        if let Err(e) = self.channel.send_to(conn, message).await {
            debug!(connection = %conn, error = %e, "Send failed");
        }
    }

    async fn send_to_user(&self, user: &UserId, message: &ServerMessage) {
        for conn in self.connections_of(user) {
            self.send(conn, message).await;
        }
    }

    fn spawn_presence_forwarder(self: &Arc<Self>) -> JoinHandle<()> {
        let hub = Arc::clone(self);
        let mut events = self.events().subscribe();
        tokio::spawn(async move {
            loop {
                let envelope = match events.recv().await {
                    Ok(envelope) => envelope,
                    Err(RecvError::Lagged(missed)) => {
                        warn!(missed, "Presence forwarder lagged");
                        continue;
                    }
                    Err(RecvError::Closed) => break,
                };
                let message = match envelope.event {
                    SessionEvent::UserBusy { user_id, .. } => ServerMessage::Presence { user_id, busy: true },
                    SessionEvent::UserAvailable { user_id } => ServerMessage::Presence { user_id, busy: false },
                    _ => continue,
                };
                let identified: Vec<ConnectionId> = hub
                    .connections
                    .iter()
                    .filter(|entry| entry.value().user.is_some())
                    .map(|entry| *entry.key())
                    .collect();
                for conn in identified {
                    hub.send(conn, &message).await;
                }
            }
        })
    }
}

fn message_room(message: &ClientMessage) -> Option<RoomId> {
    match message {
        ClientMessage::Join { room_id }
        | ClientMessage::Submit { room_id, .. }
        | ClientMessage::Resign { room_id }
        | ClientMessage::Leave { room_id } => Some(*room_id),
        _ => None,
    }
}

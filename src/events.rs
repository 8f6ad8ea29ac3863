//! Session lifecycle events
//!
//! Everything interesting that happens to a challenge, a room or a user's
//! presence is published on an [`EventBus`]. Publishing never blocks and never
//! fails the operation that produced the event; a bus without subscribers
//! simply drops it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::debug;

use crate::engine::GameState;
use crate::protocol::{
    ChallengeId, GameKind, GameResult, Role, RoleAssignment, RoomId, TerminationReason, UserId,
};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum SessionEvent {
    ChallengeIssued {
        challenge_id: ChallengeId,
        from: UserId,
        to: UserId,
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
    SessionStarted {
        room_id: RoomId,
        kind: GameKind,
        roles: RoleAssignment,
        state: GameState,
        turn_owner: Role,
    },
    ActionApplied {
        room_id: RoomId,
        actor: Role,
        turn_owner: Option<Role>,
        version: u64,
    },
    SessionEnded {
        room_id: RoomId,
        roles: RoleAssignment,
        reason: TerminationReason,
        result: Option<GameResult>,
    },
    UserBusy {
        user_id: UserId,
        room_id: RoomId,
    },
    UserAvailable {
        user_id: UserId,
    },
}

/// A published event with its wall-clock time
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub at: DateTime<Utc>,
    pub event: SessionEvent,
}

/// Fan-out of [`SessionEvent`]s to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<EventEnvelope>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn publish(&self, event: SessionEvent) {
        let envelope = EventEnvelope {
            at: Utc::now(),
            event,
        };
        if let Err(e) = self.sender.send(envelope) {
            debug!("No subscribers for session event: {:?}", e.0.event);
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EventEnvelope> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_publish_reaches_subscribers() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();

        bus.publish(SessionEvent::UserAvailable {
            user_id: "alice".into(),
        });

        let envelope = rx.recv().await.unwrap();
        assert_eq!(
            envelope.event,
            SessionEvent::UserAvailable {
                user_id: "alice".into()
            }
        );
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::new(8);
        assert_eq!(bus.subscriber_count(), 0);
        bus.publish(SessionEvent::UserAvailable {
            user_id: "bob".into(),
        });
    }
}

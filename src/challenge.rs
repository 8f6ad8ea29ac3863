//! Challenge flow
//!
//! A challenge is an invitation from one user to another to play a given
//! game. Accepting it creates the room: the challenger sits in `First`, the
//! accepter in `Second`. Once either user is busy, every other pending
//! challenge that involves them is dropped.

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::events::SessionEvent;
use crate::protocol::{ChallengeId, GameKind, RoleAssignment, RoomId, UserId};
use crate::session::SessionRegistry;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    pub id: ChallengeId,
    pub from: UserId,
    pub to: UserId,
    pub kind: GameKind,
    pub issued_at: DateTime<Utc>,
}

impl Challenge {
    pub fn involves(&self, user: &UserId) -> bool {
        &self.from == user || &self.to == user
    }
}

/// An accepted challenge and the room it produced
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Accepted {
    pub challenge: Challenge,
    pub room_id: RoomId,
    pub roles: RoleAssignment,
    /// Other challenges that were dropped because the players are now busy
    pub dropped: Vec<Challenge>,
}

/// Pending challenges
pub struct ChallengeBook {
    pending: DashMap<ChallengeId, Challenge>,
    registry: Arc<SessionRegistry>,
}

impl ChallengeBook {
    pub fn new(registry: Arc<SessionRegistry>) -> Self {
        Self {
            pending: DashMap::new(),
            registry,
        }
    }

    pub fn issue(&self, from: &UserId, to: &UserId, kind: GameKind) -> Result<Challenge> {
        if from == to {
            return Err(Error::InvalidChallenge("you cannot challenge yourself".to_string()));
        }
        let presence = self.registry.presence();
        for user in [from, to] {
            if presence.is_busy(user) {
                return Err(Error::AlreadyBusy(user.clone()));
            }
        }

        let challenge = Challenge {
            id: ChallengeId::new(),
            from: from.clone(),
            to: to.clone(),
            kind,
            issued_at: Utc::now(),
        };
        self.pending.insert(challenge.id, challenge.clone());

        debug!(challenge_id = %challenge.id, from = %from, to = %to, kind = %kind, "Challenge issued");
        self.registry.events().publish(SessionEvent::ChallengeIssued {
            challenge_id: challenge.id,
            from: from.clone(),
            to: to.clone(),
            kind,
        });
        Ok(challenge)
    }

    /// Only the challenged user may accept
    pub fn accept(&self, id: ChallengeId, by: &UserId) -> Result<Accepted> {
        let challenge = self.take_addressed_to(id, by)?;

        let room_id = self
            .registry
            .create_session(&challenge.from, &challenge.to, challenge.kind)?;
        let roles = RoleAssignment::from_challenge(challenge.from.clone(), challenge.to.clone());

        let dropped = self.drop_involving(&challenge.from, &challenge.to);

        info!(
            challenge_id = %id,
            room_id = %room_id,
            dropped = dropped.len(),
            "Challenge accepted"
        );
        self.registry.events().publish(SessionEvent::ChallengeAccepted {
            challenge_id: id,
            room_id,
            kind: challenge.kind,
            roles: roles.clone(),
        });

        Ok(Accepted {
            challenge,
            room_id,
            roles,
            dropped,
        })
    }

    /// Only the challenged user may decline
    pub fn decline(&self, id: ChallengeId, by: &UserId) -> Result<Challenge> {
        let challenge = self.take_addressed_to(id, by)?;
        debug!(challenge_id = %id, by = %by, "Challenge declined");
        self.registry.events().publish(SessionEvent::ChallengeDeclined {
            challenge_id: id,
            by: by.clone(),
        });
        Ok(challenge)
    }

    /// Only the challenger may cancel
    pub fn cancel(&self, id: ChallengeId, by: &UserId) -> Result<Challenge> {
        let challenge = self
            .pending
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::ChallengeNotFound(id.to_string()))?;
        if &challenge.from != by {
            return Err(Error::InvalidChallenge(format!("{} did not issue this challenge", by)));
        }
        self.pending.remove(&id);
        debug!(challenge_id = %id, by = %by, "Challenge cancelled");
        Ok(challenge)
    }

    /// Challenges waiting on `user`'s answer
    pub fn pending_for(&self, user: &UserId) -> Vec<Challenge> {
        let mut challenges: Vec<Challenge> = self
            .pending
            .iter()
            .filter(|entry| &entry.value().to == user)
            .map(|entry| entry.value().clone())
            .collect();
        challenges.sort_by_key(|c| c.issued_at);
        challenges
    }

    pub fn len(&self) -> usize {
        self.pending.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    fn take_addressed_to(&self, id: ChallengeId, by: &UserId) -> Result<Challenge> {
        match self.pending.remove_if(&id, |_, c| &c.to == by) {
            Some((_, challenge)) => Ok(challenge),
            None if self.pending.contains_key(&id) => Err(Error::InvalidChallenge(format!(
                "challenge {} is not addressed to {}",
                id, by
            ))),
            None => Err(Error::ChallengeNotFound(id.to_string())),
        }
    }

    fn drop_involving(&self, a: &UserId, b: &UserId) -> Vec<Challenge> {
        let stale: Vec<ChallengeId> = self
            .pending
            .iter()
            .filter(|entry| entry.value().involves(a) || entry.value().involves(b))
            .map(|entry| *entry.key())
            .collect();
        stale
            .into_iter()
            .filter_map(|id| self.pending.remove(&id).map(|(_, c)| c))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SessionConfig;
    use crate::engine::EngineRegistry;
    use crate::events::EventBus;
    use crate::presence::PresenceTracker;
    use crate::protocol::Role;
    use crate::transport::LocalChannel;

    fn book() -> ChallengeBook {
        let events = EventBus::new(64);
        let presence = Arc::new(PresenceTracker::new(events.clone()));
        let (channel, _inbound) = LocalChannel::new(16);
        let registry = Arc::new(SessionRegistry::new(
            SessionConfig::default(),
            EngineRegistry::with_builtin_games(),
            presence,
            channel,
            events,
        ));
        ChallengeBook::new(registry)
    }

    #[tokio::test]
    async fn test_accept_creates_room_with_challenger_first() {
        let book = book();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");

        let challenge = book.issue(&alice, &bob, GameKind::Board).unwrap();
        assert_eq!(book.pending_for(&bob), vec![challenge.clone()]);

        let accepted = book.accept(challenge.id, &bob).unwrap();
        assert_eq!(accepted.roles.role_of(&alice), Some(Role::First));
        assert_eq!(accepted.roles.role_of(&bob), Some(Role::Second));
        assert!(book.is_empty());
        assert!(book.registry.presence().is_busy(&alice));
    }

    #[tokio::test]
    async fn test_only_the_challenged_user_answers() {
        let book = book();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let challenge = book.issue(&alice, &bob, GameKind::GoFish).unwrap();

        assert!(matches!(
            book.accept(challenge.id, &alice),
            Err(Error::InvalidChallenge(_))
        ));
        assert!(matches!(
            book.cancel(challenge.id, &bob),
            Err(Error::InvalidChallenge(_))
        ));
        assert_eq!(book.len(), 1);

        book.decline(challenge.id, &bob).unwrap();
        assert!(matches!(
            book.accept(challenge.id, &bob),
            Err(Error::ChallengeNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_busy_users_cannot_be_challenged() {
        let book = book();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let carol = UserId::from("carol");

        let c = book.issue(&alice, &bob, GameKind::Board).unwrap();
        book.accept(c.id, &bob).unwrap();

        assert!(matches!(
            book.issue(&carol, &alice, GameKind::Board),
            Err(Error::AlreadyBusy(_))
        ));
        assert!(matches!(
            book.issue(&alice, &alice, GameKind::Board),
            Err(Error::InvalidChallenge(_))
        ));
    }

    #[tokio::test]
    async fn test_accepting_drops_other_challenges_of_both_players() {
        let book = book();
        let alice = UserId::from("alice");
        let bob = UserId::from("bob");
        let carol = UserId::from("carol");
        let dave = UserId::from("dave");

        let ab = book.issue(&alice, &bob, GameKind::Board).unwrap();
        book.issue(&carol, &alice, GameKind::Board).unwrap();
        book.issue(&bob, &dave, GameKind::GoFish).unwrap();
        let unrelated = book.issue(&carol, &dave, GameKind::Board).unwrap();

        let accepted = book.accept(ab.id, &bob).unwrap();
        assert_eq!(accepted.dropped.len(), 2);
        assert_eq!(book.len(), 1);
        assert_eq!(book.pending_for(&dave), vec![unrelated]);
    }
}

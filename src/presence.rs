//! Presence tracking
//!
//! A user is *busy* while they hold a seat in an active session. Busy users
//! cannot be challenged and cannot accept a second game. Every transition is
//! published as a [`SessionEvent::UserBusy`] or [`SessionEvent::UserAvailable`].

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::collections::HashSet;
use tracing::debug;

use crate::error::{Error, Result};
use crate::events::{EventBus, SessionEvent};
use crate::protocol::{RoomId, UserId};

/// Busy users and the room that holds them
#[derive(Debug)]
pub struct PresenceTracker {
    busy: DashMap<UserId, RoomId>,
    events: EventBus,
}

impl PresenceTracker {
    pub fn new(events: EventBus) -> Self {
        Self {
            busy: DashMap::new(),
            events,
        }
    }

    /// Claim `user` for `room_id`; fails with `AlreadyBusy` if they hold another seat
    pub fn mark_busy(&self, user: &UserId, room_id: RoomId) -> Result<()> {
        match self.busy.entry(user.clone()) {
            Entry::Occupied(existing) if *existing.get() == room_id => Ok(()),
            Entry::Occupied(_) => Err(Error::AlreadyBusy(user.clone())),
            Entry::Vacant(slot) => {
                slot.insert(room_id);
                debug!(user = %user, room = %room_id, "User marked busy");
                self.events.publish(SessionEvent::UserBusy {
                    user_id: user.clone(),
                    room_id,
                });
                Ok(())
            }
        }
    }

    /// Claim both seats of a new room or neither
    pub fn claim_pair(&self, first: &UserId, second: &UserId, room_id: RoomId) -> Result<()> {
        self.mark_busy(first, room_id)?;
        if let Err(e) = self.mark_busy(second, room_id) {
            self.release(first, room_id);
            return Err(e);
        }
        Ok(())
    }

    /// Unconditionally mark `user` available. Returns whether they were busy.
    pub fn mark_available(&self, user: &UserId) -> bool {
        let was_busy = self.busy.remove(user).is_some();
        if was_busy {
            debug!(user = %user, "User marked available");
            self.events.publish(SessionEvent::UserAvailable {
                user_id: user.clone(),
            });
        }
        was_busy
    }

    /// Mark `user` available only if `room_id` is what holds them
    pub fn release(&self, user: &UserId, room_id: RoomId) -> bool {
        let released = self
            .busy
            .remove_if(user, |_, held_by| *held_by == room_id)
            .is_some();
        if released {
            debug!(user = %user, room = %room_id, "User released");
            self.events.publish(SessionEvent::UserAvailable {
                user_id: user.clone(),
            });
        }
        released
    }

    pub fn is_busy(&self, user: &UserId) -> bool {
        self.busy.contains_key(user)
    }

    pub fn room_of(&self, user: &UserId) -> Option<RoomId> {
        self.busy.get(user).map(|entry| *entry.value())
    }

    pub fn list_busy(&self) -> HashSet<UserId> {
        self.busy.iter().map(|entry| entry.key().clone()).collect()
    }
}

//! Identity lookup
//!
//! Display profiles come from an external service. Lookups may be slow, so
//! they are always done before a request reaches a room, never inside it.

use async_trait::async_trait;
use dashmap::DashMap;

use crate::protocol::{Profile, UserId};

/// Resolves a user id to display data
#[async_trait]
pub trait IdentityLookup: Send + Sync {
    /// `None` if the user is unknown; callers treat that as "no profile"
    async fn resolve(&self, user: &UserId) -> Option<Profile>;
}

/// Fixed in-memory directory
#[derive(Debug, Default)]
pub struct StaticDirectory {
    profiles: DashMap<UserId, Profile>,
}

impl StaticDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, user: UserId, profile: Profile) {
        self.profiles.insert(user, profile);
    }

    /// Profile whose display name is the user id itself
    pub fn insert_plain(&self, user: &UserId) {
        self.insert(
            user.clone(),
            Profile {
                display_name: user.to_string(),
                avatar_url: None,
            },
        );
    }
}

#[async_trait]
impl IdentityLookup for StaticDirectory {
    async fn resolve(&self, user: &UserId) -> Option<Profile> {
        self.profiles.get(user).map(|entry| entry.value().clone())
    }
}

/// Lookup that knows nobody
#[derive(Debug, Default, Clone, Copy)]
pub struct Anonymous;

#[async_trait]
impl IdentityLookup for Anonymous {
    async fn resolve(&self, _user: &UserId) -> Option<Profile> {
        None
    }
}

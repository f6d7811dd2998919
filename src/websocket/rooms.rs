//! Room Membership Index
//!
//! The live-subscription view of conversations: which identities are
//! currently listening to which chat. This is a cache over the persisted
//! membership table, never the source of truth; authorization always goes
//! through the store at join time.
//!
//! Kept as two independent maps (chat -> identities, identity -> chats)
//! mutated together under one lock, so teardown on disconnect is a plain
//! lookup instead of a scan and nothing ever holds a reference cycle.

use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

use crate::models::Identity;

#[derive(Default)]
struct RoomMaps {
    members: HashMap<i64, HashSet<Identity>>,
    rooms: HashMap<Identity, HashSet<i64>>,
}

#[derive(Default)]
pub struct RoomIndex {
    inner: RwLock<RoomMaps>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes an identity to a chat. Idempotent: returns `false` when
    /// the identity was already subscribed. Re-joins still broadcast
    /// `user_joined` upstream, but never touch persisted membership.
    pub async fn join(&self, chat_id: i64, identity: Identity) -> bool {
        let mut inner = self.inner.write().await;
        let newly_added = inner.members.entry(chat_id).or_default().insert(identity);
        inner.rooms.entry(identity).or_default().insert(chat_id);
        newly_added
    }

    /// Removes the live subscription only; persisted membership is untouched.
    /// Returns `false` when the identity was not subscribed.
    pub async fn leave(&self, chat_id: i64, identity: Identity) -> bool {
        let mut inner = self.inner.write().await;
        let removed = inner
            .members
            .get_mut(&chat_id)
            .map(|members| members.remove(&identity))
            .unwrap_or(false);
        if inner.members.get(&chat_id).is_some_and(|m| m.is_empty()) {
            inner.members.remove(&chat_id);
        }

        if let Some(rooms) = inner.rooms.get_mut(&identity) {
            rooms.remove(&chat_id);
        }
        if inner.rooms.get(&identity).is_some_and(|r| r.is_empty()) {
            inner.rooms.remove(&identity);
        }
        removed
    }

    pub async fn members_of(&self, chat_id: i64) -> Vec<Identity> {
        let inner = self.inner.read().await;
        inner
            .members
            .get(&chat_id)
            .map(|members| members.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn rooms_of(&self, identity: Identity) -> Vec<i64> {
        let inner = self.inner.read().await;
        inner
            .rooms
            .get(&identity)
            .map(|rooms| rooms.iter().copied().collect())
            .unwrap_or_default()
    }

    pub async fn is_joined(&self, chat_id: i64, identity: Identity) -> bool {
        let inner = self.inner.read().await;
        inner
            .members
            .get(&chat_id)
            .map(|members| members.contains(&identity))
            .unwrap_or(false)
    }

    /// Number of chats with at least one live subscriber.
    pub async fn active_rooms(&self) -> usize {
        self.inner.read().await.members.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_join_is_idempotent() {
        let index = RoomIndex::new();
        let a = Identity::user(1);

        assert!(index.join(7, a).await);
        assert!(!index.join(7, a).await);
        assert_eq!(index.members_of(7).await.len(), 1);
    }

    #[tokio::test]
    async fn test_leave_restores_pre_join_membership() {
        let index = RoomIndex::new();
        let a = Identity::user(1);
        let b = Identity::customer(2);
        index.join(7, a).await;

        let before: Vec<_> = index.members_of(7).await;
        index.join(7, b).await;
        index.leave(7, b).await;
        let after: Vec<_> = index.members_of(7).await;

        assert_eq!(before, after);
        assert!(index.rooms_of(b).await.is_empty());
    }

    #[tokio::test]
    async fn test_both_maps_stay_in_sync() {
        let index = RoomIndex::new();
        let a = Identity::user(1);
        index.join(7, a).await;
        index.join(8, a).await;

        let mut rooms = index.rooms_of(a).await;
        rooms.sort_unstable();
        assert_eq!(rooms, vec![7, 8]);
        assert_eq!(index.active_rooms().await, 2);

        index.leave(7, a).await;
        assert_eq!(index.rooms_of(a).await, vec![8]);
        assert_eq!(index.active_rooms().await, 1);
        assert!(!index.is_joined(7, a).await);
        assert!(index.is_joined(8, a).await);
    }

    #[tokio::test]
    async fn test_empty_rooms_are_pruned() {
        let index = RoomIndex::new();
        let a = Identity::user(1);
        index.join(7, a).await;
        index.leave(7, a).await;
        assert_eq!(index.active_rooms().await, 0);
        assert!(!index.leave(7, a).await);
    }
}

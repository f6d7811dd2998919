//! Typing indicator tracker.
//!
//! Ephemeral state only: never persisted, superseded by the latest write,
//! and expired lazily on read. A client that stops typing without sending an
//! explicit `is_typing: false` simply ages out after the TTL.

use std::collections::HashMap;
use tokio::sync::RwLock;
use tokio::time::{Duration, Instant};

use crate::models::Identity;

pub struct TypingTracker {
    inner: RwLock<HashMap<i64, HashMap<Identity, Instant>>>,
    ttl: Duration,
}

impl TypingTracker {
    pub fn new(ttl: Duration) -> Self {
        TypingTracker {
            inner: RwLock::new(HashMap::new()),
            ttl,
        }
    }

    /// Records a typing update. `true` refreshes the expiry, `false` clears
    /// the entry immediately.
    pub async fn set(&self, chat_id: i64, identity: Identity, is_typing: bool) {
        let mut inner = self.inner.write().await;
        if is_typing {
            inner
                .entry(chat_id)
                .or_default()
                .insert(identity, Instant::now() + self.ttl);
        } else {
            if let Some(room) = inner.get_mut(&chat_id) {
                room.remove(&identity);
            }
            if inner.get(&chat_id).is_some_and(|room| room.is_empty()) {
                inner.remove(&chat_id);
            }
        }
    }

    /// Identities still typing in a chat. Expired entries are pruned here
    /// rather than by a background sweeper.
    pub async fn typers(&self, chat_id: i64) -> Vec<Identity> {
        let now = Instant::now();
        let mut inner = self.inner.write().await;
        let typers = match inner.get_mut(&chat_id) {
            Some(room) => {
                room.retain(|_, expires_at| *expires_at > now);
                room.keys().copied().collect()
            }
            None => Vec::new(),
        };
        if inner.get(&chat_id).is_some_and(|room| room.is_empty()) {
            inner.remove(&chat_id);
        }
        typers
    }

    /// Clears one identity's indicator in one chat (used on `leave_chat`).
    pub async fn clear(&self, chat_id: i64, identity: Identity) {
        self.set(chat_id, identity, false).await;
    }

    /// Clears an identity everywhere (used when its last connection drops).
    pub async fn clear_identity(&self, identity: Identity) {
        let mut inner = self.inner.write().await;
        inner.retain(|_, room| {
            room.remove(&identity);
            !room.is_empty()
        });
    }
}

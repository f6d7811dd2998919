//! Connection Registry
//!
//! Tracks every live connection keyed by identity. An identity may hold any
//! number of simultaneous connections (multi-tab, multi-device); every event
//! addressed to the identity reaches all of them. Chat sockets and
//! notification streams register on separate channels so room broadcasts and
//! fan-out pushes each reach only the surface that speaks their protocol.

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::models::{Identity, ParticipantKind};
use crate::websocket::delivery::DeliveryQueue;

/// Which wire surface a connection serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelKind {
    Chat,
    Notifications,
}

#[derive(Clone)]
pub struct RegisteredConnection {
    pub id: Uuid,
    pub channel: ChannelKind,
    pub salon_id: Option<i64>,
    pub queue: Arc<DeliveryQueue>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RegistryStats {
    pub chat_connections: usize,
    pub notification_connections: usize,
    pub users_online: usize,
    pub customers_online: usize,
}

#[derive(Default)]
pub struct ConnectionRegistry {
    inner: RwLock<HashMap<Identity, Vec<RegisteredConnection>>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a live connection and returns its handle id. The handshake
    /// has already authenticated the identity; registration itself cannot
    /// fail.
    pub async fn register(
        &self,
        identity: Identity,
        channel: ChannelKind,
        salon_id: Option<i64>,
        queue: Arc<DeliveryQueue>,
    ) -> Uuid {
        let id = Uuid::new_v4();
        let mut inner = self.inner.write().await;
        inner.entry(identity).or_default().push(RegisteredConnection {
            id,
            channel,
            salon_id,
            queue,
        });
        id
    }

    /// Removes one connection. A second unregister of the same handle is a
    /// no-op, so late cleanup after a forced close cannot double-free.
    pub async fn unregister(&self, identity: Identity, connection_id: Uuid) {
        let mut inner = self.inner.write().await;
        if let Some(connections) = inner.get_mut(&identity) {
            connections.retain(|c| c.id != connection_id);
        }
        if inner.get(&identity).is_some_and(|c| c.is_empty()) {
            inner.remove(&identity);
        }
    }

    /// All live queues for an identity on the given channel; empty means
    /// offline on that surface.
    pub async fn connections_for(
        &self,
        identity: Identity,
        channel: ChannelKind,
    ) -> Vec<Arc<DeliveryQueue>> {
        let inner = self.inner.read().await;
        inner
            .get(&identity)
            .map(|connections| {
                connections
                    .iter()
                    .filter(|c| c.channel == channel)
                    .map(|c| c.queue.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub async fn has_connections(&self, identity: Identity, channel: ChannelKind) -> bool {
        let inner = self.inner.read().await;
        inner
            .get(&identity)
            .map(|connections| connections.iter().any(|c| c.channel == channel))
            .unwrap_or(false)
    }

    pub async fn stats(&self) -> RegistryStats {
        let inner = self.inner.read().await;
        let mut stats = RegistryStats::default();
        for (identity, connections) in inner.iter() {
            let chat = connections
                .iter()
                .filter(|c| c.channel == ChannelKind::Chat)
                .count();
            stats.chat_connections += chat;
            stats.notification_connections += connections.len() - chat;
            if chat > 0 {
                match identity.kind {
                    ParticipantKind::User => stats.users_online += 1,
                    ParticipantKind::Customer => stats.customers_online += 1,
                }
            }
        }
        stats
    }

    /// Force-closes every live connection. Used at shutdown: closing the
    /// queues terminates each writer, which runs its own session teardown.
    pub async fn close_all(&self) {
        let connections: Vec<RegisteredConnection> = {
            let inner = self.inner.read().await;
            inner.values().flatten().cloned().collect()
        };
        for connection in connections {
            connection.queue.close().await;
        }
    }
}

//! Contracts toward the stores this service consumes but does not own.
//!
//! The realtime core never touches schemas directly: authorization,
//! messages, receipts and the notification backlog all go through these
//! traits. `postgres` adapts them onto the platform database; `memory`
//! backs the test suites.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;

use crate::error::AppResult;
use crate::models::{
    BacklogEntry, BacklogPage, Chat, ChatMessage, Identity, NewMessage, NotificationEvent,
    Principal,
};

/// Resolves a handshake token to a live principal. Token issuance and
/// revocation belong to the identity service.
#[async_trait]
pub trait AuthVerifier: Send + Sync {
    /// Back-office staff. Fails `AuthRejected` for a bad credential and
    /// `ScopeMissing` for a valid user with no salon.
    async fn verify_user(&self, token: &str) -> AppResult<Principal>;

    /// Storefront customers.
    async fn verify_customer(&self, token: &str) -> AppResult<Principal>;
}

#[async_trait]
pub trait ChatStore: Send + Sync {
    async fn chat(&self, chat_id: i64) -> AppResult<Option<Chat>>;

    /// Persisted (authorized) membership, regardless of live subscriptions.
    async fn is_member(&self, chat_id: i64, identity: Identity) -> AppResult<bool>;

    async fn load_membership(&self, chat_id: i64) -> AppResult<Vec<Identity>>;

    /// Appends a message and returns the stored record with its assigned id
    /// and creation timestamp.
    async fn append_message(&self, new: NewMessage) -> AppResult<ChatMessage>;

    async fn message(&self, message_id: i64) -> AppResult<Option<ChatMessage>>;

    /// Idempotent: returns `true` only when the receipt was newly created.
    async fn upsert_read_receipt(&self, message_id: i64, reader: Identity) -> AppResult<bool>;

    /// Bumps unread counters for the given members of a chat.
    async fn increment_unread(&self, chat_id: i64, members: &[Identity]) -> AppResult<()>;

    /// Human-readable sender label for broadcast payloads.
    async fn display_name(&self, identity: Identity) -> AppResult<Option<String>>;
}

#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Appends one durable backlog row for one resolved identity. This write
    /// is the success criterion of a publish; live delivery is best-effort
    /// on top.
    async fn append_backlog(
        &self,
        recipient: Identity,
        event: &NotificationEvent,
    ) -> AppResult<BacklogEntry>;

    async fn list_backlog(
        &self,
        recipient: Identity,
        page: u32,
        per_page: u32,
        unread_only: bool,
    ) -> AppResult<BacklogPage>;

    /// Idempotent; returns how many rows actually flipped to read.
    async fn mark_read(&self, recipient: Identity, ids: &[i64]) -> AppResult<u64>;

    /// Every admin identity currently or historically associated with a
    /// salon, for salon-broadcast resolution.
    async fn list_salon_admins(&self, salon_id: i64) -> AppResult<Vec<Identity>>;
}

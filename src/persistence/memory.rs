//! In-memory adapter backing the unit and integration test suites.
//!
//! Semantics match the Postgres adapter: idempotent receipts, one backlog
//! row per resolved identity, monotonically increasing ids.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::error::{AppError, AppResult};
use crate::models::{
    BacklogEntry, BacklogPage, Chat, ChatMessage, Identity, MessageKind, NewMessage,
    NotificationEvent, ParticipantKind, Principal,
};
use crate::persistence::{AuthVerifier, ChatStore, NotificationStore};

#[derive(Default)]
pub struct MemoryStore {
    tokens: RwLock<HashMap<String, Principal>>,
    chats: RwLock<HashMap<i64, Chat>>,
    members: RwLock<HashMap<i64, HashSet<Identity>>>,
    messages: RwLock<Vec<ChatMessage>>,
    receipts: RwLock<HashSet<(i64, Identity)>>,
    unread: RwLock<HashMap<(i64, Identity), u32>>,
    display_names: RwLock<HashMap<Identity, String>>,
    backlog: RwLock<Vec<BacklogEntry>>,
    salon_admins: RwLock<HashMap<i64, Vec<i64>>>,
    next_message_id: AtomicI64,
    next_backlog_id: AtomicI64,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub async fn insert_chat(&self, chat: Chat) {
        self.chats.write().await.insert(chat.id, chat);
    }

    pub async fn add_member(&self, chat_id: i64, identity: Identity) {
        self.members
            .write()
            .await
            .entry(chat_id)
            .or_default()
            .insert(identity);
    }

    pub async fn set_display_name(&self, identity: Identity, name: impl Into<String>) {
        self.display_names.write().await.insert(identity, name.into());
    }

    pub async fn add_salon_admin(&self, salon_id: i64, user_id: i64) {
        self.salon_admins
            .write()
            .await
            .entry(salon_id)
            .or_default()
            .push(user_id);
    }

    pub async fn issue_token(&self, token: impl Into<String>, principal: Principal) {
        self.tokens.write().await.insert(token.into(), principal);
    }

    pub async fn unread_count(&self, chat_id: i64, identity: Identity) -> u32 {
        self.unread
            .read()
            .await
            .get(&(chat_id, identity))
            .copied()
            .unwrap_or(0)
    }

    pub async fn receipt_count(&self, message_id: i64) -> usize {
        self.receipts
            .read()
            .await
            .iter()
            .filter(|(m, _)| *m == message_id)
            .count()
    }

    pub async fn backlog_len(&self) -> usize {
        self.backlog.read().await.len()
    }
}

#[async_trait]
impl AuthVerifier for MemoryStore {
    async fn verify_user(&self, token: &str) -> AppResult<Principal> {
        let tokens = self.tokens.read().await;
        let principal = tokens.get(token).copied().ok_or(AppError::AuthRejected)?;
        if principal.identity.kind != ParticipantKind::User {
            return Err(AppError::AuthRejected);
        }
        if principal.salon_id.is_none() {
            return Err(AppError::ScopeMissing);
        }
        Ok(principal)
    }

    async fn verify_customer(&self, token: &str) -> AppResult<Principal> {
        let tokens = self.tokens.read().await;
        let principal = tokens.get(token).copied().ok_or(AppError::AuthRejected)?;
        if principal.identity.kind != ParticipantKind::Customer {
            return Err(AppError::AuthRejected);
        }
        Ok(principal)
    }
}

#[async_trait]
impl ChatStore for MemoryStore {
    async fn chat(&self, chat_id: i64) -> AppResult<Option<Chat>> {
        Ok(self.chats.read().await.get(&chat_id).copied())
    }

    async fn is_member(&self, chat_id: i64, identity: Identity) -> AppResult<bool> {
        Ok(self
            .members
            .read()
            .await
            .get(&chat_id)
            .map(|m| m.contains(&identity))
            .unwrap_or(false))
    }

    async fn load_membership(&self, chat_id: i64) -> AppResult<Vec<Identity>> {
        Ok(self
            .members
            .read()
            .await
            .get(&chat_id)
            .map(|m| m.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn append_message(&self, new: NewMessage) -> AppResult<ChatMessage> {
        let id = self.next_message_id.fetch_add(1, Ordering::SeqCst) + 1;
        let record = ChatMessage {
            id,
            chat_id: new.chat_id,
            sender: new.sender,
            message_type: new.message_type,
            content: new.content,
            media_url: new.media_url,
            reply_to_message_id: new.reply_to_message_id,
            is_edited: false,
            is_deleted: false,
            created_at: Utc::now(),
        };
        self.messages.write().await.push(record.clone());
        Ok(record)
    }

    async fn message(&self, message_id: i64) -> AppResult<Option<ChatMessage>> {
        Ok(self
            .messages
            .read()
            .await
            .iter()
            .find(|m| m.id == message_id)
            .cloned())
    }

    async fn upsert_read_receipt(&self, message_id: i64, reader: Identity) -> AppResult<bool> {
        Ok(self.receipts.write().await.insert((message_id, reader)))
    }

    async fn increment_unread(&self, chat_id: i64, members: &[Identity]) -> AppResult<()> {
        let mut unread = self.unread.write().await;
        for member in members {
            *unread.entry((chat_id, *member)).or_insert(0) += 1;
        }
        Ok(())
    }

    async fn display_name(&self, identity: Identity) -> AppResult<Option<String>> {
        Ok(self.display_names.read().await.get(&identity).cloned())
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn append_backlog(
        &self,
        recipient: Identity,
        event: &NotificationEvent,
    ) -> AppResult<BacklogEntry> {
        let id = self.next_backlog_id.fetch_add(1, Ordering::SeqCst) + 1;
        let entry = BacklogEntry {
            id,
            recipient,
            notification_type: event.notification_type.clone(),
            title: event.title.clone(),
            message: event.message.clone(),
            salon_id: event.salon_id,
            entity_type: event.entity_type.clone(),
            entity_id: event.entity_id,
            extra_data: event.extra_data.clone(),
            is_read: false,
            read_at: None,
            created_at: Utc::now(),
        };
        self.backlog.write().await.push(entry.clone());
        Ok(entry)
    }

    async fn list_backlog(
        &self,
        recipient: Identity,
        page: u32,
        per_page: u32,
        unread_only: bool,
    ) -> AppResult<BacklogPage> {
        let backlog = self.backlog.read().await;
        let mut entries: Vec<&BacklogEntry> = backlog
            .iter()
            .filter(|e| e.recipient == recipient)
            .filter(|e| !unread_only || !e.is_read)
            .collect();
        entries.sort_by(|a, b| b.id.cmp(&a.id));

        let total = entries.len() as u64;
        let unread_count = backlog
            .iter()
            .filter(|e| e.recipient == recipient && !e.is_read)
            .count() as u64;

        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);
        let start = ((page - 1) * per_page) as usize;
        let notifications = entries
            .into_iter()
            .skip(start)
            .take(per_page as usize)
            .map(|e| e.to_stream_payload())
            .collect();

        Ok(BacklogPage {
            notifications,
            total,
            unread_count,
            page,
            per_page,
            total_pages: ((total as u32) + per_page - 1) / per_page,
        })
    }

    async fn mark_read(&self, recipient: Identity, ids: &[i64]) -> AppResult<u64> {
        let mut backlog = self.backlog.write().await;
        let mut updated = 0;
        for entry in backlog.iter_mut() {
            if entry.recipient == recipient && !entry.is_read && ids.contains(&entry.id) {
                entry.is_read = true;
                entry.read_at = Some(Utc::now());
                updated += 1;
            }
        }
        Ok(updated)
    }

    async fn list_salon_admins(&self, salon_id: i64) -> AppResult<Vec<Identity>> {
        Ok(self
            .salon_admins
            .read()
            .await
            .get(&salon_id)
            .map(|ids| ids.iter().map(|id| Identity::user(*id)).collect())
            .unwrap_or_default())
    }
}

/// Seeds a text message shape without going through the protocol handler.
pub fn text_message(chat_id: i64, sender: Identity, content: &str) -> NewMessage {
    NewMessage {
        chat_id,
        sender,
        message_type: MessageKind::Text,
        content: Some(content.to_string()),
        media_url: None,
        reply_to_message_id: None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Recipient;

    #[tokio::test]
    async fn test_receipt_upsert_is_idempotent() {
        let store = MemoryStore::new();
        let reader = Identity::user(1);

        assert!(store.upsert_read_receipt(5, reader).await.unwrap());
        assert!(!store.upsert_read_receipt(5, reader).await.unwrap());
        assert_eq!(store.receipt_count(5).await, 1);
    }

    #[tokio::test]
    async fn test_message_ids_are_monotonic() {
        let store = MemoryStore::new();
        let sender = Identity::customer(1);
        let first = store
            .append_message(text_message(1, sender, "a"))
            .await
            .unwrap();
        let second = store
            .append_message(text_message(1, sender, "b"))
            .await
            .unwrap();
        assert!(second.id > first.id);
    }

    #[tokio::test]
    async fn test_backlog_pagination_and_mark_read() {
        let store = MemoryStore::new();
        let recipient = Identity::customer(42);
        for i in 0..3 {
            let event = NotificationEvent::new(
                Recipient::Customer { customer_id: 42 },
                "test",
                format!("n{i}"),
                "body",
            );
            store.append_backlog(recipient, &event).await.unwrap();
        }

        let page = store.list_backlog(recipient, 1, 2, false).await.unwrap();
        assert_eq!(page.total, 3);
        assert_eq!(page.unread_count, 3);
        assert_eq!(page.notifications.len(), 2);
        assert_eq!(page.total_pages, 2);

        let updated = store.mark_read(recipient, &[1, 2]).await.unwrap();
        assert_eq!(updated, 2);
        // Second mark of the same ids is a no-op.
        assert_eq!(store.mark_read(recipient, &[1, 2]).await.unwrap(), 0);

        let unread = store.list_backlog(recipient, 1, 10, true).await.unwrap();
        assert_eq!(unread.notifications.len(), 1);
    }

    #[tokio::test]
    async fn test_verify_user_requires_salon_scope() {
        let store = MemoryStore::new();
        store
            .issue_token(
                "scoped",
                Principal {
                    identity: Identity::user(1),
                    salon_id: None,
                },
            )
            .await;
        store.issue_token("ok", Principal::user(2, 9)).await;

        assert!(matches!(
            store.verify_user("scoped").await,
            Err(AppError::ScopeMissing)
        ));
        assert!(matches!(
            store.verify_user("missing").await,
            Err(AppError::AuthRejected)
        ));
        assert_eq!(
            store.verify_user("ok").await.unwrap().identity,
            Identity::user(2)
        );
    }
}

//! Postgres adapter over the platform database.
//!
//! Table shapes belong to the commerce services and their migrations; this
//! adapter only reads and appends. `extra_data` travels as serialized JSON
//! text, matching how the producers store it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, Algorithm, DecodingKey, Validation};
use serde::Deserialize;
use sqlx::{Pool, Postgres};

use crate::error::{AppError, AppResult};
use crate::models::{
    BacklogEntry, BacklogPage, Chat, ChatMessage, ChatType, Identity, MessageKind, NewMessage,
    NotificationEvent, ParticipantKind, Principal,
};
use crate::persistence::{AuthVerifier, ChatStore, NotificationStore};

fn parse_kind(raw: &str) -> Result<ParticipantKind, sqlx::Error> {
    match raw {
        "user" => Ok(ParticipantKind::User),
        "customer" => Ok(ParticipantKind::Customer),
        other => Err(sqlx::Error::Decode(
            format!("unknown participant kind: {other}").into(),
        )),
    }
}

fn parse_message_kind(raw: &str) -> Result<MessageKind, sqlx::Error> {
    match raw {
        "text" => Ok(MessageKind::Text),
        "image" => Ok(MessageKind::Image),
        "voice" => Ok(MessageKind::Voice),
        "system" => Ok(MessageKind::System),
        other => Err(sqlx::Error::Decode(
            format!("unknown message kind: {other}").into(),
        )),
    }
}

fn parse_chat_type(raw: &str) -> Result<ChatType, sqlx::Error> {
    match raw {
        "user_customer" => Ok(ChatType::UserCustomer),
        "user_user" => Ok(ChatType::UserUser),
        "customer_customer" => Ok(ChatType::CustomerCustomer),
        other => Err(sqlx::Error::Decode(
            format!("unknown chat type: {other}").into(),
        )),
    }
}

fn message_kind_str(kind: MessageKind) -> &'static str {
    match kind {
        MessageKind::Text => "text",
        MessageKind::Image => "image",
        MessageKind::Voice => "voice",
        MessageKind::System => "system",
    }
}

/// Splits an identity into the `(type, user_id, customer_id)` column triple
/// the chat tables use.
fn identity_columns(identity: Identity) -> (&'static str, Option<i64>, Option<i64>) {
    match identity.kind {
        ParticipantKind::User => ("user", Some(identity.id), None),
        ParticipantKind::Customer => ("customer", None, Some(identity.id)),
    }
}

// ---------------------------------------------------------------------------
// Auth
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
struct Claims {
    sub: String,
    #[allow(dead_code)]
    exp: usize,
}

/// HS256 token verification against the shared platform secret, followed by
/// principal resolution: staff tokens carry the account email, customer
/// tokens the phone number.
pub struct JwtVerifier {
    pool: Pool<Postgres>,
    key: DecodingKey,
    validation: Validation,
}

impl JwtVerifier {
    pub fn new(pool: Pool<Postgres>, secret: &str) -> Self {
        JwtVerifier {
            pool,
            key: DecodingKey::from_secret(secret.as_bytes()),
            validation: Validation::new(Algorithm::HS256),
        }
    }

    fn subject(&self, token: &str) -> AppResult<String> {
        let data =
            decode::<Claims>(token, &self.key, &self.validation).map_err(|_| AppError::AuthRejected)?;
        Ok(data.claims.sub)
    }
}

#[async_trait]
impl AuthVerifier for JwtVerifier {
    async fn verify_user(&self, token: &str) -> AppResult<Principal> {
        let email = self.subject(token)?;
        let row: Option<(i64, Option<i64>)> =
            sqlx::query_as("SELECT id, salon_id FROM users WHERE email = $1")
                .bind(&email)
                .fetch_optional(&self.pool)
                .await?;

        let (id, salon_id) = row.ok_or(AppError::AuthRejected)?;
        let salon_id = salon_id.ok_or(AppError::ScopeMissing)?;
        Ok(Principal::user(id, salon_id))
    }

    async fn verify_customer(&self, token: &str) -> AppResult<Principal> {
        let phone = self.subject(token)?;
        let row: Option<(i64,)> = sqlx::query_as("SELECT id FROM customers WHERE phone = $1")
            .bind(&phone)
            .fetch_optional(&self.pool)
            .await?;

        let (id,) = row.ok_or(AppError::AuthRejected)?;
        Ok(Principal::customer(id))
    }
}

// ---------------------------------------------------------------------------
// Chat
// ---------------------------------------------------------------------------

type MessageRow = (
    i64,            // id
    i64,            // chat_id
    String,         // sender_type
    Option<i64>,    // sender_user_id
    Option<i64>,    // sender_customer_id
    String,         // message_type
    Option<String>, // content
    Option<String>, // media_url
    Option<i64>,    // reply_to_message_id
    bool,           // is_edited
    bool,           // is_deleted
    DateTime<Utc>,  // created_at
);

fn message_from_row(row: MessageRow) -> Result<ChatMessage, sqlx::Error> {
    let kind = parse_kind(&row.2)?;
    let sender_id = match kind {
        ParticipantKind::User => row.3,
        ParticipantKind::Customer => row.4,
    }
    .ok_or_else(|| sqlx::Error::Decode("message row missing sender id".into()))?;

    Ok(ChatMessage {
        id: row.0,
        chat_id: row.1,
        sender: Identity {
            kind,
            id: sender_id,
        },
        message_type: parse_message_kind(&row.5)?,
        content: row.6,
        media_url: row.7,
        reply_to_message_id: row.8,
        is_edited: row.9,
        is_deleted: row.10,
        created_at: row.11,
    })
}

pub struct PgChatStore {
    pool: Pool<Postgres>,
}

impl PgChatStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        PgChatStore { pool }
    }
}

#[async_trait]
impl ChatStore for PgChatStore {
    async fn chat(&self, chat_id: i64) -> AppResult<Option<Chat>> {
        let row: Option<(i64, String, i64, bool, bool)> = sqlx::query_as(
            "SELECT id, chat_type, salon_id, is_active, is_archived FROM chats WHERE id = $1",
        )
        .bind(chat_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((id, chat_type, salon_id, is_active, is_archived)) => Ok(Some(Chat {
                id,
                chat_type: parse_chat_type(&chat_type).map_err(AppError::from)?,
                salon_id,
                is_active,
                is_archived,
            })),
            None => Ok(None),
        }
    }

    async fn is_member(&self, chat_id: i64, identity: Identity) -> AppResult<bool> {
        let (kind, user_id, customer_id) = identity_columns(identity);
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT 1::bigint FROM chat_participants \
             WHERE chat_id = $1 AND participant_type = $2 AND is_active = TRUE \
               AND user_id IS NOT DISTINCT FROM $3 \
               AND customer_id IS NOT DISTINCT FROM $4",
        )
        .bind(chat_id)
        .bind(kind)
        .bind(user_id)
        .bind(customer_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.is_some())
    }

    async fn load_membership(&self, chat_id: i64) -> AppResult<Vec<Identity>> {
        let rows: Vec<(String, Option<i64>, Option<i64>)> = sqlx::query_as(
            "SELECT participant_type, user_id, customer_id FROM chat_participants \
             WHERE chat_id = $1 AND is_active = TRUE",
        )
        .bind(chat_id)
        .fetch_all(&self.pool)
        .await?;

        let mut members = Vec::with_capacity(rows.len());
        for (kind, user_id, customer_id) in rows {
            let kind = parse_kind(&kind).map_err(AppError::from)?;
            let id = match kind {
                ParticipantKind::User => user_id,
                ParticipantKind::Customer => customer_id,
            };
            if let Some(id) = id {
                members.push(Identity { kind, id });
            }
        }
        Ok(members)
    }

    async fn append_message(&self, new: NewMessage) -> AppResult<ChatMessage> {
        let (kind, user_id, customer_id) = identity_columns(new.sender);
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO chat_messages \
             (chat_id, sender_type, sender_user_id, sender_customer_id, message_type, \
              content, media_url, reply_to_message_id, is_delivered, delivered_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, TRUE, NOW()) \
             RETURNING id, created_at",
        )
        .bind(new.chat_id)
        .bind(kind)
        .bind(user_id)
        .bind(customer_id)
        .bind(message_kind_str(new.message_type))
        .bind(&new.content)
        .bind(&new.media_url)
        .bind(new.reply_to_message_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(ChatMessage {
            id,
            chat_id: new.chat_id,
            sender: new.sender,
            message_type: new.message_type,
            content: new.content,
            media_url: new.media_url,
            reply_to_message_id: new.reply_to_message_id,
            is_edited: false,
            is_deleted: false,
            created_at,
        })
    }

    async fn message(&self, message_id: i64) -> AppResult<Option<ChatMessage>> {
        let row: Option<MessageRow> = sqlx::query_as(
            "SELECT id, chat_id, sender_type, sender_user_id, sender_customer_id, \
                    message_type, content, media_url, reply_to_message_id, \
                    is_edited, is_deleted, created_at \
             FROM chat_messages WHERE id = $1",
        )
        .bind(message_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => Ok(Some(message_from_row(row).map_err(AppError::from)?)),
            None => Ok(None),
        }
    }

    async fn upsert_read_receipt(&self, message_id: i64, reader: Identity) -> AppResult<bool> {
        let (kind, user_id, customer_id) = identity_columns(reader);
        let result = sqlx::query(
            "INSERT INTO chat_message_reads \
             (message_id, reader_type, reader_user_id, reader_customer_id, read_at) \
             SELECT $1, $2, $3, $4, NOW() \
             WHERE NOT EXISTS ( \
                 SELECT 1 FROM chat_message_reads \
                 WHERE message_id = $1 AND reader_type = $2 \
                   AND reader_user_id IS NOT DISTINCT FROM $3 \
                   AND reader_customer_id IS NOT DISTINCT FROM $4)",
        )
        .bind(message_id)
        .bind(kind)
        .bind(user_id)
        .bind(customer_id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() == 1)
    }

    async fn increment_unread(&self, chat_id: i64, members: &[Identity]) -> AppResult<()> {
        for member in members {
            let (kind, user_id, customer_id) = identity_columns(*member);
            sqlx::query(
                "UPDATE chat_participants SET unread_count = unread_count + 1 \
                 WHERE chat_id = $1 AND participant_type = $2 \
                   AND user_id IS NOT DISTINCT FROM $3 \
                   AND customer_id IS NOT DISTINCT FROM $4",
            )
            .bind(chat_id)
            .bind(kind)
            .bind(user_id)
            .bind(customer_id)
            .execute(&self.pool)
            .await?;
        }
        Ok(())
    }

    async fn display_name(&self, identity: Identity) -> AppResult<Option<String>> {
        let row: Option<(String,)> = match identity.kind {
            ParticipantKind::User => {
                sqlx::query_as("SELECT email FROM users WHERE id = $1")
                    .bind(identity.id)
                    .fetch_optional(&self.pool)
                    .await?
            }
            ParticipantKind::Customer => {
                sqlx::query_as("SELECT phone FROM customers WHERE id = $1")
                    .bind(identity.id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };
        Ok(row.map(|(name,)| name))
    }
}

// ---------------------------------------------------------------------------
// Notifications
// ---------------------------------------------------------------------------

pub struct PgNotificationStore {
    pool: Pool<Postgres>,
}

impl PgNotificationStore {
    pub fn new(pool: Pool<Postgres>) -> Self {
        PgNotificationStore { pool }
    }
}

type BacklogRow = (
    i64,
    String,
    String,
    String,
    Option<i64>,
    Option<String>,
    Option<i64>,
    Option<String>,
    bool,
    Option<DateTime<Utc>>,
    DateTime<Utc>,
);

fn backlog_from_row(recipient: Identity, row: BacklogRow) -> BacklogEntry {
    BacklogEntry {
        id: row.0,
        recipient,
        notification_type: row.1,
        title: row.2,
        message: row.3,
        salon_id: row.4,
        entity_type: row.5,
        entity_id: row.6,
        extra_data: row.7.and_then(|raw| serde_json::from_str(&raw).ok()),
        is_read: row.8,
        read_at: row.9,
        created_at: row.10,
    }
}

#[async_trait]
impl NotificationStore for PgNotificationStore {
    async fn append_backlog(
        &self,
        recipient: Identity,
        event: &NotificationEvent,
    ) -> AppResult<BacklogEntry> {
        let extra = event.extra_data.as_ref().map(|v| v.to_string());
        let (id, created_at): (i64, DateTime<Utc>) = sqlx::query_as(
            "INSERT INTO notifications \
             (notification_type, title, message, recipient_type, recipient_id, \
              salon_id, entity_type, entity_id, extra_data, is_read) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, FALSE) \
             RETURNING id, created_at",
        )
        .bind(&event.notification_type)
        .bind(&event.title)
        .bind(&event.message)
        .bind(recipient.kind.as_str())
        .bind(recipient.id)
        .bind(event.salon_id)
        .bind(&event.entity_type)
        .bind(event.entity_id)
        .bind(&extra)
        .fetch_one(&self.pool)
        .await?;

        Ok(BacklogEntry {
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
            created_at,
        })
    }

    async fn list_backlog(
        &self,
        recipient: Identity,
        page: u32,
        per_page: u32,
        unread_only: bool,
    ) -> AppResult<BacklogPage> {
        let page = page.max(1);
        let per_page = per_page.clamp(1, 100);

        let (total,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications \
             WHERE recipient_type = $1 AND recipient_id = $2 \
               AND ($3 = FALSE OR is_read = FALSE)",
        )
        .bind(recipient.kind.as_str())
        .bind(recipient.id)
        .bind(unread_only)
        .fetch_one(&self.pool)
        .await?;

        let (unread_count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM notifications \
             WHERE recipient_type = $1 AND recipient_id = $2 AND is_read = FALSE",
        )
        .bind(recipient.kind.as_str())
        .bind(recipient.id)
        .fetch_one(&self.pool)
        .await?;

        let rows: Vec<BacklogRow> = sqlx::query_as(
            "SELECT id, notification_type, title, message, salon_id, entity_type, \
                    entity_id, extra_data, is_read, read_at, created_at \
             FROM notifications \
             WHERE recipient_type = $1 AND recipient_id = $2 \
               AND ($3 = FALSE OR is_read = FALSE) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $4 OFFSET $5",
        )
        .bind(recipient.kind.as_str())
        .bind(recipient.id)
        .bind(unread_only)
        .bind(per_page as i64)
        .bind(((page - 1) * per_page) as i64)
        .fetch_all(&self.pool)
        .await?;

        let notifications = rows
            .into_iter()
            .map(|row| backlog_from_row(recipient, row).to_stream_payload())
            .collect();

        let total = total as u64;
        Ok(BacklogPage {
            notifications,
            total,
            unread_count: unread_count as u64,
            page,
            per_page,
            total_pages: ((total as u32) + per_page - 1) / per_page,
        })
    }

    async fn mark_read(&self, recipient: Identity, ids: &[i64]) -> AppResult<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = TRUE, read_at = NOW() \
             WHERE recipient_type = $1 AND recipient_id = $2 \
               AND is_read = FALSE AND id = ANY($3)",
        )
        .bind(recipient.kind.as_str())
        .bind(recipient.id)
        .bind(ids)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    async fn list_salon_admins(&self, salon_id: i64) -> AppResult<Vec<Identity>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM users WHERE salon_id = $1 AND is_admin = TRUE")
                .bind(salon_id)
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(id,)| Identity::user(id)).collect())
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::error::AppError;
use crate::models::Identity;

/// Who a notification is for. Each variant selects a resolution strategy in
/// the fan-out router; resolution always happens at publish time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipient {
    /// Every admin identity associated with the salon, one backlog row each.
    SalonAdmins { salon_id: i64 },
    /// Exactly one back-office user.
    Admin { user_id: i64 },
    /// Exactly one customer. Customers may follow several salons; any salon
    /// filter is applied by the subscribing client, never by the router.
    Customer { customer_id: i64 },
}

/// A server-originated event handed to the fan-out router by business-logic
/// producers (booking flow, order flow, ...). The router neither knows nor
/// cares what triggered it.
#[derive(Debug, Clone)]
pub struct NotificationEvent {
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub recipient: Recipient,
    pub salon_id: Option<i64>,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub extra_data: Option<Value>,
}

/// One durable backlog row for one resolved identity. This is what offline
/// recipients fetch after reconnecting, and what the SSE stream serializes
/// for live recipients.
#[derive(Debug, Clone)]
pub struct BacklogEntry {
    pub id: i64,
    pub recipient: Identity,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    pub salon_id: Option<i64>,
    pub entity_type: Option<String>,
    pub entity_id: Option<i64>,
    pub extra_data: Option<Value>,
    pub is_read: bool,
    pub read_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl BacklogEntry {
    /// The JSON delivered over the notification stream. Field names are the
    /// wire contract; both web clients deserialize this shape.
    pub fn to_stream_payload(&self) -> Value {
        json!({
            "id": self.id,
            "notification_type": self.notification_type,
            "title": self.title,
            "message": self.message,
            "recipient_type": self.recipient.kind,
            "recipient_id": self.recipient.id,
            "salon_id": self.salon_id,
            "entity_type": self.entity_type,
            "entity_id": self.entity_id,
            "is_read": self.is_read,
            "created_at": self.created_at.to_rfc3339(),
            "extra_data": self.extra_data,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BacklogPage {
    pub notifications: Vec<Value>,
    pub total: u64,
    pub unread_count: u64,
    pub page: u32,
    pub per_page: u32,
    pub total_pages: u32,
}

/// Body of the internal publish endpoint. Mirrors the recipient fields the
/// producers already use, then converts into a typed [`NotificationEvent`].
#[derive(Debug, Clone, Deserialize)]
pub struct PublishRequest {
    pub recipient_type: String,
    #[serde(default)]
    pub recipient_id: Option<i64>,
    #[serde(default)]
    pub salon_id: Option<i64>,
    pub notification_type: String,
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub entity_type: Option<String>,
    #[serde(default)]
    pub entity_id: Option<i64>,
    #[serde(default)]
    pub extra_data: Option<Value>,
}

impl PublishRequest {
    pub fn into_event(self) -> Result<NotificationEvent, AppError> {
        let recipient = match self.recipient_type.as_str() {
            "salon" => Recipient::SalonAdmins {
                salon_id: self.salon_id.ok_or_else(|| {
                    AppError::MalformedCommand("salon recipient requires salon_id".into())
                })?,
            },
            "user" => Recipient::Admin {
                user_id: self.recipient_id.ok_or_else(|| {
                    AppError::MalformedCommand("user recipient requires recipient_id".into())
                })?,
            },
            "customer" => Recipient::Customer {
                customer_id: self.recipient_id.ok_or_else(|| {
                    AppError::MalformedCommand("customer recipient requires recipient_id".into())
                })?,
            },
            other => {
                return Err(AppError::MalformedCommand(format!(
                    "unknown recipient_type: {other}"
                )))
            }
        };

        Ok(NotificationEvent {
            notification_type: self.notification_type,
            title: self.title,
            message: self.message,
            recipient,
            salon_id: self.salon_id,
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            extra_data: self.extra_data,
        })
    }
}

impl NotificationEvent {
    pub fn new(
        recipient: Recipient,
        notification_type: impl Into<String>,
        title: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        let salon_id = match recipient {
            Recipient::SalonAdmins { salon_id } => Some(salon_id),
            _ => None,
        };
        NotificationEvent {
            notification_type: notification_type.into(),
            title: title.into(),
            message: message.into(),
            recipient,
            salon_id,
            entity_type: None,
            entity_id: None,
            extra_data: None,
        }
    }
}

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::models::Identity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatType {
    UserCustomer,
    UserUser,
    CustomerCustomer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    Text,
    Image,
    Voice,
    System,
}

/// A durable conversation. Created by the commerce services; the realtime
/// service only authorizes against it and routes events by its id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chat {
    pub id: i64,
    pub chat_type: ChatType,
    pub salon_id: i64,
    pub is_active: bool,
    pub is_archived: bool,
}

/// A persisted chat message. The id is assigned by the store and immutable
/// once broadcast; edits flip `is_edited` in place, they never mint a new id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: i64,
    pub chat_id: i64,
    pub sender: Identity,
    pub message_type: MessageKind,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub is_edited: bool,
    pub is_deleted: bool,
    pub created_at: DateTime<Utc>,
}

/// A message as accepted from a client, before the store assigns an id.
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub chat_id: i64,
    pub sender: Identity,
    pub message_type: MessageKind,
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub reply_to_message_id: Option<i64>,
}

impl NewMessage {
    /// A message must carry text content or a media reference, not neither.
    pub fn validate(&self) -> Result<(), AppError> {
        let has_content = self
            .content
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false);
        let has_media = self
            .media_url
            .as_deref()
            .map(|m| !m.is_empty())
            .unwrap_or(false);

        if has_content || has_media {
            Ok(())
        } else {
            Err(AppError::MalformedCommand(
                "message must carry text content or a media reference".into(),
            ))
        }
    }
}

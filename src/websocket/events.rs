//! Chat wire protocol.
//!
//! Closed tagged enums for both directions, so a new event kind is a
//! compile-time-checked addition instead of a stringly-typed dispatch. The
//! tag strings and field names are the externally observable contract; both
//! web clients parse them as-is.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::AppError;
use crate::models::{ChatMessage, Identity, MessageKind, ParticipantKind};
use crate::websocket::delivery::EventClass;

/// Commands accepted from a connected client.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientCommand {
    JoinChat {
        chat_id: i64,
    },
    LeaveChat {
        chat_id: i64,
    },
    SendMessage {
        chat_id: i64,
        #[serde(default)]
        content: Option<String>,
        #[serde(default)]
        message_type: Option<MessageKind>,
        #[serde(default)]
        media_url: Option<String>,
        #[serde(default)]
        reply_to_message_id: Option<i64>,
    },
    Typing {
        chat_id: i64,
        #[serde(default)]
        is_typing: bool,
    },
    ReadMessage {
        chat_id: i64,
        message_id: i64,
    },
    Ping,
}

/// The `message` event's nested body. Built from the persisted record so the
/// broadcast can never carry an id the store did not assign.
#[derive(Debug, Clone, Serialize)]
pub struct MessageBody {
    pub id: i64,
    pub chat_id: i64,
    pub sender_type: ParticipantKind,
    pub sender_id: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sender_name: Option<String>,
    pub message_type: MessageKind,
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media_url: Option<String>,
    pub reply_to_message_id: Option<i64>,
    pub created_at: String,
    pub is_delivered: bool,
}

impl MessageBody {
    pub fn from_record(record: &ChatMessage, sender_name: Option<String>) -> Self {
        MessageBody {
            id: record.id,
            chat_id: record.chat_id,
            sender_type: record.sender.kind,
            sender_id: record.sender.id,
            sender_name,
            message_type: record.message_type,
            content: record.content.clone(),
            media_url: record.media_url.clone(),
            reply_to_message_id: record.reply_to_message_id,
            created_at: record.created_at.to_rfc3339(),
            is_delivered: true,
        }
    }
}

/// Events emitted to connected clients.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    Connected {
        participant_type: ParticipantKind,
        participant_id: i64,
        timestamp: String,
    },
    Message {
        chat_id: i64,
        message: MessageBody,
        timestamp: String,
    },
    Typing {
        chat_id: i64,
        participant_type: ParticipantKind,
        participant_id: i64,
        is_typing: bool,
        timestamp: String,
    },
    ReadReceipt {
        chat_id: i64,
        message_id: i64,
        reader_type: ParticipantKind,
        reader_id: i64,
        timestamp: String,
    },
    UserJoined {
        chat_id: i64,
        participant_type: ParticipantKind,
        participant_id: i64,
        timestamp: String,
    },
    UserLeft {
        chat_id: i64,
        participant_type: ParticipantKind,
        participant_id: i64,
        timestamp: String,
    },
    Error {
        code: String,
        error: String,
        retryable: bool,
    },
    Pong {
        timestamp: String,
    },
    /// Server-initiated keepalive, distinct from the client's `ping` command.
    Ping {
        timestamp: String,
    },
}

fn now() -> String {
    Utc::now().to_rfc3339()
}

impl ServerEvent {
    pub fn connected(identity: Identity) -> Self {
        ServerEvent::Connected {
            participant_type: identity.kind,
            participant_id: identity.id,
            timestamp: now(),
        }
    }

    pub fn message(chat_id: i64, body: MessageBody) -> Self {
        ServerEvent::Message {
            chat_id,
            message: body,
            timestamp: now(),
        }
    }

    pub fn typing(chat_id: i64, identity: Identity, is_typing: bool) -> Self {
        ServerEvent::Typing {
            chat_id,
            participant_type: identity.kind,
            participant_id: identity.id,
            is_typing,
            timestamp: now(),
        }
    }

    pub fn read_receipt(chat_id: i64, message_id: i64, reader: Identity) -> Self {
        ServerEvent::ReadReceipt {
            chat_id,
            message_id,
            reader_type: reader.kind,
            reader_id: reader.id,
            timestamp: now(),
        }
    }

    pub fn user_joined(chat_id: i64, identity: Identity) -> Self {
        ServerEvent::UserJoined {
            chat_id,
            participant_type: identity.kind,
            participant_id: identity.id,
            timestamp: now(),
        }
    }

    pub fn user_left(chat_id: i64, identity: Identity) -> Self {
        ServerEvent::UserLeft {
            chat_id,
            participant_type: identity.kind,
            participant_id: identity.id,
            timestamp: now(),
        }
    }

    pub fn error(err: &AppError) -> Self {
        ServerEvent::Error {
            code: err.code().to_string(),
            error: err.to_string(),
            retryable: err.is_retryable(),
        }
    }

    pub fn unknown_command(kind: &str) -> Self {
        ServerEvent::Error {
            code: "malformed_command".into(),
            error: format!("unknown message type: {kind}"),
            retryable: false,
        }
    }

    pub fn pong() -> Self {
        ServerEvent::Pong { timestamp: now() }
    }

    pub fn server_ping() -> Self {
        ServerEvent::Ping { timestamp: now() }
    }

    /// Delivery class under queue pressure. Anything a client cannot recover
    /// from durable history is critical; the rest is superseded by later
    /// state or regenerated on reconnect.
    pub fn class(&self) -> EventClass {
        match self {
            ServerEvent::Message { .. }
            | ServerEvent::ReadReceipt { .. }
            | ServerEvent::Connected { .. } => EventClass::Critical,
            ServerEvent::Typing { .. }
            | ServerEvent::UserJoined { .. }
            | ServerEvent::UserLeft { .. }
            | ServerEvent::Error { .. }
            | ServerEvent::Pong { .. }
            | ServerEvent::Ping { .. } => EventClass::Droppable,
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Null)
    }
}

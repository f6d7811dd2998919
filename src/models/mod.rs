pub mod identity;
pub mod message;
pub mod notification;

pub use identity::{Identity, ParticipantKind, Principal};
pub use message::{Chat, ChatMessage, ChatType, MessageKind, NewMessage};
pub use notification::{BacklogEntry, BacklogPage, NotificationEvent, Recipient};

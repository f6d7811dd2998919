//! Real-time chat over WebSocket.
//!
//! Architecture:
//! 1. `registry`: live connections per identity, multi-device aware
//! 2. `rooms`: live subscription index per conversation
//! 3. `typing`: ephemeral typing state with lazy expiry
//! 4. `delivery`: bounded per-connection outbound queue
//! 5. `events`: the closed inbound/outbound wire protocol
//! 6. `session`: the per-connection protocol state machine

pub mod delivery;
pub mod events;
pub mod registry;
pub mod rooms;
pub mod session;
pub mod typing;

pub use delivery::{DeliveryQueue, Envelope, EventClass, PushError, PushOutcome};
pub use registry::{ChannelKind, ConnectionRegistry, RegistryStats};
pub use rooms::RoomIndex;
pub use typing::TypingTracker;

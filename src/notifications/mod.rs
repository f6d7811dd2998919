//! One-way notification delivery.
//!
//! Producers publish a [`crate::models::NotificationEvent`]; the router
//! resolves the recipient descriptor to identities, writes one durable
//! backlog row per identity, then pushes to whatever live notification
//! streams those identities hold. Offline recipients read the backlog after
//! reconnecting.

pub mod router;
pub mod sse;

pub use router::{NotificationRouter, PublishReceipt};

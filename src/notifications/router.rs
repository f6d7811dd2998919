//! Notification Fan-out Router
//!
//! The single publish entry point for every business-logic producer. A
//! publish succeeds when the durable backlog rows are written; live delivery
//! to connected streams is best-effort on top and never fails the publish.

use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::AppResult;
use crate::models::{Identity, NotificationEvent, Recipient};
use crate::persistence::NotificationStore;
use crate::websocket::{ChannelKind, ConnectionRegistry, EventClass, PushError};

/// What a publish actually did, mostly for logging and the internal endpoint
/// response.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReceipt {
    /// Backlog rows written, one per resolved identity.
    pub backlog_written: usize,
    /// Live queues the event was handed to across all devices.
    pub delivered_live: usize,
}

pub struct NotificationRouter {
    registry: Arc<ConnectionRegistry>,
    store: Arc<dyn NotificationStore>,
}

impl NotificationRouter {
    pub fn new(registry: Arc<ConnectionRegistry>, store: Arc<dyn NotificationStore>) -> Self {
        NotificationRouter { registry, store }
    }

    /// Resolves the recipient descriptor and delivers.
    ///
    /// Customer streams may have been opened with a salon filter; the filter
    /// is advisory and the router deliberately does not apply it. The
    /// subscribing client filters on `salon_id` itself.
    pub async fn publish(&self, event: NotificationEvent) -> AppResult<PublishReceipt> {
        let recipients = self.resolve(event.recipient).await?;
        let mut receipt = PublishReceipt::default();

        for identity in recipients {
            let entry = self.store.append_backlog(identity, &event).await?;
            receipt.backlog_written += 1;

            let payload = entry.to_stream_payload();
            let queues = self
                .registry
                .connections_for(identity, ChannelKind::Notifications)
                .await;
            for queue in queues {
                match queue.push(EventClass::Droppable, payload.clone()).await {
                    Ok(_) => receipt.delivered_live += 1,
                    Err(PushError::Closed) => {}
                    Err(PushError::Overflow) => {
                        // Unreachable for droppable events; logged to keep
                        // the match exhaustive and honest.
                        warn!(%identity, "notification queue overflow");
                    }
                }
            }
        }

        debug!(
            notification_type = %event.notification_type,
            backlog = receipt.backlog_written,
            live = receipt.delivered_live,
            "published notification"
        );
        Ok(receipt)
    }

    async fn resolve(&self, recipient: Recipient) -> AppResult<Vec<Identity>> {
        match recipient {
            Recipient::SalonAdmins { salon_id } => self.store.list_salon_admins(salon_id).await,
            Recipient::Admin { user_id } => Ok(vec![Identity::user(user_id)]),
            Recipient::Customer { customer_id } => Ok(vec![Identity::customer(customer_id)]),
        }
    }
}

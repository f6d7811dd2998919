//! Fan-out router and notification stream behavior: durable-first delivery,
//! multi-device push, salon broadcast resolution, and the advisory customer
//! filter.

use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use serde_json::json;

use realtime_service::models::{Identity, NotificationEvent, Recipient};
use realtime_service::notifications::sse::notification_stream;
use realtime_service::notifications::NotificationRouter;
use realtime_service::persistence::memory::MemoryStore;
use realtime_service::persistence::NotificationStore;
use realtime_service::websocket::{ChannelKind, ConnectionRegistry, DeliveryQueue, EventClass};

fn event(recipient: Recipient, notification_type: &str) -> NotificationEvent {
    NotificationEvent::new(recipient, notification_type, "Title", "Body")
}

#[tokio::test]
async fn test_offline_customer_backlog_is_retrievable_later() {
    let store = MemoryStore::new();
    let registry = Arc::new(ConnectionRegistry::new());
    let router = NotificationRouter::new(registry, store.clone());

    let receipt = router
        .publish(event(
            Recipient::Customer { customer_id: 42 },
            "order_status_updated",
        ))
        .await
        .unwrap();

    assert_eq!(receipt.backlog_written, 1);
    assert_eq!(receipt.delivered_live, 0);

    let page = store
        .list_backlog(Identity::customer(42), 1, 10, true)
        .await
        .unwrap();
    assert_eq!(page.total, 1);
    assert_eq!(page.notifications[0]["notification_type"], "order_status_updated");
    assert_eq!(page.notifications[0]["recipient_id"], 42);
}

#[tokio::test]
async fn test_salon_broadcast_reaches_all_admin_devices_and_backlogs_each() {
    let store = MemoryStore::new();
    store.add_salon_admin(3, 10).await;
    store.add_salon_admin(3, 11).await;
    let registry = Arc::new(ConnectionRegistry::new());

    // Admin 10 listens on two devices, admin 11 is offline.
    let q1 = Arc::new(DeliveryQueue::new(16));
    let q2 = Arc::new(DeliveryQueue::new(16));
    registry
        .register(Identity::user(10), ChannelKind::Notifications, Some(3), q1.clone())
        .await;
    registry
        .register(Identity::user(10), ChannelKind::Notifications, Some(3), q2.clone())
        .await;

    let router = NotificationRouter::new(registry, store.clone());
    let receipt = router
        .publish(event(Recipient::SalonAdmins { salon_id: 3 }, "booking_created"))
        .await
        .unwrap();

    // One durable row per identity, not one shared row.
    assert_eq!(receipt.backlog_written, 2);
    assert_eq!(receipt.delivered_live, 2);

    let delivered = q1.pop().await.unwrap();
    assert_eq!(delivered.payload["notification_type"], "booking_created");
    assert_eq!(delivered.payload["recipient_type"], "user");
    assert!(q2.pop().await.is_some());

    let offline_page = store
        .list_backlog(Identity::user(11), 1, 10, false)
        .await
        .unwrap();
    assert_eq!(offline_page.total, 1);
}

#[tokio::test]
async fn test_customer_salon_filter_is_advisory() {
    let store = MemoryStore::new();
    let registry = Arc::new(ConnectionRegistry::new());
    let customer = Identity::customer(42);

    // Stream opened "filtered to salon 3": the registry records the scope,
    // the router ignores it.
    let queue = Arc::new(DeliveryQueue::new(16));
    registry
        .register(customer, ChannelKind::Notifications, Some(3), queue.clone())
        .await;

    let router = NotificationRouter::new(registry, store);
    let mut other_salon = event(Recipient::Customer { customer_id: 42 }, "order_placed");
    other_salon.salon_id = Some(9);

    let receipt = router.publish(other_salon).await.unwrap();
    assert_eq!(receipt.delivered_live, 1);

    let delivered = queue.pop().await.unwrap();
    assert_eq!(delivered.payload["salon_id"], 9);
}

#[tokio::test]
async fn test_publish_succeeds_when_salon_has_no_admins() {
    let store = MemoryStore::new();
    let registry = Arc::new(ConnectionRegistry::new());
    let router = NotificationRouter::new(registry, store.clone());

    let receipt = router
        .publish(event(Recipient::SalonAdmins { salon_id: 77 }, "test"))
        .await
        .unwrap();
    assert_eq!(receipt.backlog_written, 0);
    assert_eq!(receipt.delivered_live, 0);
}

// ---------------------------------------------------------------------------
// Stream sequencing
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_stream_greets_then_delivers_then_ends_on_close() {
    let queue = Arc::new(DeliveryQueue::new(16));
    queue
        .push(EventClass::Droppable, json!({ "id": 1 }))
        .await
        .unwrap();

    let stream = notification_stream(
        queue.clone(),
        Duration::from_secs(30),
        json!({ "message": "Connected to notification stream" }),
        None,
    );
    let mut stream = Box::pin(stream);

    // First the connected greeting, then the queued notification.
    assert!(stream.next().await.is_some());
    assert!(stream.next().await.is_some());

    queue.close().await;
    assert!(stream.next().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn test_quiet_stream_emits_keepalive_pings() {
    let queue = Arc::new(DeliveryQueue::new(16));
    let stream = notification_stream(
        queue.clone(),
        Duration::from_secs(30),
        json!({ "message": "Connected to notification stream" }),
        None,
    );
    let mut stream = Box::pin(stream);

    // Greeting arrives immediately.
    assert!(stream.next().await.is_some());

    // With nothing queued, paused time auto-advances through the keepalive
    // window and the stream yields a ping instead of stalling forever.
    assert!(stream.next().await.is_some());
    assert!(!queue.is_closed().await);
}

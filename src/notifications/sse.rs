//! Server-Sent Event streams for notification delivery.
//!
//! Each stream is one registered connection: a bounded delivery queue the
//! router pushes into, drained here into named SSE events. The wire contract
//! is three event names: `connected` once, `notification` per backlog entry,
//! and `ping` after a quiet keepalive interval.

use axum::extract::{Query, State};
use axum::response::sse::{Event, Sse};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use serde_json::{json, Value};
use std::convert::Infallible;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::models::{Identity, Principal};
use crate::state::AppState;
use crate::websocket::{ChannelKind, ConnectionRegistry, DeliveryQueue};

#[derive(Debug, Deserialize)]
pub struct StreamParams {
    pub token: String,
    /// Advisory salon filter on customer streams. Echoed back in the
    /// `connected` event and applied client-side; the router always delivers
    /// the full stream for the identity.
    #[serde(default)]
    pub salon_id: Option<i64>,
}

/// Admin stream: `/api/v1/notifications/stream?token=`
pub async fn admin_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    let principal = match state.auth.verify_user(&params.token).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let greeting = json!({
        "message": "Connected to notification stream",
        "salon_id": principal.salon_id,
        "timestamp": Utc::now().to_rfc3339(),
    });
    open_stream(state, principal, greeting).await
}

/// Customer stream: `/api/v1/notifications/customer/stream?token=&salon_id=`
pub async fn customer_stream(
    State(state): State<AppState>,
    Query(params): Query<StreamParams>,
) -> Response {
    let principal = match state.auth.verify_customer(&params.token).await {
        Ok(principal) => principal,
        Err(err) => return err.into_response(),
    };

    let greeting = json!({
        "message": "Connected to notification stream",
        "customer_id": principal.identity.id,
        "salon_filter": params.salon_id,
        "timestamp": Utc::now().to_rfc3339(),
    });
    open_stream(state, principal, greeting).await
}

async fn open_stream(state: AppState, principal: Principal, greeting: Value) -> Response {
    let identity = principal.identity;
    let queue = Arc::new(DeliveryQueue::new(state.config.delivery_queue_capacity));
    let connection_id = state
        .registry
        .register(
            identity,
            ChannelKind::Notifications,
            principal.salon_id,
            queue.clone(),
        )
        .await;
    info!(%identity, %connection_id, "notification stream connected");

    let guard = StreamGuard {
        registry: state.registry.clone(),
        identity,
        connection_id,
        queue: queue.clone(),
    };

    let keepalive = Duration::from_secs(state.config.sse_keepalive_secs);
    Sse::new(notification_stream(queue, keepalive, greeting, Some(guard))).into_response()
}

/// Unregisters the connection when the client goes away and the stream is
/// dropped. Cleanup is spawned because `Drop` cannot await.
pub struct StreamGuard {
    registry: Arc<ConnectionRegistry>,
    identity: Identity,
    connection_id: Uuid,
    queue: Arc<DeliveryQueue>,
}

impl Drop for StreamGuard {
    fn drop(&mut self) {
        let registry = self.registry.clone();
        let queue = self.queue.clone();
        let identity = self.identity;
        let connection_id = self.connection_id;
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                queue.close().await;
                registry.unregister(identity, connection_id).await;
                info!(%identity, %connection_id, "notification stream disconnected");
            });
        }
    }
}

struct StreamState {
    queue: Arc<DeliveryQueue>,
    keepalive: Duration,
    greeting: Option<Value>,
    _guard: Option<StreamGuard>,
}

/// The raw event sequence: `connected`, then `notification`s interleaved
/// with `ping`s on quiet intervals, ending when the queue closes.
pub fn notification_stream(
    queue: Arc<DeliveryQueue>,
    keepalive: Duration,
    greeting: Value,
    guard: Option<StreamGuard>,
) -> impl Stream<Item = Result<Event, Infallible>> {
    let state = StreamState {
        queue,
        keepalive,
        greeting: Some(greeting),
        _guard: guard,
    };

    stream::unfold(state, |mut state| async move {
        if let Some(greeting) = state.greeting.take() {
            let event = Event::default().event("connected").data(greeting.to_string());
            return Some((Ok(event), state));
        }

        match tokio::time::timeout(state.keepalive, state.queue.pop()).await {
            Ok(Some(envelope)) => {
                let event = Event::default()
                    .event("notification")
                    .data(envelope.payload.to_string());
                Some((Ok(event), state))
            }
            // Queue closed: connection torn down or server shutting down.
            Ok(None) => None,
            // Quiet interval: keepalive ping so half-open streams surface.
            Err(_) => {
                let ping = json!({ "timestamp": Utc::now().to_rfc3339() });
                let event = Event::default().event("ping").data(ping.to_string());
                Some((Ok(event), state))
            }
        }
    })
}

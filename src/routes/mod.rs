//! HTTP surface assembly.
//!
//! Everything lives under `/api/v1`, matching the paths the web clients
//! already use: the two chat WebSocket endpoints, the two SSE notification
//! streams, backlog listing/read-marking, the connection stats view, and
//! the key-guarded internal publish endpoint.

use axum::extract::{Query, State};
use axum::http::{header, HeaderMap};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::error::{AppError, AppResult};
use crate::models::notification::PublishRequest;
use crate::models::BacklogPage;
use crate::notifications::sse;
use crate::state::AppState;
use crate::websocket::session;

pub fn api_router(state: AppState) -> Router {
    let chat = Router::new()
        .route("/ws/chat/user", get(session::chat_ws_user))
        .route("/ws/chat/customer", get(session::chat_ws_customer))
        .route("/stats", get(chat_stats));

    let notifications = Router::new()
        .route("/", get(list_admin_notifications))
        .route("/stream", get(sse::admin_stream))
        .route("/customer", get(list_customer_notifications))
        .route("/customer/stream", get(sse::customer_stream))
        .route("/mark-read", post(mark_admin_read))
        .route("/customer/mark-read", post(mark_customer_read))
        .route("/publish", post(publish_notification));

    Router::new()
        .nest("/api/v1/chat", chat)
        .nest("/api/v1/notifications", notifications)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Token from the `Authorization: Bearer` header, with a query-parameter
/// fallback for clients that cannot set headers (EventSource).
fn extract_token(headers: &HeaderMap, query_token: Option<String>) -> AppResult<String> {
    if let Some(token) = query_token {
        return Ok(token);
    }
    headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(|value| value.to_string())
        .ok_or(AppError::AuthRejected)
}

async fn chat_stats(State(state): State<AppState>) -> Json<Value> {
    let stats = state.registry.stats().await;
    Json(json!({
        "total_connections": stats.chat_connections,
        "users_online": stats.users_online,
        "customers_online": stats.customers_online,
        "active_chat_rooms": state.rooms.active_rooms().await,
        "notification_connections": stats.notification_connections,
    }))
}

#[derive(Debug, Deserialize)]
struct ListParams {
    #[serde(default)]
    token: Option<String>,
    #[serde(default = "default_page")]
    page: u32,
    #[serde(default = "default_per_page")]
    per_page: u32,
    #[serde(default)]
    unread_only: bool,
}

fn default_page() -> u32 {
    1
}

fn default_per_page() -> u32 {
    20
}

async fn list_admin_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> AppResult<Json<BacklogPage>> {
    let token = extract_token(&headers, params.token.clone())?;
    let principal = state.auth.verify_user(&token).await?;
    let page = state
        .notifications
        .list_backlog(
            principal.identity,
            params.page,
            params.per_page,
            params.unread_only,
        )
        .await?;
    Ok(Json(page))
}

async fn list_customer_notifications(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<ListParams>,
) -> AppResult<Json<BacklogPage>> {
    let token = extract_token(&headers, params.token.clone())?;
    let principal = state.auth.verify_customer(&token).await?;
    let page = state
        .notifications
        .list_backlog(
            principal.identity,
            params.page,
            params.per_page,
            params.unread_only,
        )
        .await?;
    Ok(Json(page))
}

#[derive(Debug, Deserialize)]
struct MarkReadRequest {
    notification_ids: Vec<i64>,
}

#[derive(Debug, Deserialize)]
struct TokenParams {
    #[serde(default)]
    token: Option<String>,
}

async fn mark_admin_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TokenParams>,
    Json(body): Json<MarkReadRequest>,
) -> AppResult<Json<Value>> {
    let token = extract_token(&headers, params.token)?;
    let principal = state.auth.verify_user(&token).await?;
    let updated = state
        .notifications
        .mark_read(principal.identity, &body.notification_ids)
        .await?;
    Ok(Json(json!({
        "message": format!("Marked {updated} notifications as read")
    })))
}

async fn mark_customer_read(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(params): Query<TokenParams>,
    Json(body): Json<MarkReadRequest>,
) -> AppResult<Json<Value>> {
    let token = extract_token(&headers, params.token)?;
    let principal = state.auth.verify_customer(&token).await?;
    let updated = state
        .notifications
        .mark_read(principal.identity, &body.notification_ids)
        .await?;
    Ok(Json(json!({
        "message": format!("Marked {updated} notifications as read")
    })))
}

#[derive(Debug, Deserialize)]
struct PublishParams {
    api_key: String,
}

/// Internal entry point for business-logic producers that live in other
/// services. In-process producers call `NotificationRouter::publish`
/// directly.
async fn publish_notification(
    State(state): State<AppState>,
    Query(params): Query<PublishParams>,
    Json(body): Json<PublishRequest>,
) -> AppResult<impl IntoResponse> {
    let expected = state
        .config
        .publish_api_key
        .as_deref()
        .ok_or(AppError::Unauthorized)?;
    if params.api_key != expected {
        return Err(AppError::Unauthorized);
    }

    let event = body.into_event()?;
    let receipt = state.router.publish(event).await?;
    Ok(Json(json!({
        "backlog_written": receipt.backlog_written,
        "delivered_live": receipt.delivered_live,
    })))
}

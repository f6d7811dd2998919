//! Per-connection chat protocol handler.
//!
//! One task per connection multiplexes three concerns: draining the
//! outbound delivery queue to the socket, processing inbound commands
//! (which may await the store without blocking any other connection), and
//! the keepalive ticker that detects half-open sockets. Persistence always
//! completes before the matching broadcast is enqueued, which is what gives
//! per-sender ordering.

use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio::time::{interval, Duration, Instant, MissedTickBehavior};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::{AppError, AppResult};
use crate::models::{Identity, MessageKind, NewMessage, ParticipantKind, Principal};
use crate::state::AppState;
use crate::websocket::delivery::{DeliveryQueue, EventClass, PushError};
use crate::websocket::events::{ClientCommand, MessageBody, ServerEvent};
use crate::websocket::registry::ChannelKind;

#[derive(Debug, Deserialize)]
pub struct WsAuthParams {
    pub token: String,
}

/// WebSocket endpoint for salon staff: `/api/v1/chat/ws/chat/user?token=`
pub async fn chat_ws_user(
    State(state): State<AppState>,
    Query(params): Query<WsAuthParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = state.auth.verify_user(&params.token).await;
    upgrade_session(state, ws, verified)
}

/// WebSocket endpoint for customers: `/api/v1/chat/ws/chat/customer?token=`
pub async fn chat_ws_customer(
    State(state): State<AppState>,
    Query(params): Query<WsAuthParams>,
    ws: WebSocketUpgrade,
) -> Response {
    let verified = state.auth.verify_customer(&params.token).await;
    upgrade_session(state, ws, verified)
}

fn upgrade_session(
    state: AppState,
    ws: WebSocketUpgrade,
    verified: AppResult<Principal>,
) -> Response {
    match verified {
        Ok(principal) => ws.on_upgrade(move |socket| run_session(state, principal, socket)),
        Err(err) => {
            warn!(code = err.code(), "chat handshake refused");
            // The upgrade still completes so the client receives a proper
            // policy-violation close instead of a bare HTTP error.
            ws.on_upgrade(move |socket| refuse_session(socket))
        }
    }
}

async fn refuse_session(mut socket: WebSocket) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame {
            code: close_code::POLICY,
            reason: "authentication failed".into(),
        })))
        .await;
}

async fn run_session(state: AppState, principal: Principal, socket: WebSocket) {
    let identity = principal.identity;
    let queue = Arc::new(DeliveryQueue::new(state.config.delivery_queue_capacity));
    let connection_id = state
        .registry
        .register(identity, ChannelKind::Chat, principal.salon_id, queue.clone())
        .await;
    info!(%identity, %connection_id, "chat connected");

    push_own(&queue, &ServerEvent::connected(identity)).await;

    let (mut sender, mut receiver) = socket.split();

    let mut keepalive = interval(Duration::from_secs(state.config.ws_ping_interval_secs));
    keepalive.set_missed_tick_behavior(MissedTickBehavior::Delay);
    keepalive.tick().await; // first tick fires immediately
    let idle_timeout = Duration::from_secs(state.config.ws_idle_timeout_secs);
    let mut last_inbound = Instant::now();
    let mut close_reason = "client disconnected";

    loop {
        tokio::select! {
            outbound = queue.pop() => {
                match outbound {
                    Some(envelope) => {
                        if sender.send(Message::Text(envelope.payload.to_string())).await.is_err() {
                            close_reason = "socket write failed";
                            break;
                        }
                    }
                    None => {
                        // Queue closed underneath us: slow-consumer forced
                        // close or server shutdown.
                        let _ = sender
                            .send(Message::Close(Some(CloseFrame {
                                code: close_code::AGAIN,
                                reason: "connection not keeping up".into(),
                            })))
                            .await;
                        close_reason = "forced close";
                        break;
                    }
                }
            }

            inbound = receiver.next() => {
                match inbound {
                    Some(Ok(Message::Text(text))) => {
                        last_inbound = Instant::now();
                        handle_command(&state, &principal, &queue, &text).await;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        last_inbound = Instant::now();
                    }
                    Some(Ok(Message::Binary(_))) => {
                        last_inbound = Instant::now();
                        push_own(
                            &queue,
                            &ServerEvent::error(&AppError::MalformedCommand(
                                "binary frames are not part of the chat protocol".into(),
                            )),
                        )
                        .await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(_)) => {
                        close_reason = "socket read failed";
                        break;
                    }
                }
            }

            _ = keepalive.tick() => {
                if last_inbound.elapsed() > idle_timeout {
                    close_reason = "idle timeout";
                    break;
                }
                push_own(&queue, &ServerEvent::server_ping()).await;
            }
        }
    }

    teardown(&state, identity, connection_id, &queue).await;
    info!(%identity, %connection_id, reason = close_reason, "chat disconnected");
}

/// Releases everything a connection held. Safe to run exactly once per
/// connection; a second call is a no-op because unregister is idempotent.
async fn teardown(state: &AppState, identity: Identity, connection_id: Uuid, queue: &DeliveryQueue) {
    queue.close().await;
    state.registry.unregister(identity, connection_id).await;

    // Presence cleanup only when the last device went away; persisted
    // membership is untouched.
    if !state
        .registry
        .has_connections(identity, ChannelKind::Chat)
        .await
    {
        state.typing.clear_identity(identity).await;
        for chat_id in state.rooms.rooms_of(identity).await {
            state.rooms.leave(chat_id, identity).await;
            broadcast_to_room(
                state,
                chat_id,
                &ServerEvent::user_left(chat_id, identity),
                Some(identity),
            )
            .await;
        }
    }
}

/// Parses and dispatches one inbound frame. Command failures come back as
/// `error` events on the same connection; nothing here tears the session
/// down.
pub async fn handle_command(
    state: &AppState,
    principal: &Principal,
    queue: &Arc<DeliveryQueue>,
    text: &str,
) {
    let command = match parse_command(text) {
        Ok(command) => command,
        Err(event) => {
            push_own(queue, &event).await;
            return;
        }
    };

    match command {
        ClientCommand::JoinChat { chat_id } => {
            handle_join_chat(state, principal, queue, chat_id).await
        }
        ClientCommand::LeaveChat { chat_id } => {
            handle_leave_chat(state, principal.identity, chat_id).await
        }
        ClientCommand::SendMessage {
            chat_id,
            content,
            message_type,
            media_url,
            reply_to_message_id,
        } => {
            let new = NewMessage {
                chat_id,
                sender: principal.identity,
                message_type: message_type.unwrap_or(MessageKind::Text),
                content,
                media_url,
                reply_to_message_id,
            };
            handle_send_message(state, principal.identity, queue, new).await
        }
        ClientCommand::Typing { chat_id, is_typing } => {
            handle_typing(state, principal.identity, queue, chat_id, is_typing).await
        }
        ClientCommand::ReadMessage {
            chat_id,
            message_id,
        } => handle_read_message(state, principal.identity, queue, chat_id, message_id).await,
        ClientCommand::Ping => push_own(queue, &ServerEvent::pong()).await,
    }
}

fn parse_command(text: &str) -> Result<ClientCommand, ServerEvent> {
    let value: serde_json::Value = serde_json::from_str(text).map_err(|_| {
        ServerEvent::error(&AppError::MalformedCommand("frame is not valid JSON".into()))
    })?;

    match serde_json::from_value::<ClientCommand>(value.clone()) {
        Ok(command) => Ok(command),
        Err(_) => match value.get("type").and_then(|t| t.as_str()) {
            Some(kind) => Err(ServerEvent::unknown_command(kind)),
            None => Err(ServerEvent::error(&AppError::MalformedCommand(
                "missing command type".into(),
            ))),
        },
    }
}

async fn handle_join_chat(
    state: &AppState,
    principal: &Principal,
    queue: &Arc<DeliveryQueue>,
    chat_id: i64,
) {
    if let Err(err) = authorize_join(state, principal, chat_id).await {
        push_own(queue, &ServerEvent::error(&err)).await;
        return;
    }

    let identity = principal.identity;
    // Re-joins are deliberate no-ops on the index but still refresh the
    // other members' presence view.
    state.rooms.join(chat_id, identity).await;
    debug!(%identity, chat_id, "joined chat");
    broadcast_to_room(
        state,
        chat_id,
        &ServerEvent::user_joined(chat_id, identity),
        Some(identity),
    )
    .await;
}

/// Membership is authorized against the store, not the live index: the
/// index is a cache and admins are additionally scoped to their own salon.
async fn authorize_join(state: &AppState, principal: &Principal, chat_id: i64) -> AppResult<()> {
    let chat = state
        .chats
        .chat(chat_id)
        .await?
        .ok_or(AppError::NotAMember)?;
    if !chat.is_active {
        return Err(AppError::NotAMember);
    }
    if principal.identity.kind == ParticipantKind::User
        && principal.salon_id != Some(chat.salon_id)
    {
        return Err(AppError::NotAMember);
    }
    if !state.chats.is_member(chat_id, principal.identity).await? {
        return Err(AppError::NotAMember);
    }
    Ok(())
}

async fn handle_leave_chat(state: &AppState, identity: Identity, chat_id: i64) {
    let was_subscribed = state.rooms.leave(chat_id, identity).await;
    state.typing.clear(chat_id, identity).await;
    if was_subscribed {
        debug!(%identity, chat_id, "left chat");
        broadcast_to_room(
            state,
            chat_id,
            &ServerEvent::user_left(chat_id, identity),
            Some(identity),
        )
        .await;
    }
}

async fn handle_send_message(
    state: &AppState,
    identity: Identity,
    queue: &Arc<DeliveryQueue>,
    new: NewMessage,
) {
    if !state.rooms.is_joined(new.chat_id, identity).await {
        push_own(queue, &ServerEvent::error(&AppError::NotAMember)).await;
        return;
    }
    if let Err(err) = new.validate() {
        push_own(queue, &ServerEvent::error(&err)).await;
        return;
    }

    let chat_id = new.chat_id;
    // Persist first; the broadcast below can never precede a durable write.
    let record = match state.chats.append_message(new).await {
        Ok(record) => record,
        Err(err) => {
            push_own(queue, &ServerEvent::error(&err)).await;
            return;
        }
    };

    let sender_name = state
        .chats
        .display_name(identity)
        .await
        .ok()
        .flatten();
    let event = ServerEvent::message(chat_id, MessageBody::from_record(&record, sender_name));
    broadcast_to_room(state, chat_id, &event, None).await;

    increment_unread_for_offline(state, chat_id, identity).await;
}

/// Unread counters move only for persisted members with no live chat
/// connection at all; everyone online saw the broadcast.
async fn increment_unread_for_offline(state: &AppState, chat_id: i64, sender: Identity) {
    let members = match state.chats.load_membership(chat_id).await {
        Ok(members) => members,
        Err(err) => {
            warn!(chat_id, error = %err, "membership load failed, unread counters skipped");
            return;
        }
    };

    let mut offline = Vec::new();
    for member in members {
        if member == sender {
            continue;
        }
        if !state
            .registry
            .has_connections(member, ChannelKind::Chat)
            .await
        {
            offline.push(member);
        }
    }

    if offline.is_empty() {
        return;
    }
    if let Err(err) = state.chats.increment_unread(chat_id, &offline).await {
        warn!(chat_id, error = %err, "unread counter update failed");
    }
}

async fn handle_typing(
    state: &AppState,
    identity: Identity,
    queue: &Arc<DeliveryQueue>,
    chat_id: i64,
    is_typing: bool,
) {
    // Typing outside an actively joined room is a protocol violation, not a
    // silent ignore.
    if !state.rooms.is_joined(chat_id, identity).await {
        push_own(queue, &ServerEvent::error(&AppError::NotAMember)).await;
        return;
    }

    state.typing.set(chat_id, identity, is_typing).await;
    broadcast_to_room(
        state,
        chat_id,
        &ServerEvent::typing(chat_id, identity, is_typing),
        Some(identity),
    )
    .await;
}

async fn handle_read_message(
    state: &AppState,
    identity: Identity,
    queue: &Arc<DeliveryQueue>,
    chat_id: i64,
    message_id: i64,
) {
    let message = match state.chats.message(message_id).await {
        Ok(Some(message)) => message,
        Ok(None) => {
            push_own(queue, &ServerEvent::error(&AppError::NotFound)).await;
            return;
        }
        Err(err) => {
            push_own(queue, &ServerEvent::error(&err)).await;
            return;
        }
    };

    // Upsert is idempotent: a retried read never creates a second receipt.
    if let Err(err) = state.chats.upsert_read_receipt(message_id, identity).await {
        push_own(queue, &ServerEvent::error(&err)).await;
        return;
    }

    // Receipts are addressed to the message author alone, across all of
    // their devices; the rest of the room has no use for them.
    push_to_identity(
        state,
        message.sender,
        &ServerEvent::read_receipt(chat_id, message_id, identity),
    )
    .await;
}

/// Fans an event out to every live chat connection of every subscribed
/// member. A queue that overflows on a critical event belongs to a consumer
/// that stopped reading: it is closed here, which force-disconnects it.
pub async fn broadcast_to_room(
    state: &AppState,
    chat_id: i64,
    event: &ServerEvent,
    exclude: Option<Identity>,
) {
    let payload = event.to_value();
    let class = event.class();

    for member in state.rooms.members_of(chat_id).await {
        if Some(member) == exclude {
            continue;
        }
        deliver(state, member, class, &payload).await;
    }
}

/// Direct delivery to one identity's chat connections, bypassing room
/// membership (read receipts).
pub async fn push_to_identity(state: &AppState, identity: Identity, event: &ServerEvent) {
    deliver(state, identity, event.class(), &event.to_value()).await;
}

async fn deliver(
    state: &AppState,
    identity: Identity,
    class: EventClass,
    payload: &serde_json::Value,
) {
    let queues = state
        .registry
        .connections_for(identity, ChannelKind::Chat)
        .await;
    for queue in queues {
        match queue.push(class, payload.clone()).await {
            Ok(_) | Err(PushError::Closed) => {}
            Err(PushError::Overflow) => {
                warn!(%identity, "delivery queue overflow on critical event, force-closing");
                queue.close().await;
            }
        }
    }
}

/// Enqueues onto the connection's own queue; failures mean the connection
/// is already going away.
async fn push_own(queue: &DeliveryQueue, event: &ServerEvent) {
    let _ = queue.push(event.class(), event.to_value()).await;
}

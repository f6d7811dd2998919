//! Protocol handler scenarios against the in-memory stores: membership
//! enforcement, ordering, receipts, typing, and error propagation.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Value};

use realtime_service::error::{AppError, AppResult};
use realtime_service::models::{
    Chat, ChatMessage, ChatType, Identity, NewMessage, Principal,
};
use realtime_service::persistence::memory::MemoryStore;
use realtime_service::persistence::ChatStore;
use realtime_service::websocket::session::handle_command;
use realtime_service::websocket::{ChannelKind, DeliveryQueue};
use realtime_service::{AppState, Config};

const SALON: i64 = 3;
const CHAT: i64 = 7;

async fn seeded_state() -> (AppState, Arc<MemoryStore>) {
    let store = MemoryStore::new();
    store
        .insert_chat(Chat {
            id: CHAT,
            chat_type: ChatType::UserCustomer,
            salon_id: SALON,
            is_active: true,
            is_archived: false,
        })
        .await;

    let state = AppState::new(
        Config::for_tests(),
        store.clone(),
        store.clone(),
        store.clone(),
    );
    (state, store)
}

/// Registers a live chat connection the way a session would, minus the
/// socket: commands are fed to `handle_command`, events drain from the
/// returned queue.
async fn connect(state: &AppState, principal: Principal) -> Arc<DeliveryQueue> {
    let queue = Arc::new(DeliveryQueue::new(64));
    state
        .registry
        .register(
            principal.identity,
            ChannelKind::Chat,
            principal.salon_id,
            queue.clone(),
        )
        .await;
    queue
}

async fn drain(queue: &DeliveryQueue) -> Vec<Value> {
    let mut events = Vec::new();
    for _ in 0..queue.len().await {
        if let Some(envelope) = queue.pop().await {
            events.push(envelope.payload);
        }
    }
    events
}

fn cmd(value: Value) -> String {
    value.to_string()
}

#[tokio::test]
async fn test_send_rejected_until_member_joins() {
    let (state, store) = seeded_state().await;
    let admin = Principal::user(1, SALON);
    let customer = Principal::customer(2);
    store.add_member(CHAT, admin.identity).await;
    store.add_member(CHAT, customer.identity).await;

    let admin_q = connect(&state, admin).await;
    let customer_q = connect(&state, customer).await;

    handle_command(
        &state,
        &admin,
        &admin_q,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;

    // B is a persisted member but has not joined this session yet.
    handle_command(
        &state,
        &customer,
        &customer_q,
        &cmd(json!({"type": "send_message", "chat_id": CHAT, "content": "hi"})),
    )
    .await;
    let events = drain(&customer_q).await;
    assert_eq!(events.len(), 1);
    assert_eq!(events[0]["type"], "error");
    assert_eq!(events[0]["code"], "not_a_member");

    // After an explicit join the same send goes through.
    handle_command(
        &state,
        &customer,
        &customer_q,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;
    handle_command(
        &state,
        &customer,
        &customer_q,
        &cmd(json!({"type": "send_message", "chat_id": CHAT, "content": "hi"})),
    )
    .await;

    let admin_events = drain(&admin_q).await;
    let joined = &admin_events[0];
    assert_eq!(joined["type"], "user_joined");
    assert_eq!(joined["participant_type"], "customer");
    assert_eq!(joined["participant_id"], 2);

    let message = &admin_events[1];
    assert_eq!(message["type"], "message");
    assert_eq!(message["message"]["content"], "hi");
    assert_eq!(message["message"]["sender_type"], "customer");
    // The id is server-assigned by the store.
    assert_eq!(message["message"]["id"], 1);
}

#[tokio::test]
async fn test_join_requires_persisted_membership() {
    let (state, _store) = seeded_state().await;
    let outsider = Principal::customer(99);
    let queue = connect(&state, outsider).await;

    handle_command(
        &state,
        &outsider,
        &queue,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;

    let events = drain(&queue).await;
    assert_eq!(events[0]["code"], "not_a_member");
    assert!(!state.rooms.is_joined(CHAT, outsider.identity).await);
}

#[tokio::test]
async fn test_admin_join_is_salon_scoped() {
    let (state, store) = seeded_state().await;
    // Valid membership row, but the admin belongs to a different salon.
    let foreign_admin = Principal::user(8, SALON + 1);
    store.add_member(CHAT, foreign_admin.identity).await;

    let queue = connect(&state, foreign_admin).await;
    handle_command(
        &state,
        &foreign_admin,
        &queue,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;

    let events = drain(&queue).await;
    assert_eq!(events[0]["code"], "not_a_member");
}

#[tokio::test]
async fn test_single_sender_ordering() {
    let (state, store) = seeded_state().await;
    let a = Principal::user(1, SALON);
    let b = Principal::customer(2);
    store.add_member(CHAT, a.identity).await;
    store.add_member(CHAT, b.identity).await;

    let a_q = connect(&state, a).await;
    let b_q = connect(&state, b).await;
    for (principal, queue) in [(&a, &a_q), (&b, &b_q)] {
        handle_command(
            &state,
            principal,
            queue,
            &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
        )
        .await;
    }
    drain(&b_q).await;

    for text in ["m1", "m2", "m3"] {
        handle_command(
            &state,
            &a,
            &a_q,
            &cmd(json!({"type": "send_message", "chat_id": CHAT, "content": text})),
        )
        .await;
    }

    let observed: Vec<String> = drain(&b_q)
        .await
        .into_iter()
        .filter(|e| e["type"] == "message")
        .map(|e| e["message"]["content"].as_str().unwrap_or_default().to_string())
        .collect();
    assert_eq!(observed, vec!["m1", "m2", "m3"]);
}

#[tokio::test]
async fn test_broadcast_reaches_senders_other_devices() {
    let (state, store) = seeded_state().await;
    let a = Principal::user(1, SALON);
    store.add_member(CHAT, a.identity).await;

    let phone = connect(&state, a).await;
    let laptop = connect(&state, a).await;
    handle_command(
        &state,
        &a,
        &phone,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;

    handle_command(
        &state,
        &a,
        &phone,
        &cmd(json!({"type": "send_message", "chat_id": CHAT, "content": "hi"})),
    )
    .await;

    // Both the sending device and the idle one observe the message.
    assert!(drain(&phone).await.iter().any(|e| e["type"] == "message"));
    assert!(drain(&laptop).await.iter().any(|e| e["type"] == "message"));
}

#[tokio::test]
async fn test_read_receipt_is_idempotent_and_sender_addressed() {
    let (state, store) = seeded_state().await;
    let a = Principal::user(1, SALON);
    let b = Principal::customer(2);
    let c = Principal::user(5, SALON);
    for p in [a, b, c] {
        store.add_member(CHAT, p.identity).await;
    }

    let a_q = connect(&state, a).await;
    let b_q = connect(&state, b).await;
    let c_q = connect(&state, c).await;
    for (principal, queue) in [(&a, &a_q), (&b, &b_q), (&c, &c_q)] {
        handle_command(
            &state,
            principal,
            queue,
            &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
        )
        .await;
    }

    handle_command(
        &state,
        &a,
        &a_q,
        &cmd(json!({"type": "send_message", "chat_id": CHAT, "content": "hi"})),
    )
    .await;
    drain(&a_q).await;
    drain(&c_q).await;

    let read = cmd(json!({"type": "read_message", "chat_id": CHAT, "message_id": 1}));
    handle_command(&state, &b, &b_q, &read).await;
    handle_command(&state, &b, &b_q, &read).await;

    // Exactly one persisted receipt despite the retry.
    assert_eq!(store.receipt_count(1).await, 1);

    // Receipts reach the message author only.
    let a_events = drain(&a_q).await;
    let receipts: Vec<&Value> = a_events
        .iter()
        .filter(|e| e["type"] == "read_receipt")
        .collect();
    assert!(!receipts.is_empty());
    assert_eq!(receipts[0]["reader_type"], "customer");
    assert_eq!(receipts[0]["reader_id"], 2);
    assert_eq!(receipts[0]["message_id"], 1);

    assert!(!drain(&c_q)
        .await
        .iter()
        .any(|e| e["type"] == "read_receipt"));
}

#[tokio::test]
async fn test_typing_requires_joined_room_and_routes_to_others() {
    let (state, store) = seeded_state().await;
    let a = Principal::user(1, SALON);
    let b = Principal::customer(2);
    store.add_member(CHAT, a.identity).await;
    store.add_member(CHAT, b.identity).await;

    let a_q = connect(&state, a).await;
    let b_q = connect(&state, b).await;

    // Typing before joining is a protocol violation.
    handle_command(
        &state,
        &a,
        &a_q,
        &cmd(json!({"type": "typing", "chat_id": CHAT, "is_typing": true})),
    )
    .await;
    assert_eq!(drain(&a_q).await[0]["code"], "not_a_member");

    for (principal, queue) in [(&a, &a_q), (&b, &b_q)] {
        handle_command(
            &state,
            principal,
            queue,
            &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
        )
        .await;
    }
    drain(&a_q).await;
    drain(&b_q).await;

    handle_command(
        &state,
        &a,
        &a_q,
        &cmd(json!({"type": "typing", "chat_id": CHAT, "is_typing": true})),
    )
    .await;

    // The indicator goes to the other member, not back to the typist.
    let b_events = drain(&b_q).await;
    assert_eq!(b_events[0]["type"], "typing");
    assert_eq!(b_events[0]["is_typing"], true);
    assert!(drain(&a_q).await.is_empty());

    assert_eq!(state.typing.typers(CHAT).await, vec![a.identity]);
}

#[tokio::test]
async fn test_leave_restores_subscribers_and_notifies() {
    let (state, store) = seeded_state().await;
    let a = Principal::user(1, SALON);
    let b = Principal::customer(2);
    store.add_member(CHAT, a.identity).await;
    store.add_member(CHAT, b.identity).await;

    let a_q = connect(&state, a).await;
    let b_q = connect(&state, b).await;
    handle_command(
        &state,
        &a,
        &a_q,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;
    let before = state.rooms.members_of(CHAT).await;

    handle_command(
        &state,
        &b,
        &b_q,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;
    handle_command(
        &state,
        &b,
        &b_q,
        &cmd(json!({"type": "leave_chat", "chat_id": CHAT})),
    )
    .await;

    assert_eq!(state.rooms.members_of(CHAT).await, before);
    let a_events = drain(&a_q).await;
    assert!(a_events.iter().any(|e| e["type"] == "user_joined"));
    assert!(a_events.iter().any(|e| e["type"] == "user_left"));
}

#[tokio::test]
async fn test_malformed_and_unknown_commands_keep_connection_open() {
    let (state, store) = seeded_state().await;
    let a = Principal::user(1, SALON);
    store.add_member(CHAT, a.identity).await;
    let queue = connect(&state, a).await;

    handle_command(&state, &a, &queue, "not json at all").await;
    handle_command(&state, &a, &queue, &cmd(json!({"type": "dance"}))).await;
    handle_command(
        &state,
        &a,
        &queue,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;
    // An empty message is rejected as malformed, not fatal.
    handle_command(
        &state,
        &a,
        &queue,
        &cmd(json!({"type": "send_message", "chat_id": CHAT})),
    )
    .await;
    handle_command(&state, &a, &queue, &cmd(json!({"type": "ping"}))).await;

    let events = drain(&queue).await;
    assert_eq!(events[0]["code"], "malformed_command");
    assert!(events[1]["error"]
        .as_str()
        .unwrap_or_default()
        .contains("unknown message type"));
    assert_eq!(events[2]["code"], "malformed_command");
    // The session survived all of it: ping still answers.
    assert_eq!(events[3]["type"], "pong");
    assert!(!queue.is_closed().await);
}

#[tokio::test]
async fn test_unread_counters_move_only_for_offline_members() {
    let (state, store) = seeded_state().await;
    let a = Principal::user(1, SALON);
    let b = Principal::customer(2);
    let offline = Principal::customer(4);
    for p in [a, b, offline] {
        store.add_member(CHAT, p.identity).await;
    }

    let a_q = connect(&state, a).await;
    let b_q = connect(&state, b).await;
    for (principal, queue) in [(&a, &a_q), (&b, &b_q)] {
        handle_command(
            &state,
            principal,
            queue,
            &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
        )
        .await;
    }

    handle_command(
        &state,
        &a,
        &a_q,
        &cmd(json!({"type": "send_message", "chat_id": CHAT, "content": "hi"})),
    )
    .await;

    assert_eq!(store.unread_count(CHAT, offline.identity).await, 1);
    assert_eq!(store.unread_count(CHAT, b.identity).await, 0);
    assert_eq!(store.unread_count(CHAT, a.identity).await, 0);
}

// ---------------------------------------------------------------------------
// Store failure propagation
// ---------------------------------------------------------------------------

/// Delegates to the in-memory store but fails every message append, to
/// exercise the retryable error path.
struct FlakyStore {
    inner: Arc<MemoryStore>,
}

#[async_trait]
impl ChatStore for FlakyStore {
    async fn chat(&self, chat_id: i64) -> AppResult<Option<Chat>> {
        self.inner.chat(chat_id).await
    }
    async fn is_member(&self, chat_id: i64, identity: Identity) -> AppResult<bool> {
        self.inner.is_member(chat_id, identity).await
    }
    async fn load_membership(&self, chat_id: i64) -> AppResult<Vec<Identity>> {
        self.inner.load_membership(chat_id).await
    }
    async fn append_message(&self, _new: NewMessage) -> AppResult<ChatMessage> {
        Err(AppError::PersistenceUnavailable(sqlx::Error::PoolClosed))
    }
    async fn message(&self, message_id: i64) -> AppResult<Option<ChatMessage>> {
        self.inner.message(message_id).await
    }
    async fn upsert_read_receipt(&self, message_id: i64, reader: Identity) -> AppResult<bool> {
        self.inner.upsert_read_receipt(message_id, reader).await
    }
    async fn increment_unread(&self, chat_id: i64, members: &[Identity]) -> AppResult<()> {
        self.inner.increment_unread(chat_id, members).await
    }
    async fn display_name(&self, identity: Identity) -> AppResult<Option<String>> {
        self.inner.display_name(identity).await
    }
}

#[tokio::test]
async fn test_store_failure_is_retryable_and_not_fatal() {
    let store = MemoryStore::new();
    store
        .insert_chat(Chat {
            id: CHAT,
            chat_type: ChatType::UserCustomer,
            salon_id: SALON,
            is_active: true,
            is_archived: false,
        })
        .await;
    let a = Principal::user(1, SALON);
    store.add_member(CHAT, a.identity).await;

    let flaky = Arc::new(FlakyStore {
        inner: store.clone(),
    });
    let state = AppState::new(Config::for_tests(), store.clone(), flaky, store.clone());

    let queue = connect(&state, a).await;
    handle_command(
        &state,
        &a,
        &queue,
        &cmd(json!({"type": "join_chat", "chat_id": CHAT})),
    )
    .await;
    handle_command(
        &state,
        &a,
        &queue,
        &cmd(json!({"type": "send_message", "chat_id": CHAT, "content": "hi"})),
    )
    .await;

    let events = drain(&queue).await;
    let error = events
        .iter()
        .find(|e| e["type"] == "error")
        .expect("expected an error event");
    assert_eq!(error["code"], "persistence_unavailable");
    assert_eq!(error["retryable"], true);

    // The session is still alive and serving commands.
    handle_command(&state, &a, &queue, &cmd(json!({"type": "ping"}))).await;
    assert_eq!(drain(&queue).await[0]["type"], "pong");
}

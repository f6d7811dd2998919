use std::sync::Arc;

use crate::config::Config;
use crate::notifications::NotificationRouter;
use crate::persistence::{AuthVerifier, ChatStore, NotificationStore};
use crate::websocket::{ConnectionRegistry, RoomIndex, TypingTracker};

/// Process-wide shared state, created once in `main` and handed to every
/// handler explicitly. Connection lifecycle ends here too: shutdown closes
/// every registered queue, which drains the sessions.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub registry: Arc<ConnectionRegistry>,
    pub rooms: Arc<RoomIndex>,
    pub typing: Arc<TypingTracker>,
    pub auth: Arc<dyn AuthVerifier>,
    pub chats: Arc<dyn ChatStore>,
    pub notifications: Arc<dyn NotificationStore>,
    pub router: Arc<NotificationRouter>,
}

impl AppState {
    pub fn new(
        config: Config,
        auth: Arc<dyn AuthVerifier>,
        chats: Arc<dyn ChatStore>,
        notifications: Arc<dyn NotificationStore>,
    ) -> Self {
        let registry = Arc::new(ConnectionRegistry::new());
        let typing = Arc::new(TypingTracker::new(std::time::Duration::from_secs(
            config.typing_ttl_secs,
        )));
        let router = Arc::new(NotificationRouter::new(
            registry.clone(),
            notifications.clone(),
        ));

        AppState {
            config: Arc::new(config),
            registry,
            rooms: Arc::new(RoomIndex::new()),
            typing,
            auth,
            chats,
            notifications,
            router,
        }
    }
}

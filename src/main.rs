use std::sync::Arc;

use realtime_service::persistence::postgres::{JwtVerifier, PgChatStore, PgNotificationStore};
use realtime_service::{config, db, error, logging, routes, AppState, ConnectionRegistry};

#[tokio::main]
async fn main() -> Result<(), error::AppError> {
    logging::init_tracing();
    let cfg = config::Config::from_env()?;

    let pool = db::init_pool(&cfg.database_url, cfg.db_max_connections)
        .await
        .map_err(|e| error::AppError::StartServer(format!("db: {e}")))?;

    let auth = Arc::new(JwtVerifier::new(pool.clone(), &cfg.jwt_secret));
    let chats = Arc::new(PgChatStore::new(pool.clone()));
    let notifications = Arc::new(PgNotificationStore::new(pool));

    let port = cfg.port;
    let state = AppState::new(cfg, auth, chats, notifications);
    let registry = state.registry.clone();

    let app = routes::api_router(state);

    let bind_addr = format!("0.0.0.0:{port}");
    tracing::info!(%bind_addr, "starting realtime-service");

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .map_err(|e| error::AppError::StartServer(format!("bind {bind_addr}: {e}")))?;

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(registry))
        .await
        .map_err(|e| error::AppError::StartServer(e.to_string()))?;

    Ok(())
}

/// On SIGINT, drain the process: closing every registered queue terminates
/// each session's writer, which runs its own teardown.
async fn shutdown_signal(registry: Arc<ConnectionRegistry>) {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to install ctrl-c handler");
        return;
    }
    tracing::info!("shutdown requested, closing live connections");
    registry.close_all().await;
}

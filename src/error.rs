use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("server start failure: {0}")]
    StartServer(String),

    /// Credential could not be resolved to a live principal. Fatal to the
    /// connection: refused before any session state exists.
    #[error("authentication rejected")]
    AuthRejected,

    /// Valid principal with no operable salon scope. Also fatal.
    #[error("identity has no associated salon")]
    ScopeMissing,

    /// Command against a conversation the identity cannot access. Local to
    /// the command; the connection stays open.
    #[error("not a participant in this conversation")]
    NotAMember,

    #[error("malformed command: {0}")]
    MalformedCommand(String),

    /// Downstream store failure. Retryable: the client keeps its connection
    /// and may re-issue the command.
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(#[from] sqlx::Error),

    /// Delivery queue overflowed on a critical event. The connection is
    /// force-closed; the client re-syncs from durable history.
    #[error("delivery queue overflow, connection is too slow")]
    SlowConsumer,

    #[error("not found")]
    NotFound,

    #[error("unauthorized")]
    Unauthorized,
}

impl AppError {
    /// Stable machine-readable code carried in `error` events and HTTP
    /// bodies. Clients match on this, not on the display string.
    pub fn code(&self) -> &'static str {
        match self {
            AppError::Config(_) => "config",
            AppError::StartServer(_) => "start_server",
            AppError::AuthRejected => "auth_rejected",
            AppError::ScopeMissing => "scope_missing",
            AppError::NotAMember => "not_a_member",
            AppError::MalformedCommand(_) => "malformed_command",
            AppError::PersistenceUnavailable(_) => "persistence_unavailable",
            AppError::SlowConsumer => "slow_consumer",
            AppError::NotFound => "not_found",
            AppError::Unauthorized => "unauthorized",
        }
    }

    /// Whether the client may retry the same command unchanged.
    pub fn is_retryable(&self) -> bool {
        matches!(self, AppError::PersistenceUnavailable(_))
    }

    /// Whether the error tears down the connection it occurred on.
    pub fn is_fatal_to_connection(&self) -> bool {
        matches!(
            self,
            AppError::AuthRejected | AppError::ScopeMissing | AppError::SlowConsumer
        )
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::AuthRejected | AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::ScopeMissing | AppError::NotAMember => StatusCode::FORBIDDEN,
            AppError::MalformedCommand(_) => StatusCode::BAD_REQUEST,
            AppError::NotFound => StatusCode::NOT_FOUND,
            AppError::PersistenceUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = json!({
            "code": self.code(),
            "error": self.to_string(),
            "retryable": self.is_retryable(),
        });
        (self.status_code(), Json(body)).into_response()
    }
}

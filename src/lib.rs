pub mod config;
pub mod db;
pub mod error;
pub mod logging;
pub mod models;
pub mod notifications;
pub mod persistence;
pub mod routes;
pub mod state;
pub mod websocket;

pub use config::Config;
pub use error::{AppError, AppResult};
pub use notifications::NotificationRouter;
pub use state::AppState;
pub use websocket::ConnectionRegistry;

//! REST surface: account registration/login, provider settings and the
//! conversation read model.

pub mod auth;
pub mod chats;
pub mod middleware;
pub mod settings;

use std::sync::Arc;

use axum::http::StatusCode;
use tracing::error;

use a5_db::Database;
use a5_db::secrets::SecretCipher;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub jwt_secret: String,
    pub cipher: SecretCipher,
}

/// Run a blocking DB call off the async runtime.
pub(crate) async fn with_db<T, F>(state: &AppState, f: F) -> Result<T, StatusCode>
where
    F: FnOnce(&Database) -> anyhow::Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = state.db.clone();
    tokio::task::spawn_blocking(move || f(&db))
        .await
        .map_err(|e| {
            error!("spawn_blocking join error: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?
        .map_err(|e| {
            error!("Database error: {:#}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        })
}

pub mod appresult;
pub mod auth;
pub mod clock;
pub mod config;
pub mod db;
pub mod error;
pub mod index;
pub mod relay;
pub mod res;
pub mod rooms;
pub mod session;

use std::sync::Arc;

use axum::{Router, extract::DefaultBodyLimit, extract::FromRef, routing::get};
use sqlx::SqlitePool;
use tower_http::{services::ServeDir, trace::TraceLayer};

pub use appresult::{AppError, AppResult};
pub use config::Config;
pub use error::{ChatError, ChatResult};
use relay::{Groups, Presence};

#[derive(Clone, FromRef)]
pub struct AppState {
    pub db_pool: SqlitePool,
    pub groups: Groups,
    pub presence: Presence,
    pub config: Arc<Config>,
}

impl AppState {
    pub fn new(db_pool: SqlitePool, config: Config) -> Self {
        Self {
            presence: Presence::new(db_pool.clone()),
            groups: Groups::new(),
            db_pool,
            config: Arc::new(config),
        }
    }
}

/// Every route of the service. The session layer is added by the caller.
pub fn router(state: AppState) -> Router {
    let media = ServeDir::new(&state.config.media_root);
    let media_url = state.config.media_url.trim_end_matches('/').to_owned();

    Router::new()
        .route("/", get(index::index))
        .merge(auth::router(state.config.dev_login))
        .nest("/chat", rooms::router())
        .nest_service(&media_url, media)
        .layer(DefaultBodyLimit::max(state.config.max_upload_bytes))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

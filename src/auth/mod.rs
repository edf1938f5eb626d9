use axum::{Router, routing::get};
use sqlx::SqlitePool;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{AppResult, AppState, db::{self, User}, session::USER_ID};

mod dev;
mod logout;

pub use dev::dev_login;
pub use logout::logout;

/// Sign-in itself belongs to the auth subsystem; this crate only reads the
/// identity it leaves in the session.
pub fn router(dev_login: bool) -> Router<AppState> {
    let router = Router::new().route("/logout", get(logout));
    if dev_login {
        router.route("/dev/login/{email}", get(dev::dev_login))
    } else {
        router
    }
}

/// The signed-in user id, or `None` for anonymous or unreadable sessions.
pub async fn session_user_id(session: &Session) -> Option<Uuid> {
    match session.get::<String>(USER_ID).await {
        Ok(raw) => raw.and_then(|raw| Uuid::parse_str(&raw).ok()),
        Err(e) => {
            tracing::warn!("session read failed: {e}");
            None
        }
    }
}

/// Resolves the session identity to a stored user.
pub async fn current_user(session: &Session, db_pool: &SqlitePool) -> AppResult<Option<User>> {
    let Some(user_id) = session_user_id(session).await else {
        return Ok(None);
    };
    Ok(db::get_user(db_pool, user_id).await?)
}

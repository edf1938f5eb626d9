use axum::{debug_handler, extract::Query, response::Redirect};
use serde::Deserialize;
use tower_sessions::Session;

use crate::AppResult;

#[derive(Deserialize)]
pub(crate) struct LogoutQuery {
    pub(crate) return_url: Option<String>,
}

#[debug_handler]
pub async fn logout(
    Query(LogoutQuery { return_url }): Query<LogoutQuery>,
    session: Session,
) -> AppResult<Redirect> {
    session.flush().await?;
    let return_url = return_url.filter(|url| url.starts_with('/') && !url.starts_with("//"));
    Ok(Redirect::to(return_url.as_deref().unwrap_or("/")))
}

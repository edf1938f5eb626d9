use axum::{debug_handler, extract::{Path, State}, response::Redirect};
use sqlx::SqlitePool;
use tower_sessions::Session;

use crate::{AppResult, db, session::{RETURN_URL, USER_ID}};

/// Signs in as `email` without credentials, creating the account if needed.
/// Only mounted when `DEV_LOGIN` is set.
#[debug_handler(state = crate::AppState)]
pub async fn dev_login(
    Path(email): Path<String>,
    State(db_pool): State<SqlitePool>,
    session: Session,
) -> AppResult<Redirect> {
    let user = match db::get_user_by_email(&db_pool, &email).await? {
        Some(user) => user,
        None => db::create_user(&db_pool, &email).await?,
    };
    session.cycle_id().await?;
    session.insert(USER_ID, user.id.to_string()).await?;
    tracing::info!(user_id = %user.id, %email, "development login");

    let return_url: Option<String> = session.remove(RETURN_URL).await?;
    Ok(Redirect::to(return_url.as_deref().unwrap_or("/")))
}

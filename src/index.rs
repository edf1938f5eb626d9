use axum::{debug_handler, extract::State, http::StatusCode, response::{Html, IntoResponse, Response}};
use tower_sessions::Session;

use crate::{AppResult, AppState, auth, db, include_res, res::escape_html};

/// Conversation list: every other user with their online flag and how many
/// of their messages wait unread.
#[debug_handler]
pub async fn index(
    State(app): State<AppState>,
    session: Session,
) -> AppResult<Response> {
    let Some(me) = auth::current_user(&session, &app.db_pool).await? else {
        return Ok((StatusCode::UNAUTHORIZED, "sign in first").into_response());
    };

    let mut items = String::new();
    for peer in db::list_users_except(&app.db_pool, me.id).await? {
        let unread = match db::find_room(&app.db_pool, me.id, peer.id).await? {
            Some(room) => db::count_unread(&app.db_pool, room.id, peer.id).await?,
            None => 0,
        };

        items += &include_res!(str, "/pages/conversation_item.html")
            .replace("{user_id}", &peer.id.to_string())
            .replace("{email}", &escape_html(&peer.email))
            .replace("{status}", if peer.is_online { "online" } else { "offline" })
            .replace("{unread}", &unread.to_string());
    }

    Ok(
        Html(
            include_res!(str, "/pages/index.html")
                .replace("{me}", &escape_html(&me.email))
                .replace("{items}", &items)
        ).into_response()
    )
}

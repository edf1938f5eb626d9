use axum::{
    debug_handler,
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect, Response},
};
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppResult, AppState, auth, db,
    error::{ChatError, Rejection},
    include_res,
    relay::Outbound,
    res::escape_html,
    session::RETURN_URL,
};

use super::{msg, resolve};

#[debug_handler]
pub(crate) async fn chat_room(
    State(app): State<AppState>,
    session: Session,
    Path(peer_id): Path<Uuid>,
) -> AppResult<Response> {
    let Some(me) = auth::current_user(&session, &app.db_pool).await? else {
        session.insert(RETURN_URL, format!("/chat/{peer_id}")).await?;
        return Err(ChatError::RejectedConnection(Rejection::Unauthenticated).into());
    };
    if me.id == peer_id {
        return Ok(Redirect::to("/").into_response());
    }
    let Some(peer) = db::get_user(&app.db_pool, peer_id).await? else {
        return Err(ChatError::NotFound(format!("user {peer_id}")).into());
    };

    let room = resolve::resolve_room(&app.db_pool, me.id, peer.id).await?;
    if db::mark_all_read_except_sender(&app.db_pool, room.id, me.id).await? > 0 {
        app.groups.publish(room.id, Outbound::MessagesRead { user_id: me.id });
    }

    let mut messages = String::new();
    for message in db::list_messages(&app.db_pool, room.id).await? {
        messages += &msg::msg_to_html(&message, &me, &peer, &app.config.media_url);
    }

    let body = include_res!(str, "/pages/chat/room.html")
        .replace("{room_id}", &room.id.to_string())
        .replace("{me_id}", &me.id.to_string())
        .replace("{peer_id}", &peer.id.to_string())
        .replace("{peer_email}", &escape_html(&peer.email))
        .replace("{peer_status}", if app.presence.is_online(peer.id).await { "online" } else { "offline" })
        .replace("{messages}", &messages);

    Ok(Html(body).into_response())
}

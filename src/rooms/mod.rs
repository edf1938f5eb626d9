mod msg;
pub mod resolve;
mod room;
pub mod upload;
mod ws;

use axum::{Router, routing::{get, post}};

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/upload", post(upload::upload_file))
        .route("/{user_id}", get(room::chat_room))
        .route("/{user_id}/ws", get(ws::peer_ws))
        .route("/room/{room_id}/ws", get(ws::room_ws))
}

use sqlx::SqlitePool;
use uuid::Uuid;

use crate::{
    db::{self, Room},
    error::{ChatError, ChatResult},
};

/// Orders a pair of user ids so `{a, b}` and `{b, a}` give the same tuple.
///
/// `Uuid` compares bytewise, which agrees with comparing the lowercase
/// hyphenated text stored in the database.
pub fn canonical_pair(a: Uuid, b: Uuid) -> (Uuid, Uuid) {
    if a <= b { (a, b) } else { (b, a) }
}

/// Finds or creates the room between `me` and `peer`. Shared by the page
/// render and the websocket handshake so both take the same path.
pub async fn resolve_room(db_pool: &SqlitePool, me: Uuid, peer: Uuid) -> ChatResult<Room> {
    if db::get_user(db_pool, peer).await?.is_none() {
        return Err(ChatError::NotFound(format!("user {peer}")));
    }
    db::find_or_create_room(db_pool, me, peer).await
}

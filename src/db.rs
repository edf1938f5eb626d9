use std::str::FromStr;

use sqlx::{
    SqlitePool,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions},
};
use uuid::Uuid;

use crate::{
    clock,
    error::{ChatError, ChatResult},
    rooms::resolve::canonical_pair,
};

/// The presence subset of a user account. Accounts themselves belong to the
/// auth subsystem; the relay only flips `is_online` and `last_seen`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub is_online: bool,
    pub last_seen: i64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Room {
    pub id: Uuid,
    pub user_a: Uuid,
    pub user_b: Uuid,
    pub created_at: i64,

    // unique: user_a, user_b
    // check: user_a < user_b
}

impl Room {
    pub fn has_participant(&self, user_id: Uuid) -> bool {
        self.user_a == user_id || self.user_b == user_id
    }

    pub fn peer_of(&self, user_id: Uuid) -> Option<Uuid> {
        if self.user_a == user_id {
            Some(self.user_b)
        } else if self.user_b == user_id {
            Some(self.user_a)
        } else {
            None
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: Uuid,
    pub room_id: Uuid,
    pub sender_id: Uuid,
    pub content: Option<String>,
    pub file: Option<String>,
    pub created_at: i64,
    pub is_read: bool,
}

type UserRow = (String, String, bool, i64);
type RoomRow = (String, String, String, i64);
type MessageRow = (String, String, String, Option<String>, Option<String>, i64, bool);

fn parse_id(raw: &str) -> Result<Uuid, sqlx::Error> {
    Uuid::parse_str(raw).map_err(|e| sqlx::Error::Decode(Box::new(e)))
}

fn user_from_row((id, email, is_online, last_seen): UserRow) -> Result<User, sqlx::Error> {
    Ok(User { id: parse_id(&id)?, email, is_online, last_seen })
}

fn room_from_row((id, user_a, user_b, created_at): RoomRow) -> Result<Room, sqlx::Error> {
    Ok(Room {
        id: parse_id(&id)?,
        user_a: parse_id(&user_a)?,
        user_b: parse_id(&user_b)?,
        created_at,
    })
}

fn message_from_row(
    (id, room_id, sender_id, content, file, created_at, is_read): MessageRow,
) -> Result<Message, sqlx::Error> {
    Ok(Message {
        id: parse_id(&id)?,
        room_id: parse_id(&room_id)?,
        sender_id: parse_id(&sender_id)?,
        content,
        file,
        created_at,
        is_read,
    })
}

pub async fn connect(database_url: &str) -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true)
        .journal_mode(SqliteJournalMode::Wal);

    let db_pool = SqlitePoolOptions::new()
        .max_connections(16)
        .connect_with(options)
        .await?;
    migrate(&db_pool).await?;
    Ok(db_pool)
}

/// Single-connection pool over a private in-memory database, already migrated.
pub async fn open_in_memory() -> anyhow::Result<SqlitePool> {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await?;
    migrate(&db_pool).await?;
    Ok(db_pool)
}

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    let stmts = [
        r#"
        CREATE TABLE IF NOT EXISTS users (
            id        TEXT PRIMARY KEY,
            email     TEXT NOT NULL UNIQUE,
            is_online BOOLEAN NOT NULL DEFAULT FALSE,
            last_seen INTEGER NOT NULL
        )"#,
        r#"
        CREATE TABLE IF NOT EXISTS rooms (
            id         TEXT PRIMARY KEY,
            user_a     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            user_b     TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            created_at INTEGER NOT NULL,
            UNIQUE (user_a, user_b),
            CHECK (user_a < user_b)
        )"#,
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id         TEXT PRIMARY KEY,
            room_id    TEXT NOT NULL REFERENCES rooms(id) ON DELETE CASCADE,
            sender_id  TEXT NOT NULL REFERENCES users(id) ON DELETE CASCADE,
            content    TEXT,
            file       TEXT,
            created_at INTEGER NOT NULL,
            is_read    BOOLEAN NOT NULL DEFAULT FALSE,
            CHECK (content IS NOT NULL OR file IS NOT NULL)
        )"#,
        "CREATE INDEX IF NOT EXISTS idx_messages_room_created ON messages(room_id, created_at)",
    ];

    for stmt in stmts {
        sqlx::query(stmt).execute(db_pool).await?;
    }
    Ok(())
}

pub async fn create_user(db_pool: &SqlitePool, email: &str) -> ChatResult<User> {
    let user = User {
        id: Uuid::new_v4(),
        email: email.to_owned(),
        is_online: false,
        last_seen: clock::now_micros(),
    };
    sqlx::query("INSERT INTO users (id,email,is_online,last_seen) VALUES (?,?,?,?)")
        .bind(user.id.to_string())
        .bind(&user.email)
        .bind(user.is_online)
        .bind(user.last_seen)
        .execute(db_pool)
        .await?;
    Ok(user)
}

pub async fn get_user(db_pool: &SqlitePool, user_id: Uuid) -> ChatResult<Option<User>> {
    let row: Option<UserRow> =
        sqlx::query_as("SELECT id,email,is_online,last_seen FROM users WHERE id=?")
            .bind(user_id.to_string())
            .fetch_optional(db_pool)
            .await?;
    Ok(row.map(user_from_row).transpose()?)
}

pub async fn get_user_by_email(db_pool: &SqlitePool, email: &str) -> ChatResult<Option<User>> {
    let row: Option<UserRow> =
        sqlx::query_as("SELECT id,email,is_online,last_seen FROM users WHERE email=?")
            .bind(email)
            .fetch_optional(db_pool)
            .await?;
    Ok(row.map(user_from_row).transpose()?)
}

pub async fn list_users_except(db_pool: &SqlitePool, user_id: Uuid) -> ChatResult<Vec<User>> {
    let rows: Vec<UserRow> = sqlx::query_as(
        "SELECT id,email,is_online,last_seen FROM users WHERE id<>? ORDER BY email",
    )
    .bind(user_id.to_string())
    .fetch_all(db_pool)
    .await?;
    Ok(rows.into_iter().map(user_from_row).collect::<Result<_, _>>()?)
}

/// Updates the online flag and the last-seen time in one statement.
pub async fn set_presence(db_pool: &SqlitePool, user_id: Uuid, is_online: bool) -> ChatResult<()> {
    sqlx::query("UPDATE users SET is_online=?, last_seen=? WHERE id=?")
        .bind(is_online)
        .bind(clock::now_micros())
        .bind(user_id.to_string())
        .execute(db_pool)
        .await?;
    Ok(())
}

/// Marks everyone offline. Run at startup: no connection survives a restart.
pub async fn reset_presence(db_pool: &SqlitePool) -> ChatResult<u64> {
    let done = sqlx::query("UPDATE users SET is_online=FALSE WHERE is_online")
        .execute(db_pool)
        .await?;
    Ok(done.rows_affected())
}

pub async fn get_room(db_pool: &SqlitePool, room_id: Uuid) -> ChatResult<Option<Room>> {
    let row: Option<RoomRow> =
        sqlx::query_as("SELECT id,user_a,user_b,created_at FROM rooms WHERE id=?")
            .bind(room_id.to_string())
            .fetch_optional(db_pool)
            .await?;
    Ok(row.map(room_from_row).transpose()?)
}

/// Looks a room up by its pair without creating it. Argument order does not matter.
pub async fn find_room(db_pool: &SqlitePool, a: Uuid, b: Uuid) -> ChatResult<Option<Room>> {
    let (user_a, user_b) = canonical_pair(a, b);
    let row: Option<RoomRow> =
        sqlx::query_as("SELECT id,user_a,user_b,created_at FROM rooms WHERE user_a=? AND user_b=?")
            .bind(user_a.to_string())
            .bind(user_b.to_string())
            .fetch_optional(db_pool)
            .await?;
    Ok(row.map(room_from_row).transpose()?)
}

/// Insert-or-ignore against the unique pair, then read back whichever row won.
pub async fn find_or_create_room(db_pool: &SqlitePool, a: Uuid, b: Uuid) -> ChatResult<Room> {
    if a == b {
        return Err(ChatError::ForbiddenAction(format!("{a} cannot open a room with itself")));
    }
    let (user_a, user_b) = canonical_pair(a, b);

    sqlx::query(
        "INSERT INTO rooms (id,user_a,user_b,created_at) VALUES (?,?,?,?)
         ON CONFLICT(user_a,user_b) DO NOTHING",
    )
    .bind(Uuid::now_v7().to_string())
    .bind(user_a.to_string())
    .bind(user_b.to_string())
    .bind(clock::now_micros())
    .execute(db_pool)
    .await?;

    find_room(db_pool, user_a, user_b)
        .await?
        .ok_or_else(|| ChatError::NotFound(format!("room for {user_a},{user_b}")))
}

pub async fn create_message(
    db_pool: &SqlitePool,
    room: &Room,
    sender_id: Uuid,
    content: Option<&str>,
    file: Option<&str>,
) -> ChatResult<Message> {
    if !room.has_participant(sender_id) {
        return Err(ChatError::ForbiddenAction(format!("{sender_id} is not in room {}", room.id)));
    }
    let content = content.filter(|c| !c.trim().is_empty());
    if content.is_none() && file.is_none() {
        return Err(ChatError::malformed("message has neither content nor file"));
    }

    let message = Message {
        id: Uuid::now_v7(),
        room_id: room.id,
        sender_id,
        content: content.map(str::to_owned),
        file: file.map(str::to_owned),
        created_at: clock::now_micros(),
        is_read: false,
    };
    sqlx::query(
        "INSERT INTO messages (id,room_id,sender_id,content,file,created_at,is_read)
         VALUES (?,?,?,?,?,?,FALSE)",
    )
    .bind(message.id.to_string())
    .bind(message.room_id.to_string())
    .bind(message.sender_id.to_string())
    .bind(&message.content)
    .bind(&message.file)
    .bind(message.created_at)
    .execute(db_pool)
    .await?;

    Ok(message)
}

pub async fn get_message(
    db_pool: &SqlitePool,
    room_id: Uuid,
    message_id: Uuid,
) -> ChatResult<Option<Message>> {
    let row: Option<MessageRow> = sqlx::query_as(
        "SELECT id,room_id,sender_id,content,file,created_at,is_read
         FROM messages WHERE id=? AND room_id=?",
    )
    .bind(message_id.to_string())
    .bind(room_id.to_string())
    .fetch_optional(db_pool)
    .await?;
    Ok(row.map(message_from_row).transpose()?)
}

/// Full history of a room, oldest first.
pub async fn list_messages(db_pool: &SqlitePool, room_id: Uuid) -> ChatResult<Vec<Message>> {
    let rows: Vec<MessageRow> = sqlx::query_as(
        "SELECT id,room_id,sender_id,content,file,created_at,is_read
         FROM messages WHERE room_id=? ORDER BY created_at, id",
    )
    .bind(room_id.to_string())
    .fetch_all(db_pool)
    .await?;
    Ok(rows.into_iter().map(message_from_row).collect::<Result<_, _>>()?)
}

/// Flags every message in the room that `reader` did not send. Returns how many changed.
pub async fn mark_all_read_except_sender(
    db_pool: &SqlitePool,
    room_id: Uuid,
    reader: Uuid,
) -> ChatResult<u64> {
    let done = sqlx::query(
        "UPDATE messages SET is_read=TRUE WHERE room_id=? AND sender_id<>? AND NOT is_read",
    )
    .bind(room_id.to_string())
    .bind(reader.to_string())
    .execute(db_pool)
    .await?;
    Ok(done.rows_affected())
}

/// Hard delete, only when `requester` sent the message. `false` covers both
/// "no such message in this room" and "someone else's message".
pub async fn delete_own_message(
    db_pool: &SqlitePool,
    room_id: Uuid,
    requester: Uuid,
    message_id: Uuid,
) -> ChatResult<bool> {
    let done = sqlx::query("DELETE FROM messages WHERE id=? AND room_id=? AND sender_id=?")
        .bind(message_id.to_string())
        .bind(room_id.to_string())
        .bind(requester.to_string())
        .execute(db_pool)
        .await?;
    Ok(done.rows_affected() == 1)
}

/// Messages in the room from `other_user` that are still unread.
pub async fn count_unread(db_pool: &SqlitePool, room_id: Uuid, other_user: Uuid) -> ChatResult<i64> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM messages WHERE room_id=? AND sender_id=? AND NOT is_read",
    )
    .bind(room_id.to_string())
    .bind(other_user.to_string())
    .fetch_one(db_pool)
    .await?;
    Ok(count)
}

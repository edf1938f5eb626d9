use std::path::Path;

use axum::{
    Json, debug_handler,
    extract::{Multipart, State},
    response::{IntoResponse, Response},
};
use serde::Serialize;
use tower_sessions::Session;
use uuid::Uuid;

use crate::{
    AppError, AppResult, AppState, auth, db,
    error::{ChatError, Rejection},
};

const UPLOAD_DIR: &str = "chat_files";

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<Uuid>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub file_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Stores an attachment and pre-creates its message row. The client then
/// sends a `chat_message` carrying the returned id so the relay broadcasts it.
#[debug_handler]
pub(crate) async fn upload_file(
    State(app): State<AppState>,
    session: Session,
    multipart: Multipart,
) -> Response {
    match receive(&app, &session, multipart).await {
        Ok(response) => Json(response).into_response(),
        Err(e) => {
            let status = e.status();
            let error = if status.is_server_error() {
                tracing::error!(%status, "upload failed: {:#}", e.0);
                "internal server error".to_owned()
            } else {
                tracing::warn!(%status, "upload refused: {:#}", e.0);
                e.0.to_string()
            };
            let body = UploadResponse { success: false, message_id: None, file_url: None, error: Some(error) };
            (status, Json(body)).into_response()
        }
    }
}

async fn receive(app: &AppState, session: &Session, mut multipart: Multipart) -> AppResult<UploadResponse> {
    let Some(me) = auth::current_user(session, &app.db_pool).await? else {
        return Err(ChatError::RejectedConnection(Rejection::Unauthenticated).into());
    };

    let mut room_id = None;
    let mut file = None;
    while let Some(field) = multipart.next_field().await? {
        let field_name = field.name().map(str::to_owned);
        match field_name.as_deref() {
            Some("room_id") => {
                let raw = field.text().await?;
                room_id = Some(
                    Uuid::parse_str(raw.trim())
                        .map_err(|e| ChatError::malformed(format!("room_id: {e}")))?,
                );
            }
            Some("file") => {
                let name = field.file_name().unwrap_or("file").to_owned();
                file = Some((name, field.bytes().await?));
            }
            _ => {}
        }
    }
    let (Some(room_id), Some((name, bytes))) = (room_id, file) else {
        return Err(ChatError::malformed("room_id and file are required").into());
    };

    let Some(room) = db::get_room(&app.db_pool, room_id).await? else {
        return Err(ChatError::NotFound(format!("room {room_id}")).into());
    };
    if !room.has_participant(me.id) {
        return Err(ChatError::ForbiddenAction(format!("{} uploading to {room_id}", me.id)).into());
    }

    let stored = store_upload(&app.config.media_root, &name, &bytes).await?;
    let message = match db::create_message(&app.db_pool, &room, me.id, None, Some(&stored)).await {
        Ok(message) => message,
        Err(e) => {
            let _ = tokio::fs::remove_file(app.config.media_root.join(&stored)).await;
            return Err(AppError::from(e));
        }
    };
    tracing::info!(user_id = %me.id, %room_id, message_id = %message.id, file = %stored, "file uploaded");

    Ok(UploadResponse {
        success: true,
        message_id: Some(message.id),
        file_url: Some(format!("{}{stored}", app.config.media_url)),
        error: None,
    })
}

/// Keeps the last path component of a client file name, restricted to a
/// conservative character set.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or_default();
    let clean: String = base
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
        .take(64)
        .collect();
    let clean = clean.trim_start_matches('.');
    if clean.is_empty() { "file".to_owned() } else { clean.to_owned() }
}

/// Writes the bytes under `media_root` and returns the path relative to it.
pub async fn store_upload(media_root: &Path, name: &str, bytes: &[u8]) -> std::io::Result<String> {
    let relative = format!("{UPLOAD_DIR}/{}-{}", Uuid::now_v7().simple(), sanitize_file_name(name));
    let path = media_root.join(&relative);
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&path, bytes).await?;
    Ok(relative)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_names_are_tamed() {
        assert_eq!(sanitize_file_name("cat.png"), "cat.png");
        assert_eq!(sanitize_file_name("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_file_name(r"C:\Users\me\report final.pdf"), "reportfinal.pdf");
        assert_eq!(sanitize_file_name(".htaccess"), "htaccess");
        assert_eq!(sanitize_file_name("////"), "file");
        assert_eq!(sanitize_file_name("ñ"), "file");
    }

    #[tokio::test]
    async fn upload_lands_under_media_root() {
        let dir = tempfile::tempdir().unwrap();
        let relative = store_upload(dir.path(), "hello.txt", b"hello").await.unwrap();

        assert!(relative.starts_with("chat_files/"));
        assert!(relative.ends_with("-hello.txt"));
        assert_eq!(std::fs::read(dir.path().join(&relative)).unwrap(), b"hello");
    }
}

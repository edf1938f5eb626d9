use axum::{
    debug_handler,
    extract::{
        Path, State, WebSocketUpgrade,
        ws::{CloseFrame, Message, WebSocket},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tower_sessions::Session;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{
    AppState, auth,
    error::ChatError,
    relay::{Connection, Outbound, RoomTarget},
};

#[debug_handler]
pub(crate) async fn room_ws(
    Path(room_id): Path<Uuid>,
    State(app): State<AppState>,
    session: Session,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = auth::session_user_id(&session).await;
    ws.on_upgrade(move |socket| serve(socket, app, user_id, RoomTarget::Room(room_id)))
}

#[debug_handler]
pub(crate) async fn peer_ws(
    Path(peer_id): Path<Uuid>,
    State(app): State<AppState>,
    session: Session,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let user_id = auth::session_user_id(&session).await;
    ws.on_upgrade(move |socket| serve(socket, app, user_id, RoomTarget::Peer(peer_id)))
}

/// Drives one upgraded socket: gate, then pump frames both ways until either
/// side goes away.
async fn serve(mut socket: WebSocket, app: AppState, user_id: Option<Uuid>, target: RoomTarget) {
    let cleanup_timeout = app.config.cleanup_timeout;
    let (tx, mut rx) = mpsc::unbounded_channel::<Outbound>();
    let mut conn = Connection::new(app, tx);

    if let Err(e) = conn.open(user_id, target).await {
        e.log(conn.id());
        if let ChatError::RejectedConnection(rejection) = e {
            let frame = CloseFrame { code: rejection.close_code(), reason: rejection.to_string().into() };
            let _ = socket.send(Message::Close(Some(frame))).await;
        }
        return;
    }

    let (mut sender, mut receiver) = socket.split();

    let mut writer = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sender.send(Message::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
        let _ = sender.close().await;
    });

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(Message::Text(text))) => conn.handle_frame(text.as_str().as_bytes()).await,
                Some(Ok(Message::Binary(bytes))) => conn.handle_frame(&bytes).await,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(conn_id = %conn.id(), "socket error: {e}");
                    break;
                }
            },
            _ = &mut writer => break,
        }
    }

    conn.close().await;
    let conn_id = conn.id();
    drop(conn);

    if !writer.is_finished() {
        if tokio::time::timeout(cleanup_timeout, &mut writer).await.is_err() {
            warn!(%conn_id, "writer did not drain in time");
            writer.abort();
        }
    }
}

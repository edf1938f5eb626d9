use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::{
    AppState, clock,
    db::{self, Room, User},
    error::{ChatError, ChatResult, Rejection},
    rooms::resolve,
};

use super::{
    groups::ConnectionId,
    protocol::{Inbound, Outbound},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnState {
    Connecting,
    Authenticating,
    Authorizing,
    Joined,
    Closed,
}

/// How the socket path names its room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomTarget {
    Room(Uuid),
    Peer(Uuid),
}

/// Per-socket session: the gate in front of a room and the dispatcher for
/// everything the client sends once inside.
pub struct Connection {
    id: ConnectionId,
    state: ConnState,
    app: AppState,
    outbox: UnboundedSender<Outbound>,
    user: Option<User>,
    room: Option<Room>,
    holds_presence: bool,
}

impl Connection {
    /// `outbox` receives every event published to the room once joined.
    pub fn new(app: AppState, outbox: UnboundedSender<Outbound>) -> Self {
        Self {
            id: Uuid::new_v4(),
            state: ConnState::Connecting,
            app,
            outbox,
            user: None,
            room: None,
            holds_presence: false,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnState {
        self.state
    }

    pub fn user(&self) -> Option<&User> {
        self.user.as_ref()
    }

    pub fn room(&self) -> Option<&Room> {
        self.room.as_ref()
    }

    fn expect_state(&self, expected: ConnState) -> ChatResult<()> {
        if self.state == expected {
            Ok(())
        } else {
            Err(ChatError::malformed(format!("{:?} while {:?}", expected, self.state)))
        }
    }

    /// Transport handshake finished.
    pub fn handshake_complete(&mut self) {
        if self.state == ConnState::Connecting {
            self.state = ConnState::Authenticating;
        }
    }

    async fn reject(&mut self, rejection: Rejection) -> ChatError {
        self.close().await;
        ChatError::RejectedConnection(rejection)
    }

    /// `user_id` is whatever the auth layer attached to the request; `None` is anonymous.
    pub async fn authenticate(&mut self, user_id: Option<Uuid>) -> ChatResult<()> {
        self.expect_state(ConnState::Authenticating)?;

        let Some(user_id) = user_id else {
            return Err(self.reject(Rejection::Unauthenticated).await);
        };
        let user = match db::get_user(&self.app.db_pool, user_id).await {
            Ok(Some(user)) => user,
            Ok(None) => return Err(self.reject(Rejection::Unauthenticated).await),
            Err(e) => {
                e.log(self.id);
                return Err(self.reject(Rejection::Unauthenticated).await);
            }
        };

        debug!(conn_id = %self.id, user_id = %user.id, "authenticated");
        self.user = Some(user);
        self.state = ConnState::Authorizing;
        Ok(())
    }

    /// Loads the room and checks the stored participants, whatever the path said.
    pub async fn authorize(&mut self, target: RoomTarget) -> ChatResult<()> {
        self.expect_state(ConnState::Authorizing)?;
        let Some(me) = self.user.as_ref().map(|user| user.id) else {
            return Err(self.reject(Rejection::Unauthenticated).await);
        };

        let room = match target {
            RoomTarget::Room(room_id) => db::get_room(&self.app.db_pool, room_id).await,
            RoomTarget::Peer(peer) => resolve::resolve_room(&self.app.db_pool, me, peer).await.map(Some),
        };
        let room = match room {
            Ok(Some(room)) if room.has_participant(me) => room,
            Ok(_) => return Err(self.reject(Rejection::Unauthorized).await),
            Err(e) => {
                e.log(self.id);
                return Err(self.reject(Rejection::Unauthorized).await);
            }
        };

        self.room = Some(room);
        Ok(())
    }

    /// Goes online, enters the broadcast group and reads everything the peer sent.
    pub async fn join(&mut self) -> ChatResult<()> {
        self.expect_state(ConnState::Authorizing)?;
        let (Some(user_id), Some(room)) = (self.user.as_ref().map(|u| u.id), self.room.as_ref())
        else {
            return Err(self.reject(Rejection::Unauthorized).await);
        };
        let (room_id, peer_id) = (room.id, room.peer_of(user_id));

        self.holds_presence = true;
        if let Err(e) = self.app.presence.set_online(user_id).await {
            e.log(self.id);
        }
        self.app.groups.join(room_id, self.id, self.outbox.clone());
        self.state = ConnState::Joined;
        info!(conn_id = %self.id, %user_id, %room_id, ?peer_id, "joined");

        if let Err(e) = self.mark_read(room_id, user_id).await {
            e.log(self.id);
        }
        Ok(())
    }

    /// Authenticate, authorize and join in one go.
    pub async fn open(&mut self, user_id: Option<Uuid>, target: RoomTarget) -> ChatResult<()> {
        self.handshake_complete();
        self.authenticate(user_id).await?;
        self.authorize(target).await?;
        self.join().await
    }

    /// Handles one raw client frame. Failures are logged and swallowed;
    /// the connection stays usable.
    pub async fn handle_frame(&mut self, frame: &[u8]) {
        if self.state != ConnState::Joined {
            debug!(conn_id = %self.id, state = ?self.state, "frame outside a room dropped");
            return;
        }
        let result = match Inbound::parse(frame) {
            Ok(event) => self.dispatch(event).await,
            Err(e) => Err(e),
        };
        if let Err(e) = result {
            e.log(self.id);
        }
    }

    pub async fn dispatch(&mut self, event: Inbound) -> ChatResult<()> {
        self.expect_state(ConnState::Joined)?;
        let (Some(user), Some(room)) = (self.user.clone(), self.room.clone()) else {
            return Err(ChatError::malformed("joined without user or room"));
        };
        let db_pool = &self.app.db_pool;

        match event {
            Inbound::SendText { text } => {
                let message = db::create_message(db_pool, &room, user.id, Some(&text), None).await?;
                self.app.groups.publish(
                    room.id,
                    Outbound::ChatMessage {
                        message: text,
                        file_url: None,
                        sender: user.email,
                        sender_id: user.id,
                        timestamp: clock::format_micros(message.created_at),
                        message_id: message.id,
                    },
                );
            }
            Inbound::SendFileAck { message_id, file_url } => {
                let Some(message) = db::get_message(db_pool, room.id, message_id).await? else {
                    return Err(ChatError::NotFound(format!("message {message_id}")));
                };
                if message.sender_id != user.id {
                    return Err(ChatError::ForbiddenAction(format!(
                        "{} relaying {message_id} sent by {}",
                        user.id, message.sender_id
                    )));
                }
                let Some(stored_url) = message.file.map(|file| self.file_url(&file)) else {
                    return Err(ChatError::malformed(format!("{message_id} has no file")));
                };
                if stored_url != file_url {
                    debug!(conn_id = %self.id, %file_url, %stored_url, "client file_url replaced");
                }
                self.app.groups.publish(
                    room.id,
                    Outbound::ChatMessage {
                        message: message.content.unwrap_or_default(),
                        file_url: Some(stored_url),
                        sender: user.email,
                        sender_id: user.id,
                        timestamp: clock::format_micros(clock::now_micros()),
                        message_id,
                    },
                );
            }
            Inbound::MarkRead => self.mark_read(room.id, user.id).await?,
            Inbound::Typing { typing } => {
                self.app
                    .groups
                    .publish(room.id, Outbound::UserTyping { user_id: user.id, typing });
            }
            Inbound::Delete { message_id } => {
                if !db::delete_own_message(db_pool, room.id, user.id, message_id).await? {
                    return Err(ChatError::ForbiddenAction(format!(
                        "{} deleting {message_id}",
                        user.id
                    )));
                }
                self.app.groups.publish(room.id, Outbound::MessageDeleted { message_id });
            }
        }
        Ok(())
    }

    fn file_url(&self, file: &str) -> String {
        format!("{}{}", self.app.config.media_url, file)
    }

    async fn mark_read(&self, room_id: Uuid, reader: Uuid) -> ChatResult<()> {
        let count = db::mark_all_read_except_sender(&self.app.db_pool, room_id, reader).await?;
        debug!(conn_id = %self.id, %room_id, count, "marked read");
        self.app.groups.publish(room_id, Outbound::MessagesRead { user_id: reader });
        Ok(())
    }

    /// Leaves the room and releases presence. Safe to call more than once.
    pub async fn close(&mut self) {
        if self.state == ConnState::Closed {
            return;
        }

        if let Some(room) = &self.room {
            self.app.groups.leave(room.id, self.id);
        }
        if self.holds_presence {
            self.holds_presence = false;
            if let Some(user) = &self.user {
                // the release runs to completion on its own task; close only
                // waits for it up to the cleanup bound
                let (presence, conn_id, user_id) = (self.app.presence.clone(), self.id, user.id);
                let release = tokio::spawn(async move {
                    if let Err(e) = presence.set_offline(user_id).await {
                        e.log(conn_id);
                    }
                });
                match tokio::time::timeout(self.app.config.cleanup_timeout, release).await {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => warn!(%conn_id, %user_id, "presence release panicked: {e}"),
                    Err(_) => warn!(%conn_id, %user_id, "presence release still pending, left in background"),
                }
            }
        }

        debug!(conn_id = %self.id, from = ?self.state, "closed");
        self.state = ConnState::Closed;
    }
}

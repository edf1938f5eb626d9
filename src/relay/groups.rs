use std::{collections::HashMap, sync::Arc};

use dashmap::DashMap;
use tokio::sync::mpsc::UnboundedSender;
use uuid::Uuid;

use super::protocol::Outbound;

/// Identifies one live socket. A user with two tabs open has two of these.
pub type ConnectionId = Uuid;

type Members = HashMap<ConnectionId, UnboundedSender<Outbound>>;

/// Room id -> live connections bound to that room.
///
/// Each room sits behind its own shard lock: `join`/`leave` take it for
/// writing, `publish` for reading while it pushes onto every member queue,
/// so a publish sees a consistent member set and never reaches a connection
/// that joined after it started. Nothing here is durable.
#[derive(Clone, Default)]
pub struct Groups {
    rooms: Arc<DashMap<Uuid, Members>>,
}

impl Groups {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn join(&self, room_id: Uuid, conn_id: ConnectionId, outbox: UnboundedSender<Outbound>) {
        self.rooms.entry(room_id).or_default().insert(conn_id, outbox);
    }

    /// Returns whether the connection was a member.
    pub fn leave(&self, room_id: Uuid, conn_id: ConnectionId) -> bool {
        let Some(mut members) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        let was_member = members.remove(&conn_id).is_some();
        let now_empty = members.is_empty();
        drop(members);

        if now_empty {
            self.rooms.remove_if(&room_id, |_, members| members.is_empty());
        }
        was_member
    }

    /// Queues `event` for every current member, the publisher included.
    /// Returns how many queues accepted it.
    pub fn publish(&self, room_id: Uuid, event: Outbound) -> usize {
        let Some(members) = self.rooms.get(&room_id) else {
            return 0;
        };
        members
            .values()
            .filter(|outbox| outbox.send(event.clone()).is_ok())
            .count()
    }

    pub fn member_count(&self, room_id: Uuid) -> usize {
        self.rooms.get(&room_id).map_or(0, |members| members.len())
    }

    pub fn is_member(&self, room_id: Uuid, conn_id: ConnectionId) -> bool {
        self.rooms
            .get(&room_id)
            .is_some_and(|members| members.contains_key(&conn_id))
    }

    pub fn room_count(&self) -> usize {
        self.rooms.len()
    }
}

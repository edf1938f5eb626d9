use std::sync::Arc;

use dashmap::DashMap;
use sqlx::SqlitePool;
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::{db, error::ChatResult};

/// Online state per user, reference counted over live connections so a
/// second tab closing does not flip the user offline.
///
/// The per-user lock is held across the database write, which keeps the
/// stored flag in the same order as the count transitions.
#[derive(Clone)]
pub struct Presence {
    db_pool: SqlitePool,
    counts: Arc<DashMap<Uuid, Arc<Mutex<usize>>>>,
}

impl Presence {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool, counts: Arc::default() }
    }

    fn slot(&self, user_id: Uuid) -> Arc<Mutex<usize>> {
        self.counts.entry(user_id).or_default().clone()
    }

    /// Counts one more connection for `user_id`; the first one writes `is_online`.
    /// The count is taken even if the write fails.
    pub async fn set_online(&self, user_id: Uuid) -> ChatResult<()> {
        let slot = self.slot(user_id);
        let mut count = slot.lock().await;
        *count += 1;
        if *count == 1 {
            db::set_presence(&self.db_pool, user_id, true).await?;
        }
        Ok(())
    }

    /// Releases one connection; the last one writes the user offline.
    pub async fn set_offline(&self, user_id: Uuid) -> ChatResult<()> {
        let slot = self.slot(user_id);
        let mut count = slot.lock().await;
        if *count == 0 {
            return Ok(());
        }
        *count -= 1;
        if *count == 0 {
            db::set_presence(&self.db_pool, user_id, false).await?;
        }
        Ok(())
    }

    pub async fn connections(&self, user_id: Uuid) -> usize {
        match self.counts.get(&user_id).map(|slot| slot.clone()) {
            Some(slot) => *slot.lock().await,
            None => 0,
        }
    }

    pub async fn is_online(&self, user_id: Uuid) -> bool {
        self.connections(user_id).await > 0
    }
}

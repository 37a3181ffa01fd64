use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use jobhive_memory::KeyValueStore;
use jobhive_schema::UserId;

pub const ACTIVE_SESSION_KEY_PREFIX: &str = "active_session:";
const PRESENT: &str = "1";

pub fn active_session_key(user_id: &UserId) -> String {
    format!("{ACTIVE_SESSION_KEY_PREFIX}{user_id}")
}

/// Presence-only liveness marker per user.
///
/// Its absence is the only signal that a conversation has lapsed; whatever
/// context row may still exist for the user is then void.
#[derive(Clone)]
pub struct ActiveSessionToken {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl ActiveSessionToken {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub async fn is_active(&self, user_id: &UserId) -> Result<bool> {
        Ok(self.store.get(&active_session_key(user_id)).await?.is_some())
    }

    /// Sets the marker, resetting its TTL if it already exists.
    pub async fn mark_active(&self, user_id: &UserId) -> Result<()> {
        self.store
            .set(&active_session_key(user_id), PRESENT, self.ttl)
            .await
    }

    /// Refreshes the marker and reports whether it was present beforehand.
    pub async fn touch(&self, user_id: &UserId) -> Result<bool> {
        let was_active = self.is_active(user_id).await?;
        self.mark_active(user_id).await?;
        Ok(was_active)
    }

    pub async fn remaining(&self, user_id: &UserId) -> Result<Option<Duration>> {
        self.store.ttl(&active_session_key(user_id)).await
    }

    pub async fn revoke(&self, user_id: &UserId) -> Result<bool> {
        self.store.delete(&active_session_key(user_id)).await
    }
}

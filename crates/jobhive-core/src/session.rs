use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use jobhive_memory::KeyValueStore;
use jobhive_schema::UserId;

use crate::state_machine::ConversationContext;

pub const CONVERSATION_KEY_PREFIX: &str = "conversation:";

pub fn conversation_key(user_id: &UserId) -> String {
    format!("{CONVERSATION_KEY_PREFIX}{user_id}")
}

/// Reads and writes [`ConversationContext`] payloads, one key per user.
///
/// Every save resets the entry's TTL to the full session window. Writes for a
/// single user are expected to be serialized by the caller.
#[derive(Clone)]
pub struct SessionRepository {
    store: Arc<dyn KeyValueStore>,
    ttl: Duration,
}

impl SessionRepository {
    pub fn new(store: Arc<dyn KeyValueStore>, ttl: Duration) -> Self {
        Self { store, ttl }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// A payload that fails to deserialize is logged and reported as absent.
    pub async fn load(&self, user_id: &UserId) -> Result<Option<ConversationContext>> {
        let key = conversation_key(user_id);
        let Some(raw) = self.store.get(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_str::<ConversationContext>(&raw) {
            Ok(context) => Ok(Some(context)),
            Err(err) => {
                tracing::warn!(
                    user_id = %user_id,
                    error = %err,
                    "discarding corrupt conversation context"
                );
                Ok(None)
            }
        }
    }

    pub async fn save(&self, context: &ConversationContext) -> Result<()> {
        let key = conversation_key(&context.user_id);
        let raw = serde_json::to_string(context).context("failed to serialize context")?;
        self.store.set(&key, &raw, self.ttl).await
    }

    pub async fn delete(&self, user_id: &UserId) -> Result<bool> {
        self.store.delete(&conversation_key(user_id)).await
    }
}

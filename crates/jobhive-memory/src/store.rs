use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// A keyed store whose entries vanish after their TTL.
///
/// Single-key operations are atomic. Nothing here serializes a
/// read-modify-write across two calls; callers that need that must do it
/// themselves.
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    /// Returns the value if present and not expired.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Inserts or replaces the value and resets its TTL to `ttl`.
    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()>;

    /// Returns `true` if a live entry was removed.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// Remaining lifetime of a live entry.
    async fn ttl(&self, key: &str) -> Result<Option<Duration>>;

    /// Physically drops expired entries; returns how many were removed.
    async fn purge_expired(&self) -> Result<usize>;
}

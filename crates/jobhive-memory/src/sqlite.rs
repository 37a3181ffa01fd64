use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};
use tokio::task;

use crate::migrations::run_migrations;
use crate::store::KeyValueStore;

/// SQLite-backed [`KeyValueStore`]. Expiry is stored as an absolute unix
/// timestamp in milliseconds and checked on every read.
#[derive(Clone)]
pub struct SqliteStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.pragma_update(None, "journal_mode", "WAL")?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        run_migrations(&conn)?;
        Ok(Self {
            db: Arc::new(Mutex::new(conn)),
        })
    }
}

fn now_ms() -> i64 {
    Utc::now().timestamp_millis()
}

fn ttl_ms(ttl: Duration) -> i64 {
    i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX)
}

#[async_trait]
impl KeyValueStore for SqliteStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let value = conn
                .query_row(
                    r#"
                    SELECT value
                    FROM kv_entries
                    WHERE key = ?1 AND expires_at_ms > ?2
                    LIMIT 1
                    "#,
                    params![key, now_ms()],
                    |row| row.get::<_, String>(0),
                )
                .optional()?;
            Ok::<Option<String>, anyhow::Error>(value)
        })
        .await?
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> Result<()> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        let value = value.to_owned();
        task::spawn_blocking(move || {
            let now = Utc::now();
            let expires_at_ms = now.timestamp_millis().saturating_add(ttl_ms(ttl));
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            conn.execute(
                r#"
                INSERT INTO kv_entries (key, value, expires_at_ms, updated_at)
                VALUES (?1, ?2, ?3, ?4)
                ON CONFLICT(key) DO UPDATE SET
                    value = excluded.value,
                    expires_at_ms = excluded.expires_at_ms,
                    updated_at = excluded.updated_at
                "#,
                params![key, value, expires_at_ms, now.to_rfc3339()],
            )?;
            Ok::<(), anyhow::Error>(())
        })
        .await??;

        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|e| anyhow!("failed to lock sqlite connection: {e}"))?;
            let deleted = conn.execute(
                "DELETE FROM kv_entries WHERE key = ?1 AND expires_at_ms > ?2",
                params![key, now_ms()],
            )?;
            // An expired row is gone logically; drop it physically too.
            conn.execute("DELETE FROM kv_entries WHERE key = ?1", params![key])?;
            Ok::<bool, anyhow::Error>(deleted > 0)
        })
        .await?
    }

    async fn ttl(&self, key: &str) -> Result<Option<Duration>> {
        let db = Arc::clone(&self.db);
        let key = key.to_owned();
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let expires_at_ms = conn
                .query_row(
                    "SELECT expires_at_ms FROM kv_entries WHERE key = ?1 LIMIT 1",
                    params![key],
                    |row| row.get::<_, i64>(0),
                )
                .optional()?;
            let remaining = expires_at_ms
                .map(|at| at - now_ms())
                .filter(|ms| *ms > 0)
                .map(|ms| Duration::from_millis(ms as u64));
            Ok::<Option<Duration>, anyhow::Error>(remaining)
        })
        .await?
    }

    async fn purge_expired(&self) -> Result<usize> {
        let db = Arc::clone(&self.db);
        task::spawn_blocking(move || {
            let conn = db
                .lock()
                .map_err(|_| anyhow!("failed to lock sqlite connection"))?;
            let purged = conn.execute(
                "DELETE FROM kv_entries WHERE expires_at_ms <= ?1",
                params![now_ms()],
            )?;
            Ok::<usize, anyhow::Error>(purged)
        })
        .await?
    }
}

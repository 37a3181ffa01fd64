//! Expiring key/value storage for conversation state.
//!
//! Everything the orchestration layer persists goes through [`KeyValueStore`],
//! so the backend can be swapped (SQLite on disk, in-memory for tests and the
//! REPL) without touching the callers.

pub mod in_memory;
pub mod migrations;
pub mod sqlite;
pub mod store;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;
pub use store::KeyValueStore;

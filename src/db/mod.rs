//! Conversation persistence
//!
//! Turns are stored append-only and read back newest first. Three backends
//! implement [`ConversationStore`]: `PostgreSQL` (the configured database),
//! `SQLite` (local file or in-memory) and a detached store used when no
//! database is configured.

mod detached;
mod postgres;
mod schema;
mod sqlite;

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;

pub use detached::DetachedStore;
pub use postgres::{PgParams, PostgresStore};
pub use schema::SCHEMA_VERSION;
pub use sqlite::SqliteStore;

use crate::{Error, Result};

/// One persisted user/assistant exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationTurn {
    pub user_message: String,
    pub assistant_response: String,
    pub timestamp: DateTime<Utc>,
}

/// Append-only store of conversation turns
#[async_trait(?Send)]
pub trait ConversationStore {
    /// Append a turn stamped with the current time
    ///
    /// # Errors
    ///
    /// Returns `Error::PersistenceUnavailable` if there is no connection or
    /// the write fails
    async fn record_turn(&mut self, user_message: &str, assistant_response: &str) -> Result<()>;

    /// The most recent `limit` turns, newest first
    ///
    /// Never fails: an unavailable store yields an empty history.
    async fn recent_turns(&mut self, limit: usize) -> Vec<ConversationTurn>;

    /// Release the connection; later calls behave as if detached
    async fn close(&mut self);

    /// Short backend name for logs
    fn backend(&self) -> &'static str;
}

/// `SQLite` connection pool
pub type DbPool = Pool<SqliteConnectionManager>;

/// Open (and migrate) a `SQLite` database file
///
/// # Errors
///
/// Returns error if database cannot be opened or initialized
pub fn init<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path);
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    tracing::info!(version = SCHEMA_VERSION, "database initialized");
    Ok(pool)
}

/// Initialize an in-memory database (for testing)
///
/// # Errors
///
/// Returns error if database cannot be initialized
pub fn init_memory() -> Result<DbPool> {
    let manager = SqliteConnectionManager::memory();
    let pool = Pool::builder()
        .max_size(1)
        .build(manager)
        .map_err(|e| Error::Database(e.to_string()))?;

    let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;
    schema::init(&conn)?;

    Ok(pool)
}

/// Where conversation turns should be persisted
#[derive(Debug)]
pub enum StoreTarget {
    /// `PostgreSQL` server from the `PG*` environment
    Postgres(PgParams),
    /// Local `SQLite` file
    Sqlite(std::path::PathBuf),
    /// No persistence
    Detached,
}

/// Open the configured store, degrading to [`DetachedStore`] when the
/// database cannot be reached
pub async fn open_store(target: &StoreTarget) -> Box<dyn ConversationStore> {
    match target {
        StoreTarget::Postgres(params) => match PostgresStore::connect(params).await {
            Ok(store) => Box::new(store),
            Err(e) => {
                tracing::warn!(error = %e, host = %params.host, "postgres unavailable, conversations will not be stored");
                Box::new(DetachedStore)
            }
        },
        StoreTarget::Sqlite(path) => match init(path) {
            Ok(pool) => {
                tracing::info!(path = %path.display(), "using sqlite conversation store");
                Box::new(SqliteStore::new(pool))
            }
            Err(e) => {
                tracing::warn!(error = %e, path = %path.display(), "sqlite unavailable, conversations will not be stored");
                Box::new(DetachedStore)
            }
        },
        StoreTarget::Detached => {
            tracing::info!("no database configured, conversations will not be stored");
            Box::new(DetachedStore)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_init_memory() {
        let pool = init_memory().unwrap();
        let _conn = pool.get().unwrap();
    }

    #[test]
    fn test_init_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("turns.db");
        let pool = init(&path).unwrap();
        drop(pool);

        // Reopening an existing file must not re-run migrations destructively
        let pool = init(&path).unwrap();
        let _conn = pool.get().unwrap();
    }

    #[tokio::test]
    async fn test_open_detached_store() {
        let mut store = open_store(&StoreTarget::Detached).await;
        assert_eq!(store.backend(), "detached");
        assert!(store.recent_turns(10).await.is_empty());
    }
}

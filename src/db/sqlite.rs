//! `SQLite` conversation store

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};

use super::{ConversationStore, ConversationTurn, DbPool};
use crate::{Error, Result};

/// Conversation store backed by a pooled `SQLite` database
pub struct SqliteStore {
    pool: Option<DbPool>,
}

impl SqliteStore {
    /// Create a store over an initialized pool
    #[must_use]
    pub const fn new(pool: DbPool) -> Self {
        Self { pool: Some(pool) }
    }

    fn insert(&self, user_message: &str, assistant_response: &str) -> Result<()> {
        let conn = self
            .pool
            .as_ref()
            .ok_or_else(|| Error::PersistenceUnavailable("store closed".to_string()))?
            .get()
            .map_err(|e| Error::Database(e.to_string()))?;

        let now = Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true);
        conn.execute(
            "INSERT INTO conversations (user_message, assistant_response, timestamp)
             VALUES (?1, ?2, ?3)",
            rusqlite::params![user_message, assistant_response, now],
        )?;

        Ok(())
    }

    fn select_recent(&self, limit: usize) -> Result<Vec<ConversationTurn>> {
        let Some(pool) = self.pool.as_ref() else {
            return Ok(Vec::new());
        };
        let conn = pool.get().map_err(|e| Error::Database(e.to_string()))?;

        let mut stmt = conn.prepare(
            "SELECT user_message, assistant_response, timestamp
             FROM conversations ORDER BY timestamp DESC, id DESC LIMIT ?1",
        )?;

        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let turns = stmt
            .query_map([limit], |row| {
                Ok(ConversationTurn {
                    user_message: row.get(0)?,
                    assistant_response: row.get(1)?,
                    timestamp: parse_datetime(&row.get::<_, String>(2)?),
                })
            })?
            .filter_map(std::result::Result::ok)
            .collect();

        Ok(turns)
    }
}

#[async_trait(?Send)]
impl ConversationStore for SqliteStore {
    async fn record_turn(&mut self, user_message: &str, assistant_response: &str) -> Result<()> {
        self.insert(user_message, assistant_response)
            .map_err(|e| match e {
                Error::PersistenceUnavailable(_) => e,
                other => Error::PersistenceUnavailable(other.to_string()),
            })
    }

    async fn recent_turns(&mut self, limit: usize) -> Vec<ConversationTurn> {
        self.select_recent(limit).unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load conversation history");
            Vec::new()
        })
    }

    async fn close(&mut self) {
        if self.pool.take().is_some() {
            tracing::debug!("sqlite store closed");
        }
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s).map_or_else(|_| Utc::now(), |dt| dt.with_timezone(&Utc))
}

//! `PostgreSQL` conversation store

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use tokio::task::JoinHandle;
use tokio_postgres::{Client, NoTls};

use super::schema::POSTGRES_SCHEMA;
use super::{ConversationStore, ConversationTurn};
use crate::{Error, Result};

/// Default `PostgreSQL` port
const DEFAULT_PORT: u16 = 5432;

/// Connection parameters read from the standard `PG*` environment variables
#[derive(Debug)]
pub struct PgParams {
    pub host: String,
    pub port: u16,
    pub dbname: String,
    pub user: String,
    pub password: SecretString,
}

impl PgParams {
    /// Read parameters through `lookup`
    ///
    /// Returns `None` when any of `PGHOST`, `PGDATABASE`, `PGUSER` or
    /// `PGPASSWORD` is missing or blank. `PGPORT` defaults to 5432.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Option<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PGPORT") {
            Some(raw) => match raw.trim().parse() {
                Ok(port) => port,
                Err(_) => {
                    tracing::warn!(value = %raw, "invalid PGPORT, using default");
                    DEFAULT_PORT
                }
            },
            None => DEFAULT_PORT,
        };

        Some(Self {
            host: get("PGHOST")?,
            port,
            dbname: get("PGDATABASE")?,
            user: get("PGUSER")?,
            password: SecretString::from(get("PGPASSWORD")?),
        })
    }

    fn pg_config(&self) -> tokio_postgres::Config {
        let mut config = tokio_postgres::Config::new();
        config
            .host(&self.host)
            .port(self.port)
            .dbname(&self.dbname)
            .user(&self.user)
            .password(self.password.expose_secret())
            .application_name("caring-voice");
        config
    }
}

/// Conversation store backed by one `PostgreSQL` connection held for the session
pub struct PostgresStore {
    client: Option<Client>,
    connection: Option<JoinHandle<()>>,
}

impl PostgresStore {
    /// Connect and ensure the `conversations` table exists
    ///
    /// # Errors
    ///
    /// Returns error if the server is unreachable or rejects the schema
    pub async fn connect(params: &PgParams) -> Result<Self> {
        let (client, connection) = params.pg_config().connect(NoTls).await?;

        let connection = tokio::spawn(async move {
            if let Err(e) = connection.await {
                tracing::warn!(error = %e, "postgres connection closed with error");
            }
        });

        client.batch_execute(POSTGRES_SCHEMA).await?;

        tracing::info!(
            host = %params.host,
            port = params.port,
            dbname = %params.dbname,
            "connected to postgres conversation store"
        );

        Ok(Self {
            client: Some(client),
            connection: Some(connection),
        })
    }

    fn client(&self) -> Result<&Client> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::PersistenceUnavailable("store closed".to_string()))
    }

    async fn select_recent(&self, limit: usize) -> Result<Vec<ConversationTurn>> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = self
            .client()?
            .query(
                r#"SELECT user_message, assistant_response, "timestamp"::timestamptz
                   FROM conversations ORDER BY "timestamp" DESC LIMIT $1"#,
                &[&limit],
            )
            .await?;

        rows.iter()
            .map(|row| -> Result<ConversationTurn> {
                Ok(ConversationTurn {
                    user_message: row.try_get(0)?,
                    assistant_response: row.try_get(1)?,
                    timestamp: row.try_get::<_, DateTime<Utc>>(2)?,
                })
            })
            .collect()
    }
}

#[async_trait(?Send)]
impl ConversationStore for PostgresStore {
    async fn record_turn(&mut self, user_message: &str, assistant_response: &str) -> Result<()> {
        self.client()?
            .execute(
                "INSERT INTO conversations (user_message, assistant_response) VALUES ($1, $2)",
                &[&user_message, &assistant_response],
            )
            .await
            .map_err(|e| Error::PersistenceUnavailable(e.to_string()))?;
        Ok(())
    }

    async fn recent_turns(&mut self, limit: usize) -> Vec<ConversationTurn> {
        self.select_recent(limit).await.unwrap_or_else(|e| {
            tracing::warn!(error = %e, "failed to load conversation history");
            Vec::new()
        })
    }

    async fn close(&mut self) {
        // Dropping the client ends the connection task
        if self.client.take().is_some() {
            if let Some(connection) = self.connection.take() {
                let _ = connection.await;
            }
            tracing::debug!("postgres store closed");
        }
    }

    fn backend(&self) -> &'static str {
        "postgres"
    }
}

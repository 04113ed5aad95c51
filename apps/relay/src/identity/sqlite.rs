//! SQLite-backed bindings
//!
//! `subdomain` is the primary key and `client_id` is unique, so a racing insert for
//! either side is rejected by the database; the read-back afterwards tells the caller
//! which side it lost on.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tracing::debug;
use tunnel_relay_common::current_timestamp_secs;

use super::{BindOutcome, BindingStore, StoreError};

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS tunnels (
    subdomain TEXT PRIMARY KEY,
    client_id TEXT NOT NULL UNIQUE,
    created_at INTEGER NOT NULL
)";

#[derive(Debug, Clone)]
pub struct SqliteBindingStore {
    pool: SqlitePool,
}

impl SqliteBindingStore {
    /// Open (creating if needed) the database file at `path`
    pub async fn open(path: &Path) -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        debug!("Opened binding database at {}", path.display());
        Self::with_pool(pool).await
    }

    /// A private in-memory database; a single connection keeps it alive and shared
    pub async fn in_memory() -> Result<Self, StoreError> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;
        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self, StoreError> {
        sqlx::query(SCHEMA).execute(&pool).await?;
        Ok(Self { pool })
    }

    async fn owner_of(&self, subdomain: &str) -> Result<Option<String>, StoreError> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT client_id FROM tunnels WHERE subdomain = ?1")
                .bind(subdomain)
                .fetch_optional(&self.pool)
                .await?,
        )
    }
}

#[async_trait]
impl BindingStore for SqliteBindingStore {
    async fn get_subdomain(&self, client_id: &str) -> Result<Option<String>, StoreError> {
        Ok(
            sqlx::query_scalar::<_, String>("SELECT subdomain FROM tunnels WHERE client_id = ?1")
                .bind(client_id)
                .fetch_optional(&self.pool)
                .await?,
        )
    }

    async fn bind_subdomain(
        &self,
        subdomain: &str,
        client_id: &str,
    ) -> Result<BindOutcome, StoreError> {
        let inserted = sqlx::query(
            "INSERT INTO tunnels (subdomain, client_id, created_at) VALUES (?1, ?2, ?3)
             ON CONFLICT DO NOTHING",
        )
        .bind(subdomain)
        .bind(client_id)
        .bind(current_timestamp_secs())
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted == 1 {
            return Ok(BindOutcome::Bound);
        }

        match self.owner_of(subdomain).await? {
            Some(owner) if owner == client_id => Ok(BindOutcome::AlreadyBound),
            Some(owner) => Ok(BindOutcome::SubdomainTaken { owner }),
            None => match self.get_subdomain(client_id).await? {
                Some(subdomain) => Ok(BindOutcome::ClientBound { subdomain }),
                None => Err(StoreError::Inconsistent(format!(
                    "insert of {} ignored but no conflicting row found",
                    subdomain
                ))),
            },
        }
    }
}

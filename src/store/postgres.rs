use super::KeyValueStore;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use chrono::Utc;
use sqlx::postgres::PgPool;
use sqlx::Row;
use std::time::Duration;
use tracing::{debug, info};

/// Store backed by the `kv_store` table, sharing the ledger's pool
pub struct PgKeyValueStore {
    pool: PgPool,
}

impl PgKeyValueStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_store (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL,
                expires_at TIMESTAMPTZ,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Key-value store migrations complete");
        Ok(())
    }

    /// Drop expired entries. Returns how many were removed.
    pub async fn purge_expired(&self) -> OrchestratorResult<u64> {
        let result = sqlx::query("DELETE FROM kv_store WHERE expires_at <= NOW()")
            .execute(&self.pool)
            .await?;
        debug!("Purged {} expired store entries", result.rows_affected());
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl KeyValueStore for PgKeyValueStore {
    async fn get(&self, key: &str) -> OrchestratorResult<Option<String>> {
        let row = sqlx::query(
            "SELECT value FROM kv_store \
             WHERE key = $1 AND (expires_at IS NULL OR expires_at > NOW())",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| r.try_get::<String, _>("value")).transpose()?)
    }

    async fn set(&self, key: &str, value: &str, ttl: Option<Duration>) -> OrchestratorResult<()> {
        let expires_at = ttl
            .map(|ttl| {
                chrono::Duration::from_std(ttl)
                    .map(|d| Utc::now() + d)
                    .map_err(|e| OrchestratorError::Store(format!("invalid ttl: {}", e)))
            })
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO kv_store (key, value, expires_at, updated_at)
            VALUES ($1, $2, $3, NOW())
            ON CONFLICT (key)
            DO UPDATE SET value = $2, expires_at = $3, updated_at = NOW()
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn delete(&self, key: &str) -> OrchestratorResult<()> {
        sqlx::query("DELETE FROM kv_store WHERE key = $1")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

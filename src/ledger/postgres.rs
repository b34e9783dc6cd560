//! PostgreSQL ledger

use super::{
    Ledger, LedgerStats, NewTransaction, OperationType, Settlement, Transaction,
    TransactionStatus,
};
use crate::config::DatabaseConfig;
use crate::error::{OrchestratorError, OrchestratorResult};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use tracing::{debug, info};
use uuid::Uuid;

const COLUMNS: &str = "id, user_id, destination_wallet, amount_in, commission_amount, amount_out, \
     operation_type, status, external_ref, source_transaction_id, settlement_tx_hash, failure_reason, \
     created_at, settled_at";

/// Ledger backed by the `transactions` table
pub struct PgLedger {
    pool: PgPool,
}

impl PgLedger {
    /// Connect a new pool
    pub async fn connect(config: &DatabaseConfig) -> OrchestratorResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .connect(&config.url)
            .await?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> PgPool {
        self.pool.clone()
    }

    /// Run database migrations
    pub async fn run_migrations(&self) -> OrchestratorResult<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS transactions (
                id UUID PRIMARY KEY,
                user_id TEXT NOT NULL,
                destination_wallet TEXT NOT NULL,
                amount_in NUMERIC NOT NULL,
                commission_amount NUMERIC NOT NULL,
                amount_out NUMERIC,
                operation_type VARCHAR(10) NOT NULL,
                status VARCHAR(20) NOT NULL,
                external_ref TEXT,
                source_transaction_id UUID,
                settlement_tx_hash TEXT,
                failure_reason VARCHAR(32),
                created_at TIMESTAMPTZ NOT NULL DEFAULT NOW(),
                settled_at TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "ALTER TABLE transactions ADD COLUMN IF NOT EXISTS source_transaction_id UUID",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_source
            ON transactions (source_transaction_id)
            WHERE source_transaction_id IS NOT NULL
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_status_op
            ON transactions (status, operation_type)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_user_id
            ON transactions (user_id, created_at DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_transactions_external_ref
            ON transactions (external_ref)
            "#,
        )
        .execute(&self.pool)
        .await?;

        info!("Ledger migrations complete");
        Ok(())
    }
}

fn row_to_transaction(row: &PgRow) -> OrchestratorResult<Transaction> {
    let operation_type: String = row.try_get("operation_type")?;
    let status: String = row.try_get("status")?;

    Ok(Transaction {
        id: row.try_get::<Uuid, _>("id")?,
        user_id: row.try_get("user_id")?,
        destination_wallet: row.try_get("destination_wallet")?,
        amount_in: row.try_get::<Decimal, _>("amount_in")?,
        commission_amount: row.try_get::<Decimal, _>("commission_amount")?,
        amount_out: row.try_get::<Option<Decimal>, _>("amount_out")?,
        operation_type: operation_type
            .parse::<OperationType>()
            .map_err(OrchestratorError::Internal)?,
        status: status
            .parse::<TransactionStatus>()
            .map_err(OrchestratorError::Internal)?,
        external_ref: row.try_get("external_ref")?,
        source_transaction_id: row.try_get::<Option<Uuid>, _>("source_transaction_id")?,
        settlement_tx_hash: row.try_get("settlement_tx_hash")?,
        failure_reason: row.try_get("failure_reason")?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        settled_at: row.try_get::<Option<DateTime<Utc>>, _>("settled_at")?,
    })
}

fn rows_to_transactions(rows: Vec<PgRow>) -> OrchestratorResult<Vec<Transaction>> {
    rows.iter().map(row_to_transaction).collect()
}

#[async_trait]
impl Ledger for PgLedger {
    async fn insert(&self, tx: NewTransaction) -> OrchestratorResult<Transaction> {
        let id = Uuid::new_v4();
        let settled = tx.status.is_terminal();

        let row = sqlx::query(&format!(
            r#"
            INSERT INTO transactions
                (id, user_id, destination_wallet, amount_in, commission_amount, amount_out,
                 operation_type, status, external_ref, source_transaction_id,
                 settlement_tx_hash, settled_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, CASE WHEN $12 THEN NOW() END)
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(&tx.user_id)
        .bind(&tx.destination_wallet)
        .bind(tx.amount_in)
        .bind(tx.commission_amount)
        .bind(tx.amount_out)
        .bind(tx.operation_type.as_str())
        .bind(tx.status.as_str())
        .bind(&tx.external_ref)
        .bind(tx.source_transaction_id)
        .bind(&tx.settlement_tx_hash)
        .bind(settled)
        .fetch_one(&self.pool)
        .await?;

        let stored = row_to_transaction(&row)?;
        debug!(
            "Inserted {} transaction {} for user {} as {}",
            stored.operation_type.as_str(),
            stored.id,
            stored.user_id,
            stored.status
        );
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> OrchestratorResult<Option<Transaction>> {
        let row = sqlx::query(&format!("SELECT {COLUMNS} FROM transactions WHERE id = $1"))
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> OrchestratorResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE external_ref = $1 \
             ORDER BY created_at DESC LIMIT 1"
        ))
        .bind(external_ref)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn pending_bridges(&self) -> OrchestratorResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE status = 'pending' AND operation_type = 'bridge' \
             ORDER BY created_at"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows_to_transactions(rows)
    }

    async fn pending_bridges_for_user(
        &self,
        user_id: &str,
    ) -> OrchestratorResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE status = 'pending' AND operation_type = 'bridge' AND user_id = $1 \
             ORDER BY created_at"
        ))
        .bind(user_id)
        .fetch_all(&self.pool)
        .await?;

        rows_to_transactions(rows)
    }

    async fn latest_completed_bridge(
        &self,
        user_id: &str,
    ) -> OrchestratorResult<Option<Transaction>> {
        let row = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transactions \
             WHERE status = 'bridge_completed' AND user_id = $1 \
             ORDER BY settled_at DESC NULLS LAST, created_at DESC LIMIT 1"
        ))
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_transaction).transpose()
    }

    async fn swapped_from(&self, bridge_id: Uuid) -> OrchestratorResult<Decimal> {
        let row = sqlx::query(
            r#"
            SELECT COALESCE(SUM(amount_in), 0) as swapped
            FROM transactions
            WHERE operation_type = 'swap' AND source_transaction_id = $1
            "#,
        )
        .bind(bridge_id)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.try_get::<Decimal, _>("swapped")?)
    }

    async fn transactions_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> OrchestratorResult<Vec<Transaction>> {
        let rows = sqlx::query(&format!(
            "SELECT {COLUMNS} FROM transactions WHERE user_id = $1 \
             ORDER BY created_at DESC LIMIT $2"
        ))
        .bind(user_id)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows_to_transactions(rows)
    }

    async fn settle(
        &self,
        id: Uuid,
        settlement: Settlement,
    ) -> OrchestratorResult<Option<Transaction>> {
        let status = settlement.status();
        let (amount_out, tx_hash, reason) = match &settlement {
            Settlement::Completed {
                amount_out,
                settlement_tx_hash,
            } => (Some(*amount_out), settlement_tx_hash.clone(), None),
            Settlement::Failed { reason } => (None, None, Some(reason.as_str())),
        };

        // The status predicate is the claim: only one caller can match it.
        let row = sqlx::query(&format!(
            r#"
            UPDATE transactions
            SET status = $2, amount_out = $3, settlement_tx_hash = $4,
                failure_reason = $5, settled_at = NOW()
            WHERE id = $1 AND status = 'pending'
            RETURNING {COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status.as_str())
        .bind(amount_out)
        .bind(tx_hash)
        .bind(reason)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => {
                debug!("Settled transaction {} as {}", id, status);
                Ok(Some(row_to_transaction(&row)?))
            }
            None => {
                debug!("Transaction {} was not pending, claim skipped", id);
                Ok(None)
            }
        }
    }

    async fn stats(&self) -> OrchestratorResult<LedgerStats> {
        let row = sqlx::query(
            r#"
            SELECT
                COUNT(*) FILTER (WHERE status = 'pending') as pending,
                COUNT(*) FILTER (WHERE status = 'bridge_completed') as bridge_completed,
                COUNT(*) FILTER (WHERE status = 'failed_bridge') as failed_bridge,
                COUNT(*) FILTER (WHERE status = 'swap_completed') as swap_completed
            FROM transactions
            "#,
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(LedgerStats {
            pending: row.try_get::<i64, _>("pending")? as u64,
            bridge_completed: row.try_get::<i64, _>("bridge_completed")? as u64,
            failed_bridge: row.try_get::<i64, _>("failed_bridge")? as u64,
            swap_completed: row.try_get::<i64, _>("swap_completed")? as u64,
        })
    }

    async fn health_check(&self) -> OrchestratorResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}

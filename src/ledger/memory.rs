//! In-process ledger with the same claim semantics as the PostgreSQL one.
//! Used for local runs without a database and throughout the tests.

use super::{
    Ledger, LedgerStats, NewTransaction, OperationType, Settlement, Transaction,
    TransactionStatus,
};
use crate::error::OrchestratorResult;

use async_trait::async_trait;
use chrono::Utc;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
pub struct MemoryLedger {
    rows: RwLock<HashMap<Uuid, Transaction>>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move a row's creation time, for exercising the abandonment timeout
    #[cfg(test)]
    pub async fn backdate(&self, id: Uuid, created_at: chrono::DateTime<Utc>) {
        if let Some(tx) = self.rows.write().await.get_mut(&id) {
            tx.created_at = created_at;
        }
    }

    async fn select<F>(&self, filter: F) -> Vec<Transaction>
    where
        F: Fn(&Transaction) -> bool,
    {
        let mut rows: Vec<Transaction> = self
            .rows
            .read()
            .await
            .values()
            .filter(|tx| filter(tx))
            .cloned()
            .collect();
        rows.sort_by_key(|tx| tx.created_at);
        rows
    }
}

fn is_pending_bridge(tx: &Transaction) -> bool {
    tx.status == TransactionStatus::Pending && tx.operation_type == OperationType::Bridge
}

#[async_trait]
impl Ledger for MemoryLedger {
    async fn insert(&self, tx: NewTransaction) -> OrchestratorResult<Transaction> {
        let stored = tx.into_transaction(Uuid::new_v4(), Utc::now());
        self.rows.write().await.insert(stored.id, stored.clone());
        Ok(stored)
    }

    async fn get(&self, id: Uuid) -> OrchestratorResult<Option<Transaction>> {
        Ok(self.rows.read().await.get(&id).cloned())
    }

    async fn find_by_external_ref(
        &self,
        external_ref: &str,
    ) -> OrchestratorResult<Option<Transaction>> {
        Ok(self
            .select(|tx| tx.external_ref.as_deref() == Some(external_ref))
            .await
            .pop())
    }

    async fn pending_bridges(&self) -> OrchestratorResult<Vec<Transaction>> {
        Ok(self.select(is_pending_bridge).await)
    }

    async fn pending_bridges_for_user(
        &self,
        user_id: &str,
    ) -> OrchestratorResult<Vec<Transaction>> {
        Ok(self
            .select(|tx| is_pending_bridge(tx) && tx.user_id == user_id)
            .await)
    }

    async fn latest_completed_bridge(
        &self,
        user_id: &str,
    ) -> OrchestratorResult<Option<Transaction>> {
        let mut rows = self
            .select(|tx| {
                tx.status == TransactionStatus::BridgeCompleted && tx.user_id == user_id
            })
            .await;
        rows.sort_by_key(|tx| (tx.settled_at, tx.created_at));
        Ok(rows.pop())
    }

    async fn swapped_from(&self, bridge_id: Uuid) -> OrchestratorResult<Decimal> {
        Ok(self
            .rows
            .read()
            .await
            .values()
            .filter(|tx| {
                tx.operation_type == OperationType::Swap
                    && tx.source_transaction_id == Some(bridge_id)
            })
            .map(|tx| tx.amount_in)
            .sum())
    }

    async fn transactions_for_user(
        &self,
        user_id: &str,
        limit: u32,
    ) -> OrchestratorResult<Vec<Transaction>> {
        let mut rows = self.select(|tx| tx.user_id == user_id).await;
        rows.reverse();
        rows.truncate(limit as usize);
        Ok(rows)
    }

    async fn settle(
        &self,
        id: Uuid,
        settlement: Settlement,
    ) -> OrchestratorResult<Option<Transaction>> {
        // Check and write under one lock
        let mut rows = self.rows.write().await;
        let Some(tx) = rows.get_mut(&id) else {
            return Ok(None);
        };
        if tx.status != TransactionStatus::Pending {
            return Ok(None);
        }

        tx.status = settlement.status();
        match settlement {
            Settlement::Completed {
                amount_out,
                settlement_tx_hash,
            } => {
                tx.amount_out = Some(amount_out);
                tx.settlement_tx_hash = settlement_tx_hash;
            }
            Settlement::Failed { reason } => {
                tx.failure_reason = Some(reason.as_str().to_string());
            }
        }
        tx.settled_at = Some(Utc::now());
        Ok(Some(tx.clone()))
    }

    async fn stats(&self) -> OrchestratorResult<LedgerStats> {
        let rows = self.rows.read().await;
        let mut stats = LedgerStats::default();
        for tx in rows.values() {
            match tx.status {
                TransactionStatus::Pending => stats.pending += 1,
                TransactionStatus::BridgeCompleted => stats.bridge_completed += 1,
                TransactionStatus::FailedBridge => stats.failed_bridge += 1,
                TransactionStatus::SwapCompleted => stats.swap_completed += 1,
            }
        }
        Ok(stats)
    }

    async fn health_check(&self) -> OrchestratorResult<()> {
        Ok(())
    }
}

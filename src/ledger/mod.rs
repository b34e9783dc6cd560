//! Transaction ledger
//!
//! The single source of truth for settlement state, shared by every
//! conversation and by the reconciliation loop. Handles:
//! - Row creation (pending bridges, completed swaps)
//! - The conditional claim that moves a row out of `pending` exactly once
//! - Lookups for reconciliation, swaps and per-user status

mod memory;
mod model;
mod postgres;

pub use memory::MemoryLedger;
pub use model::{
    FailureReason, LedgerStats, NewTransaction, OperationType, Settlement, Transaction,
    TransactionStatus,
};
pub use postgres::PgLedger;

use crate::error::OrchestratorResult;

use async_trait::async_trait;
use rust_decimal::Decimal;
use uuid::Uuid;

#[async_trait]
pub trait Ledger: Send + Sync {
    /// Insert a new row, assigning `id` and `created_at`
    async fn insert(&self, tx: NewTransaction) -> OrchestratorResult<Transaction>;

    async fn get(&self, id: Uuid) -> OrchestratorResult<Option<Transaction>>;

    async fn find_by_external_ref(&self, external_ref: &str)
        -> OrchestratorResult<Option<Transaction>>;

    /// All bridge rows still in `pending`, oldest first
    async fn pending_bridges(&self) -> OrchestratorResult<Vec<Transaction>>;

    async fn pending_bridges_for_user(&self, user_id: &str)
        -> OrchestratorResult<Vec<Transaction>>;

    /// Most recent `bridge_completed` row for the user
    async fn latest_completed_bridge(&self, user_id: &str)
        -> OrchestratorResult<Option<Transaction>>;

    /// Gross amount already swapped out of the given bridge
    async fn swapped_from(&self, bridge_id: Uuid) -> OrchestratorResult<Decimal>;

    async fn transactions_for_user(&self, user_id: &str, limit: u32)
        -> OrchestratorResult<Vec<Transaction>>;

    /// Move a row out of `pending`.
    ///
    /// Returns the updated row only when this call performed the
    /// transition; `None` means the row was already terminal (or absent)
    /// and nothing changed.
    async fn settle(&self, id: Uuid, settlement: Settlement)
        -> OrchestratorResult<Option<Transaction>>;

    async fn stats(&self) -> OrchestratorResult<LedgerStats>;

    async fn health_check(&self) -> OrchestratorResult<()>;
}

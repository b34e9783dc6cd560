//! Ledger row types

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Bridge,
    Swap,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Bridge => "bridge",
            OperationType::Swap => "swap",
        }
    }
}

impl FromStr for OperationType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "bridge" => Ok(OperationType::Bridge),
            "swap" => Ok(OperationType::Swap),
            other => Err(format!("unknown operation type {:?}", other)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    BridgeCompleted,
    FailedBridge,
    SwapCompleted,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::BridgeCompleted => "bridge_completed",
            TransactionStatus::FailedBridge => "failed_bridge",
            TransactionStatus::SwapCompleted => "swap_completed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, TransactionStatus::Pending)
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TransactionStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TransactionStatus::Pending),
            "bridge_completed" => Ok(TransactionStatus::BridgeCompleted),
            "failed_bridge" => Ok(TransactionStatus::FailedBridge),
            "swap_completed" => Ok(TransactionStatus::SwapCompleted),
            other => Err(format!("unknown transaction status {:?}", other)),
        }
    }
}

/// Why a bridge ended in `failed_bridge`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureReason {
    /// Pending past the abandonment threshold
    TimedOut,
    ProviderFailed,
    ProviderStuck,
    WalletTimeout,
    WalletRejected,
}

impl FailureReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureReason::TimedOut => "timed_out",
            FailureReason::ProviderFailed => "provider_failed",
            FailureReason::ProviderStuck => "provider_stuck",
            FailureReason::WalletTimeout => "wallet_timeout",
            FailureReason::WalletRejected => "wallet_rejected",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One bridge or swap operation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transaction {
    pub id: Uuid,
    pub user_id: String,
    pub destination_wallet: String,
    pub amount_in: Decimal,
    pub commission_amount: Decimal,
    pub amount_out: Option<Decimal>,
    pub operation_type: OperationType,
    pub status: TransactionStatus,
    pub external_ref: Option<String>,
    /// For swaps, the bridge whose proceeds were swapped
    pub source_transaction_id: Option<Uuid>,
    pub settlement_tx_hash: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

/// Row to insert. `id` and `created_at` are assigned by the ledger.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub user_id: String,
    pub destination_wallet: String,
    pub amount_in: Decimal,
    pub commission_amount: Decimal,
    pub amount_out: Option<Decimal>,
    pub operation_type: OperationType,
    pub status: TransactionStatus,
    pub external_ref: Option<String>,
    pub source_transaction_id: Option<Uuid>,
    pub settlement_tx_hash: Option<String>,
}

impl NewTransaction {
    /// A bridge awaiting settlement, already tied to its provider quote
    pub fn pending_bridge(
        user_id: impl Into<String>,
        destination_wallet: impl Into<String>,
        amount_in: Decimal,
        external_ref: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            destination_wallet: destination_wallet.into(),
            amount_in,
            commission_amount: Decimal::ZERO,
            amount_out: None,
            operation_type: OperationType::Bridge,
            status: TransactionStatus::Pending,
            external_ref: Some(external_ref.into()),
            source_transaction_id: None,
            settlement_tx_hash: None,
        }
    }

    /// A swap that has already settled, paid from bridge `source_transaction_id`
    pub fn completed_swap(
        user_id: impl Into<String>,
        source_transaction_id: Uuid,
        destination_wallet: impl Into<String>,
        amount_in: Decimal,
        commission_amount: Decimal,
        amount_out: Decimal,
        settlement_tx_hash: impl Into<String>,
    ) -> Self {
        Self {
            user_id: user_id.into(),
            destination_wallet: destination_wallet.into(),
            amount_in,
            commission_amount,
            amount_out: Some(amount_out),
            operation_type: OperationType::Swap,
            status: TransactionStatus::SwapCompleted,
            external_ref: None,
            source_transaction_id: Some(source_transaction_id),
            settlement_tx_hash: Some(settlement_tx_hash.into()),
        }
    }

    pub(crate) fn into_transaction(self, id: Uuid, created_at: DateTime<Utc>) -> Transaction {
        let settled_at = self.status.is_terminal().then_some(created_at);
        Transaction {
            id,
            user_id: self.user_id,
            destination_wallet: self.destination_wallet,
            amount_in: self.amount_in,
            commission_amount: self.commission_amount,
            amount_out: self.amount_out,
            operation_type: self.operation_type,
            status: self.status,
            external_ref: self.external_ref,
            source_transaction_id: self.source_transaction_id,
            settlement_tx_hash: self.settlement_tx_hash,
            failure_reason: None,
            created_at,
            settled_at,
        }
    }
}

/// Terminal transition for a pending bridge
#[derive(Debug, Clone, PartialEq)]
pub enum Settlement {
    Completed {
        amount_out: Decimal,
        settlement_tx_hash: Option<String>,
    },
    Failed {
        reason: FailureReason,
    },
}

impl Settlement {
    pub fn status(&self) -> TransactionStatus {
        match self {
            Settlement::Completed { .. } => TransactionStatus::BridgeCompleted,
            Settlement::Failed { .. } => TransactionStatus::FailedBridge,
        }
    }
}

/// Ledger statistics
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LedgerStats {
    pub pending: u64,
    pub bridge_completed: u64,
    pub failed_bridge: u64,
    pub swap_completed: u64,
}

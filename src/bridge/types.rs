//! Bridge provider wire types

use crate::amount::from_base_units;
use crate::error::{OrchestratorError, OrchestratorResult};

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct QuoteRequest<'a> {
    pub from_chain: &'a str,
    pub to_chain: &'a str,
    pub from_token: &'a str,
    pub to_token: &'a str,
    /// Integer base units
    pub from_amount: String,
    pub from_address: &'a str,
    pub to_address: &'a str,
    pub mode: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct CommitRequest<'a> {
    pub quote_id: &'a str,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct QuoteResponse {
    pub quote_id: Option<String>,
    pub receive_amount: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(super) struct StatusResponse {
    pub status: Option<String>,
    pub amount: Option<serde_json::Value>,
    #[serde(alias = "withdrawTxHash")]
    pub destination_tx_hash: Option<String>,
}

/// Where a committed transfer stands at the provider
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BridgeStatus {
    Pending,
    Executed,
    Failed,
    Stuck,
}

/// Validated status answer
#[derive(Debug, Clone, PartialEq)]
pub struct StatusReport {
    pub status: BridgeStatus,
    pub amount_out: Option<Decimal>,
    pub settlement_tx_hash: Option<String>,
}

impl StatusReport {
    pub fn pending() -> Self {
        Self {
            status: BridgeStatus::Pending,
            amount_out: None,
            settlement_tx_hash: None,
        }
    }

    pub fn executed(amount_out: Decimal, settlement_tx_hash: impl Into<String>) -> Self {
        Self {
            status: BridgeStatus::Executed,
            amount_out: Some(amount_out),
            settlement_tx_hash: Some(settlement_tx_hash.into()),
        }
    }

    pub fn with_status(status: BridgeStatus) -> Self {
        Self {
            status,
            amount_out: None,
            settlement_tx_hash: None,
        }
    }
}

/// Base-unit amount that may arrive as a JSON string or number
pub(super) fn base_units_value(value: &serde_json::Value, decimals: u32) -> Option<Decimal> {
    match value {
        serde_json::Value::String(s) => from_base_units(s, decimals),
        serde_json::Value::Number(n) => from_base_units(&n.to_string(), decimals),
        _ => None,
    }
}

impl StatusResponse {
    pub(super) fn into_report(self, decimals: u32) -> OrchestratorResult<StatusReport> {
        let raw = self
            .status
            .ok_or_else(|| OrchestratorError::bridge("status response has no status"))?;

        let status = match raw.to_ascii_lowercase().as_str() {
            "pending" | "accepted" => BridgeStatus::Pending,
            "executed" => BridgeStatus::Executed,
            "failed" | "cancelled" => BridgeStatus::Failed,
            "stuck" => BridgeStatus::Stuck,
            other => {
                return Err(OrchestratorError::bridge(format!(
                    "unknown bridge status {:?}",
                    other
                )))
            }
        };

        let amount_out = match &self.amount {
            None | Some(serde_json::Value::Null) => None,
            Some(value) => Some(base_units_value(value, decimals).ok_or_else(|| {
                OrchestratorError::bridge(format!("malformed amount {}", value))
            })?),
        };

        if status == BridgeStatus::Executed && amount_out.is_none() {
            return Err(OrchestratorError::bridge(
                "executed status without an amount",
            ));
        }

        Ok(StatusReport {
            status,
            amount_out,
            settlement_tx_hash: self.destination_tx_hash.filter(|h| !h.is_empty()),
        })
    }
}

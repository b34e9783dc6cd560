//! Commission → quote → execute → record
//!
//! Swaps settle synchronously: a row is written only once the provider
//! has returned a settlement hash, directly as `swap_completed`. Any
//! failure before that leaves the ledger untouched.

use super::{FeeTerms, SwapApi};
use crate::commission::{commission, net_of_commission};
use crate::config::SwapConfig;
use crate::error::{OrchestratorError, OrchestratorResult, ValidationError};
use crate::ledger::{Ledger, NewTransaction, Transaction};
use crate::quote::Quote;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::sync::Arc;
use tracing::{error, info};
use uuid::Uuid;

/// What the user is shown before confirming a swap
#[derive(Debug, Clone, PartialEq)]
pub struct SwapPreview {
    pub amount: Decimal,
    pub commission: Decimal,
    pub net_amount: Decimal,
    pub output_asset: String,
    pub quote: Quote,
}

pub struct SwapService {
    client: Arc<dyn SwapApi>,
    ledger: Arc<dyn Ledger>,
    config: SwapConfig,
}

impl SwapService {
    pub fn new(client: Arc<dyn SwapApi>, ledger: Arc<dyn Ledger>, config: SwapConfig) -> Self {
        Self {
            client,
            ledger,
            config,
        }
    }

    pub fn output_asset(&self) -> &str {
        &self.config.output_asset
    }

    pub fn min_swap_amount(&self) -> Decimal {
        self.config.min_swap_amount
    }

    /// Fee in basis points of the gross amount
    fn fee_bps(amount: Decimal, commission: Decimal) -> OrchestratorResult<u32> {
        if amount <= Decimal::ZERO {
            return Ok(0);
        }
        (commission / amount * Decimal::from(10_000))
            .round()
            .to_u32()
            .ok_or_else(|| OrchestratorError::Internal(format!("fee bps out of range for {}", amount)))
    }

    /// Split off the commission and reject amounts whose net is too small
    fn net_amount(&self, amount: Decimal) -> OrchestratorResult<(Decimal, Decimal)> {
        if amount <= Decimal::ZERO {
            return Err(ValidationError::InvalidAmount.into());
        }
        let fee = commission(amount);
        let net = net_of_commission(amount);
        if net < self.config.min_swap_amount {
            return Err(ValidationError::BelowMinimum {
                minimum: self.config.min_swap_amount,
            }
            .into());
        }
        Ok((fee, net))
    }

    async fn priced(&self, net: Decimal) -> OrchestratorResult<Quote> {
        let quote = self
            .client
            .request_quote(net, &self.config.output_asset)
            .await?;
        if quote.priced_amount_out <= Decimal::ZERO {
            return Err(OrchestratorError::InvalidQuote {
                service: "swap",
                message: format!("quote prices {} at {}", net, quote.priced_amount_out),
            });
        }
        Ok(quote)
    }

    /// Quote for display, nothing executed or recorded
    pub async fn preview(&self, amount: Decimal) -> OrchestratorResult<SwapPreview> {
        let (fee, net) = self.net_amount(amount)?;
        let quote = self.priced(net).await?;

        Ok(SwapPreview {
            amount,
            commission: fee,
            net_amount: net,
            output_asset: self.config.output_asset.clone(),
            quote,
        })
    }

    /// Swap `amount` (gross) out of bridge `source` into the configured
    /// output asset, delivered to `destination_wallet`, and record the
    /// completed swap against that bridge.
    pub async fn execute(
        &self,
        user_id: &str,
        source: Uuid,
        destination_wallet: &str,
        amount: Decimal,
    ) -> OrchestratorResult<Transaction> {
        let result = self.run(user_id, source, destination_wallet, amount).await;
        match &result {
            Ok(_) => crate::metrics::record_swap_completed(),
            Err(e) => crate::metrics::record_swap_failed(if e.is_persistence() {
                "ledger"
            } else {
                "provider"
            }),
        }
        result
    }

    async fn run(
        &self,
        user_id: &str,
        source: Uuid,
        destination_wallet: &str,
        amount: Decimal,
    ) -> OrchestratorResult<Transaction> {
        let (fee, net) = self.net_amount(amount)?;
        let quote = self.priced(net).await?;
        let terms = FeeTerms {
            fee_wallet: self.config.fee_wallet.clone(),
            commission: fee,
            fee_bps: Self::fee_bps(amount, fee)?,
        };

        let tx_hash = self
            .client
            .execute(&quote, destination_wallet, &terms)
            .await?;

        let row = NewTransaction::completed_swap(
            user_id,
            source,
            destination_wallet,
            amount,
            fee,
            quote.priced_amount_out,
            tx_hash.clone(),
        );
        match self.ledger.insert(row).await {
            Ok(tx) => {
                info!(
                    "Swap {} completed for user {}: {} in, {} commission, {} {} out",
                    tx.id, user_id, amount, fee, quote.priced_amount_out, self.config.output_asset
                );
                Ok(tx)
            }
            Err(e) => {
                // Settled on-chain but not recorded; needs an operator
                error!(
                    "Swap {} for user {} settled but could not be recorded: {}",
                    tx_hash, user_id, e
                );
                Err(e)
            }
        }
    }
}

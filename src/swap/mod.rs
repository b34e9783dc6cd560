//! Swap provider integration and the commission-bearing swap flow

mod client;
mod service;

pub use client::HttpSwapClient;
pub use service::SwapService;

use crate::error::OrchestratorResult;
use crate::quote::Quote;

use async_trait::async_trait;
use rust_decimal::Decimal;

/// Fee routed to the operator as part of a swap
#[derive(Debug, Clone, PartialEq)]
pub struct FeeTerms {
    pub fee_wallet: String,
    pub commission: Decimal,
    pub fee_bps: u32,
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SwapApi: Send + Sync {
    /// Price swapping `amount` of the input asset into `output_asset`
    async fn request_quote(&self, amount: Decimal, output_asset: &str) -> OrchestratorResult<Quote>;

    /// Execute a quoted route, returning the settlement transaction hash
    async fn execute(
        &self,
        quote: &Quote,
        destination_wallet: &str,
        fee: &FeeTerms,
    ) -> OrchestratorResult<String>;
}

//! Bridge provider integration
//!
//! - Quote: price a transfer from the source to the destination chain
//! - Commit: irrevocably accept a quote (never retried)
//! - Status: where a committed transfer stands (retried with backoff)

mod client;
mod types;

pub use client::HttpBridgeClient;
pub use types::{BridgeStatus, StatusReport};

use crate::error::OrchestratorResult;
use crate::quote::Quote;

use async_trait::async_trait;
use rust_decimal::Decimal;

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BridgeApi: Send + Sync {
    async fn request_quote(
        &self,
        amount: Decimal,
        source_address: &str,
        destination_address: &str,
    ) -> OrchestratorResult<Quote>;

    async fn commit(&self, external_ref: &str) -> OrchestratorResult<()>;

    async fn poll_status(&self, external_ref: &str) -> OrchestratorResult<StatusReport>;
}

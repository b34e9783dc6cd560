//! HTTP client for the swap (liquidity routing) provider

use super::{FeeTerms, SwapApi};
use crate::amount::{from_base_units, to_base_units};
use crate::config::SwapConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::quote::Quote;

use async_trait::async_trait;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, error, info};

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct SwapRequest<'a> {
    route: &'a serde_json::Value,
    user_address: &'a str,
    fee_address: &'a str,
    fee_bps: u32,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SwapResponse {
    #[serde(alias = "swapTransaction")]
    settlement_tx_hash: Option<String>,
}

pub struct HttpSwapClient {
    client: reqwest::Client,
    config: SwapConfig,
}

impl HttpSwapClient {
    pub fn new(config: SwapConfig) -> OrchestratorResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn check(
        response: reqwest::Response,
        operation: &str,
    ) -> OrchestratorResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Swap {} failed: status={}, response={}", operation, status, body);
        Err(OrchestratorError::swap(format!(
            "{} returned {}: {}",
            operation, status, body
        )))
    }
}

fn invalid_quote(message: impl Into<String>) -> OrchestratorError {
    OrchestratorError::InvalidQuote {
        service: "swap",
        message: message.into(),
    }
}

#[async_trait]
impl SwapApi for HttpSwapClient {
    async fn request_quote(&self, amount: Decimal, output_asset: &str) -> OrchestratorResult<Quote> {
        let units = to_base_units(amount, self.config.input_decimals)?.to_string();
        let slippage = self.config.max_slippage_bps.to_string();
        let params = [
            ("inputAsset", self.config.input_asset.as_str()),
            ("outputAsset", output_asset),
            ("amount", units.as_str()),
            ("maxSlippageBps", slippage.as_str()),
        ];
        debug!("Requesting swap quote with params: {:?}", params);

        let response = self
            .client
            .get(self.url("quote"))
            .query(&params)
            .send()
            .await
            .map_err(|e| OrchestratorError::swap(format!("quote request failed: {}", e)))?;

        let raw_terms: serde_json::Value = Self::check(response, "quote")
            .await?
            .json()
            .await
            .map_err(|e| OrchestratorError::swap(format!("malformed quote response: {}", e)))?;

        let out_amount = match raw_terms.get("outAmount") {
            Some(serde_json::Value::String(s)) => from_base_units(s, self.config.output_decimals),
            Some(serde_json::Value::Number(n)) => {
                from_base_units(&n.to_string(), self.config.output_decimals)
            }
            _ => None,
        }
        .ok_or_else(|| invalid_quote("missing or malformed outAmount"))?;

        if out_amount <= Decimal::ZERO {
            return Err(invalid_quote(format!("non-positive outAmount {}", out_amount)));
        }

        info!("Received swap quote for {}: {} out", output_asset, out_amount);
        Ok(Quote {
            external_ref: None,
            priced_amount_out: out_amount,
            raw_terms,
        })
    }

    async fn execute(
        &self,
        quote: &Quote,
        destination_wallet: &str,
        fee: &FeeTerms,
    ) -> OrchestratorResult<String> {
        let route = quote.raw_terms.get("route").unwrap_or(&quote.raw_terms);
        let request = SwapRequest {
            route,
            user_address: destination_wallet,
            fee_address: &fee.fee_wallet,
            fee_bps: fee.fee_bps,
        };

        let response = self
            .client
            .post(self.url("swap"))
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestratorError::swap(format!("swap request failed: {}", e)))?;

        let body: SwapResponse = Self::check(response, "swap")
            .await?
            .json()
            .await
            .map_err(|e| OrchestratorError::swap(format!("malformed swap response: {}", e)))?;

        let tx_hash = body
            .settlement_tx_hash
            .filter(|h| !h.is_empty())
            .ok_or_else(|| OrchestratorError::swap("no settlement transaction hash received"))?;

        info!(
            "Swap executed: tx_hash={}, commission={}, fee_wallet={}",
            tx_hash, fee.commission, fee.fee_wallet
        );
        Ok(tx_hash)
    }
}

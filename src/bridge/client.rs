//! HTTP client for the bridge provider

use super::types::{base_units_value, CommitRequest, QuoteRequest, QuoteResponse, StatusResponse};
use super::{BridgeApi, StatusReport};
use crate::amount::to_base_units;
use crate::config::BridgeConfig;
use crate::error::{OrchestratorError, OrchestratorResult};
use crate::quote::Quote;
use crate::retry::RetryPolicy;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION, CONTENT_TYPE};
use rust_decimal::Decimal;
use std::time::Duration;
use tracing::{debug, error, info};

pub struct HttpBridgeClient {
    client: reqwest::Client,
    config: BridgeConfig,
    /// Applied to status checks only
    retry: RetryPolicy,
}

impl HttpBridgeClient {
    pub fn new(config: BridgeConfig, retry: RetryPolicy) -> OrchestratorResult<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            AUTHORIZATION,
            HeaderValue::from_str(&format!("Bearer {}", config.api_key)).map_err(|e| {
                OrchestratorError::Config(format!("invalid bridge API key header value: {}", e))
            })?,
        );
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

        let client = reqwest::Client::builder()
            .default_headers(headers)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| OrchestratorError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            config,
            retry,
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    /// Turn a non-success response into an error carrying the body
    async fn check(
        response: reqwest::Response,
        operation: &str,
    ) -> OrchestratorResult<reqwest::Response> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let body = response.text().await.unwrap_or_default();
        error!("Bridge {} failed: status={}, response={}", operation, status, body);
        Err(OrchestratorError::bridge(format!(
            "{} returned {}: {}",
            operation, status, body
        )))
    }

    async fn fetch_status(&self, external_ref: &str) -> OrchestratorResult<StatusReport> {
        debug!("Checking bridge status for quote {}", external_ref);
        let response = self
            .client
            .get(self.url(&format!("bridge/status/{}", external_ref)))
            .send()
            .await
            .map_err(|e| OrchestratorError::bridge(format!("status request failed: {}", e)))?;

        let body: StatusResponse = Self::check(response, "status")
            .await?
            .json()
            .await
            .map_err(|e| OrchestratorError::bridge(format!("malformed status response: {}", e)))?;

        let report = body.into_report(self.config.token_decimals)?;
        debug!("Bridge status for {}: {:?}", external_ref, report.status);
        Ok(report)
    }
}

#[async_trait]
impl BridgeApi for HttpBridgeClient {
    async fn request_quote(
        &self,
        amount: Decimal,
        source_address: &str,
        destination_address: &str,
    ) -> OrchestratorResult<Quote> {
        let request = QuoteRequest {
            from_chain: &self.config.from_chain,
            to_chain: &self.config.to_chain,
            from_token: &self.config.from_token,
            to_token: &self.config.to_token,
            from_amount: to_base_units(amount, self.config.token_decimals)?.to_string(),
            from_address: source_address,
            to_address: destination_address,
            mode: &self.config.mode,
        };
        debug!("Requesting bridge quote: {:?}", request);

        let response = self
            .client
            .post(self.url("bridge/quote"))
            .json(&request)
            .send()
            .await
            .map_err(|e| OrchestratorError::bridge(format!("quote request failed: {}", e)))?;

        let raw_terms: serde_json::Value = Self::check(response, "quote")
            .await?
            .json()
            .await
            .map_err(|e| OrchestratorError::bridge(format!("malformed quote response: {}", e)))?;

        let parsed: QuoteResponse = serde_json::from_value(raw_terms.clone())
            .map_err(|e| OrchestratorError::bridge(format!("malformed quote response: {}", e)))?;

        let quote_id = parsed
            .quote_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| OrchestratorError::bridge("quote response has no quoteId"))?;

        let priced_amount_out = match &parsed.receive_amount {
            Some(value) => base_units_value(value, self.config.token_decimals).ok_or_else(|| {
                OrchestratorError::InvalidQuote {
                    service: "bridge",
                    message: format!("malformed receiveAmount {}", value),
                }
            })?,
            // "receive" mode prices the requested amount as what arrives
            None => amount,
        };

        info!("Received bridge quote: quoteId={}", quote_id);
        Ok(Quote {
            external_ref: Some(quote_id),
            priced_amount_out,
            raw_terms,
        })
    }

    async fn commit(&self, external_ref: &str) -> OrchestratorResult<()> {
        let response = self
            .client
            .post(self.url("bridge/commit"))
            .json(&CommitRequest {
                quote_id: external_ref,
            })
            .send()
            .await
            .map_err(|e| OrchestratorError::bridge(format!("commit request failed: {}", e)))?;

        Self::check(response, "commit").await?;
        info!("Committed bridge quote {}", external_ref);
        Ok(())
    }

    async fn poll_status(&self, external_ref: &str) -> OrchestratorResult<StatusReport> {
        self.retry
            .run("bridge status", || self.fetch_status(external_ref))
            .await
    }
}

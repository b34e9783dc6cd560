//! Configuration management for the bridge orchestrator
//!
//! Loads configuration from TOML files with environment variable substitution.

use crate::amount::MAX_DECIMALS;

use anyhow::{Context, Result};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub orchestrator: OrchestratorConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    pub database: DatabaseConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    pub bridge: BridgeConfig,
    pub swap: SwapConfig,
    #[serde(default)]
    pub notifier: NotifierConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OrchestratorConfig {
    pub instance_id: String,
    /// Reconciliation tick period
    pub poll_interval_secs: u64,
    /// Age after which a pending bridge is abandoned without polling
    pub bridge_timeout_secs: u64,
    /// Bounded wait for the external wallet confirmation
    pub wallet_confirmation_timeout_secs: u64,
    pub max_concurrent_polls: usize,
    pub session_ttl_secs: u64,
    pub health_check_interval_secs: u64,
}

impl OrchestratorConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }

    pub fn wallet_confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.wallet_confirmation_timeout_secs)
    }

    pub fn session_ttl(&self) -> Duration {
        Duration::from_secs(self.session_ttl_secs)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub multiplier: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_ms: 1000,
            multiplier: 2,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BridgeConfig {
    pub base_url: String,
    pub api_key: String,
    pub from_chain: String,
    pub to_chain: String,
    pub from_token: String,
    pub to_token: String,
    #[serde(default = "default_bridge_mode")]
    pub mode: String,
    #[serde(default = "default_stable_decimals")]
    pub token_decimals: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SwapConfig {
    pub base_url: String,
    pub input_asset: String,
    pub output_asset: String,
    pub fee_wallet: String,
    #[serde(default = "default_slippage_bps")]
    pub max_slippage_bps: u32,
    pub min_swap_amount: Decimal,
    #[serde(default = "default_stable_decimals")]
    pub input_decimals: u32,
    pub output_decimals: u32,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct NotifierConfig {
    /// Chat gateway endpoint; notifications are only logged when unset
    pub webhook_url: Option<String>,
    pub auth_token: Option<String>,
}

fn default_bridge_mode() -> String {
    "receive".to_string()
}

fn default_stable_decimals() -> u32 {
    6
}

fn default_slippage_bps() -> u32 {
    50
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("BRIDGE_ORCHESTRATOR_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        Self::load_from(&config_path)
    }

    /// Load settings from an explicit path
    pub fn load_from(config_path: &Path) -> Result<Self> {
        let config_str = std::fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        // Substitute environment variables
        let config_str = substitute_env_vars(&config_str);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        let o = &self.orchestrator;
        if o.poll_interval_secs == 0 {
            anyhow::bail!("orchestrator.poll_interval_secs must be positive");
        }
        if o.wallet_confirmation_timeout_secs >= o.bridge_timeout_secs {
            anyhow::bail!(
                "wallet confirmation timeout ({}s) must be shorter than bridge timeout ({}s)",
                o.wallet_confirmation_timeout_secs,
                o.bridge_timeout_secs
            );
        }
        if o.max_concurrent_polls == 0 {
            anyhow::bail!("orchestrator.max_concurrent_polls must be positive");
        }

        if self.retry.max_attempts == 0 || self.retry.multiplier == 0 {
            anyhow::bail!("retry.max_attempts and retry.multiplier must be positive");
        }

        if self.bridge.base_url.is_empty() {
            anyhow::bail!("bridge.base_url is not configured");
        }
        if self.bridge.api_key.is_empty() {
            tracing::warn!("bridge.api_key is empty - provider calls will be unauthenticated");
        }

        for (name, decimals) in [
            ("bridge.token_decimals", self.bridge.token_decimals),
            ("swap.input_decimals", self.swap.input_decimals),
            ("swap.output_decimals", self.swap.output_decimals),
        ] {
            if decimals > MAX_DECIMALS {
                anyhow::bail!("{} must be at most {}, got {}", name, MAX_DECIMALS, decimals);
            }
        }

        if self.swap.base_url.is_empty() {
            anyhow::bail!("swap.base_url is not configured");
        }
        if self.swap.fee_wallet.is_empty() {
            anyhow::bail!("swap.fee_wallet is not configured");
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    lazy_static::lazy_static! {
        static ref ENV_VAR: regex::Regex =
            regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");
    }

    let mut result = input.to_string();
    for cap in ENV_VAR.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

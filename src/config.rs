//! Configuration management for the agreement engine
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use ethers::types::U256;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub chain: ChainConfig,
    pub accounts: AccountsConfig,
    pub artifacts: ArtifactsConfig,
    pub bounds: BoundsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub bootstrap: BootstrapConfig,
    #[serde(default)]
    pub portfolio: PortfolioConfig,
    /// Addresses recorded after a previous bootstrap
    pub deployment: Option<DeploymentConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChainConfig {
    pub rpc_urls: Vec<String>,
    pub log_poll_interval_ms: u64,
    pub submit_timeout_secs: u64,
    /// Password for `personal_unlockAccount` on development nodes
    pub unlock_password: Option<String>,
}

/// Indices into the node's account list
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
    pub master: usize,
    pub party_a: usize,
    pub party_b: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ArtifactsConfig {
    pub dir: PathBuf,
    pub compile_script: Option<String>,
    #[serde(default = "default_engine_artifact")]
    pub engine: String,
    #[serde(default = "default_token_artifact")]
    pub token: String,
    #[serde(default = "default_feed_artifact")]
    pub feed: String,
}

/// Explicit bounds on every wait the engine performs
#[derive(Debug, Clone, Deserialize)]
pub struct BoundsConfig {
    pub deploy_poll_interval_ms: u64,
    pub deploy_timeout_secs: u64,
    pub correlation_timeout_secs: u64,
    /// Receipt checks while a correlated call is unresolved
    #[serde(default = "default_receipt_poll_interval_ms")]
    pub receipt_poll_interval_ms: u64,
    pub engine_gas_limit: u64,
    pub token_gas_limit: u64,
    pub call_gas_limit: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BootstrapConfig {
    pub tokens: Vec<String>,
    pub endowment: u64,
    pub feed_label: String,
    /// Upper bound on waiting for endowments and the feed value to show up
    pub settle_timeout_secs: u64,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PortfolioConfig {
    #[serde(default)]
    pub forwards: Vec<ForwardConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwardConfig {
    pub party_a: String,
    pub party_b: String,
    pub base: String,
    pub quote: String,
    pub maturity_offset_secs: i64,
    pub notional: u64,
    pub tenor: u64,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct DeploymentConfig {
    pub engine: String,
    pub feed: String,
    /// Instruments created by `create`, in `[portfolio]` order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub contracts: Vec<u64>,
    /// Agreements assigned by `register`
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub agreements: Vec<u64>,
    /// Token symbol -> address
    pub tokens: BTreeMap<String, String>,
}

fn default_receipt_poll_interval_ms() -> u64 {
    1000
}

fn default_engine_artifact() -> String {
    "ContractEngine".to_string()
}

fn default_token_artifact() -> String {
    "CurrencyToken".to_string()
}

fn default_feed_artifact() -> String {
    "SimpleFeed".to_string()
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 9102,
        }
    }
}

impl Default for BootstrapConfig {
    fn default() -> Self {
        Self {
            tokens: vec!["USD".into(), "DKK".into(), "GBP".into()],
            endowment: 9_999_999,
            feed_label: "launchedOn".into(),
            settle_timeout_secs: 120,
        }
    }
}

impl BoundsConfig {
    pub fn deploy_poll_interval(&self) -> Duration {
        Duration::from_millis(self.deploy_poll_interval_ms)
    }

    pub fn deploy_timeout(&self) -> Duration {
        Duration::from_secs(self.deploy_timeout_secs)
    }

    pub fn receipt_poll_interval(&self) -> Duration {
        Duration::from_millis(self.receipt_poll_interval_ms)
    }

    pub fn correlation_timeout(&self) -> Duration {
        Duration::from_secs(self.correlation_timeout_secs)
    }

    pub fn engine_gas(&self) -> U256 {
        U256::from(self.engine_gas_limit)
    }

    pub fn token_gas(&self) -> U256 {
        U256::from(self.token_gas_limit)
    }

    pub fn call_gas(&self) -> U256 {
        U256::from(self.call_gas_limit)
    }
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("FX_ENGINE_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::parse(&config_str)
    }

    /// Parse settings from TOML text, substituting `${VAR}` references first
    pub fn parse(raw: &str) -> Result<Self> {
        let config_str = substitute_env_vars(raw);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.chain.rpc_urls.is_empty() {
            anyhow::bail!("At least one RPC URL must be configured");
        }
        if self.chain.log_poll_interval_ms == 0
            || self.bounds.deploy_poll_interval_ms == 0
            || self.bounds.receipt_poll_interval_ms == 0
        {
            anyhow::bail!("Poll intervals must be non-zero");
        }
        if self.bounds.deploy_timeout_secs == 0
            || self.bounds.correlation_timeout_secs == 0
            || self.chain.submit_timeout_secs == 0
            || self.bootstrap.settle_timeout_secs == 0
        {
            anyhow::bail!("Timeouts must be non-zero; unbounded waits are not supported");
        }

        let accounts = [
            self.accounts.master,
            self.accounts.party_a,
            self.accounts.party_b,
        ];
        if accounts[0] == accounts[1] || accounts[0] == accounts[2] || accounts[1] == accounts[2]
        {
            anyhow::bail!("master, party_a and party_b must be distinct accounts");
        }

        for forward in &self.portfolio.forwards {
            for ccy in [&forward.base, &forward.quote] {
                if !self.bootstrap.tokens.contains(ccy) {
                    tracing::warn!("Forward references token {} not in bootstrap list", ccy);
                }
            }
        }

        Ok(())
    }
}

/// Substitute environment variables in the format ${VAR_NAME}
fn substitute_env_vars(input: &str) -> String {
    let mut result = input.to_string();
    let re = regex::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)\}").expect("static regex");

    for cap in re.captures_iter(input) {
        let var_name = &cap[1];
        let var_value = env::var(var_name).unwrap_or_default();
        result = result.replace(&cap[0], &var_value);
    }

    result
}

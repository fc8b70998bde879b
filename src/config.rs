//! Configuration management for the superblock agent
//!
//! Loads configuration from TOML files with environment variable substitution.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::path::PathBuf;

/// Root configuration structure
#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub agent: AgentConfig,
    pub ledger: LedgerConfig,
    pub coin: CoinConfig,
    pub operator: OperatorConfig,
    #[serde(default)]
    pub relay: RelayConfig,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Enables the unlock processor (the operator role)
    pub operator_enabled: bool,
    pub data_directory: PathBuf,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    #[serde(default)]
    pub log_format: LogFormat,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LedgerConfig {
    /// Tried in order, with failover on transport errors
    pub rpc_urls: Vec<String>,
    /// Checkpoint used when nothing has been persisted yet
    pub initial_checkpoint: u64,
    /// Blocks kept between the ledger tip and the processing window
    pub min_confirmations: u64,
    /// Gas price floor, in wei
    pub gas_price_minimum: u64,
    pub gas_limit: u64,
    #[serde(default)]
    pub contracts: ContractsConfig,
    /// Truffle build output used when an address is not configured
    pub build_contracts_directory: Option<PathBuf>,
    pub accounts: AccountsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ContractsConfig {
    pub relay: Option<String>,
    pub token: Option<String>,
    pub superblocks: Option<String>,
}

/// Ledger identities managed by the ledger node
#[derive(Debug, Clone, Deserialize)]
pub struct AccountsConfig {
    /// Sends headers, superblocks and other general purpose calls
    pub general_purpose: String,
    /// Sends relayed coin transactions
    pub relay_txs: String,
    pub claimant: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CoinConfig {
    pub rpc_urls: Vec<String>,
    pub rpc_user: Option<String>,
    pub rpc_password: Option<String>,
    pub network: CoinNetwork,
    #[serde(default)]
    pub superblock_start_height: u64,
    #[serde(default = "default_coin_confirmations")]
    pub required_confirmations: u64,
    #[serde(default)]
    pub lock_scan_start_height: u64,
}

#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum CoinNetwork {
    Mainnet,
    Testnet,
    Regtest,
}

impl CoinNetwork {
    /// Base58 version byte of pay-to-pubkey-hash addresses
    pub fn p2pkh_prefix(&self) -> u8 {
        match self {
            CoinNetwork::Mainnet => 0x1e,
            CoinNetwork::Testnet => 0x71,
            CoinNetwork::Regtest => 0x6f,
        }
    }

    /// Base58 version byte of pay-to-script-hash addresses
    pub fn p2sh_prefix(&self) -> u8 {
        match self {
            CoinNetwork::Mainnet => 0x16,
            CoinNetwork::Testnet | CoinNetwork::Regtest => 0xc4,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct OperatorConfig {
    /// Environment variable holding the hex-encoded operator secret key
    pub private_key_env: String,
    #[serde(default)]
    pub signing_mode: SigningMode,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SigningMode {
    /// Assemble every input and output, then sign each input with SIGHASH_ALL
    #[default]
    Complete,
    /// Sign each input as it is added, with SIGHASH_ALL|ANYONECANPAY
    Incremental,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RelayConfig {
    pub headers_enabled: bool,
    pub superblocks_enabled: bool,
    /// Challenge proposed superblocks that do not match the local chain
    pub challenge_enabled: bool,
    pub lock_txs_enabled: bool,
    pub header_batch_size: u64,
    /// Coin blocks scanned for lock transactions per tick
    pub lock_scan_batch_size: u64,
    /// Ledger blocks covered by one superblock event query
    pub event_batch_size: u64,
    pub receipt_timeout_secs: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            headers_enabled: false,
            superblocks_enabled: true,
            challenge_enabled: false,
            lock_txs_enabled: false,
            header_batch_size: 50,
            lock_scan_batch_size: 20,
            event_batch_size: 1000,
            receipt_timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
}

fn default_poll_interval() -> u64 {
    15
}

fn default_coin_confirmations() -> u64 {
    6
}

impl Settings {
    /// Load settings from configuration files
    pub fn load() -> Result<Self> {
        let config_path = env::var("AGENT_CONFIG")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("config/default.toml"));

        let config_str = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        Self::from_toml(&config_str)
    }

    /// Parse and validate settings from TOML text
    pub fn from_toml(input: &str) -> Result<Self> {
        // Substitute environment variables
        let config_str = substitute_env_vars(input);

        let settings: Settings =
            toml::from_str(&config_str).with_context(|| "Failed to parse configuration")?;

        settings.validate()?;

        Ok(settings)
    }

    /// Validate configuration
    fn validate(&self) -> Result<()> {
        if self.agent.poll_interval_secs == 0 {
            anyhow::bail!("agent.poll_interval_secs must be positive");
        }

        if self.ledger.rpc_urls.is_empty() {
            anyhow::bail!("Ledger chain has no RPC URLs configured");
        }

        if self.coin.rpc_urls.is_empty() {
            anyhow::bail!("Coin chain has no RPC URLs configured");
        }

        if self.agent.operator_enabled && self.agent.data_directory.as_os_str().is_empty() {
            anyhow::bail!("agent.data_directory is required when the operator is enabled");
        }

        let contracts = &self.ledger.contracts;
        let all_configured = contracts.relay.is_some()
            && contracts.token.is_some()
            && contracts.superblocks.is_some();
        if !all_configured && self.ledger.build_contracts_directory.is_none() {
            anyhow::bail!(
                "Every contract needs an address unless ledger.build_contracts_directory is set"
            );
        }

        let relay = &self.relay;
        for (name, size) in [
            ("header_batch_size", relay.header_batch_size),
            ("lock_scan_batch_size", relay.lock_scan_batch_size),
            ("event_batch_size", relay.event_batch_size),
        ] {
            if size == 0 {
                anyhow::bail!("relay.{} must be positive", name);
            }
        }

        Ok(())
    }

    /// Location of the persisted unlock checkpoint
    pub fn checkpoint_path(&self) -> PathBuf {
        self.agent
            .data_directory
            .join("unlock_processor_checkpoint.dat")
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

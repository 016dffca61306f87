//! Environment configuration
//!
//! Loads a `.env` file if present, then reads everything from environment
//! variables. Secrets are redacted from `Debug` output.

use alloy::primitives::Address;
use eyre::{eyre, Result, WrapErr};
use std::env;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::commitment::PollConfig;
use crate::orchestrator::ReceiptWait;
use crate::retry::RetryConfig;
use crate::submitter::DeliveryMode;

/// Main configuration for the relayer
#[derive(Debug, Clone)]
pub struct Config {
    pub l1: ChainConfig,
    pub l2: ChainConfig,
    pub contracts: ContractsConfig,
    pub relayer: RelayerConfig,
    pub service: ServiceConfig,
}

/// One chain endpoint
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub rpc_url: String,
    /// Tried in order when the primary endpoint is unreachable
    pub rpc_fallback_urls: Vec<String>,
    pub chain_id: u64,
}

/// Deployed contract addresses
#[derive(Debug, Clone)]
pub struct ContractsConfig {
    pub l1_messenger: Address,
    pub l2_messenger: Address,
    pub l2_message_passer: Address,
    pub state_commitment_chain: Address,
    /// First L1 block searched for `StateBatchAppended` events
    pub state_commitment_chain_start_block: u64,
    pub canonical_transaction_chain: Option<Address>,
}

impl ChainConfig {
    /// Primary URL followed by the fallbacks
    pub fn rpc_urls(&self) -> Vec<String> {
        std::iter::once(self.rpc_url.clone())
            .chain(self.rpc_fallback_urls.iter().cloned())
            .collect()
    }
}

/// Who executes relayed messages on a route's destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayMode {
    /// The relayer sends `relayMessage`
    Submit,
    /// The relayer waits for the rollup's own relay
    Observe,
}

impl FromStr for RelayMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "submit" => Ok(RelayMode::Submit),
            "observe" => Ok(RelayMode::Observe),
            other => Err(format!("expected submit or observe, got {other}")),
        }
    }
}

/// Relay behaviour
#[derive(Clone)]
pub struct RelayerConfig {
    pub private_key: String,
    /// Difference between an L2 block number and its state root index
    pub l2_block_offset: u64,
    /// L1 confirmations before a deposit is relayed
    pub l1_confirmations: u64,
    pub poll_interval_ms: u64,
    pub max_poll_rounds: u32,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub tx_timeout_secs: u64,
    pub wait_for_fraud_proof_window: bool,
    pub deposit_relay_mode: RelayMode,
    pub withdrawal_relay_mode: RelayMode,
    /// Widest block span of one `eth_getLogs` request
    pub log_max_block_range: u64,
}

/// Custom Debug that redacts private_key to prevent accidental log leakage.
impl fmt::Debug for RelayerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelayerConfig")
            .field("private_key", &"<redacted>")
            .field("l2_block_offset", &self.l2_block_offset)
            .field("l1_confirmations", &self.l1_confirmations)
            .field("poll_interval_ms", &self.poll_interval_ms)
            .field("max_poll_rounds", &self.max_poll_rounds)
            .field("retry_attempts", &self.retry_attempts)
            .field("retry_delay_ms", &self.retry_delay_ms)
            .field("max_retry_delay_ms", &self.max_retry_delay_ms)
            .field("tx_timeout_secs", &self.tx_timeout_secs)
            .field(
                "wait_for_fraud_proof_window",
                &self.wait_for_fraud_proof_window,
            )
            .field("deposit_relay_mode", &self.deposit_relay_mode)
            .field("withdrawal_relay_mode", &self.withdrawal_relay_mode)
            .field("log_max_block_range", &self.log_max_block_range)
            .finish()
    }
}

/// Long-running service settings
#[derive(Clone)]
pub struct ServiceConfig {
    /// PostgreSQL URL; the in-memory store is used when unset
    pub database_url: Option<String>,
    pub api_bind_address: String,
}

/// Custom Debug that redacts the database URL (may contain credentials).
impl fmt::Debug for ServiceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceConfig")
            .field(
                "database_url",
                &self.database_url.as_ref().map(|_| "<redacted>"),
            )
            .field("api_bind_address", &self.api_bind_address)
            .finish()
    }
}

/// Default functions
fn default_l2_block_offset() -> u64 {
    1
}

fn default_l1_confirmations() -> u64 {
    0
}

fn default_poll_interval() -> u64 {
    1000
}

fn default_max_poll_rounds() -> u32 {
    60
}

fn default_retry_attempts() -> u32 {
    5
}

fn default_retry_delay() -> u64 {
    1000
}

fn default_max_retry_delay() -> u64 {
    30_000
}

fn default_tx_timeout() -> u64 {
    120
}

fn default_log_max_block_range() -> u64 {
    10_000
}

fn default_api_bind_address() -> String {
    "0.0.0.0:9090".to_string()
}

/// Parse a comma-separated RPC URL string into individual trimmed URLs.
pub fn parse_rpc_urls(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

/// Reads variables through a lookup function so tests need not touch the
/// process environment
struct Vars<F: Fn(&str) -> Option<String>>(F);

impl<F: Fn(&str) -> Option<String>> Vars<F> {
    fn required(&self, key: &str) -> Result<String> {
        (self.0)(key)
            .filter(|v| !v.trim().is_empty())
            .ok_or_else(|| eyre!("{} environment variable is required", key))
    }

    fn parsed<T>(&self, key: &str) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        let raw = self.required(key)?;
        raw.trim()
            .parse()
            .map_err(|e| eyre!("{} is invalid ({}): {}", key, raw, e))
    }

    fn optional<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        match (self.0)(key).filter(|v| !v.trim().is_empty()) {
            Some(raw) => raw
                .trim()
                .parse()
                .map(Some)
                .map_err(|e| eyre!("{} is invalid ({}): {}", key, raw, e)),
            None => Ok(None),
        }
    }

    fn or_default<T>(&self, key: &str, default: T) -> Result<T>
    where
        T: FromStr,
        T::Err: fmt::Display,
    {
        Ok(self.optional(key)?.unwrap_or(default))
    }

    fn chain(&self, url_key: &str, id_key: &str) -> Result<ChainConfig> {
        let urls = parse_rpc_urls(&self.required(url_key)?);
        if urls.is_empty() {
            return Err(eyre!("{} cannot be empty", url_key));
        }
        Ok(ChainConfig {
            rpc_url: urls[0].clone(),
            rpc_fallback_urls: urls[1..].to_vec(),
            chain_id: self.parsed(id_key)?,
        })
    }
}

impl Config {
    /// Load configuration from environment variables
    /// Loads .env file if present, then reads from environment
    pub fn load() -> Result<Self> {
        Self::load_from_file(".env")
    }

    /// Load from a specific .env file path
    pub fn load_from_file(path: &str) -> Result<Self> {
        if Path::new(path).exists() {
            dotenvy::from_filename(path)
                .wrap_err_with(|| format!("Failed to load .env file from {}", path))?;
        }
        Self::load_from_env()
    }

    /// Load configuration from environment variables
    pub fn load_from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build and validate a configuration from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let vars = Vars(lookup);

        let config = Config {
            l1: vars.chain("L1_RPC_URL", "L1_CHAIN_ID")?,
            l2: vars.chain("L2_RPC_URL", "L2_CHAIN_ID")?,
            contracts: ContractsConfig {
                l1_messenger: vars.parsed("L1_MESSENGER_ADDRESS")?,
                l2_messenger: vars.parsed("L2_MESSENGER_ADDRESS")?,
                l2_message_passer: vars.parsed("L2_MESSAGE_PASSER_ADDRESS")?,
                state_commitment_chain: vars.parsed("STATE_COMMITMENT_CHAIN_ADDRESS")?,
                state_commitment_chain_start_block: vars
                    .or_default("STATE_COMMITMENT_CHAIN_START_BLOCK", 0)?,
                canonical_transaction_chain: vars.optional("CANONICAL_TX_CHAIN_ADDRESS")?,
            },
            relayer: RelayerConfig {
                private_key: vars.required("RELAYER_PRIVATE_KEY")?,
                l2_block_offset: vars.or_default("L2_BLOCK_OFFSET", default_l2_block_offset())?,
                l1_confirmations: vars
                    .or_default("L1_CONFIRMATIONS", default_l1_confirmations())?,
                poll_interval_ms: vars.or_default("POLL_INTERVAL_MS", default_poll_interval())?,
                max_poll_rounds: vars.or_default("MAX_POLL_ROUNDS", default_max_poll_rounds())?,
                retry_attempts: vars.or_default("RETRY_ATTEMPTS", default_retry_attempts())?,
                retry_delay_ms: vars.or_default("RETRY_DELAY_MS", default_retry_delay())?,
                max_retry_delay_ms: vars
                    .or_default("MAX_RETRY_DELAY_MS", default_max_retry_delay())?,
                tx_timeout_secs: vars.or_default("TX_TIMEOUT_SECS", default_tx_timeout())?,
                wait_for_fraud_proof_window: vars
                    .or_default("WAIT_FOR_FRAUD_PROOF_WINDOW", false)?,
                deposit_relay_mode: vars.or_default("DEPOSIT_RELAY_MODE", RelayMode::Submit)?,
                withdrawal_relay_mode: vars
                    .or_default("WITHDRAWAL_RELAY_MODE", RelayMode::Submit)?,
                log_max_block_range: vars
                    .or_default("LOG_MAX_BLOCK_RANGE", default_log_max_block_range())?,
            },
            service: ServiceConfig {
                database_url: vars.optional("DATABASE_URL")?,
                api_bind_address: vars
                    .or_default("API_BIND_ADDRESS", default_api_bind_address())?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.l1.chain_id == self.l2.chain_id {
            return Err(eyre!(
                "L1_CHAIN_ID and L2_CHAIN_ID must differ (both are {})",
                self.l1.chain_id
            ));
        }

        let key = &self.relayer.private_key;
        if key.len() != 66 || !key.starts_with("0x") {
            return Err(eyre!(
                "RELAYER_PRIVATE_KEY must be 66 chars (0x + 64 hex chars)"
            ));
        }

        if self.contracts.l1_messenger == Address::ZERO
            || self.contracts.l2_messenger == Address::ZERO
            || self.contracts.state_commitment_chain == Address::ZERO
        {
            return Err(eyre!("Messenger and state commitment addresses cannot be zero"));
        }

        if self.relayer.poll_interval_ms == 0 {
            return Err(eyre!("POLL_INTERVAL_MS must be greater than 0"));
        }
        if self.relayer.max_poll_rounds == 0 {
            return Err(eyre!("MAX_POLL_ROUNDS must be greater than 0"));
        }
        if self.relayer.retry_attempts == 0 {
            return Err(eyre!("RETRY_ATTEMPTS must be at least 1"));
        }
        if self.relayer.log_max_block_range == 0 {
            return Err(eyre!("LOG_MAX_BLOCK_RANGE must be greater than 0"));
        }
        if self.relayer.max_retry_delay_ms < self.relayer.retry_delay_ms {
            return Err(eyre!("MAX_RETRY_DELAY_MS cannot be smaller than RETRY_DELAY_MS"));
        }

        Ok(())
    }

    pub fn poll_config(&self) -> PollConfig {
        PollConfig {
            poll_interval: Duration::from_millis(self.relayer.poll_interval_ms),
            max_rounds: self.relayer.max_poll_rounds,
            wait_for_fraud_proof_window: self.relayer.wait_for_fraud_proof_window,
        }
    }

    /// Delivery for a route; observing reuses the commitment polling budget
    pub fn delivery_mode(&self, mode: RelayMode) -> DeliveryMode {
        match mode {
            RelayMode::Submit => DeliveryMode::Submit,
            RelayMode::Observe => DeliveryMode::Observe {
                poll_interval: Duration::from_millis(self.relayer.poll_interval_ms),
                max_rounds: self.relayer.max_poll_rounds,
            },
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_retries: self.relayer.retry_attempts,
            initial_backoff: Duration::from_millis(self.relayer.retry_delay_ms),
            max_backoff: Duration::from_millis(self.relayer.max_retry_delay_ms),
            backoff_multiplier: 2.0,
        }
    }

    pub fn receipt_wait(&self) -> ReceiptWait {
        ReceiptWait {
            poll_interval: Duration::from_millis(self.relayer.poll_interval_ms),
            timeout: self.tx_timeout(),
        }
    }

    pub fn tx_timeout(&self) -> Duration {
        Duration::from_secs(self.relayer.tx_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const KEY: &str = "0xac0974bec39a17e36ba4a6b4d238ff944bacb478cbed5efcae784d7bf4f2ff80";

    fn base_vars() -> HashMap<&'static str, String> {
        HashMap::from([
            ("L1_RPC_URL", "http://localhost:9545".to_string()),
            ("L2_RPC_URL", " http://localhost:8545 , http://backup:8545 ".to_string()),
            ("L1_CHAIN_ID", "31337".to_string()),
            ("L2_CHAIN_ID", "420".to_string()),
            (
                "L1_MESSENGER_ADDRESS",
                "0x6D4528d192dB72E282265D6092F4B872f9Dff69e".to_string(),
            ),
            (
                "L2_MESSENGER_ADDRESS",
                "0x4200000000000000000000000000000000000007".to_string(),
            ),
            (
                "L2_MESSAGE_PASSER_ADDRESS",
                "0x4200000000000000000000000000000000000000".to_string(),
            ),
            (
                "STATE_COMMITMENT_CHAIN_ADDRESS",
                "0x901a629a72A5daF01B89f9A12b2C1f69C2C55e3C".to_string(),
            ),
            ("RELAYER_PRIVATE_KEY", KEY.to_string()),
        ])
    }

    fn load(vars: HashMap<&'static str, String>) -> Result<Config> {
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = load(base_vars()).unwrap();
        assert_eq!(config.relayer.l2_block_offset, 1);
        assert_eq!(config.relayer.l1_confirmations, 0);
        assert_eq!(config.relayer.poll_interval_ms, 1000);
        assert_eq!(config.relayer.max_poll_rounds, 60);
        assert_eq!(config.relayer.retry_attempts, 5);
        assert_eq!(config.relayer.max_retry_delay_ms, 30_000);
        assert_eq!(config.relayer.tx_timeout_secs, 120);
        assert!(!config.relayer.wait_for_fraud_proof_window);
        assert!(config.service.database_url.is_none());
        assert_eq!(config.service.api_bind_address, "0.0.0.0:9090");
        assert!(config.contracts.canonical_transaction_chain.is_none());
        assert_eq!(config.contracts.state_commitment_chain_start_block, 0);
        assert_eq!(config.relayer.deposit_relay_mode, RelayMode::Submit);
        assert_eq!(config.relayer.log_max_block_range, 10_000);
    }

    #[test]
    fn test_relay_modes() {
        let mut vars = base_vars();
        vars.insert("DEPOSIT_RELAY_MODE", "Observe".to_string());
        vars.insert("POLL_INTERVAL_MS", "500".to_string());
        let config = load(vars).unwrap();
        assert_eq!(config.relayer.deposit_relay_mode, RelayMode::Observe);
        assert_eq!(config.relayer.withdrawal_relay_mode, RelayMode::Submit);
        assert_eq!(
            config.delivery_mode(config.relayer.deposit_relay_mode),
            DeliveryMode::Observe {
                poll_interval: Duration::from_millis(500),
                max_rounds: 60,
            }
        );

        let mut vars = base_vars();
        vars.insert("WITHDRAWAL_RELAY_MODE", "sequencer".to_string());
        assert!(load(vars).is_err());
    }

    #[test]
    fn test_rpc_url_list() {
        let config = load(base_vars()).unwrap();
        assert_eq!(config.l2.rpc_url, "http://localhost:8545");
        assert_eq!(config.l2.rpc_fallback_urls, vec!["http://backup:8545"]);
        assert_eq!(
            config.l2.rpc_urls(),
            vec!["http://localhost:8545", "http://backup:8545"]
        );
    }

    #[test]
    fn test_missing_required() {
        let mut vars = base_vars();
        vars.remove("STATE_COMMITMENT_CHAIN_ADDRESS");
        let err = load(vars).unwrap_err();
        assert!(err
            .to_string()
            .contains("STATE_COMMITMENT_CHAIN_ADDRESS environment variable is required"));
    }

    #[test]
    fn test_invalid_values() {
        let mut vars = base_vars();
        vars.insert("L1_MESSENGER_ADDRESS", "0x1234".to_string());
        assert!(load(vars).is_err());

        let mut vars = base_vars();
        vars.insert("MAX_POLL_ROUNDS", "many".to_string());
        assert!(load(vars).is_err());

        let mut vars = base_vars();
        vars.insert("RELAYER_PRIVATE_KEY", "0xabc".to_string());
        assert!(load(vars).is_err());

        let mut vars = base_vars();
        vars.insert("L2_CHAIN_ID", "31337".to_string());
        assert!(load(vars).is_err());

        let mut vars = base_vars();
        vars.insert("MAX_RETRY_DELAY_MS", "10".to_string());
        assert!(load(vars).is_err());
    }

    #[test]
    fn test_overrides_and_derived_configs() {
        let mut vars = base_vars();
        vars.insert("POLL_INTERVAL_MS", "250".to_string());
        vars.insert("WAIT_FOR_FRAUD_PROOF_WINDOW", "true".to_string());
        vars.insert("RETRY_DELAY_MS", "500".to_string());
        vars.insert("DATABASE_URL", "postgres://u:p@localhost/relayer".to_string());
        let config = load(vars).unwrap();

        let poll = config.poll_config();
        assert_eq!(poll.poll_interval, Duration::from_millis(250));
        assert!(poll.wait_for_fraud_proof_window);
        assert_eq!(
            config.retry_config().initial_backoff,
            Duration::from_millis(500)
        );
        assert_eq!(config.receipt_wait().timeout, Duration::from_secs(120));
    }

    #[test]
    fn test_debug_redacts_secrets() {
        let mut vars = base_vars();
        vars.insert("DATABASE_URL", "postgres://user:hunter2@db/relayer".to_string());
        let config = load(vars).unwrap();
        let debug = format!("{:?}", config);
        assert!(!debug.contains(KEY));
        assert!(!debug.contains("hunter2"));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_parse_rpc_urls() {
        assert_eq!(
            parse_rpc_urls("https://a.com,,https://b.com,"),
            vec!["https://a.com", "https://b.com"]
        );
        assert!(parse_rpc_urls("").is_empty());
    }
}

use alloy_primitives::{utils::parse_ether, Address, U256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

use crate::error::{PollError, Result};

const ENV_PREFIX: &str = "POLL_CLIENT_";

// Sepolia testnet
pub const DEFAULT_CHAIN_ID: u64 = 11_155_111;
pub const DEFAULT_PAGE_SIZE: usize = 6;
pub const DEFAULT_FUNDING_AMOUNT: &str = "0.01";
pub const FUNDING_COOLDOWN_SECS: u64 = 7 * 24 * 60 * 60;

/// Externally supplied settings. Nothing chain-specific is hard-coded in the
/// client itself.
#[derive(Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct ClientConfig {
    /// The wallet must be on this chain before accounts are adopted.
    pub chain_id: u64,
    /// Not read by the client. Passed through to whatever builds the
    /// [`WalletProvider`](crate::WalletProvider) and the funding signer.
    pub rpc_url: String,
    pub poll_manager_address: Address,
    pub poll_registry_address: Address,
    /// Private key of the faucet account. Like `rpc_url`, only passed
    /// through to whatever builds the [`FundingSigner`](crate::FundingSigner).
    pub funding_key: Option<String>,
    /// Amount sent per faucet transfer, in ether.
    pub funding_amount: String,
    pub funding_cooldown_secs: u64,
    pub tick_interval_ms: u64,
    pub confirmation_timeout_secs: u64,
    pub page_size: usize,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            chain_id: DEFAULT_CHAIN_ID,
            rpc_url: String::new(),
            poll_manager_address: Address::ZERO,
            poll_registry_address: Address::ZERO,
            funding_key: None,
            funding_amount: DEFAULT_FUNDING_AMOUNT.to_string(),
            funding_cooldown_secs: FUNDING_COOLDOWN_SECS,
            tick_interval_ms: 1_000,
            confirmation_timeout_secs: 60,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }
}

// Keep the funding key out of logs.
impl fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientConfig")
            .field("chain_id", &self.chain_id)
            .field("rpc_url", &self.rpc_url)
            .field("poll_manager_address", &self.poll_manager_address)
            .field("poll_registry_address", &self.poll_registry_address)
            .field("funding_key", &self.funding_key.as_ref().map(|_| "<redacted>"))
            .field("funding_amount", &self.funding_amount)
            .field("funding_cooldown_secs", &self.funding_cooldown_secs)
            .field("tick_interval_ms", &self.tick_interval_ms)
            .field("confirmation_timeout_secs", &self.confirmation_timeout_secs)
            .field("page_size", &self.page_size)
            .finish()
    }
}

impl ClientConfig {
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: ClientConfig = serde_json::from_str(json)
            .map_err(|e| PollError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reads `POLL_CLIENT_*` variables on top of the defaults.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(format!("{}{}", ENV_PREFIX, key)).ok())
    }

    pub(crate) fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = ClientConfig::default();

        if let Some(value) = lookup("CHAIN_ID") {
            config.chain_id = parse_number("CHAIN_ID", &value)?;
        }
        if let Some(value) = lookup("RPC_URL") {
            config.rpc_url = value;
        }
        if let Some(value) = lookup("POLL_MANAGER_ADDRESS") {
            config.poll_manager_address = parse_address("POLL_MANAGER_ADDRESS", &value)?;
        }
        if let Some(value) = lookup("POLL_REGISTRY_ADDRESS") {
            config.poll_registry_address = parse_address("POLL_REGISTRY_ADDRESS", &value)?;
        }
        config.funding_key = lookup("FUNDING_KEY");
        if let Some(value) = lookup("FUNDING_AMOUNT") {
            config.funding_amount = value;
        }
        if let Some(value) = lookup("FUNDING_COOLDOWN_SECS") {
            config.funding_cooldown_secs = parse_number("FUNDING_COOLDOWN_SECS", &value)?;
        }
        if let Some(value) = lookup("TICK_INTERVAL_MS") {
            config.tick_interval_ms = parse_number("TICK_INTERVAL_MS", &value)?;
        }
        if let Some(value) = lookup("CONFIRMATION_TIMEOUT_SECS") {
            config.confirmation_timeout_secs = parse_number("CONFIRMATION_TIMEOUT_SECS", &value)?;
        }
        if let Some(value) = lookup("PAGE_SIZE") {
            config.page_size = parse_number("PAGE_SIZE", &value)?;
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.page_size == 0 {
            return Err(PollError::Config("page_size must be at least 1".to_string()));
        }
        if self.tick_interval_ms == 0 {
            return Err(PollError::Config("tick_interval_ms must be at least 1".to_string()));
        }
        self.funding_amount_wei()?;
        Ok(())
    }

    pub fn funding_amount_wei(&self) -> Result<U256> {
        parse_ether(&self.funding_amount).map_err(|e| {
            PollError::Config(format!("Invalid funding amount {:?}: {}", self.funding_amount, e))
        })
    }

    pub fn funding_cooldown(&self) -> chrono::Duration {
        i64::try_from(self.funding_cooldown_secs)
            .ok()
            .and_then(chrono::Duration::try_seconds)
            .unwrap_or(chrono::Duration::MAX)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn confirmation_timeout(&self) -> Duration {
        Duration::from_secs(self.confirmation_timeout_secs)
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T>
where
    T::Err: fmt::Display,
{
    value
        .trim()
        .parse::<T>()
        .map_err(|e| PollError::Config(format!("Invalid {}{} {:?}: {}", ENV_PREFIX, key, value, e)))
}

fn parse_address(key: &str, value: &str) -> Result<Address> {
    value
        .trim()
        .parse::<Address>()
        .map_err(|e| PollError::Config(format!("Invalid {}{} {:?}: {}", ENV_PREFIX, key, value, e)))
}

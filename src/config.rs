//! Runtime settings for a mining session

use crate::constants::*;
use crate::wallet::Address;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub fee_per_kb: u64,
    /// Recipient of token rewards and sweeps; falls back to the wallet address
    pub mine_to: Option<String>,
    pub mint_message: String,
    pub subscription_check_secs: u64,
    pub mint_time_delay_secs: u64,
    pub results_per_page: usize,
    pub resolve_batch_size: usize,
    /// Base58 version byte of the wallet and mine-to addresses
    pub address_version: u8,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            fee_per_kb: FEE_PER_KB,
            mine_to: None,
            mint_message: String::new(),
            subscription_check_secs: SUBSCRIPTION_CHECK_TIMEOUT.as_secs(),
            mint_time_delay_secs: MINT_TIME_DELAY.as_secs(),
            results_per_page: RESULTS_PER_PAGE,
            resolve_batch_size: RESOLVE_BATCH_SIZE,
            address_version: P2PKH_ADDRESS_VERSION,
        }
    }
}

impl Config {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let payload = fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_json(&payload).with_context(|| format!("parsing config {}", path.display()))
    }

    pub fn from_json(payload: &str) -> Result<Self> {
        let config: Config = serde_json::from_str(payload)?;
        config.mine_to_address()?;
        Ok(config)
    }

    pub fn mine_to_address(&self) -> Result<Option<Address>> {
        let Some(s) = self.mine_to.as_deref().filter(|s| !s.is_empty()) else {
            return Ok(None);
        };
        let address = s.parse::<Address>().with_context(|| format!("invalid mine-to address {s}"))?;
        if address.version != self.address_version {
            bail!("mine-to address {s} has version {:#04x}, expected {:#04x}", address.version, self.address_version);
        }
        Ok(Some(address))
    }

    pub fn subscription_check_timeout(&self) -> Duration {
        Duration::from_secs(self.subscription_check_secs)
    }

    pub fn mint_time_delay(&self) -> Duration {
        Duration::from_secs(self.mint_time_delay_secs)
    }
}

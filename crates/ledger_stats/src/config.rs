//! Pipeline configuration.
//!
//! Load from: env `LEDGER_STATS_CONFIG_PATH`, or `./config/ledger_stats.json`, or
//! `./ledger_stats.json`. Missing keys take their defaults.

use crate::aggregate::reward::RewardSettings;
use crate::aggregate::swap::SwapSettings;
use crate::ledger::types::Coin;
use crate::ledger::LcdConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use time::Duration;
use tracing::warn;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub lcd_url: String,
    /// Tendermint RPC endpoint, used for block-level distribution events.
    pub rpc_url: String,
    pub chain_id: String,
    /// Reward and return totals are expressed in this denom.
    pub reference_denom: String,
    /// Swap volumes are valued in this denom.
    pub valuation_denom: String,
    pub spread_offer_denom: String,
    pub spread_notional: String,
    pub block_reward_ttl_secs: i64,
    pub validator_return_ttl_secs: i64,
    pub return_window_days: i64,
    pub new_validator_max_samples: usize,
    /// Issue spread quotes for denoms with no swaps in the bucket.
    pub quote_idle_denoms: bool,
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let lcd = LcdConfig::default();
        Self {
            lcd_url: lcd.base_url,
            rpc_url: lcd.rpc_url,
            chain_id: "columbus-4".into(),
            reference_denom: "uluna".into(),
            valuation_denom: "uusd".into(),
            spread_offer_denom: "uluna".into(),
            spread_notional: "1000000".into(),
            block_reward_ttl_secs: 12 * 3600,
            validator_return_ttl_secs: 3600,
            return_window_days: 30,
            new_validator_max_samples: 15,
            quote_idle_denoms: true,
            rate_limit_ms: lcd.rate_limit_ms,
            max_retries: lcd.max_retries,
            retry_backoff_ms: lcd.retry_backoff_ms,
            timeout_secs: lcd.timeout_secs,
        }
    }
}

impl PipelineConfig {
    /// Load config from path. Returns default on error or missing file.
    pub fn load_from_path(path: &Path) -> Self {
        let Ok(content) = std::fs::read_to_string(path) else {
            return Self::default();
        };
        serde_json::from_str(&content).unwrap_or_else(|e| {
            warn!(?path, error = %e, "invalid config, using defaults");
            Self::default()
        })
    }

    /// Load config: env LEDGER_STATS_CONFIG_PATH, then ./config/ledger_stats.json, then ./ledger_stats.json.
    pub fn load() -> Self {
        if let Ok(path) = std::env::var("LEDGER_STATS_CONFIG_PATH") {
            let p = Path::new(&path);
            if p.exists() {
                return Self::load_from_path(p);
            }
        }
        for candidate in [
            Path::new("./config/ledger_stats.json"),
            Path::new("./ledger_stats.json"),
        ] {
            if candidate.exists() {
                return Self::load_from_path(candidate);
            }
        }
        Self::default()
    }

    pub fn lcd(&self) -> LcdConfig {
        LcdConfig {
            base_url: self.lcd_url.clone(),
            rpc_url: self.rpc_url.clone(),
            chain_id: self.chain_id.clone(),
            rate_limit_ms: self.rate_limit_ms,
            max_retries: self.max_retries,
            retry_backoff_ms: self.retry_backoff_ms,
            timeout_secs: self.timeout_secs,
        }
    }

    pub fn swap_settings(&self) -> SwapSettings {
        SwapSettings {
            reference_denom: self.reference_denom.clone(),
            valuation_denom: self.valuation_denom.clone(),
            spread_offer: Coin::new(self.spread_offer_denom.clone(), self.spread_notional.clone()),
            quote_idle_denoms: self.quote_idle_denoms,
        }
    }

    pub fn reward_settings(&self) -> RewardSettings {
        RewardSettings {
            reference_denom: self.reference_denom.clone(),
            block_reward_ttl: Duration::seconds(self.block_reward_ttl_secs),
            validator_return_ttl: Duration::seconds(self.validator_return_ttl_secs),
            return_window_days: self.return_window_days,
            new_validator_max_samples: self.new_validator_max_samples,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults() {
        let c = PipelineConfig::default();
        assert_eq!(c.chain_id, "columbus-4");
        assert_eq!(c.reward_settings().block_reward_ttl, Duration::hours(12));
        assert_eq!(c.swap_settings().spread_offer, Coin::new("uluna", "1000000"));
        assert_eq!(c.lcd().base_url, "https://lcd.terra.dev");
        assert_eq!(c.lcd().rpc_url, "http://localhost:26657");
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, r#"{{"chain_id":"tequila-0004","new_validator_max_samples":5}}"#).unwrap();
        let c = PipelineConfig::load_from_path(f.path());
        assert_eq!(c.chain_id, "tequila-0004");
        assert_eq!(c.new_validator_max_samples, 5);
        assert_eq!(c.valuation_denom, "uusd");
    }

    #[test]
    fn invalid_file_falls_back() {
        let mut f = NamedTempFile::new().unwrap();
        write!(f, "not json").unwrap();
        assert_eq!(PipelineConfig::load_from_path(f.path()).chain_id, "columbus-4");
    }
}

//! Ledger-node (LCD) REST client with rate limiting, retries, and not-found mapping.
//!
//! Block-level distribution data is not served by the LCD; it is read from the node's
//! Tendermint RPC (`/block`, `/block_results`) through the same retry and rate-limit path.

use crate::ledger::types::{BlockReward, Coin, RawEvent, RawTransaction};
use crate::math;
use async_trait::async_trait;
use bigdecimal::BigDecimal;
use futures::future::{self, join_all};
use futures::stream::{self, StreamExt, TryStreamExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use time::OffsetDateTime;
use tracing::{debug, info, warn};

const DEFAULT_LCD_URL: &str = "https://lcd.terra.dev";
const DEFAULT_RPC_URL: &str = "http://localhost:26657";
const BLOCK_FETCH_CONCURRENCY: usize = 8;
const RATE_LIMIT_MS: u64 = 50;
const MAX_RETRIES: u32 = 3;
const RETRY_BACKOFF_MS: u64 = 500;
const TIMEOUT_SECS: u64 = 30;

/// Node error messages that mean "absent" rather than "broken".
const NOT_FOUND_FRAGMENTS: &[&str] = &[
    "not found",
    "no del",
    "not ex",
    "failed to find",
    "unknown prop",
    "empty bytes",
    "is not available",
    "current blockchain height",
];

#[derive(Clone, Debug)]
pub struct LcdConfig {
    pub base_url: String,
    pub rpc_url: String,
    pub chain_id: String,
    pub rate_limit_ms: u64,
    pub max_retries: u32,
    pub retry_backoff_ms: u64,
    pub timeout_secs: u64,
}

impl Default for LcdConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_LCD_URL.to_string(),
            rpc_url: DEFAULT_RPC_URL.to_string(),
            chain_id: String::new(),
            rate_limit_ms: RATE_LIMIT_MS,
            max_retries: MAX_RETRIES,
            retry_backoff_ms: RETRY_BACKOFF_MS,
            timeout_secs: TIMEOUT_SECS,
        }
    }
}

#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("request: {0}")]
    Request(#[from] reqwest::Error),
    #[error("url: {0}")]
    Url(#[from] url::ParseError),
    #[error("invalid request: {0}")]
    InvalidRequest(String),
    #[error("api error: status {0} body {1}")]
    Api(u16, String),
    #[error("decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: serde_json::Error,
    },
}

/// Everything the pipeline reads from the ledger node.
///
/// `Ok(None)` means the node reported absence; errors are reserved for failures.
#[async_trait]
pub trait LedgerClient: Send + Sync {
    async fn tx(&self, hash: &str) -> Result<Option<RawTransaction>, LedgerError>;

    async fn oracle_actives(&self) -> Result<Vec<String>, LedgerError>;

    async fn oracle_price(&self, denom: &str) -> Result<Option<BigDecimal>, LedgerError>;

    /// Quote for swapping `offer` into `ask_denom` at current market conditions.
    async fn swap_quote(&self, offer: &Coin, ask_denom: &str)
        -> Result<Option<Coin>, LedgerError>;

    async fn total_issuance(&self) -> Result<Vec<Coin>, LedgerError>;

    /// Per-validator reward and commission distributed at `height`.
    async fn block_reward(&self, height: u64) -> Result<Option<BlockReward>, LedgerError>;

    /// Block rewards for heights `from..=to`, ascending. Heights the node cannot serve are skipped.
    async fn block_rewards(&self, from: u64, to: u64) -> Result<Vec<BlockReward>, LedgerError> {
        stream::iter(from..=to)
            .map(|height| self.block_reward(height))
            .buffered(BLOCK_FETCH_CONCURRENCY)
            .try_filter_map(future::ok)
            .try_collect()
            .await
    }

    /// Price of every active denom. Denoms without a price are left out.
    async fn active_oracle_prices(&self) -> Result<BTreeMap<String, BigDecimal>, LedgerError> {
        let actives = self.oracle_actives().await?;
        let prices = join_all(actives.iter().map(|d| self.oracle_price(d))).await;
        let mut out = BTreeMap::new();
        for (denom, price) in actives.into_iter().zip(prices) {
            if let Some(p) = price? {
                out.insert(denom, p);
            }
        }
        Ok(out)
    }
}

/// LCD responses at height are wrapped as `{ "height": "..", "result": .. }`, RPC responses as
/// `{ "jsonrpc": "2.0", "result": .. }`.
fn unwrap_result(value: serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(mut m)
            if m.contains_key("result") && (m.contains_key("height") || m.contains_key("jsonrpc")) =>
        {
            m.remove("result").unwrap_or(serde_json::Value::Null)
        }
        other => other,
    }
}

/// `base * 2^attempt`, saturating instead of overflowing for large attempt counts.
fn backoff_ms(base: u64, attempt: u32) -> u64 {
    base.saturating_mul(1u64.checked_shl(attempt).unwrap_or(u64::MAX))
}

fn is_not_found(body: &str) -> bool {
    let lower = body.to_lowercase();
    NOT_FOUND_FRAGMENTS.iter().any(|f| lower.contains(f))
}

fn decode<T: DeserializeOwned>(
    what: &'static str,
    value: serde_json::Value,
) -> Result<T, LedgerError> {
    serde_json::from_value(value).map_err(|source| LedgerError::Decode { what, source })
}

fn join_url(base: &str, path: &str, params: &[(&str, &str)]) -> Result<url::Url, LedgerError> {
    let full = format!("{}{}", base.trim_end_matches('/'), path);
    Ok(url::Url::parse_with_params(&full, params)?)
}

#[derive(Deserialize)]
struct RpcBlock {
    block: RpcBlockBody,
}

#[derive(Deserialize)]
struct RpcBlockBody {
    header: RpcHeader,
}

#[derive(Deserialize)]
struct RpcHeader {
    #[serde(with = "time::serde::rfc3339")]
    time: OffsetDateTime,
}

#[derive(Deserialize)]
struct RpcBlockResults {
    #[serde(default)]
    begin_block_events: Option<Vec<RawEvent>>,
}

pub struct LcdClient {
    config: LcdConfig,
    client: reqwest::Client,
    last_request: std::sync::Mutex<Option<OffsetDateTime>>,
    request_count: AtomicU64,
}

impl LcdClient {
    pub fn new(config: LcdConfig) -> Result<Self, LedgerError> {
        let client = reqwest::Client::builder()
            .use_rustls_tls()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self {
            config,
            client,
            last_request: std::sync::Mutex::new(None),
            request_count: AtomicU64::new(0),
        })
    }

    async fn rate_limit(&self) {
        let prev = match self.last_request.lock() {
            Ok(last) => *last,
            Err(poisoned) => *poisoned.into_inner(),
        };
        let sleep_ms = prev.map_or(0, |prev| {
            let elapsed = (OffsetDateTime::now_utc() - prev).whole_milliseconds();
            let need = i128::from(self.config.rate_limit_ms);
            u64::try_from((need - elapsed).max(0)).unwrap_or(0)
        });
        if sleep_ms > 0 {
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
        if let Ok(mut last) = self.last_request.lock() {
            *last = Some(OffsetDateTime::now_utc());
        }
    }

    fn url(&self, path: &str, params: &[(&str, &str)]) -> Result<url::Url, LedgerError> {
        join_url(&self.config.base_url, path, params)
    }

    async fn get_json(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<serde_json::Value>, LedgerError> {
        let url = self.url(path, params)?;
        self.fetch(url).await
    }

    async fn get_rpc(
        &self,
        path: &str,
        params: &[(&str, &str)],
    ) -> Result<Option<serde_json::Value>, LedgerError> {
        let url = join_url(&self.config.rpc_url, path, params)?;
        self.fetch(url).await
    }

    /// GET with retries. Returns `Ok(None)` when the node reports absence.
    async fn fetch(&self, url: url::Url) -> Result<Option<serde_json::Value>, LedgerError> {
        self.rate_limit().await;

        let mut last_err = None;
        for attempt in 0..=self.config.max_retries {
            match self.client.get(url.clone()).send().await {
                Ok(r) => {
                    let status = r.status();
                    let body = r.text().await.unwrap_or_default();
                    if status.as_u16() == 404 || (!status.is_success() && is_not_found(&body)) {
                        debug!(%url, "not found");
                        return Ok(None);
                    }
                    if status.as_u16() == 400 {
                        return Err(LedgerError::InvalidRequest(body));
                    }
                    if !status.is_success() {
                        last_err = Some(LedgerError::Api(status.as_u16(), body));
                        if attempt < self.config.max_retries {
                            let ms = backoff_ms(self.config.retry_backoff_ms, attempt);
                            tokio::time::sleep(Duration::from_millis(ms)).await;
                        }
                        continue;
                    }
                    self.request_count.fetch_add(1, Ordering::Relaxed);
                    let value: serde_json::Value = serde_json::from_str(&body)
                        .map_err(|source| LedgerError::Decode { what: "body", source })?;
                    if value.get("jsonrpc").is_some() && value.get("error").is_some() {
                        if is_not_found(&body) {
                            debug!(%url, "not found");
                            return Ok(None);
                        }
                        return Err(LedgerError::Api(status.as_u16(), body));
                    }
                    return Ok(Some(unwrap_result(value)));
                }
                Err(e) => {
                    last_err = Some(LedgerError::Request(e));
                    if attempt < self.config.max_retries {
                        let ms = backoff_ms(self.config.retry_backoff_ms, attempt);
                        warn!(attempt, ms, "retry after error");
                        tokio::time::sleep(Duration::from_millis(ms)).await;
                    }
                }
            }
        }
        Err(last_err.unwrap_or(LedgerError::Api(0, "unknown".to_string())))
    }

    pub fn request_count(&self) -> u64 {
        self.request_count.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl LedgerClient for LcdClient {
    async fn tx(&self, hash: &str) -> Result<Option<RawTransaction>, LedgerError> {
        let path = format!("/txs/{}", urlencoding::encode(hash));
        let Some(body) = self.get_json(&path, &[]).await? else {
            return Ok(None);
        };
        let mut tx: RawTransaction = decode("tx", body)?;
        if tx.chain_id.is_empty() {
            tx.chain_id = self.config.chain_id.clone();
        }
        info!(hash = %tx.hash, height = tx.height, msgs = tx.messages().len(), "tx");
        Ok(Some(tx))
    }

    async fn oracle_actives(&self) -> Result<Vec<String>, LedgerError> {
        match self.get_json("/oracle/denoms/actives", &[]).await? {
            Some(body) => decode("oracle actives", body),
            None => Ok(vec![]),
        }
    }

    async fn oracle_price(&self, denom: &str) -> Result<Option<BigDecimal>, LedgerError> {
        let path = format!("/oracle/denoms/{}/exchange_rate", urlencoding::encode(denom));
        let Some(body) = self.get_json(&path, &[]).await? else {
            return Ok(None);
        };
        let raw: String = decode("exchange rate", body)?;
        math::parse(&raw)
            .map(Some)
            .map_err(|e| LedgerError::InvalidRequest(e.to_string()))
    }

    async fn swap_quote(
        &self,
        offer: &Coin,
        ask_denom: &str,
    ) -> Result<Option<Coin>, LedgerError> {
        let offer_coin = format!("{}{}", offer.amount, offer.denom);
        let params = [("offer_coin", offer_coin.as_str()), ("ask_denom", ask_denom)];
        match self.get_json("/market/swap", &params).await? {
            Some(body) => decode("swap quote", body).map(Some),
            None => Ok(None),
        }
    }

    async fn total_issuance(&self) -> Result<Vec<Coin>, LedgerError> {
        match self.get_json("/supply/total", &[]).await? {
            Some(body) => decode("total supply", body),
            None => Ok(vec![]),
        }
    }

    async fn block_reward(&self, height: u64) -> Result<Option<BlockReward>, LedgerError> {
        let h = height.to_string();
        let params = [("height", h.as_str())];
        let (block, results) = futures::try_join!(
            self.get_rpc("/block", &params),
            self.get_rpc("/block_results", &params),
        )?;
        let (Some(block), Some(results)) = (block, results) else {
            debug!(height, "block not available");
            return Ok(None);
        };
        let block: RpcBlock = decode("block", block)?;
        let results: RpcBlockResults = decode("block results", results)?;
        let events = results.begin_block_events.unwrap_or_default();
        let reward = BlockReward::from_events(height, block.block.header.time, &events)
            .map_err(|e| LedgerError::InvalidRequest(e.to_string()))?;
        debug!(height, validators = reward.reward_per_val.len(), "block reward");
        Ok(Some(reward))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unwraps_height_result_envelope() {
        let v = serde_json::json!({ "height": "10", "result": ["uusd", "ukrw"] });
        assert_eq!(unwrap_result(v), serde_json::json!(["uusd", "ukrw"]));
        let bare = serde_json::json!({ "denom": "uluna" });
        assert_eq!(unwrap_result(bare.clone()), bare);
    }

    #[test]
    fn unwraps_jsonrpc_envelope() {
        let v = serde_json::json!({ "jsonrpc": "2.0", "id": -1, "result": { "height": "7" } });
        assert_eq!(unwrap_result(v), serde_json::json!({ "height": "7" }));
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(500, 0), 500);
        assert_eq!(backoff_ms(500, 3), 4000);
        assert_eq!(backoff_ms(500, 63), u64::MAX);
        assert_eq!(backoff_ms(500, 64), u64::MAX);
        assert_eq!(backoff_ms(0, 200), 0);
    }

    #[test]
    fn decodes_block_results_events() {
        let body = serde_json::json!({
            "height": "1523400",
            "txs_results": null,
            "begin_block_events": [
                { "type": "commission", "attributes": [
                    { "key": "amount", "value": "2uluna", "index": true },
                    { "key": "validator", "value": "terravaloper1a", "index": true }
                ] }
            ]
        });
        let results: RpcBlockResults = decode("block results", body).unwrap();
        let events = results.begin_block_events.unwrap_or_default();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].attribute("validator"), Some("terravaloper1a"));

        let empty: RpcBlockResults =
            decode("block results", serde_json::json!({ "begin_block_events": null })).unwrap();
        assert!(empty.begin_block_events.is_none());
    }

    #[test]
    fn not_found_messages() {
        assert!(is_not_found("{\"error\":\"account Not Found\"}"));
        assert!(is_not_found("no delegation for this (address, validator) pair"));
        assert!(is_not_found("unknown proposal 99"));
        assert!(is_not_found(
            "height 99999999 must be less than or equal to the current blockchain height 1523500"
        ));
        assert!(!is_not_found("internal error"));
    }

    #[test]
    fn url_carries_query_params() {
        let client = LcdClient::new(LcdConfig {
            base_url: "http://localhost:1317/".into(),
            ..Default::default()
        })
        .unwrap();
        let url = client
            .url("/market/swap", &[("offer_coin", "1000000uluna"), ("ask_denom", "uusd")])
            .unwrap();
        assert_eq!(
            url.as_str(),
            "http://localhost:1317/market/swap?offer_coin=1000000uluna&ask_denom=uusd"
        );
    }
}

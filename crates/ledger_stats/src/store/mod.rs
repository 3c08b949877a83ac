//! Persistence collaborators: what the pipeline reads and what it writes.
//!
//! Every `save_*` call is one batch and one commit point; a failed batch leaves nothing behind.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::aggregate::reward::ValidatorReturnInfo;
use crate::aggregate::swap::SwapAggregate;
use crate::ledger::types::{BlockReward, RawTransaction};
use crate::price::{PriceHistory, Prices};
use crate::tx::account::AccountTxRecord;
use async_trait::async_trait;
use thiserror::Error;
use time::OffsetDateTime;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("json: {0}")]
    Json(#[from] serde_json::Error),
    #[error("corrupt {table} row: {reason}")]
    Corrupt { table: &'static str, reason: String },
}

#[async_trait]
pub trait TxSource: Send + Sync {
    /// Stored transactions carrying a `type_tag` message with timestamp in `[from, to)`.
    async fn txs_with_message(
        &self,
        type_tag: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<RawTransaction>, StoreError>;
}

#[async_trait]
pub trait PriceSource: Send + Sync {
    /// Prices recorded at exactly `at`.
    async fn prices_at(&self, at: OffsetDateTime) -> Result<Prices, StoreError>;

    /// Mean price per denom over `[from, to)`.
    async fn average_prices(&self, from: OffsetDateTime, to: OffsetDateTime) -> Result<Prices, StoreError>;

    /// Daily snapshots: the last recorded price of each denom on each day.
    async fn daily_prices(&self) -> Result<PriceHistory, StoreError>;
}

#[async_trait]
pub trait BlockRewardSource: Send + Sync {
    /// Blocks with timestamp in `[from, to)`, ascending by height.
    async fn block_rewards(&self, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<BlockReward>, StoreError>;
}

#[async_trait]
pub trait ReturnInfoSource: Send + Sync {
    /// Daily return rows for `operator` with timestamp in `[from, to)`.
    async fn return_infos(
        &self,
        operator: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<ValidatorReturnInfo>, StoreError>;
}

#[async_trait]
pub trait RecordSink: Send + Sync {
    /// Insert or replace fetched transactions.
    async fn save_txs(&self, txs: &[RawTransaction]) -> Result<(), StoreError>;
    /// Record the oracle prices observed at `at`.
    async fn save_prices(&self, at: OffsetDateTime, prices: &Prices) -> Result<(), StoreError>;
    async fn save_block_rewards(&self, blocks: &[BlockReward]) -> Result<(), StoreError>;
    async fn save_account_txs(&self, records: &[AccountTxRecord]) -> Result<(), StoreError>;
    async fn save_swaps(&self, swaps: &[SwapAggregate]) -> Result<(), StoreError>;
    async fn save_return_infos(&self, infos: &[ValidatorReturnInfo]) -> Result<(), StoreError>;
}

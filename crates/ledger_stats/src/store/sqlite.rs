//! SQLite-backed store for transactions, prices, block rewards, and pipeline output.

use super::{BlockRewardSource, PriceSource, RecordSink, ReturnInfoSource, StoreError, TxSource};
use crate::aggregate::reward::ValidatorReturnInfo;
use crate::aggregate::swap::SwapAggregate;
use crate::ledger::types::{BlockReward, RawTransaction};
use crate::math;
use crate::price::{PriceHistory, Prices};
use crate::tx::account::AccountTxRecord;
use async_trait::async_trait;
use bigdecimal::{BigDecimal, Zero};
use rusqlite::{params, Connection};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use time::OffsetDateTime;
use tracing::debug;

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS txs (
    hash TEXT PRIMARY KEY,
    chain_id TEXT NOT NULL,
    height INTEGER NOT NULL,
    timestamp INTEGER NOT NULL,
    data TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_txs_timestamp ON txs(timestamp);

CREATE TABLE IF NOT EXISTS account_txs (
    account TEXT NOT NULL,
    hash TEXT NOT NULL,
    type TEXT NOT NULL,
    chain_id TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    PRIMARY KEY (account, hash, type)
);

CREATE TABLE IF NOT EXISTS prices (
    datetime INTEGER NOT NULL,
    denom TEXT NOT NULL,
    price TEXT NOT NULL,
    PRIMARY KEY (datetime, denom)
);

CREATE TABLE IF NOT EXISTS swaps (
    datetime INTEGER NOT NULL,
    denom TEXT NOT NULL,
    in_amount TEXT,
    in_usd TEXT,
    out_amount TEXT,
    out_usd TEXT,
    fee TEXT,
    fee_usd TEXT,
    spread TEXT,
    PRIMARY KEY (datetime, denom)
);

CREATE TABLE IF NOT EXISTS block_rewards (
    height INTEGER PRIMARY KEY,
    timestamp INTEGER NOT NULL,
    reward_per_val TEXT NOT NULL,
    commission_per_val TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_block_rewards_timestamp ON block_rewards(timestamp);

CREATE TABLE IF NOT EXISTS validator_return_info (
    operator_address TEXT NOT NULL,
    timestamp INTEGER NOT NULL,
    reward TEXT NOT NULL,
    commission TEXT NOT NULL,
    avg_voting_power TEXT NOT NULL,
    PRIMARY KEY (operator_address, timestamp)
);
"#;

fn from_unix(table: &'static str, secs: i64) -> Result<OffsetDateTime, StoreError> {
    OffsetDateTime::from_unix_timestamp(secs).map_err(|e| StoreError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

fn decimal(table: &'static str, s: &str) -> Result<BigDecimal, StoreError> {
    math::parse(s).map_err(|e| StoreError::Corrupt {
        table,
        reason: e.to_string(),
    })
}

/// All tables live in one database file; writes go through one connection.
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open or create the store at `path`. Creates parent dirs if needed.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|e| std::io::Error::other(e.to_string()).into())
    }

    /// Stored account rows for `account`, newest first.
    pub fn account_txs(&self, account: &str) -> Result<Vec<AccountTxRecord>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT account, hash, type, chain_id, timestamp FROM account_txs WHERE account = ?1 ORDER BY timestamp DESC, hash",
        )?;
        let rows = stmt
            .query_map([account], |r| {
                Ok((
                    r.get::<_, String>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, i64>(4)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(account, tx_hash, role, chain_id, ts)| {
                Ok(AccountTxRecord {
                    account,
                    tx_hash,
                    role,
                    chain_id,
                    timestamp: from_unix("account_txs", ts)?,
                })
            })
            .collect()
    }

    /// Stored swap aggregates for the bucket starting at `at`.
    pub fn swaps_at(&self, at: OffsetDateTime) -> Result<Vec<SwapAggregate>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT denom, in_amount, in_usd, out_amount, out_usd, fee, fee_usd, spread FROM swaps WHERE datetime = ?1 ORDER BY denom",
        )?;
        let rows = stmt
            .query_map([at.unix_timestamp()], |r| {
                Ok(SwapAggregate {
                    denom: r.get(0)?,
                    bucket_start: at,
                    in_amount: r.get(1)?,
                    in_usd: r.get(2)?,
                    out: r.get(3)?,
                    out_usd: r.get(4)?,
                    fee: r.get(5)?,
                    fee_usd: r.get(6)?,
                    spread: r.get(7)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    }

    fn query_txs(&self, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<RawTransaction>, StoreError> {
        let conn = self.conn()?;
        let mut stmt =
            conn.prepare("SELECT data FROM txs WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY timestamp, hash")?;
        let rows = stmt
            .query_map([from.unix_timestamp(), to.unix_timestamp()], |r| r.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows.iter()
            .map(|data| serde_json::from_str(data).map_err(StoreError::from))
            .collect()
    }

    fn query_prices(
        &self,
        sql: &str,
        bind: &[i64],
    ) -> Result<Vec<(i64, String, BigDecimal)>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(rusqlite::params_from_iter(bind.iter()), |r| {
                Ok((r.get::<_, i64>(0)?, r.get::<_, String>(1)?, r.get::<_, String>(2)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(at, denom, price)| Ok((at, denom, decimal("prices", &price)?)))
            .collect()
    }
}

#[async_trait]
impl TxSource for SqliteStore {
    async fn txs_with_message(
        &self,
        type_tag: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<RawTransaction>, StoreError> {
        let mut txs = self.query_txs(from, to)?;
        txs.retain(|tx| tx.has_message_type(type_tag));
        Ok(txs)
    }
}

#[async_trait]
impl PriceSource for SqliteStore {
    async fn prices_at(&self, at: OffsetDateTime) -> Result<Prices, StoreError> {
        let rows = self.query_prices(
            "SELECT datetime, denom, price FROM prices WHERE datetime = ?1",
            &[at.unix_timestamp()],
        )?;
        Ok(rows.into_iter().map(|(_, denom, price)| (denom, price)).collect())
    }

    async fn average_prices(&self, from: OffsetDateTime, to: OffsetDateTime) -> Result<Prices, StoreError> {
        let rows = self.query_prices(
            "SELECT datetime, denom, price FROM prices WHERE datetime >= ?1 AND datetime < ?2",
            &[from.unix_timestamp(), to.unix_timestamp()],
        )?;
        let mut sums: BTreeMap<String, (BigDecimal, u64)> = BTreeMap::new();
        for (_, denom, price) in rows {
            let entry = sums.entry(denom).or_insert_with(|| (BigDecimal::zero(), 0));
            entry.0 += price;
            entry.1 += 1;
        }
        Ok(sums
            .into_iter()
            .map(|(denom, (sum, n))| (denom, sum / BigDecimal::from(n)))
            .collect())
    }

    async fn daily_prices(&self) -> Result<PriceHistory, StoreError> {
        let rows = self.query_prices(
            "SELECT datetime, denom, price FROM prices ORDER BY datetime",
            &[],
        )?;
        let mut history = PriceHistory::default();
        for (at, denom, price) in rows {
            history.insert(from_unix("prices", at)?.date(), &denom, price);
        }
        Ok(history)
    }
}

#[async_trait]
impl BlockRewardSource for SqliteStore {
    async fn block_rewards(&self, from: OffsetDateTime, to: OffsetDateTime) -> Result<Vec<BlockReward>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT height, timestamp, reward_per_val, commission_per_val FROM block_rewards WHERE timestamp >= ?1 AND timestamp < ?2 ORDER BY height",
        )?;
        let rows = stmt
            .query_map([from.unix_timestamp(), to.unix_timestamp()], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, i64>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(height, ts, reward, commission)| {
                Ok(BlockReward {
                    height: u64::try_from(height).unwrap_or_default(),
                    timestamp: from_unix("block_rewards", ts)?,
                    reward_per_val: serde_json::from_str(&reward)?,
                    commission_per_val: serde_json::from_str(&commission)?,
                })
            })
            .collect()
    }
}

#[async_trait]
impl ReturnInfoSource for SqliteStore {
    async fn return_infos(
        &self,
        operator: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Vec<ValidatorReturnInfo>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT timestamp, reward, commission, avg_voting_power FROM validator_return_info WHERE operator_address = ?1 AND timestamp >= ?2 AND timestamp < ?3 ORDER BY timestamp",
        )?;
        let rows = stmt
            .query_map(params![operator, from.unix_timestamp(), to.unix_timestamp()], |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                ))
            })?
            .collect::<Result<Vec<_>, _>>()?;
        rows.into_iter()
            .map(|(ts, reward, commission, avg_voting_power)| {
                Ok(ValidatorReturnInfo {
                    operator_address: operator.to_string(),
                    timestamp: from_unix("validator_return_info", ts)?,
                    reward,
                    commission,
                    avg_voting_power,
                })
            })
            .collect()
    }
}

#[async_trait]
impl RecordSink for SqliteStore {
    async fn save_txs(&self, txs: &[RawTransaction]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let db = conn.transaction()?;
        {
            let mut stmt = db.prepare(
                "INSERT OR REPLACE INTO txs (hash, chain_id, height, timestamp, data) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for tx in txs {
                let data = serde_json::to_string(tx)?;
                stmt.execute(params![
                    tx.hash,
                    tx.chain_id,
                    i64::try_from(tx.height).unwrap_or(i64::MAX),
                    tx.timestamp.unix_timestamp(),
                    data
                ])?;
            }
        }
        db.commit()?;
        debug!(count = txs.len(), "saved txs");
        Ok(())
    }

    async fn save_prices(&self, at: OffsetDateTime, prices: &Prices) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let db = conn.transaction()?;
        {
            let mut stmt =
                db.prepare("INSERT OR REPLACE INTO prices (datetime, denom, price) VALUES (?1, ?2, ?3)")?;
            for (denom, price) in prices {
                stmt.execute(params![at.unix_timestamp(), denom, math::format(price)])?;
            }
        }
        db.commit()?;
        debug!(at = %at, count = prices.len(), "saved prices");
        Ok(())
    }

    async fn save_block_rewards(&self, blocks: &[BlockReward]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let db = conn.transaction()?;
        {
            let mut stmt = db.prepare(
                "INSERT OR REPLACE INTO block_rewards (height, timestamp, reward_per_val, commission_per_val) VALUES (?1, ?2, ?3, ?4)",
            )?;
            for b in blocks {
                stmt.execute(params![
                    i64::try_from(b.height).unwrap_or(i64::MAX),
                    b.timestamp.unix_timestamp(),
                    serde_json::to_string(&b.reward_per_val)?,
                    serde_json::to_string(&b.commission_per_val)?
                ])?;
            }
        }
        db.commit()?;
        debug!(count = blocks.len(), "saved block rewards");
        Ok(())
    }

    async fn save_account_txs(&self, records: &[AccountTxRecord]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let db = conn.transaction()?;
        {
            let mut stmt = db.prepare(
                "INSERT OR REPLACE INTO account_txs (account, hash, type, chain_id, timestamp) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for r in records {
                stmt.execute(params![r.account, r.tx_hash, r.role, r.chain_id, r.timestamp.unix_timestamp()])?;
            }
        }
        db.commit()?;
        debug!(count = records.len(), "saved account txs");
        Ok(())
    }

    async fn save_swaps(&self, swaps: &[SwapAggregate]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let db = conn.transaction()?;
        {
            let mut stmt = db.prepare(
                "INSERT OR REPLACE INTO swaps (datetime, denom, in_amount, in_usd, out_amount, out_usd, fee, fee_usd, spread) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?;
            for s in swaps {
                stmt.execute(params![
                    s.bucket_start.unix_timestamp(),
                    s.denom,
                    s.in_amount,
                    s.in_usd,
                    s.out,
                    s.out_usd,
                    s.fee,
                    s.fee_usd,
                    s.spread
                ])?;
            }
        }
        db.commit()?;
        debug!(count = swaps.len(), "saved swaps");
        Ok(())
    }

    async fn save_return_infos(&self, infos: &[ValidatorReturnInfo]) -> Result<(), StoreError> {
        let mut conn = self.conn()?;
        let db = conn.transaction()?;
        {
            let mut stmt = db.prepare(
                "INSERT OR REPLACE INTO validator_return_info (operator_address, timestamp, reward, commission, avg_voting_power) VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for i in infos {
                stmt.execute(params![
                    i.operator_address,
                    i.timestamp.unix_timestamp(),
                    i.reward,
                    i.commission,
                    i.avg_voting_power
                ])?;
            }
        }
        db.commit()?;
        Ok(())
    }
}

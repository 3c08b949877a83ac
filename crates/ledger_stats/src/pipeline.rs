//! Cycle orchestration. Each cycle reads everything it needs first and writes its output in a
//! single batch at the end, so a failed lookup leaves no partial records.

use crate::aggregate::reward::{ValidatorReturnEngine, ValidatorReturnInfo};
use crate::aggregate::swap::{build_aggregates, quote_spreads, swap_totals, SwapAggregate, SwapSettings};
use crate::error::PipelineError;
use crate::ledger::types::{BlockReward, RawTransaction};
use crate::ledger::{minute_bucket_before, LedgerClient};
use crate::price::Prices;
use crate::store::{PriceSource, RecordSink, TxSource};
use crate::tx::account::{account_tx_records, AccountTxRecord};
use crate::tx::msg::MSG_SWAP;
use futures::future::join_all;
use std::collections::BTreeSet;
use time::{Date, OffsetDateTime};
use tracing::{info, warn};

/// Store `txs`, then index them by participant and persist the rows in one batch.
/// Transactions are written first so an account row never points at a missing tx.
pub async fn index_transactions(
    sink: &dyn RecordSink,
    txs: &[RawTransaction],
) -> Result<Vec<AccountTxRecord>, PipelineError> {
    let records: Vec<AccountTxRecord> = txs.iter().flat_map(account_tx_records).collect();
    sink.save_txs(txs).await?;
    sink.save_account_txs(&records).await?;
    info!(txs = txs.len(), records = records.len(), "indexed transactions");
    Ok(records)
}

/// Fetch one transaction by hash and index it. An unknown hash indexes nothing.
pub async fn index_transaction(
    client: &dyn LedgerClient,
    sink: &dyn RecordSink,
    hash: &str,
) -> Result<Option<(RawTransaction, Vec<AccountTxRecord>)>, PipelineError> {
    let Some(tx) = client.tx(hash).await? else {
        warn!(%hash, "transaction not found");
        return Ok(None);
    };
    let records = index_transactions(sink, std::slice::from_ref(&tx)).await?;
    Ok(Some((tx, records)))
}

/// Record the current oracle prices under the minute bucket before `now`, the bucket the
/// swap cycle at `now` reads.
pub async fn record_prices(
    client: &dyn LedgerClient,
    sink: &dyn RecordSink,
    now: OffsetDateTime,
) -> Result<(OffsetDateTime, Prices), PipelineError> {
    let (bucket, _) = minute_bucket_before(now);
    let prices = client.active_oracle_prices().await?;
    sink.save_prices(bucket, &prices).await?;
    info!(%bucket, count = prices.len(), "recorded oracle prices");
    Ok((bucket, prices))
}

/// Fetch block rewards for heights `from..=to` and persist them in one batch.
/// Nothing is written if any height fails to load.
pub async fn ingest_block_rewards(
    client: &dyn LedgerClient,
    sink: &dyn RecordSink,
    from: u64,
    to: u64,
) -> Result<Vec<BlockReward>, PipelineError> {
    let blocks = client.block_rewards(from, to).await?;
    sink.save_block_rewards(&blocks).await?;
    info!(from, to, blocks = blocks.len(), "ingested block rewards");
    Ok(blocks)
}

/// Aggregate swaps in the whole minute before `now` and persist one row per issued denom.
pub async fn run_swap_cycle(
    client: &dyn LedgerClient,
    tx_source: &dyn TxSource,
    price_source: &dyn PriceSource,
    sink: &dyn RecordSink,
    settings: &SwapSettings,
    now: OffsetDateTime,
) -> Result<Vec<SwapAggregate>, PipelineError> {
    let (start, end) = minute_bucket_before(now);
    let txs = tx_source.txs_with_message(MSG_SWAP, start, end).await?;
    let totals = swap_totals(&txs);
    let prices = price_source.prices_at(start).await?;

    let quoted: BTreeSet<String> = if settings.quote_idle_denoms {
        prices.keys().cloned().collect()
    } else {
        totals.denoms().into_iter().map(str::to_string).collect()
    };
    let (spreads, issuance) = futures::try_join!(
        quote_spreads(client, &prices, &quoted, &settings.spread_offer),
        client.total_issuance(),
    )?;
    let issued: BTreeSet<String> = issuance.into_iter().map(|c| c.denom).collect();

    let aggregates = build_aggregates(start, &issued, &totals, &prices, &spreads, settings);
    sink.save_swaps(&aggregates).await?;
    info!(
        bucket = %start,
        txs = txs.len(),
        denoms = aggregates.len(),
        spreads = spreads.len(),
        "swap cycle complete"
    );
    Ok(aggregates)
}

/// Daily return rows for `validators` (operator, average voting power) on `day`, persisted in
/// one batch. A validator whose voting power is zero is left out; any other failure aborts.
pub async fn collect_validator_returns(
    engine: &ValidatorReturnEngine,
    sink: &dyn RecordSink,
    validators: &[(String, String)],
    day: Date,
) -> Result<Vec<ValidatorReturnInfo>, PipelineError> {
    let results = join_all(
        validators
            .iter()
            .map(|(operator, vp)| engine.daily_return_info(operator, vp, day)),
    )
    .await;

    let mut infos = Vec::with_capacity(results.len());
    for ((operator, _), result) in validators.iter().zip(results) {
        match result {
            Ok(info) => infos.push(info),
            Err(PipelineError::DivisionByZero) => {
                warn!(%operator, "zero voting power, skipped");
            }
            Err(e) => return Err(e),
        }
    }
    sink.save_return_infos(&infos).await?;
    info!(%day, validators = infos.len(), "validator returns collected");
    Ok(infos)
}

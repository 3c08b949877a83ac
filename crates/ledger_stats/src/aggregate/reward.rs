//! Validator reward/return engine.
//!
//! Per-block reward and commission maps are folded over a time range, converted into the
//! reference denom at the range's average prices, and turned into a net reward and an
//! annualized return. Block fetches and whole computations sit behind single-flight TTL caches.

use crate::cache::{Clock, TtlCache};
use crate::error::PipelineError;
use crate::ledger::types::BlockReward;
use crate::ledger::{start_of_day, yesterday_window};
use crate::math::{self, additive_merge, DenomAmounts, MathError};
use crate::price::{self, Prices};
use crate::store::{BlockRewardSource, PriceSource, ReturnInfoSource};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;
use time::{Date, Duration, OffsetDateTime};
use tracing::{debug, info, warn};

/// Reward and commission of one validator folded over `[from, to)`.
#[derive(Clone, Debug, PartialEq)]
pub struct ValidatorRewardAccumulator {
    pub operator_address: String,
    pub from: OffsetDateTime,
    pub to: OffsetDateTime,
    pub reward_by_denom: DenomAmounts,
    pub commission_by_denom: DenomAmounts,
}

/// Integer part of each numeric amount. Non-numeric amounts are dropped.
fn truncated(amounts: &BTreeMap<String, String>) -> DenomAmounts {
    amounts
        .iter()
        .filter_map(|(denom, amount)| {
            match math::integer_portion(amount).and_then(|s| math::parse(&s)) {
                Ok(v) => Some((denom.clone(), v)),
                Err(e) => {
                    warn!(%denom, %amount, error = %e, "skipping reward amount");
                    None
                }
            }
        })
        .collect()
}

impl ValidatorRewardAccumulator {
    pub fn new(operator_address: impl Into<String>, from: OffsetDateTime, to: OffsetDateTime) -> Self {
        Self {
            operator_address: operator_address.into(),
            from,
            to,
            reward_by_denom: DenomAmounts::new(),
            commission_by_denom: DenomAmounts::new(),
        }
    }

    pub fn fold_block(&mut self, block: &BlockReward) {
        if let Some(reward) = block.reward_per_val.get(&self.operator_address) {
            additive_merge(&mut self.reward_by_denom, &truncated(reward));
        }
        if let Some(commission) = block.commission_per_val.get(&self.operator_address) {
            additive_merge(&mut self.commission_by_denom, &truncated(commission));
        }
    }

    pub fn fold<'a>(
        operator_address: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
        blocks: impl IntoIterator<Item = &'a BlockReward>,
    ) -> Self {
        let mut acc = Self::new(operator_address, from, to);
        for block in blocks {
            acc.fold_block(block);
        }
        acc
    }
}

/// Sum of `amounts` in the reference denom. Denoms that cannot be converted (no price, or a
/// zero price) are left out of the sum and recorded in `unpriced`.
fn reference_total(
    amounts: &DenomAmounts,
    reference_denom: &str,
    prices: &Prices,
    unpriced: &mut BTreeSet<String>,
) -> BigDecimal {
    let mut total = BigDecimal::zero();
    for (denom, amount) in amounts {
        match price::to_reference(denom, amount, reference_denom, prices) {
            Ok(Some(v)) => total += v,
            Ok(None) | Err(MathError::DivisionByZero) => {
                unpriced.insert(denom.clone());
            }
            Err(e) => {
                warn!(%denom, error = %e, "reward conversion failed");
                unpriced.insert(denom.clone());
            }
        }
    }
    total
}

/// Result of one return computation. All amounts are in the reference denom.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReturnComputation {
    pub operator_address: String,
    pub reward: String,
    pub commission: String,
    pub net_reward_luna: String,
    pub annualized_return: String,
    /// Denoms left out of the totals for lack of a price.
    pub unpriced_denoms: Vec<String>,
}

/// Convert an accumulator into net reward and annualized return.
///
/// The annualized return is `net / voting_power * 365`, or `0` when the net reward is zero.
pub fn compute_return(
    acc: &ValidatorRewardAccumulator,
    voting_power: &BigDecimal,
    reference_denom: &str,
    prices: &Prices,
) -> Result<ReturnComputation, MathError> {
    let mut unpriced = BTreeSet::new();
    let reward = reference_total(&acc.reward_by_denom, reference_denom, prices, &mut unpriced);
    let commission = reference_total(&acc.commission_by_denom, reference_denom, prices, &mut unpriced);
    if !unpriced.is_empty() {
        warn!(operator = %acc.operator_address, denoms = ?unpriced, "unpriced denoms left out");
    }
    let net = &reward - &commission;
    let annualized = if net.is_zero() {
        BigDecimal::zero()
    } else {
        math::div_dec(&net, voting_power)? * BigDecimal::from(365)
    };
    Ok(ReturnComputation {
        operator_address: acc.operator_address.clone(),
        reward: math::format(&reward),
        commission: math::format(&commission),
        net_reward_luna: math::format(&net),
        annualized_return: math::format(&annualized),
        unpriced_denoms: unpriced.into_iter().collect(),
    })
}

/// One row of the rolling per-day return table.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorReturnInfo {
    pub operator_address: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub reward: String,
    pub commission: String,
    pub avg_voting_power: String,
}

/// Trailing-window return summary.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidatorReturn {
    pub operator_address: String,
    pub net_reward_luna: String,
    pub annualized_return: String,
    pub is_new_validator: bool,
}

/// `Σ((reward − commission) / avg_voting_power) · 365 / count` over rows with positive voting
/// power. A validator with `max_new_samples` or fewer such rows is new.
pub fn window_return(operator: &str, rows: &[ValidatorReturnInfo], max_new_samples: usize) -> ValidatorReturn {
    let mut net_total = BigDecimal::zero();
    let mut ratio_sum = BigDecimal::zero();
    let mut count = 0usize;
    for row in rows {
        let parsed = math::parse(&row.reward)
            .and_then(|r| math::parse(&row.commission).map(|c| r - c))
            .and_then(|net| math::parse(&row.avg_voting_power).map(|vp| (net, vp)));
        let (net, vp) = match parsed {
            Ok(v) => v,
            Err(e) => {
                warn!(%operator, error = %e, "skipping return row");
                continue;
            }
        };
        if vp <= BigDecimal::zero() {
            continue;
        }
        if let Ok(ratio) = math::div_dec(&net, &vp) {
            ratio_sum += ratio;
            net_total += net;
            count += 1;
        }
    }
    if count == 0 {
        return ValidatorReturn {
            operator_address: operator.to_string(),
            net_reward_luna: "0".into(),
            annualized_return: "0".into(),
            is_new_validator: true,
        };
    }
    let annual = ratio_sum * BigDecimal::from(365) / BigDecimal::from(count as u64);
    ValidatorReturn {
        operator_address: operator.to_string(),
        net_reward_luna: math::format(&net_total),
        annualized_return: math::format(&annual),
        is_new_validator: count <= max_new_samples,
    }
}

/// Engine knobs.
#[derive(Clone, Debug)]
pub struct RewardSettings {
    pub reference_denom: String,
    pub block_reward_ttl: Duration,
    pub validator_return_ttl: Duration,
    pub return_window_days: i64,
    pub new_validator_max_samples: usize,
}

impl Default for RewardSettings {
    fn default() -> Self {
        Self {
            reference_denom: "uluna".into(),
            block_reward_ttl: Duration::hours(12),
            validator_return_ttl: Duration::hours(1),
            return_window_days: 30,
            new_validator_max_samples: 15,
        }
    }
}

type BlockKey = (OffsetDateTime, OffsetDateTime);
type ReturnKey = (String, String, OffsetDateTime, OffsetDateTime);

/// Reward/return computations over stored blocks and prices. Share one engine across callers so
/// the caches are shared.
pub struct ValidatorReturnEngine {
    blocks: Arc<dyn BlockRewardSource>,
    prices: Arc<dyn PriceSource>,
    infos: Arc<dyn ReturnInfoSource>,
    clock: Arc<dyn Clock>,
    settings: RewardSettings,
    block_cache: TtlCache<BlockKey, Arc<Vec<BlockReward>>>,
    return_cache: TtlCache<ReturnKey, ReturnComputation>,
}

impl ValidatorReturnEngine {
    pub fn new(
        blocks: Arc<dyn BlockRewardSource>,
        prices: Arc<dyn PriceSource>,
        infos: Arc<dyn ReturnInfoSource>,
        clock: Arc<dyn Clock>,
        settings: RewardSettings,
    ) -> Self {
        Self {
            block_cache: TtlCache::new("block_rewards", settings.block_reward_ttl, Arc::clone(&clock)),
            return_cache: TtlCache::new("validator_return", settings.validator_return_ttl, Arc::clone(&clock)),
            blocks,
            prices,
            infos,
            clock,
            settings,
        }
    }

    /// Blocks in `[from, to)`, cached per window.
    pub async fn block_rewards(
        &self,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<Arc<Vec<BlockReward>>, PipelineError> {
        self.block_cache
            .get_or_try_init((from, to), || async move {
                let blocks = self.blocks.block_rewards(from, to).await?;
                debug!(%from, %to, count = blocks.len(), "block rewards loaded");
                Ok::<_, PipelineError>(Arc::new(blocks))
            })
            .await
    }

    /// Blocks of the previous UTC day.
    pub async fn yesterday_block_rewards(&self) -> Result<Arc<Vec<BlockReward>>, PipelineError> {
        let (from, to) = yesterday_window(self.clock.now());
        self.block_rewards(from, to).await
    }

    async fn compute_uncached(
        &self,
        operator: &str,
        voting_power: &BigDecimal,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<ReturnComputation, PipelineError> {
        let blocks = self.block_rewards(from, to).await?;
        let prices = self.prices.average_prices(from, to).await?;
        let acc = ValidatorRewardAccumulator::fold(operator, from, to, blocks.iter());
        Ok(compute_return(&acc, voting_power, &self.settings.reference_denom, &prices)?)
    }

    /// Net reward and annualized return of `operator` over `[from, to)`, cached per
    /// (operator, voting power, from, to).
    pub async fn validator_return(
        &self,
        operator: &str,
        voting_power: &str,
        from: OffsetDateTime,
        to: OffsetDateTime,
    ) -> Result<ReturnComputation, PipelineError> {
        let vp = math::parse(voting_power)?;
        let key = (operator.to_string(), math::format(&vp), from, to);
        self.return_cache
            .get_or_try_init(key, || self.compute_uncached(operator, &vp, from, to))
            .await
    }

    /// The rolling-table row for `operator` on `day`.
    pub async fn daily_return_info(
        &self,
        operator: &str,
        avg_voting_power: &str,
        day: Date,
    ) -> Result<ValidatorReturnInfo, PipelineError> {
        let from = day.midnight().assume_utc();
        let to = from + Duration::days(1);
        let computed = self.validator_return(operator, avg_voting_power, from, to).await?;
        Ok(ValidatorReturnInfo {
            operator_address: operator.to_string(),
            timestamp: from,
            reward: computed.reward,
            commission: computed.commission,
            avg_voting_power: math::format(&math::parse(avg_voting_power)?),
        })
    }

    /// Trailing-window annualized return from the stored daily rows.
    pub async fn annual_return(&self, operator: &str) -> Result<ValidatorReturn, PipelineError> {
        let now = self.clock.now();
        let from = start_of_day(now) - Duration::days(self.settings.return_window_days);
        let rows = self.infos.return_infos(operator, from, now).await?;
        let out = window_return(operator, &rows, self.settings.new_validator_max_samples);
        info!(%operator, samples = rows.len(), is_new = out.is_new_validator, "annual return");
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::ManualClock;
    use crate::price::PriceHistory;
    use crate::store::StoreError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use time::macros::datetime;

    fn denoms(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs.iter().map(|(d, a)| (d.to_string(), a.to_string())).collect()
    }

    fn block(height: u64, reward: &[(&str, &str)], commission: &[(&str, &str)]) -> BlockReward {
        BlockReward {
            height,
            timestamp: datetime!(2020-06-01 12:00 UTC),
            reward_per_val: BTreeMap::from([("terravaloper1v".to_string(), denoms(reward))]),
            commission_per_val: BTreeMap::from([("terravaloper1v".to_string(), denoms(commission))]),
        }
    }

    fn prices() -> Prices {
        BTreeMap::from([
            ("ukrw".to_string(), math::parse("200").unwrap()),
            ("umnt".to_string(), BigDecimal::zero()),
        ])
    }

    #[test]
    fn fold_truncates_and_merges() {
        let blocks = [
            block(1, &[("uluna", "10.9"), ("ukrw", "400.2")], &[("uluna", "1.5")]),
            block(2, &[("uluna", "5")], &[("uluna", "0.7")]),
        ];
        let acc = ValidatorRewardAccumulator::fold(
            "terravaloper1v",
            datetime!(2020-06-01 0:00 UTC),
            datetime!(2020-06-02 0:00 UTC),
            blocks.iter(),
        );
        assert_eq!(math::format(&acc.reward_by_denom["uluna"]), "15");
        assert_eq!(math::format(&acc.reward_by_denom["ukrw"]), "400");
        assert_eq!(math::format(&acc.commission_by_denom["uluna"]), "1");
    }

    #[test]
    fn unpriced_denoms_are_dropped_and_flagged() {
        let blocks = [block(1, &[("uluna", "100"), ("ukrw", "400"), ("usdr", "9"), ("umnt", "3")], &[("uluna", "10")])];
        let acc = ValidatorRewardAccumulator::fold(
            "terravaloper1v",
            datetime!(2020-06-01 0:00 UTC),
            datetime!(2020-06-02 0:00 UTC),
            blocks.iter(),
        );
        let out = compute_return(&acc, &math::parse("1000").unwrap(), "uluna", &prices()).unwrap();
        assert_eq!(out.reward, "102");
        assert_eq!(out.commission, "10");
        assert_eq!(out.net_reward_luna, "92");
        assert_eq!(out.annualized_return, "33.58");
        assert_eq!(out.unpriced_denoms, vec!["umnt".to_string(), "usdr".to_string()]);
    }

    #[test]
    fn zero_net_reward_gives_zero_return() {
        let acc = ValidatorRewardAccumulator::new("terravaloper1v", datetime!(2020-06-01 0:00 UTC), datetime!(2020-06-02 0:00 UTC));
        let out = compute_return(&acc, &BigDecimal::zero(), "uluna", &prices()).unwrap();
        assert_eq!(out.annualized_return, "0");
        assert_eq!(out.net_reward_luna, "0");
    }

    #[test]
    fn zero_voting_power_is_division_by_zero() {
        let blocks = [block(1, &[("uluna", "100")], &[])];
        let acc = ValidatorRewardAccumulator::fold(
            "terravaloper1v",
            datetime!(2020-06-01 0:00 UTC),
            datetime!(2020-06-02 0:00 UTC),
            blocks.iter(),
        );
        assert_eq!(
            compute_return(&acc, &BigDecimal::zero(), "uluna", &prices()),
            Err(MathError::DivisionByZero)
        );
    }

    fn info_rows(n: usize) -> Vec<ValidatorReturnInfo> {
        (0..n)
            .map(|i| ValidatorReturnInfo {
                operator_address: "terravaloper1v".into(),
                timestamp: datetime!(2020-06-01 0:00 UTC) + Duration::days(i as i64),
                reward: "110".into(),
                commission: "10".into(),
                avg_voting_power: "100".into(),
            })
            .collect()
    }

    #[test]
    fn window_return_sample_threshold() {
        let ten = window_return("terravaloper1v", &info_rows(10), 15);
        assert!(ten.is_new_validator);
        assert_eq!(ten.annualized_return, "365");
        let twenty = window_return("terravaloper1v", &info_rows(20), 15);
        assert!(!twenty.is_new_validator);
        assert_eq!(twenty.net_reward_luna, "2000");
    }

    #[test]
    fn window_return_without_rows() {
        let mut rows = info_rows(3);
        for r in &mut rows {
            r.avg_voting_power = "0".into();
        }
        let out = window_return("terravaloper1v", &rows, 15);
        assert!(out.is_new_validator);
        assert_eq!(out.annualized_return, "0");
    }

    struct Stub {
        block_calls: AtomicUsize,
        blocks: Vec<BlockReward>,
        rows: Vec<ValidatorReturnInfo>,
    }

    #[async_trait]
    impl BlockRewardSource for Stub {
        async fn block_rewards(&self, _from: OffsetDateTime, _to: OffsetDateTime) -> Result<Vec<BlockReward>, StoreError> {
            self.block_calls.fetch_add(1, Ordering::SeqCst);
            tokio::task::yield_now().await;
            Ok(self.blocks.clone())
        }
    }

    #[async_trait]
    impl PriceSource for Stub {
        async fn prices_at(&self, _at: OffsetDateTime) -> Result<Prices, StoreError> {
            Ok(prices())
        }
        async fn average_prices(&self, _from: OffsetDateTime, _to: OffsetDateTime) -> Result<Prices, StoreError> {
            Ok(prices())
        }
        async fn daily_prices(&self) -> Result<PriceHistory, StoreError> {
            Ok(PriceHistory::default())
        }
    }

    #[async_trait]
    impl ReturnInfoSource for Stub {
        async fn return_infos(
            &self,
            _operator: &str,
            _from: OffsetDateTime,
            _to: OffsetDateTime,
        ) -> Result<Vec<ValidatorReturnInfo>, StoreError> {
            Ok(self.rows.clone())
        }
    }

    fn engine(rows: usize) -> (Arc<Stub>, Arc<ManualClock>, ValidatorReturnEngine) {
        let stub = Arc::new(Stub {
            block_calls: AtomicUsize::new(0),
            blocks: vec![block(1, &[("uluna", "100")], &[("uluna", "10")])],
            rows: info_rows(rows),
        });
        let clock = Arc::new(ManualClock::new(datetime!(2020-07-01 08:00 UTC)));
        let engine = ValidatorReturnEngine::new(
            stub.clone(),
            stub.clone(),
            stub.clone(),
            clock.clone(),
            RewardSettings::default(),
        );
        (stub, clock, engine)
    }

    #[tokio::test]
    async fn repeated_return_fetches_blocks_once() {
        let (stub, clock, engine) = engine(0);
        let from = datetime!(2020-06-01 0:00 UTC);
        let to = datetime!(2020-06-02 0:00 UTC);
        let (a, b) = tokio::join!(
            engine.validator_return("terravaloper1v", "1000", from, to),
            engine.validator_return("terravaloper1v", "1000", from, to),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        clock.advance(Duration::minutes(30));
        let c = engine.validator_return("terravaloper1v", "1000", from, to).await.unwrap();
        assert_eq!(c.net_reward_luna, "90");
        assert_eq!(stub.block_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn new_voting_power_reuses_cached_blocks() {
        let (stub, clock, engine) = engine(0);
        let from = datetime!(2020-06-01 0:00 UTC);
        let to = datetime!(2020-06-02 0:00 UTC);
        engine.validator_return("terravaloper1v", "1000", from, to).await.unwrap();
        clock.advance(Duration::hours(2));
        engine.validator_return("terravaloper1v", "1000", from, to).await.unwrap();
        engine.validator_return("terravaloper1v", "2000", from, to).await.unwrap();
        assert_eq!(stub.block_calls.load(Ordering::SeqCst), 1);
        clock.advance(Duration::hours(11));
        engine.validator_return("terravaloper1v", "1000", from, to).await.unwrap();
        assert_eq!(stub.block_calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn daily_info_row() {
        let (_stub, _clock, engine) = engine(0);
        let row = engine
            .daily_return_info("terravaloper1v", "5000", time::macros::date!(2020 - 06 - 01))
            .await
            .unwrap();
        assert_eq!(row.reward, "100");
        assert_eq!(row.commission, "10");
        assert_eq!(row.timestamp, datetime!(2020-06-01 0:00 UTC));
    }

    #[tokio::test]
    async fn annual_return_classifies_new_validators() {
        let (_s, _c, ten) = engine(10);
        assert!(ten.annual_return("terravaloper1v").await.unwrap().is_new_validator);
        let (_s, _c, twenty) = engine(20);
        assert!(!twenty.annual_return("terravaloper1v").await.unwrap().is_new_validator);
    }

    #[tokio::test]
    async fn yesterday_window_is_cached() {
        let (stub, _clock, engine) = engine(0);
        engine.yesterday_block_rewards().await.unwrap();
        engine.yesterday_block_rewards().await.unwrap();
        assert_eq!(stub.block_calls.load(Ordering::SeqCst), 1);
    }
}

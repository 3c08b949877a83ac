//! Periodic and cumulative time series for dashboards.

use crate::ledger::types::BlockReward;
use crate::ledger::start_of_day;
use crate::math::{self, additive_merge, DenomAmounts};
use crate::price::{self, PriceHistory};
use bigdecimal::{BigDecimal, Zero};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use time::{Date, OffsetDateTime};
use tracing::debug;

/// Values that can be summed into a running total.
pub trait Additive: Clone {
    fn empty() -> Self;
    fn accumulate(&mut self, other: &Self);
}

impl Additive for BigDecimal {
    fn empty() -> Self {
        BigDecimal::zero()
    }

    fn accumulate(&mut self, other: &Self) {
        *self += other;
    }
}

impl Additive for DenomAmounts {
    fn empty() -> Self {
        DenomAmounts::new()
    }

    fn accumulate(&mut self, other: &Self) {
        additive_merge(self, other);
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DatedValue<V> {
    #[serde(with = "time::serde::rfc3339")]
    pub datetime: OffsetDateTime,
    pub value: V,
}

impl<V> DatedValue<V> {
    pub fn new(datetime: OffsetDateTime, value: V) -> Self {
        Self { datetime, value }
    }
}

/// Two series of equal length: the input as-is and its running sum.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DashboardSeries<V> {
    pub periodic: Vec<DatedValue<V>>,
    pub cumulative: Vec<DatedValue<V>>,
}

impl<V> DashboardSeries<V> {
    pub fn map<U>(self, f: impl Fn(V) -> U) -> DashboardSeries<U> {
        let conv = |points: Vec<DatedValue<V>>| -> Vec<DatedValue<U>> {
            points
                .into_iter()
                .map(|p| DatedValue::new(p.datetime, f(p.value)))
                .collect()
        };
        DashboardSeries {
            periodic: conv(self.periodic),
            cumulative: conv(self.cumulative),
        }
    }

    pub fn len(&self) -> usize {
        self.periodic.len()
    }

    pub fn is_empty(&self) -> bool {
        self.periodic.is_empty()
    }
}

/// Build both series from time-ordered `points`, then keep the last `count` entries of each.
/// `None` or `Some(0)` keeps everything. The running sum covers the full input before truncation.
pub fn bucketize<V: Additive>(points: Vec<DatedValue<V>>, count: Option<usize>) -> DashboardSeries<V> {
    let mut running = V::empty();
    let cumulative: Vec<DatedValue<V>> = points
        .iter()
        .map(|p| {
            running.accumulate(&p.value);
            DatedValue::new(p.datetime, running.clone())
        })
        .collect();
    let keep = match count {
        Some(n) if n > 0 => n.min(points.len()),
        _ => points.len(),
    };
    let skip = points.len() - keep;
    DashboardSeries {
        periodic: points.into_iter().skip(skip).collect(),
        cumulative: cumulative.into_iter().skip(skip).collect(),
    }
}

/// Per-day, per-denom sums of all validator rewards in `blocks` dated before the day of `before`.
pub fn daily_reward_totals<'a>(
    blocks: impl IntoIterator<Item = &'a BlockReward>,
    before: OffsetDateTime,
) -> BTreeMap<Date, DenomAmounts> {
    let cutoff = start_of_day(before);
    let mut out: BTreeMap<Date, DenomAmounts> = BTreeMap::new();
    for block in blocks {
        if block.timestamp >= cutoff {
            continue;
        }
        let day = out.entry(block.timestamp.date()).or_default();
        for per_denom in block.reward_per_val.values() {
            let parsed: DenomAmounts = per_denom
                .iter()
                .filter_map(|(d, a)| math::parse(a).ok().map(|v| (d.clone(), v)))
                .collect();
            additive_merge(day, &parsed);
        }
    }
    out
}

/// Daily reward totals valued in `valuation_denom` with that day's prices, as a dashboard
/// series. Denoms without a price on their day are left out of that day; days with nothing
/// convertible are left out entirely.
pub fn block_reward_series(
    daily: &BTreeMap<Date, DenomAmounts>,
    prices: &PriceHistory,
    valuation_denom: &str,
    reference_denom: &str,
    count: Option<usize>,
) -> DashboardSeries<BigDecimal> {
    let mut points = Vec::with_capacity(daily.len());
    for (date, amounts) in daily {
        let mut total: Option<BigDecimal> = None;
        for (denom, amount) in amounts {
            let value = price::value_in(denom, amount, valuation_denom, reference_denom, |d| {
                prices.get(*date, d).cloned()
            });
            match value {
                Some(v) => *total.get_or_insert_with(BigDecimal::zero) += v,
                None => debug!(%date, %denom, "no price snapshot"),
            }
        }
        if let Some(total) = total {
            points.push(DatedValue::new(date.midnight().assume_utc(), total));
        }
    }
    bucketize(points, count)
}

#[cfg(test)]
mod tests {
    use super::*;
    use time::macros::{date, datetime};
    use time::Duration;

    fn dec(s: &str) -> BigDecimal {
        math::parse(s).unwrap()
    }

    fn series(values: &[&str]) -> Vec<DatedValue<BigDecimal>> {
        values
            .iter()
            .enumerate()
            .map(|(i, v)| DatedValue::new(datetime!(2020-06-01 0:00 UTC) + Duration::days(i as i64), dec(v)))
            .collect()
    }

    fn values(points: &[DatedValue<BigDecimal>]) -> Vec<String> {
        points.iter().map(|p| math::format(&p.value)).collect()
    }

    #[test]
    fn periodic_and_cumulative() {
        let s = bucketize(series(&["1", "2", "3.5"]), None);
        assert_eq!(values(&s.periodic), ["1", "2", "3.5"]);
        assert_eq!(values(&s.cumulative), ["1", "3", "6.5"]);
    }

    #[test]
    fn trailing_count_applies_to_both() {
        let s = bucketize(series(&["1", "2", "3", "4"]), Some(2));
        assert_eq!(values(&s.periodic), ["3", "4"]);
        assert_eq!(values(&s.cumulative), ["6", "10"]);
        assert_eq!(s.periodic.len(), s.cumulative.len());
        assert_eq!(bucketize(series(&["1", "2"]), Some(0)).len(), 2);
        assert_eq!(bucketize(series(&["1", "2"]), Some(9)).len(), 2);
    }

    #[test]
    fn cumulative_is_monotonic_for_non_negative_input() {
        let points: Vec<DatedValue<DenomAmounts>> = (0..10)
            .map(|i| {
                let mut m = DenomAmounts::new();
                m.insert("uluna".into(), BigDecimal::from(i % 3));
                if i % 2 == 0 {
                    m.insert("ukrw".into(), dec("0.5"));
                }
                DatedValue::new(datetime!(2020-06-01 0:00 UTC) + Duration::days(i), m)
            })
            .collect();
        let s = bucketize(points, None);
        for pair in s.cumulative.windows(2) {
            for (denom, prev) in &pair[0].value {
                assert!(pair[1].value.get(denom).is_some_and(|next| next >= prev));
            }
        }
    }

    fn block(at: OffsetDateTime, rewards: &[(&str, &str, &str)]) -> BlockReward {
        let mut reward_per_val: BTreeMap<String, BTreeMap<String, String>> = BTreeMap::new();
        for (val, denom, amount) in rewards {
            reward_per_val
                .entry(val.to_string())
                .or_default()
                .insert(denom.to_string(), amount.to_string());
        }
        BlockReward {
            height: 1,
            timestamp: at,
            reward_per_val,
            commission_per_val: BTreeMap::new(),
        }
    }

    #[test]
    fn block_rewards_valued_per_day() {
        let blocks = [
            block(datetime!(2020-06-01 1:00 UTC), &[("v1", "uluna", "10"), ("v2", "ukrw", "2400")]),
            block(datetime!(2020-06-01 2:00 UTC), &[("v1", "uusd", "5")]),
            block(datetime!(2020-06-02 2:00 UTC), &[("v1", "usdr", "1")]),
            block(datetime!(2020-06-03 2:00 UTC), &[("v1", "uluna", "1")]),
            block(datetime!(2020-06-04 2:00 UTC), &[("v1", "uluna", "100")]),
        ];
        let daily = daily_reward_totals(blocks.iter(), datetime!(2020-06-04 9:00 UTC));
        assert_eq!(daily.len(), 3);

        let mut prices = PriceHistory::default();
        prices.insert(date!(2020 - 06 - 01), "uusd", dec("2"));
        prices.insert(date!(2020 - 06 - 01), "ukrw", dec("2400"));
        prices.insert(date!(2020 - 06 - 03), "uusd", dec("3"));

        let s = block_reward_series(&daily, &prices, "uusd", "uluna", None);
        // 10 luna * 2 + 2400 krw * 2 / 2400 + 5 usd; 06-02 has no usdr price
        assert_eq!(values(&s.periodic), ["27", "3"]);
        assert_eq!(values(&s.cumulative), ["27", "30"]);
    }
}

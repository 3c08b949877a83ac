//! Price snapshots and conversion into a common currency.
//!
//! Oracle prices are quoted per unit of the reference denom: `price[d]` is how many `d` one
//! reference unit buys. A denom with no price, or a zero price, cannot be converted.

use crate::ledger::day_key;
use crate::math::{self, MathError};
use bigdecimal::BigDecimal;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use time::Date;

/// Denom → price at one instant.
pub type Prices = BTreeMap<String, BigDecimal>;

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PriceSnapshot {
    pub denom: String,
    /// `YYYY-MM-DD` + denom.
    pub bucket_key: String,
    pub price: String,
}

pub fn bucket_key(date: Date, denom: &str) -> String {
    format!("{}{}", day_key(date), denom)
}

/// Day-keyed prices, read-only to the pipeline.
#[derive(Clone, Debug, Default)]
pub struct PriceHistory {
    by_key: HashMap<String, BigDecimal>,
}

impl PriceHistory {
    pub fn insert(&mut self, date: Date, denom: &str, price: BigDecimal) {
        self.by_key.insert(bucket_key(date, denom), price);
    }

    pub fn get(&self, date: Date, denom: &str) -> Option<&BigDecimal> {
        self.by_key.get(&bucket_key(date, denom))
    }

    pub fn snapshots(&self) -> Vec<PriceSnapshot> {
        let mut out: Vec<PriceSnapshot> = self
            .by_key
            .iter()
            .map(|(key, price)| PriceSnapshot {
                denom: key.get(10..).unwrap_or_default().to_string(),
                bucket_key: key.clone(),
                price: math::format(price),
            })
            .collect();
        out.sort_by(|a, b| a.bucket_key.cmp(&b.bucket_key));
        out
    }

    pub fn is_empty(&self) -> bool {
        self.by_key.is_empty()
    }
}

/// Convert `amount` of `denom` into `target`.
///
/// `target` as-is; the reference denom multiplies by `price[target]`; any other denom multiplies
/// by `price[target]` and divides by `price[denom]`. `None` when a needed price is missing or zero.
pub fn value_in(
    denom: &str,
    amount: &BigDecimal,
    target: &str,
    reference_denom: &str,
    price_of: impl Fn(&str) -> Option<BigDecimal>,
) -> Option<BigDecimal> {
    if denom == target {
        return Some(amount.clone());
    }
    let target_price = price_of(target)?;
    if denom == reference_denom {
        return Some(amount * &target_price);
    }
    let denom_price = price_of(denom)?;
    math::div_dec(&(amount * &target_price), &denom_price).ok()
}

/// Convert `amount` of `denom` into the reference denom: `amount / price[denom]`.
pub fn to_reference(
    denom: &str,
    amount: &BigDecimal,
    reference_denom: &str,
    prices: &Prices,
) -> Result<Option<BigDecimal>, MathError> {
    if denom == reference_denom {
        return Ok(Some(amount.clone()));
    }
    match prices.get(denom) {
        Some(price) => math::div_dec(amount, price).map(Some),
        None => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{format, parse};
    use time::macros::date;

    fn prices() -> Prices {
        [("uusd", "2"), ("ukrw", "2400"), ("umnt", "0")]
            .into_iter()
            .map(|(d, p)| (d.to_string(), parse(p).unwrap()))
            .collect()
    }

    fn convert(denom: &str, amount: &str) -> Option<String> {
        let p = prices();
        value_in(denom, &parse(amount).unwrap(), "uusd", "uluna", |d| p.get(d).cloned())
            .map(|v| format(&v))
    }

    #[test]
    fn valuation_rules() {
        assert_eq!(convert("uusd", "10").as_deref(), Some("10"));
        assert_eq!(convert("uluna", "10").as_deref(), Some("20"));
        assert_eq!(convert("ukrw", "2400").as_deref(), Some("2"));
        assert_eq!(convert("usdr", "1"), None);
        assert_eq!(convert("umnt", "1"), None);
    }

    #[test]
    fn reference_conversion() {
        let p = prices();
        let v = to_reference("ukrw", &parse("4800").unwrap(), "uluna", &p).unwrap();
        assert_eq!(v.map(|v| format(&v)).as_deref(), Some("2"));
        assert_eq!(to_reference("usdr", &parse("1").unwrap(), "uluna", &p), Ok(None));
        assert_eq!(
            to_reference("umnt", &parse("1").unwrap(), "uluna", &p),
            Err(MathError::DivisionByZero)
        );
    }

    #[test]
    fn history_keys_by_day_and_denom() {
        let mut h = PriceHistory::default();
        h.insert(date!(2020 - 06 - 01), "ukrw", parse("1200").unwrap());
        assert!(h.get(date!(2020 - 06 - 01), "ukrw").is_some());
        assert!(h.get(date!(2020 - 06 - 02), "ukrw").is_none());
        let snaps = h.snapshots();
        assert_eq!(snaps[0].bucket_key, "2020-06-01ukrw");
        assert_eq!(snaps[0].denom, "ukrw");
    }
}

//! Additive merge of denom-keyed amounts.

use bigdecimal::BigDecimal;
use std::collections::BTreeMap;

/// Denom → amount. Ordered so that iteration, and therefore output, is deterministic.
pub type DenomAmounts = BTreeMap<String, BigDecimal>;

/// Fold `src` into `acc`, adding amounts that share a denom.
///
/// Commutative and associative: any merge order over the same inputs yields the same map.
pub fn additive_merge(acc: &mut DenomAmounts, src: &DenomAmounts) {
    for (denom, amount) in src {
        acc.entry(denom.clone())
            .and_modify(|cur| *cur += amount)
            .or_insert_with(|| amount.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::{format, parse};

    fn map(entries: &[(&str, &str)]) -> DenomAmounts {
        entries
            .iter()
            .map(|(d, a)| (d.to_string(), parse(a).unwrap()))
            .collect()
    }

    #[test]
    fn merge_adds_shared_denoms() {
        let mut acc = map(&[("uluna", "10"), ("uusd", "1.5")]);
        additive_merge(&mut acc, &map(&[("uluna", "5"), ("ukrw", "7")]));
        assert_eq!(format(&acc["uluna"]), "15");
        assert_eq!(format(&acc["uusd"]), "1.5");
        assert_eq!(format(&acc["ukrw"]), "7");
    }

    #[test]
    fn merge_order_does_not_matter() {
        let parts = [
            map(&[("uluna", "1")]),
            map(&[("uluna", "2"), ("uusd", "3")]),
            map(&[("uusd", "0.25")]),
        ];
        let mut forward = DenomAmounts::new();
        for p in &parts {
            additive_merge(&mut forward, p);
        }
        let mut backward = DenomAmounts::new();
        for p in parts.iter().rev() {
            additive_merge(&mut backward, p);
        }
        assert_eq!(forward, backward);
    }
}

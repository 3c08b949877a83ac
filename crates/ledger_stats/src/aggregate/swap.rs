//! Swap aggregator: per-denom market swap volume, fees, and spread for one time bucket.

use crate::ledger::types::{Coin, RawTransaction};
use crate::ledger::{LedgerClient, LedgerError};
use crate::math::{self, additive_merge, DenomAmounts, MathError};
use crate::price::{self, Prices};
use crate::tx::log::correlate;
use crate::tx::msg::{self, MessageKind};
use bigdecimal::BigDecimal;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;
use tracing::{debug, warn};

/// Denoms used for valuation and the spread reference quote.
#[derive(Clone, Debug)]
pub struct SwapSettings {
    pub reference_denom: String,
    pub valuation_denom: String,
    /// Fixed notional offered in each reference quote.
    pub spread_offer: Coin,
    /// Quote every priced denom, not only those swapped in the bucket.
    pub quote_idle_denoms: bool,
}

impl Default for SwapSettings {
    fn default() -> Self {
        Self {
            reference_denom: "uluna".into(),
            valuation_denom: "uusd".into(),
            spread_offer: Coin::new("uluna", "1000000"),
            quote_idle_denoms: true,
        }
    }
}

/// Offered, realized, and fee amounts folded across swap messages.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct SwapTotals {
    pub offered: DenomAmounts,
    pub returned: DenomAmounts,
    pub fees: DenomAmounts,
}

impl SwapTotals {
    pub fn merge(&mut self, other: &SwapTotals) {
        additive_merge(&mut self.offered, &other.offered);
        additive_merge(&mut self.returned, &other.returned);
        additive_merge(&mut self.fees, &other.fees);
    }

    pub fn is_empty(&self) -> bool {
        self.offered.is_empty() && self.returned.is_empty() && self.fees.is_empty()
    }

    /// Every denom with any activity.
    pub fn denoms(&self) -> BTreeSet<&str> {
        self.offered
            .keys()
            .chain(self.returned.keys())
            .chain(self.fees.keys())
            .map(String::as_str)
            .collect()
    }
}

fn add_to(amounts: &mut DenomAmounts, coin: &Coin) {
    if let Ok(v) = math::parse(&coin.amount) {
        additive_merge(amounts, &DenomAmounts::from([(coin.denom.clone(), v)]));
    }
}

/// Totals of the successful swap messages in one transaction.
pub fn swap_values(tx: &RawTransaction) -> SwapTotals {
    let mut logs = correlate(tx);
    let tx_succeeded = logs.status().success;
    let mut totals = SwapTotals::default();
    for raw in tx.messages() {
        let entry = logs.take_next();
        let event = match msg::parse(raw, entry.as_ref(), None, tx_succeeded) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(tx = %tx.hash, error = %e, "skipping malformed message");
                continue;
            }
        };
        if !event.success {
            continue;
        }
        let MessageKind::Swap { offer_coin, .. } = &event.kind else {
            continue;
        };
        add_to(&mut totals.offered, offer_coin);
        if let Some(outcome) = &event.swap {
            if let Some(coin) = &outcome.swap_coin {
                add_to(&mut totals.returned, coin);
            }
            if let Some(fee) = &outcome.swap_fee {
                add_to(&mut totals.fees, fee);
            }
        }
    }
    totals
}

/// Fold swap totals across transactions. Order of `txs` does not affect the result.
pub fn swap_totals<'a>(txs: impl IntoIterator<Item = &'a RawTransaction>) -> SwapTotals {
    txs.into_iter().fold(SwapTotals::default(), |mut acc, tx| {
        acc.merge(&swap_values(tx));
        acc
    })
}

/// `(price * notional - quoted) / (price * notional)`.
pub fn spread_of(
    price: &BigDecimal,
    notional: &BigDecimal,
    quoted: &BigDecimal,
) -> Result<BigDecimal, MathError> {
    let expected = price * notional;
    math::div_dec(&(&expected - quoted), &expected)
}

/// Spread per denom from one reference quote each, fanned out concurrently.
///
/// Denoms the quote service has no answer for are left out, as are denoms whose price is zero.
/// Any other upstream failure fails the whole map.
pub async fn quote_spreads(
    client: &dyn LedgerClient,
    prices: &Prices,
    denoms: &BTreeSet<String>,
    offer: &Coin,
) -> Result<BTreeMap<String, BigDecimal>, LedgerError> {
    let notional = math::parse(&offer.amount).map_err(|e| LedgerError::InvalidRequest(e.to_string()))?;
    let targets: Vec<(&String, &BigDecimal)> = prices
        .iter()
        .filter(|(denom, _)| denoms.contains(*denom) && **denom != offer.denom)
        .collect();

    let quotes = join_all(
        targets
            .iter()
            .map(|(denom, _)| client.swap_quote(offer, denom.as_str())),
    )
    .await;

    let mut out = BTreeMap::new();
    for ((denom, price), quote) in targets.into_iter().zip(quotes) {
        let Some(quoted) = quote? else {
            debug!(%denom, "no swap quote");
            continue;
        };
        let Ok(quoted_amount) = math::parse(&quoted.amount) else {
            warn!(%denom, amount = %quoted.amount, "non-numeric swap quote");
            continue;
        };
        match spread_of(price, &notional, &quoted_amount) {
            Ok(spread) => {
                out.insert(denom.clone(), spread);
            }
            Err(e) => warn!(%denom, error = %e, "spread skipped"),
        }
    }
    Ok(out)
}

/// One denom's swap activity for a bucket. Fields without activity are `None`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SwapAggregate {
    pub denom: String,
    #[serde(with = "time::serde::rfc3339")]
    pub bucket_start: OffsetDateTime,
    #[serde(rename = "in")]
    pub in_amount: Option<String>,
    pub in_usd: Option<String>,
    pub out: Option<String>,
    pub out_usd: Option<String>,
    pub fee: Option<String>,
    pub fee_usd: Option<String>,
    pub spread: Option<String>,
}

/// One aggregate per issued denom, with activity, valuation, and spread filled where known.
pub fn build_aggregates(
    bucket_start: OffsetDateTime,
    issued: &BTreeSet<String>,
    totals: &SwapTotals,
    prices: &Prices,
    spreads: &BTreeMap<String, BigDecimal>,
    settings: &SwapSettings,
) -> Vec<SwapAggregate> {
    let valued = |denom: &str, amounts: &DenomAmounts| -> (Option<String>, Option<String>) {
        let Some(amount) = amounts.get(denom) else {
            return (None, None);
        };
        let usd = price::value_in(
            denom,
            amount,
            &settings.valuation_denom,
            &settings.reference_denom,
            |d| prices.get(d).cloned(),
        );
        (Some(math::format(amount)), usd.map(|v| math::format(&v)))
    };

    issued
        .iter()
        .map(|denom| {
            let (in_amount, in_usd) = valued(denom, &totals.offered);
            let (out, out_usd) = valued(denom, &totals.returned);
            let (fee, fee_usd) = valued(denom, &totals.fees);
            SwapAggregate {
                denom: denom.clone(),
                bucket_start,
                in_amount,
                in_usd,
                out,
                out_usd,
                fee,
                fee_usd,
                spread: spreads.get(denom).map(math::format),
            }
        })
        .collect()
}

//! Raw ledger-node payload shapes. Immutable once fetched.

use crate::math::{self, DenomAmounts, MathError};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;
use time::OffsetDateTime;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coin {
    pub denom: String,
    pub amount: String,
}

impl Coin {
    pub fn new(denom: impl Into<String>, amount: impl Into<String>) -> Self {
        Self {
            denom: denom.into(),
            amount: amount.into(),
        }
    }

    /// Split a `<amount><denom>` string such as `4950000uluna`.
    /// The numeric prefix is everything up to the first character that is not a digit or '.'.
    pub fn from_amount_denom(s: &str) -> Option<Self> {
        let s = s.trim();
        let split = s
            .char_indices()
            .find(|(_, c)| !(c.is_ascii_digit() || *c == '.'))
            .map(|(i, _)| i)?;
        let (amount, denom) = s.split_at(split);
        if amount.is_empty() || denom.is_empty() {
            return None;
        }
        Some(Self::new(denom, amount))
    }
}

/// One message as it appears in `tx.value.msg`: a type tag plus an untyped body.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawMessage {
    #[serde(rename = "type")]
    pub type_tag: String,
    #[serde(default)]
    pub value: serde_json::Value,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Fee {
    #[serde(default)]
    pub amount: Vec<Coin>,
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub gas: Option<String>,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TxValue {
    #[serde(default)]
    pub msg: Vec<RawMessage>,
    #[serde(default)]
    pub fee: Fee,
    #[serde(default)]
    pub memo: String,
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TxBody {
    #[serde(default)]
    pub value: TxValue,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventAttribute {
    pub key: String,
    #[serde(default)]
    pub value: String,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawEvent {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(default)]
    pub attributes: Vec<EventAttribute>,
}

impl RawEvent {
    /// First attribute with `key`. Events may repeat keys; the first one wins.
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes
            .iter()
            .find(|a| a.key == key)
            .map(|a| a.value.as_str())
    }
}

/// A per-message log entry as returned by the node.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawLog {
    #[serde(default, deserialize_with = "opt_string_or_number")]
    pub msg_index: Option<String>,
    #[serde(default)]
    pub success: Option<bool>,
    #[serde(default)]
    pub log: serde_json::Value,
    #[serde(default)]
    pub events: Vec<RawEvent>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RawTransaction {
    #[serde(alias = "txhash")]
    pub hash: String,
    #[serde(default)]
    pub chain_id: String,
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub height: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub tx: TxBody,
    #[serde(default)]
    pub logs: Option<Vec<RawLog>>,
    #[serde(default)]
    pub raw_log: Option<String>,
}

impl RawTransaction {
    pub fn messages(&self) -> &[RawMessage] {
        &self.tx.value.msg
    }

    pub fn has_message_type(&self, type_tag: &str) -> bool {
        self.messages().iter().any(|m| m.type_tag == type_tag)
    }
}

/// Per-block distribution data: operator address → denom → amount.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct BlockReward {
    #[serde(deserialize_with = "u64_from_string_or_number")]
    pub height: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    #[serde(default)]
    pub reward_per_val: BTreeMap<String, BTreeMap<String, String>>,
    #[serde(default)]
    pub commission_per_val: BTreeMap<String, BTreeMap<String, String>>,
}

impl Default for RawTransaction {
    fn default() -> Self {
        Self {
            hash: String::new(),
            chain_id: String::new(),
            height: 0,
            timestamp: OffsetDateTime::UNIX_EPOCH,
            tx: TxBody::default(),
            logs: None,
            raw_log: None,
        }
    }
}

impl BlockReward {
    /// Collect the `rewards` and `commission` events a block emits at begin-block into
    /// per-validator denom totals. Repeated events for one validator are summed.
    pub fn from_events(
        height: u64,
        timestamp: OffsetDateTime,
        events: &[RawEvent],
    ) -> Result<Self, MathError> {
        let mut rewards: BTreeMap<String, DenomAmounts> = BTreeMap::new();
        let mut commissions: BTreeMap<String, DenomAmounts> = BTreeMap::new();
        for ev in events {
            let target = match ev.event_type.as_str() {
                "rewards" => &mut rewards,
                "commission" => &mut commissions,
                _ => continue,
            };
            let (Some(validator), Some(amount)) = (ev.attribute("validator"), ev.attribute("amount"))
            else {
                continue;
            };
            let per_denom = target.entry(validator.to_string()).or_default();
            for coin in amount.split(',').filter_map(Coin::from_amount_denom) {
                let value = math::parse(&coin.amount)?;
                let total = per_denom.entry(coin.denom).or_default();
                *total += value;
            }
        }
        Ok(Self {
            height,
            timestamp,
            reward_per_val: format_per_val(rewards),
            commission_per_val: format_per_val(commissions),
        })
    }
}

fn format_per_val(m: BTreeMap<String, DenomAmounts>) -> BTreeMap<String, BTreeMap<String, String>> {
    m.into_iter()
        .map(|(val, amounts)| {
            let amounts = amounts.iter().map(|(d, a)| (d.clone(), math::format(a))).collect();
            (val, amounts)
        })
        .collect()
}

#[derive(Deserialize)]
#[serde(untagged)]
enum StringOrNumber {
    S(String),
    N(serde_json::Number),
}

fn u64_from_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<u64, D::Error> {
    match StringOrNumber::deserialize(d)? {
        StringOrNumber::S(s) => s.trim().parse().map_err(serde::de::Error::custom),
        StringOrNumber::N(n) => n
            .as_u64()
            .ok_or_else(|| serde::de::Error::custom("height out of range")),
    }
}

fn opt_string_or_number<'de, D: Deserializer<'de>>(d: D) -> Result<Option<String>, D::Error> {
    Ok(
        Option::<StringOrNumber>::deserialize(d)?.map(|v| match v {
            StringOrNumber::S(s) => s,
            StringOrNumber::N(n) => n.to_string(),
        }),
    )
}

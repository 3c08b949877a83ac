//! Delegation history of one validator.

use crate::ledger::types::{Coin, RawTransaction};
use crate::math;
use crate::tx::msg::MessageKind;
use crate::tx::parse::parse_tx;
use crate::tx::Page;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum DelegationEventType {
    Delegate,
    #[serde(rename = "Create Validator")]
    CreateValidator,
    Redelegate,
    Undelegate,
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DelegationEvent {
    pub height: u64,
    #[serde(rename = "type")]
    pub event_type: DelegationEventType,
    /// Signed: negative when stake leaves the validator.
    pub amount: Coin,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

fn negated(amount: &str) -> String {
    math::parse(amount)
        .map(|d| math::format(&-d))
        .unwrap_or_else(|_| format!("-{amount}"))
}

fn event_for(kind: &MessageKind, operator: &str, reference_denom: &str) -> Option<(DelegationEventType, Coin)> {
    match kind {
        MessageKind::Delegate {
            validator_address,
            amount,
            ..
        } if validator_address == operator => Some((DelegationEventType::Delegate, amount.clone())),
        MessageKind::CreateValidator {
            validator_address,
            value,
            ..
        } if validator_address == operator => {
            Some((DelegationEventType::CreateValidator, value.clone()))
        }
        MessageKind::Redelegate {
            validator_src_address,
            validator_dst_address,
            amount,
            ..
        } if validator_src_address == operator || validator_dst_address == operator => {
            let value = if validator_src_address == operator {
                negated(&amount.amount)
            } else {
                amount.amount.clone()
            };
            Some((
                DelegationEventType::Redelegate,
                Coin::new(reference_denom, value),
            ))
        }
        MessageKind::Undelegate {
            validator_address,
            amount,
            ..
        } if validator_address == operator => Some((
            DelegationEventType::Undelegate,
            Coin::new(amount.denom.clone(), negated(&amount.amount)),
        )),
        _ => None,
    }
}

/// Stake movements into and out of `operator` from successful messages, in input order.
pub fn delegation_events(
    txs: &[RawTransaction],
    operator: &str,
    reference_denom: &str,
    page: usize,
    limit: usize,
) -> Page<DelegationEvent> {
    let events: Vec<DelegationEvent> = txs
        .iter()
        .map(|tx| parse_tx(tx, Some(operator)))
        .flat_map(|parsed| {
            let height = parsed.height;
            let timestamp = parsed.timestamp;
            parsed
                .msgs
                .into_iter()
                .filter(|ev| ev.success)
                .filter_map(move |ev| {
                    event_for(&ev.kind, operator, reference_denom).map(|(event_type, amount)| {
                        DelegationEvent {
                            height,
                            event_type,
                            amount,
                            timestamp,
                        }
                    })
                })
        })
        .collect();
    Page::paginate(events, page, limit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::RawMessage;

    fn tx(height: u64, msgs: Vec<RawMessage>, success: bool) -> RawTransaction {
        let logs: Vec<serde_json::Value> = msgs
            .iter()
            .map(|_| serde_json::json!({ "success": success, "log": "" }))
            .collect();
        RawTransaction {
            hash: format!("H{height}"),
            height,
            tx: serde_json::from_value(serde_json::json!({ "value": { "msg": msgs } })).unwrap(),
            logs: Some(serde_json::from_value(serde_json::Value::Array(logs)).unwrap()),
            ..Default::default()
        }
    }

    fn msg(tag: &str, value: serde_json::Value) -> RawMessage {
        RawMessage {
            type_tag: tag.into(),
            value,
        }
    }

    #[test]
    fn signs_and_filters_by_operator() {
        let op = "terravaloper1me";
        let txs = vec![
            tx(
                1,
                vec![msg(
                    "staking/MsgDelegate",
                    serde_json::json!({ "delegator_address": "terra1d", "validator_address": op,
                        "amount": { "denom": "uluna", "amount": "100" } }),
                )],
                true,
            ),
            tx(
                2,
                vec![msg(
                    "staking/MsgBeginRedelegate",
                    serde_json::json!({ "delegator_address": "terra1d", "validator_src_address": op,
                        "validator_dst_address": "terravaloper1other",
                        "amount": { "denom": "uluna", "amount": "30" } }),
                )],
                true,
            ),
            tx(
                3,
                vec![msg(
                    "staking/MsgUndelegate",
                    serde_json::json!({ "delegator_address": "terra1d", "validator_address": op,
                        "amount": { "denom": "uluna", "amount": "20" } }),
                )],
                true,
            ),
            tx(
                4,
                vec![msg(
                    "staking/MsgDelegate",
                    serde_json::json!({ "delegator_address": "terra1d", "validator_address": "terravaloper1other",
                        "amount": { "denom": "uluna", "amount": "5" } }),
                )],
                true,
            ),
            tx(
                5,
                vec![msg(
                    "staking/MsgDelegate",
                    serde_json::json!({ "delegator_address": "terra1d", "validator_address": op,
                        "amount": { "denom": "uluna", "amount": "7" } }),
                )],
                false,
            ),
        ];
        let page = delegation_events(&txs, op, "uluna", 1, 10);
        assert_eq!(page.total_cnt, 3);
        let amounts: Vec<&str> = page.items.iter().map(|e| e.amount.amount.as_str()).collect();
        assert_eq!(amounts, vec!["100", "-30", "-20"]);
        assert_eq!(page.items[1].event_type, DelegationEventType::Redelegate);

        let second = delegation_events(&txs, op, "uluna", 2, 2);
        assert_eq!(second.items.len(), 1);
        assert_eq!(second.items[0].height, 3);
    }
}

//! Per-account transaction index entries.

use crate::ledger::types::RawTransaction;
use crate::tx::msg::parse;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use time::OffsetDateTime;
use tracing::warn;

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountTxRecord {
    pub account: String,
    pub tx_hash: String,
    pub role: String,
    pub chain_id: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
}

/// Role → addresses implicated by `tx`, unioned across its messages.
pub fn participants_by_role(tx: &RawTransaction) -> BTreeMap<String, BTreeSet<String>> {
    let mut by_role: BTreeMap<String, BTreeSet<String>> = BTreeMap::new();
    for msg in tx.messages() {
        // Participants do not depend on execution outcome, so no log is needed.
        let event = match parse(msg, None, None, false) {
            Ok(ev) => ev,
            Err(e) => {
                warn!(hash = %tx.hash, error = %e, "skipping message");
                continue;
            }
        };
        for (role, addrs) in event.participants {
            by_role.entry(role).or_default().extend(addrs);
        }
    }
    by_role
}

/// One record per (role, address). Failed transactions are indexed too.
pub fn account_tx_records(tx: &RawTransaction) -> Vec<AccountTxRecord> {
    participants_by_role(tx)
        .into_iter()
        .flat_map(|(role, addrs)| {
            addrs.into_iter().map(move |account| AccountTxRecord {
                account,
                tx_hash: tx.hash.clone(),
                role: role.clone(),
                chain_id: tx.chain_id.clone(),
                timestamp: tx.timestamp,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::types::RawMessage;

    fn send(from: &str, to: &str) -> RawMessage {
        RawMessage {
            type_tag: "bank/MsgSend".into(),
            value: serde_json::json!({
                "from_address": from,
                "to_address": to,
                "amount": [{ "denom": "uluna", "amount": "1" }]
            }),
        }
    }

    #[test]
    fn duplicate_addresses_collapse_per_role() {
        let mut tx = RawTransaction {
            hash: "H".into(),
            chain_id: "columbus-4".into(),
            ..Default::default()
        };
        tx.tx.value.msg = vec![send("terra1a", "terra1b"), send("terra1a", "terra1c")];
        let records = account_tx_records(&tx);
        let accounts: Vec<&str> = records.iter().map(|r| r.account.as_str()).collect();
        assert_eq!(accounts, vec!["terra1a", "terra1b", "terra1c"]);
        assert!(records.iter().all(|r| r.role == "send" && r.tx_hash == "H"));
    }

    #[test]
    fn same_address_under_two_roles_gives_two_records() {
        let mut tx = RawTransaction::default();
        tx.tx.value.msg = vec![
            send("terra1a", "terra1b"),
            RawMessage {
                type_tag: "gov/MsgVote".into(),
                value: serde_json::json!({ "proposal_id": "1", "voter": "terra1a", "option": "No" }),
            },
        ];
        let records = account_tx_records(&tx);
        assert_eq!(records.iter().filter(|r| r.account == "terra1a").count(), 2);
    }

    #[test]
    fn unrecognized_or_malformed_messages_emit_nothing() {
        let mut tx = RawTransaction::default();
        tx.tx.value.msg = vec![
            RawMessage {
                type_tag: "wasm/MsgExecuteContract".into(),
                value: serde_json::json!({ "sender": "terra1x" }),
            },
            RawMessage {
                type_tag: "bank/MsgSend".into(),
                value: serde_json::json!({}),
            },
        ];
        assert!(account_tx_records(&tx).is_empty());
    }
}

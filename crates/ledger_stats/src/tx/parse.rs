//! Whole-transaction parse: correlate logs, then parse every message.

use crate::ledger::types::{Coin, RawTransaction};
use crate::tx::log::correlate;
use crate::tx::msg::{parse, ParsedEvent};
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use tracing::warn;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ParsedTx {
    pub txhash: String,
    #[serde(with = "time::serde::rfc3339")]
    pub timestamp: OffsetDateTime,
    pub chain_id: String,
    pub height: u64,
    pub msgs: Vec<ParsedEvent>,
    pub tx_fee: Vec<Coin>,
    pub memo: String,
    pub success: bool,
    pub error_message: Option<String>,
}

/// Parse `tx` as seen by `viewer` (affects redelegate and send signs only).
/// Malformed messages are dropped; their log entry is still consumed so pairing stays positional.
pub fn parse_tx(tx: &RawTransaction, viewer: Option<&str>) -> ParsedTx {
    let mut logs = correlate(tx);
    let status = logs.status().clone();
    let mut msgs = Vec::with_capacity(tx.messages().len());
    for msg in tx.messages() {
        let log = logs.take_next();
        match parse(msg, log.as_ref(), viewer, status.success) {
            Ok(ev) => msgs.push(ev),
            Err(e) => warn!(hash = %tx.hash, error = %e, "skipping message"),
        }
    }
    ParsedTx {
        txhash: tx.hash.clone(),
        timestamp: tx.timestamp,
        chain_id: tx.chain_id.clone(),
        height: tx.height,
        msgs,
        tx_fee: tx.tx.value.fee.amount.clone(),
        memo: tx.tx.value.memo.clone(),
        success: status.success,
        error_message: status.error_message,
    }
}

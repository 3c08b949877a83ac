//! Transaction normalization: log correlation, message parsing, account indexing.

pub mod account;
pub mod governance;
pub mod log;
pub mod msg;
pub mod parse;
pub mod staking;

pub use account::{account_tx_records, participants_by_role, AccountTxRecord};
pub use governance::{proposal_votes, Vote};
pub use log::{correlate, is_successful, CorrelatedLogs, LogEntry, TxStatus};
pub use msg::{parse, MalformedInput, MessageKind, ParsedEvent, SwapOutcome, VoteOption};
pub use parse::{parse_tx, ParsedTx};
pub use staking::{delegation_events, DelegationEvent, DelegationEventType};

use serde::{Deserialize, Serialize};

/// One page of a list. `page` is 1-based.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Page<T> {
    pub total_cnt: usize,
    pub page: usize,
    pub limit: usize,
    pub items: Vec<T>,
}

impl<T> Page<T> {
    pub fn paginate(all: Vec<T>, page: usize, limit: usize) -> Self {
        let total_cnt = all.len();
        let skip = page.saturating_sub(1).saturating_mul(limit);
        Self {
            total_cnt,
            page,
            limit,
            items: all.into_iter().skip(skip).take(limit).collect(),
        }
    }
}

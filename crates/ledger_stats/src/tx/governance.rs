//! Proposal votes extracted from vote transactions.

use crate::ledger::types::RawTransaction;
use crate::tx::msg::{MessageKind, VoteOption};
use crate::tx::parse::parse_tx;
use crate::tx::Page;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Vote {
    pub txhash: String,
    pub proposal_id: String,
    pub answer: VoteOption,
    pub voter: String,
    pub success: bool,
}

/// Every `MsgVote` in `txs`, in input order.
pub fn votes_in(txs: &[RawTransaction]) -> Vec<Vote> {
    txs.iter()
        .flat_map(|tx| {
            let parsed = parse_tx(tx, None);
            let txhash = parsed.txhash;
            parsed.msgs.into_iter().filter_map(move |ev| match ev.kind {
                MessageKind::Vote {
                    proposal_id,
                    voter,
                    option,
                } => Some(Vote {
                    txhash: txhash.clone(),
                    proposal_id,
                    answer: option,
                    voter,
                    success: ev.success,
                }),
                _ => None,
            })
        })
        .collect()
}

/// Each voter's latest vote (`txs` oldest first), optionally filtered by answer, paginated.
pub fn proposal_votes(
    txs: &[RawTransaction],
    option: Option<&VoteOption>,
    page: usize,
    limit: usize,
) -> Page<Vote> {
    let mut unique: Vec<Vote> = Vec::new();
    for vote in votes_in(txs).into_iter().rev() {
        if !unique.iter().any(|v| v.voter == vote.voter) {
            unique.push(vote);
        }
    }
    if let Some(option) = option {
        unique.retain(|v| &v.answer == option);
    }
    Page::paginate(unique, page, limit)
}

/// Number of votes whose message executed successfully.
pub fn successful_vote_count(votes: &[Vote]) -> usize {
    votes.iter().filter(|v| v.success).count()
}

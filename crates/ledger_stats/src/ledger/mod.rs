//! Ledger-node payloads, client, and timestamp normalization.

pub mod client;
mod normalize;
pub mod types;

pub use client::{LcdClient, LcdConfig, LedgerClient, LedgerError};
pub use normalize::{
    day_key, minute_bucket_before, parse_time_bound, parse_time_rfc3339, start_of_day,
    yesterday_window, NormalizeError,
};
pub use types::{BlockReward, Coin, EventAttribute, RawEvent, RawLog, RawMessage, RawTransaction};

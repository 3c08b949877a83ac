//! ledger_stats: transaction normalization and financial aggregation for Terra ledger data.
//!
//! Raw transactions and per-block reward data from a ledger node are correlated with their logs,
//! parsed into typed events, indexed by participant, and folded into swap, reward, and
//! dashboard aggregates. All amounts are exact decimals.

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod dashboard;
pub mod error;
pub mod ledger;
pub mod math;
pub mod pipeline;
pub mod price;
pub mod store;
pub mod tx;

pub use aggregate::{
    ReturnComputation, SwapAggregate, ValidatorReturn, ValidatorReturnEngine, ValidatorReturnInfo,
};
pub use cache::{Clock, SystemClock, TtlCache};
pub use config::PipelineConfig;
pub use dashboard::{bucketize, DashboardSeries, DatedValue};
pub use error::PipelineError;
pub use ledger::{Coin, LcdClient, LcdConfig, LedgerClient, LedgerError, RawTransaction};
pub use store::{SqliteStore, StoreError};
pub use tx::{parse_tx, AccountTxRecord, ParsedEvent, ParsedTx};

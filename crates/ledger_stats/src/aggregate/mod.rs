//! Aggregators over normalized transactions and block data.

pub mod reward;
pub mod swap;

pub use reward::{
    compute_return, window_return, ReturnComputation, RewardSettings, ValidatorReturn,
    ValidatorReturnEngine, ValidatorReturnInfo, ValidatorRewardAccumulator,
};
pub use swap::{
    build_aggregates, quote_spreads, swap_totals, swap_values, SwapAggregate, SwapSettings, SwapTotals,
};

//! Exact decimal arithmetic over base-10 string amounts and additive denom maps.

mod decimal;
mod merge;

pub use decimal::{
    add, div, div_dec, format, integer_portion, is_numeric, mul, parse, sub, MathError,
};
pub use merge::{additive_merge, DenomAmounts};

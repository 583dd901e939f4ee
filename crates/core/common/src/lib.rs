//! Common types for option chain resolution and market data aggregation

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod dates;
pub mod instrument;
pub mod types;

pub use dates::{Clock, DateParseError, FixedClock, SystemClock};
pub use instrument::{ContractSpec, InstrumentRef, OptionRight, OptionSpec, SecurityType};
pub use types::*;

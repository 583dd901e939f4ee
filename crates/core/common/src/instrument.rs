//! Instrument identity
//!
//! A `ContractSpec` describes what the caller asks for; an `InstrumentRef`
//! is what the provider hands back once it has qualified that description.

use crate::Px;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Instrument type classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    /// Equity/Stock instrument
    Stock,
    /// Index instrument
    Index,
    /// Future contract
    Future,
    /// Option on a stock or index
    Option,
    /// Option on a future
    FuturesOption,
}

impl SecurityType {
    /// Venue code for this security type
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Stock => "STK",
            Self::Index => "IND",
            Self::Future => "FUT",
            Self::Option => "OPT",
            Self::FuturesOption => "FOP",
        }
    }

    /// Security type of options written on this underlying
    #[must_use]
    pub const fn option_type(self) -> Self {
        match self {
            Self::Future => Self::FuturesOption,
            _ => Self::Option,
        }
    }
}

impl fmt::Display for SecurityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Option right
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum OptionRight {
    /// Call option
    Call,
    /// Put option
    Put,
}

impl OptionRight {
    /// Venue code ("C" / "P")
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::Call => "C",
            Self::Put => "P",
        }
    }
}

impl fmt::Display for OptionRight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

/// Unresolved description of a tradable instrument
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ContractSpec {
    /// Symbol (e.g. "SPY")
    pub symbol: String,
    /// Security type
    pub security_type: SecurityType,
    /// Routing or listing exchange (e.g. "SMART", "CME")
    pub exchange: String,
    /// Currency
    pub currency: String,
}

impl ContractSpec {
    /// Stock routed through the smart router in USD
    pub fn stock(symbol: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            security_type: SecurityType::Stock,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
        }
    }

    /// Future listed on `exchange` in USD
    pub fn future(symbol: impl Into<String>, exchange: impl Into<String>) -> Self {
        Self {
            symbol: symbol.into(),
            security_type: SecurityType::Future,
            exchange: exchange.into(),
            currency: "USD".to_string(),
        }
    }
}

impl fmt::Display for ContractSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}@{}", self.symbol, self.security_type, self.exchange)
    }
}

/// Provider-qualified instrument. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstrumentRef {
    /// Provider-assigned numeric id
    pub con_id: i64,
    /// Symbol
    pub symbol: String,
    /// Security type
    pub security_type: SecurityType,
    /// Exchange
    pub exchange: String,
    /// Currency
    pub currency: String,
    /// Local (venue) symbol, e.g. "ABC   240621C00100000"
    pub local_symbol: String,
    /// Trading class, empty when the provider does not assign one
    pub trading_class: String,
}

impl InstrumentRef {
    /// True when both refer to the same provider instrument
    #[must_use]
    pub fn same_instrument(&self, other: &Self) -> bool {
        self.con_id == other.con_id
    }
}

impl fmt::Display for InstrumentRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {}@{} #{}",
            self.symbol, self.security_type, self.exchange, self.con_id
        )
    }
}

/// Identifies one option contract before resolution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OptionSpec {
    /// Symbol of the underlying
    pub underlying_symbol: String,
    /// Provider id of the underlying
    pub underlying_con_id: i64,
    /// `Option` or `FuturesOption`
    pub security_type: SecurityType,
    /// Trading class the strikes were listed under
    pub trading_class: String,
    /// Exchange the chain parameters were listed on
    pub exchange: String,
    /// Expiration date
    pub expiration: NaiveDate,
    /// Strike price
    pub strike: Px,
    /// Call or put
    pub right: OptionRight,
}

impl fmt::Display for OptionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} {}{}",
            self.trading_class,
            crate::dates::format_venue_date(self.expiration),
            self.strike,
            self.right
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_option_type_of_underlying() {
        assert_eq!(SecurityType::Stock.option_type(), SecurityType::Option);
        assert_eq!(SecurityType::Index.option_type(), SecurityType::Option);
        assert_eq!(
            SecurityType::Future.option_type(),
            SecurityType::FuturesOption
        );
    }

    #[test]
    fn test_option_spec_display() {
        let spec = OptionSpec {
            underlying_symbol: "ABC".to_string(),
            underlying_con_id: 42,
            security_type: SecurityType::Option,
            trading_class: "ABC".to_string(),
            exchange: "SMART".to_string(),
            expiration: NaiveDate::from_ymd_opt(2024, 6, 21).unwrap(),
            strike: Px::new(105.0),
            right: OptionRight::Call,
        };
        assert_eq!(spec.to_string(), "ABC 20240621 105C");
    }

    #[test]
    fn test_contract_spec_constructors() {
        let stock = ContractSpec::stock("ABC");
        assert_eq!(stock.exchange, "SMART");
        assert_eq!(stock.security_type, SecurityType::Stock);

        let future = ContractSpec::future("ES", "CME");
        assert_eq!(future.exchange, "CME");
        assert_eq!(future.to_string(), "ES FUT@CME");
    }
}

//! Option chain types

use chrono::NaiveDate;
use common::{InstrumentRef, OptionRight, OptionSpec, Px};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Option chains of one underlying keyed by expiration
pub type ChainMap = BTreeMap<NaiveDate, OptionChain>;

/// An option spec together with the contract the provider qualified it to
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolvedOption {
    /// What was asked for
    pub spec: OptionSpec,
    /// What the provider returned
    pub contract: InstrumentRef,
}

impl ResolvedOption {
    /// Pair a spec with its qualified contract
    #[must_use]
    pub const fn new(spec: OptionSpec, contract: InstrumentRef) -> Self {
        Self { spec, contract }
    }

    /// Provider id of the option
    #[must_use]
    pub const fn con_id(&self) -> i64 {
        self.contract.con_id
    }

    /// Strike
    #[must_use]
    pub const fn strike(&self) -> Px {
        self.spec.strike
    }

    /// Call or put
    #[must_use]
    pub const fn right(&self) -> OptionRight {
        self.spec.right
    }

    /// Expiration date
    #[must_use]
    pub const fn expiration(&self) -> NaiveDate {
        self.spec.expiration
    }
}

impl fmt::Display for ResolvedOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} #{}", self.spec, self.contract.con_id)
    }
}

/// All resolved contracts of one underlying for one expiration.
///
/// Every contract shares the chain's underlying and expiration; strikes
/// are unique per side.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OptionChain {
    /// Underlying instrument
    pub underlying: InstrumentRef,
    /// Expiration date
    pub expiration: NaiveDate,
    /// Calls by strike
    pub calls: BTreeMap<Px, ResolvedOption>,
    /// Puts by strike
    pub puts: BTreeMap<Px, ResolvedOption>,
}

impl OptionChain {
    /// Empty chain
    #[must_use]
    pub const fn new(underlying: InstrumentRef, expiration: NaiveDate) -> Self {
        Self {
            underlying,
            expiration,
            calls: BTreeMap::new(),
            puts: BTreeMap::new(),
        }
    }

    /// Add a contract. Hands the option back if it belongs to another
    /// underlying or expiration.
    pub fn insert(&mut self, option: ResolvedOption) -> Result<(), ResolvedOption> {
        if option.spec.underlying_con_id != self.underlying.con_id
            || option.expiration() != self.expiration
        {
            return Err(option);
        }
        let side = match option.right() {
            OptionRight::Call => &mut self.calls,
            OptionRight::Put => &mut self.puts,
        };
        side.insert(option.strike(), option);
        Ok(())
    }

    /// Call at `strike`
    #[must_use]
    pub fn call(&self, strike: Px) -> Option<&ResolvedOption> {
        self.calls.get(&strike)
    }

    /// Put at `strike`
    #[must_use]
    pub fn put(&self, strike: Px) -> Option<&ResolvedOption> {
        self.puts.get(&strike)
    }

    /// Union of call and put strikes, ascending
    #[must_use]
    pub fn strikes(&self) -> Vec<Px> {
        let mut strikes: Vec<Px> = self.calls.keys().chain(self.puts.keys()).copied().collect();
        strikes.sort();
        strikes.dedup();
        strikes
    }

    /// Calls then puts, each ascending by strike
    pub fn contracts(&self) -> impl Iterator<Item = &ResolvedOption> {
        self.calls.values().chain(self.puts.values())
    }

    /// Number of contracts across both sides
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len() + self.puts.len()
    }

    /// True when neither side has contracts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.calls.is_empty() && self.puts.is_empty()
    }
}

impl fmt::Display for OptionChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Option chain for {} on {} ({} calls, {} puts)",
            self.underlying.symbol,
            self.expiration,
            self.calls.len(),
            self.puts.len()
        )
    }
}

/// Outcome of a chain request
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChainResolution {
    /// Chains for every valid requested expiration
    pub chains: ChainMap,
    /// Requested expirations the provider does not list
    pub invalid_expirations: Vec<NaiveDate>,
    /// Option specs the provider refused to qualify
    pub rejected: Vec<OptionSpec>,
}

impl ChainResolution {
    /// Drop the diagnostics and keep the chains
    #[must_use]
    pub fn into_chains(self) -> ChainMap {
        self.chains
    }

    /// True when every requested expiration resolved and no spec was rejected
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.invalid_expirations.is_empty() && self.rejected.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::SecurityType;

    fn underlying() -> InstrumentRef {
        InstrumentRef {
            con_id: 1,
            symbol: "ABC".to_string(),
            security_type: SecurityType::Stock,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            local_symbol: "ABC".to_string(),
            trading_class: "ABC".to_string(),
        }
    }

    fn option(expiration: NaiveDate, strike: f64, right: OptionRight, con_id: i64) -> ResolvedOption {
        let spec = OptionSpec {
            underlying_symbol: "ABC".to_string(),
            underlying_con_id: 1,
            security_type: SecurityType::Option,
            trading_class: "ABC".to_string(),
            exchange: "SMART".to_string(),
            expiration,
            strike: Px::new(strike),
            right,
        };
        let contract = InstrumentRef {
            con_id,
            symbol: "ABC".to_string(),
            security_type: SecurityType::Option,
            exchange: "SMART".to_string(),
            currency: "USD".to_string(),
            local_symbol: format!("ABC {strike}{right}"),
            trading_class: "ABC".to_string(),
        };
        ResolvedOption::new(spec, contract)
    }

    #[test]
    fn test_insert_routes_by_right_and_keys_by_strike() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let mut chain = OptionChain::new(underlying(), expiry);

        chain.insert(option(expiry, 100.0, OptionRight::Call, 11)).unwrap();
        chain.insert(option(expiry, 105.0, OptionRight::Call, 12)).unwrap();
        chain.insert(option(expiry, 100.0, OptionRight::Put, 21)).unwrap();

        assert_eq!(chain.len(), 3);
        assert_eq!(chain.call(Px::new(105.0)).unwrap().con_id(), 12);
        assert_eq!(chain.put(Px::new(100.0)).unwrap().con_id(), 21);
        assert!(chain.put(Px::new(105.0)).is_none());
        assert_eq!(chain.strikes(), vec![Px::new(100.0), Px::new(105.0)]);
        assert_eq!(
            chain.contracts().map(ResolvedOption::con_id).collect::<Vec<_>>(),
            vec![11, 12, 21]
        );
    }

    #[test]
    fn test_insert_rejects_foreign_expiration() {
        let expiry = NaiveDate::from_ymd_opt(2024, 6, 21).unwrap();
        let other = NaiveDate::from_ymd_opt(2024, 7, 19).unwrap();
        let mut chain = OptionChain::new(underlying(), expiry);

        let rejected = chain.insert(option(other, 100.0, OptionRight::Call, 11));
        assert!(rejected.is_err());
        assert!(chain.is_empty());
    }
}

//! Market data tick and readiness predicate

use common::{Px, Ts};
use serde::{Deserialize, Serialize};

/// Model-derived option analytics published by the provider
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OptionGreeks {
    /// Implied volatility
    pub implied_volatility: f64,
    /// Delta
    pub delta: f64,
    /// Gamma
    pub gamma: f64,
    /// Vega
    pub vega: f64,
    /// Theta
    pub theta: f64,
    /// Underlying price used by the model
    pub underlying_price: Option<Px>,
}

/// Tick update for one instrument.
///
/// Every field except the instrument id and timestamp is optional: the
/// provider fills them in as data arrives.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTick {
    /// Provider id of the instrument this tick belongs to
    pub con_id: i64,
    /// Receive timestamp
    pub timestamp: Ts,
    /// Best bid
    pub bid: Option<Px>,
    /// Best ask
    pub ask: Option<Px>,
    /// Last trade price
    pub last: Option<Px>,
    /// Session volume
    pub volume: Option<u64>,
    /// Open interest
    pub open_interest: Option<u64>,
    /// Implied volatility from generic tick 106
    pub implied_volatility: Option<f64>,
    /// Model greeks
    pub model_greeks: Option<OptionGreeks>,
}

impl MarketTick {
    /// Empty tick for `con_id`
    #[must_use]
    pub fn new(con_id: i64) -> Self {
        Self {
            con_id,
            timestamp: Ts::now(),
            bid: None,
            ask: None,
            last: None,
            volume: None,
            open_interest: None,
            implied_volatility: None,
            model_greeks: None,
        }
    }

    /// Set the bid
    #[must_use]
    pub fn with_bid(mut self, bid: Px) -> Self {
        self.bid = Some(bid);
        self
    }

    /// Set the ask
    #[must_use]
    pub fn with_ask(mut self, ask: Px) -> Self {
        self.ask = Some(ask);
        self
    }

    /// Set open interest
    #[must_use]
    pub fn with_open_interest(mut self, open_interest: u64) -> Self {
        self.open_interest = Some(open_interest);
        self
    }

    /// Set model greeks
    #[must_use]
    pub fn with_model_greeks(mut self, greeks: OptionGreeks) -> Self {
        self.model_greeks = Some(greeks);
        self
    }
}

/// Which optional tick fields must be present before data counts as ready
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessPredicate {
    /// Require open interest
    pub require_open_interest: bool,
    /// Require a bid
    pub require_bid: bool,
    /// Require model greeks
    pub require_model_greeks: bool,
}

impl Default for ReadinessPredicate {
    fn default() -> Self {
        Self {
            require_open_interest: true,
            require_bid: true,
            require_model_greeks: false,
        }
    }
}

impl ReadinessPredicate {
    /// Open interest, bid and model greeks all required
    #[must_use]
    pub fn with_analytics() -> Self {
        Self {
            require_open_interest: true,
            require_bid: true,
            require_model_greeks: true,
        }
    }

    /// Check whether `tick` carries every required field
    #[must_use]
    pub const fn is_satisfied(&self, tick: &MarketTick) -> bool {
        (!self.require_open_interest || tick.open_interest.is_some())
            && (!self.require_bid || tick.bid.is_some())
            && (!self.require_model_greeks || tick.model_greeks.is_some())
    }
}

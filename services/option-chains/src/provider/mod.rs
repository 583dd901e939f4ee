//! Upstream contract and market data provider
//!
//! The provider is an external collaborator: it qualifies contracts, lists
//! option chain parameters and streams ticks. Everything in this crate talks
//! to it through [`ContractProvider`] so a live brokerage session and the
//! in-memory [`MockProvider`] are interchangeable.

pub mod mock;

pub use mock::MockProvider;

use crate::market_data::MarketTick;
use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ContractSpec, InstrumentRef, OptionSpec, Px};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use thiserror::Error;
use tokio::sync::mpsc;

/// Provider error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProviderError {
    /// Connection to the provider is down
    #[error("Provider unavailable: {0}")]
    Unavailable(String),

    /// Provider refused the request
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Instrument unknown to the provider
    #[error("Instrument not found: {0}")]
    NotFound(String),

    /// Market data request failed
    #[error("Subscription error: {0}")]
    Subscription(String),

    /// Anything else
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ProviderError {
    /// Whether retrying the same request can succeed
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Result type for provider calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// One option chain parameter entry as listed by the provider
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainParameters {
    /// Exchange the chain is listed on
    pub exchange: String,
    /// Provider id of the underlying
    pub underlying_con_id: i64,
    /// Trading class of the options
    pub trading_class: String,
    /// Contract multiplier
    pub multiplier: String,
    /// Listed expirations
    pub expirations: BTreeSet<NaiveDate>,
    /// Listed strikes (union across expirations)
    pub strikes: BTreeSet<Px>,
}

/// Generic tick types requested alongside top-of-book data
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenericTick {
    /// Put/call volume (100)
    OptionVolume,
    /// Open interest (101)
    OpenInterest,
    /// Historical volatility (104)
    HistoricalVolatility,
    /// Average option volume (105)
    AverageOptionVolume,
    /// Implied volatility (106)
    ImpliedVolatility,
}

impl GenericTick {
    /// Numeric tick id used on the wire
    #[must_use]
    pub const fn id(self) -> u16 {
        match self {
            Self::OptionVolume => 100,
            Self::OpenInterest => 101,
            Self::HistoricalVolatility => 104,
            Self::AverageOptionVolume => 105,
            Self::ImpliedVolatility => 106,
        }
    }

    /// Default tick list for option chain subscriptions
    #[must_use]
    pub fn option_defaults() -> Vec<Self> {
        vec![
            Self::OptionVolume,
            Self::OpenInterest,
            Self::HistoricalVolatility,
            Self::AverageOptionVolume,
            Self::ImpliedVolatility,
        ]
    }

    /// Comma separated wire form, e.g. "100,101,104,105,106"
    #[must_use]
    pub fn tick_list(ticks: &[Self]) -> String {
        ticks
            .iter()
            .map(|t| t.id().to_string())
            .collect::<Vec<_>>()
            .join(",")
    }
}

/// Handle for an open market data request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct MarketDataHandle(pub u64);

impl fmt::Display for MarketDataHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "req#{}", self.0)
    }
}

/// Capability consumed by chain resolution and market data subscription
#[async_trait]
pub trait ContractProvider: Send + Sync {
    /// Qualify an underlying. Idempotent.
    async fn resolve_instrument(&self, spec: &ContractSpec) -> ProviderResult<InstrumentRef>;

    /// Qualify a batch of option specs.
    ///
    /// The result is index-aligned with `specs`; `None` marks a spec the
    /// provider rejected (for example a strike not listed for that expiry).
    async fn qualify_options(&self, specs: &[OptionSpec])
    -> ProviderResult<Vec<Option<InstrumentRef>>>;

    /// List option chain parameters for a qualified underlying
    async fn option_chain_parameters(
        &self,
        underlying: &InstrumentRef,
    ) -> ProviderResult<Vec<ChainParameters>>;

    /// Open a streaming market data request
    async fn open_market_data(
        &self,
        instrument: &InstrumentRef,
        generic_ticks: &[GenericTick],
    ) -> ProviderResult<MarketDataHandle>;

    /// Close a market data request
    async fn close_market_data(&self, handle: MarketDataHandle) -> ProviderResult<()>;

    /// Take the provider's tick feed.
    ///
    /// The feed carries ticks for every open request in the process. It can
    /// be taken once; later calls fail.
    fn tick_feed(&self) -> ProviderResult<mpsc::UnboundedReceiver<MarketTick>>;
}

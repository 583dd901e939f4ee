//! Option chain service
//!
//! Resolves option chains for an underlying with a disk cache keyed by
//! expiration, and subscribes to market data for whole chains with a single
//! readiness notification.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod chains;
pub mod config;
pub mod errors;
pub mod market_data;
pub mod provider;
pub mod service;

pub use chains::{ChainMap, ChainResolution, ChainResolver, ChainStore, OptionChain, ResolvedOption};
pub use config::{OptionChainsConfig, RetryConfig};
pub use errors::{ChainError, ChainResult, SubscriptionError, SubscriptionResult};
pub use market_data::{
    ChainSetSubscription, ChainSubscription, CompletionBarrier, InstrumentSubscription,
    MarketDataContext, MarketDataStream, MarketTick, ReadinessPredicate, ReadySignal,
    SubscriptionSettings, SubscriptionState, readiness_channel,
};
pub use provider::{
    ChainParameters, ContractProvider, GenericTick, MarketDataHandle, MockProvider, ProviderError,
    ProviderResult,
};
pub use service::OptionChainService;

//! Market data subscriptions for resolved option chains
//!
//! `InstrumentSubscription` follows one contract, `ChainSubscription` every
//! contract of one expiration and `ChainSetSubscription` several chains.
//! All of them share one [`MarketDataContext`]: the provider, the process's
//! tick stream and the subscription settings.

pub mod barrier;
pub mod stream;
pub mod subscription;
pub mod tick;

pub use barrier::CompletionBarrier;
pub use stream::{MarketDataStream, TickReceiver};
pub use subscription::{
    ChainSetSubscription, ChainSubscription, InstrumentSubscription, ReadySignal,
    SubscriptionState, readiness_channel,
};
pub use tick::{MarketTick, OptionGreeks, ReadinessPredicate};

use crate::config::OptionChainsConfig;
use crate::provider::{ContractProvider, GenericTick, ProviderResult};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Per-deployment subscription behaviour
#[derive(Debug, Clone, PartialEq)]
pub struct SubscriptionSettings {
    /// Delay between successive per-contract requests
    pub request_throttle: Duration,
    /// Generic ticks requested for every contract
    pub generic_ticks: Vec<GenericTick>,
    /// Fields a tick must carry before a contract counts as ready
    pub readiness: ReadinessPredicate,
    /// Fail a contract that is not ready after this long
    pub readiness_timeout: Option<Duration>,
    /// Also stream each option's underlying
    pub subscribe_underlying: bool,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self::from(&OptionChainsConfig::default())
    }
}

impl From<&OptionChainsConfig> for SubscriptionSettings {
    fn from(config: &OptionChainsConfig) -> Self {
        Self {
            request_throttle: config.request_throttle(),
            generic_ticks: config.generic_ticks.clone(),
            readiness: config.readiness,
            readiness_timeout: config.readiness_timeout(),
            subscribe_underlying: config.subscribe_underlying,
        }
    }
}

/// Whole milliseconds, saturating at `u64::MAX`
pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Handle passed to every subscription node
#[derive(Clone)]
pub struct MarketDataContext {
    provider: Arc<dyn ContractProvider>,
    stream: MarketDataStream,
    settings: Arc<SubscriptionSettings>,
}

impl std::fmt::Debug for MarketDataContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataContext")
            .field("stream", &self.stream)
            .field("settings", &self.settings)
            .finish()
    }
}

impl MarketDataContext {
    /// Take the provider's tick feed and start bridging it into a fresh
    /// stream. Must run inside a Tokio runtime; call once per provider.
    pub fn connect(
        provider: Arc<dyn ContractProvider>,
        settings: SubscriptionSettings,
    ) -> ProviderResult<Self> {
        let feed = provider.tick_feed()?;
        let stream = MarketDataStream::new();
        // Detached: the bridge ends with the feed
        let _bridge = stream.bridge(feed);

        info!(
            throttle_ms = duration_millis(settings.request_throttle),
            ticks = %GenericTick::tick_list(&settings.generic_ticks),
            "Market data context connected"
        );

        Ok(Self {
            provider,
            stream,
            settings: Arc::new(settings),
        })
    }

    /// Upstream provider
    #[must_use]
    pub fn provider(&self) -> &Arc<dyn ContractProvider> {
        &self.provider
    }

    /// Process-wide tick stream
    #[must_use]
    pub const fn stream(&self) -> &MarketDataStream {
        &self.stream
    }

    /// Subscription settings
    #[must_use]
    pub fn settings(&self) -> &SubscriptionSettings {
        &self.settings
    }
}

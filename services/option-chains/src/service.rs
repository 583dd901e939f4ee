//! Option chain service: chain resolution plus market data in one handle

use anyhow::{Context, Result};
use common::{Clock, ContractSpec};
use std::sync::Arc;
use tracing::info;

use crate::chains::{ChainMap, ChainResolution, ChainResolver, ChainStore, OptionChain};
use crate::config::OptionChainsConfig;
use crate::errors::ChainResult;
use crate::market_data::{
    ChainSetSubscription, ChainSubscription, MarketDataContext, SubscriptionSettings,
};
use crate::provider::ContractProvider;

/// Resolves chains and builds subscriptions over one provider connection
pub struct OptionChainService {
    config: OptionChainsConfig,
    resolver: ChainResolver,
    market_data: MarketDataContext,
}

impl std::fmt::Debug for OptionChainService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OptionChainService")
            .field("config", &self.config)
            .field("resolver", &self.resolver)
            .finish()
    }
}

impl OptionChainService {
    /// Open the store and start bridging the provider's tick feed.
    ///
    /// Must run inside a Tokio runtime. The provider's feed is taken here,
    /// so build one service per provider connection.
    pub fn new(
        config: OptionChainsConfig,
        provider: Arc<dyn ContractProvider>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let store = ChainStore::new(config.store_dir.clone(), clock)
            .context("Failed to open option chain store")?;
        let resolver = ChainResolver::new(Arc::clone(&provider), Arc::new(store), &config);
        let market_data = MarketDataContext::connect(provider, SubscriptionSettings::from(&config))
            .context("Failed to connect market data stream")?;

        info!(
            store_dir = %config.store_dir.display(),
            exchange = %config.trading_exchange,
            "Option chain service started"
        );

        Ok(Self {
            config,
            resolver,
            market_data,
        })
    }

    /// Active configuration
    #[must_use]
    pub const fn config(&self) -> &OptionChainsConfig {
        &self.config
    }

    /// Chain resolver
    #[must_use]
    pub const fn resolver(&self) -> &ChainResolver {
        &self.resolver
    }

    /// Market data context shared by every subscription from this service
    #[must_use]
    pub const fn market_data(&self) -> &MarketDataContext {
        &self.market_data
    }

    /// Chains for expirations in venue encoding
    pub async fn get_chains<S: AsRef<str>>(
        &self,
        underlying: &ContractSpec,
        venue_dates: &[S],
    ) -> ChainResult<ChainResolution> {
        self.resolver.get_chains_for_dates(underlying, venue_dates).await
    }

    /// Chains up to `max_days` away
    pub async fn get_chains_up_to_dte(
        &self,
        underlying: &ContractSpec,
        max_days: i64,
    ) -> ChainResult<ChainResolution> {
        self.resolver.get_chains_up_to_dte(underlying, max_days).await
    }

    /// Unopened subscription for one chain
    #[must_use]
    pub fn chain_subscription(&self, chain: &OptionChain) -> ChainSubscription {
        ChainSubscription::new(self.market_data.clone(), chain)
    }

    /// Unopened subscription for several chains
    #[must_use]
    pub fn chain_set_subscription(&self, chains: &ChainMap) -> ChainSetSubscription {
        ChainSetSubscription::new(self.market_data.clone(), chains)
    }
}

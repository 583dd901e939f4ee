//! Shared fixtures for option chain integration tests

#![allow(dead_code)]

use chrono::NaiveDate;
use common::{FixedClock, InstrumentRef, OptionRight, OptionSpec, Px, SecurityType};
use option_chains::provider::ChainParameters;
use option_chains::{
    ChainResolver, ChainStore, ContractProvider, MarketDataContext, MarketTick, MockProvider,
    OptionChain, OptionChainsConfig, ResolvedOption, RetryConfig, SubscriptionSettings,
};
use std::collections::BTreeSet;
use std::sync::{Arc, Once};
use std::time::Duration;
use tempfile::TempDir;

static INIT: Once = Once::new();

/// Initialize test logging once per test binary
pub fn init_test_env() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("option_chains=debug")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub const ABC_CON_ID: i64 = 1001;

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

/// Pinned "today" for every test
pub fn today() -> NaiveDate {
    date(2024, 6, 1)
}

pub fn june() -> NaiveDate {
    date(2024, 6, 21)
}

pub fn july() -> NaiveDate {
    date(2024, 7, 19)
}

pub fn abc() -> InstrumentRef {
    InstrumentRef {
        con_id: ABC_CON_ID,
        symbol: "ABC".to_string(),
        security_type: SecurityType::Stock,
        exchange: "SMART".to_string(),
        currency: "USD".to_string(),
        local_symbol: "ABC".to_string(),
        trading_class: "ABC".to_string(),
    }
}

pub fn strikes(values: &[f64]) -> BTreeSet<Px> {
    values.iter().map(|v| Px::new(*v)).collect()
}

/// ABC listed on SMART with June and July expirations and strikes 100/105,
/// plus a CBOE entry the resolver must ignore
pub fn abc_provider() -> Arc<MockProvider> {
    let provider = Arc::new(MockProvider::new());
    provider.add_underlying(abc());
    provider.add_chain_parameters(ChainParameters {
        exchange: "CBOE".to_string(),
        underlying_con_id: ABC_CON_ID,
        trading_class: "ABC".to_string(),
        multiplier: "100".to_string(),
        expirations: [june()].into_iter().collect(),
        strikes: strikes(&[90.0, 95.0, 100.0, 105.0, 110.0]),
    });
    provider.add_chain_parameters(ChainParameters {
        exchange: "SMART".to_string(),
        underlying_con_id: ABC_CON_ID,
        trading_class: "ABC".to_string(),
        multiplier: "100".to_string(),
        expirations: [june(), july()].into_iter().collect(),
        strikes: strikes(&[100.0, 105.0]),
    });
    provider
}

pub fn test_config(dir: &TempDir) -> OptionChainsConfig {
    OptionChainsConfig {
        store_dir: dir.path().to_path_buf(),
        request_throttle_ms: 1,
        provider_retry: RetryConfig {
            max_retries: 0,
            retry_delay_ms: 1,
        },
        ..OptionChainsConfig::default()
    }
}

pub fn open_store(dir: &TempDir, today: NaiveDate) -> Arc<ChainStore> {
    Arc::new(ChainStore::new(dir.path(), Arc::new(FixedClock(today))).unwrap())
}

/// Resolver over a temp store and the scripted ABC provider
pub struct ResolverHarness {
    pub dir: TempDir,
    pub provider: Arc<MockProvider>,
    pub store: Arc<ChainStore>,
    pub resolver: ChainResolver,
}

impl ResolverHarness {
    pub fn new() -> Self {
        Self::with_config(|_| {})
    }

    pub fn with_config(adjust: impl FnOnce(&mut OptionChainsConfig)) -> Self {
        init_test_env();
        let dir = TempDir::new().unwrap();
        let provider = abc_provider();
        let store = open_store(&dir, today());
        let mut config = test_config(&dir);
        adjust(&mut config);
        let resolver = ChainResolver::new(
            Arc::clone(&provider) as Arc<dyn ContractProvider>,
            Arc::clone(&store),
            &config,
        );
        Self {
            dir,
            provider,
            store,
            resolver,
        }
    }
}

pub fn resolved(
    underlying: &InstrumentRef,
    expiration: NaiveDate,
    strike: f64,
    right: OptionRight,
    con_id: i64,
) -> ResolvedOption {
    let spec = OptionSpec {
        underlying_symbol: underlying.symbol.clone(),
        underlying_con_id: underlying.con_id,
        security_type: SecurityType::Option,
        trading_class: underlying.symbol.clone(),
        exchange: "SMART".to_string(),
        expiration,
        strike: Px::new(strike),
        right,
    };
    let contract = InstrumentRef {
        con_id,
        symbol: underlying.symbol.clone(),
        security_type: SecurityType::Option,
        exchange: "SMART".to_string(),
        currency: "USD".to_string(),
        local_symbol: format!("{} {strike}{right}", underlying.symbol),
        trading_class: underlying.symbol.clone(),
    };
    ResolvedOption::new(spec, contract)
}

/// Chain of 2 calls and 2 puts at 100/105.
/// Contract ids are `base + 1`, `base + 2` for calls and `base + 11`, `base + 12` for puts.
pub fn two_by_two_chain(expiration: NaiveDate, base: i64) -> OptionChain {
    let underlying = abc();
    let mut chain = OptionChain::new(underlying.clone(), expiration);
    for (strike, offset) in [(100.0, 1), (105.0, 2)] {
        chain
            .insert(resolved(&underlying, expiration, strike, OptionRight::Call, base + offset))
            .unwrap();
        chain
            .insert(resolved(&underlying, expiration, strike, OptionRight::Put, base + 10 + offset))
            .unwrap();
    }
    chain
}

pub fn market_data(settings: SubscriptionSettings) -> (Arc<MockProvider>, MarketDataContext) {
    init_test_env();
    let provider = Arc::new(MockProvider::new());
    let ctx = MarketDataContext::connect(
        Arc::clone(&provider) as Arc<dyn ContractProvider>,
        settings,
    )
    .unwrap();
    (provider, ctx)
}

pub fn fast_settings() -> SubscriptionSettings {
    SubscriptionSettings {
        request_throttle: Duration::from_millis(1),
        ..SubscriptionSettings::default()
    }
}

/// Tick carrying everything the default readiness predicate needs
pub fn ready_tick(con_id: i64) -> MarketTick {
    MarketTick::new(con_id)
        .with_bid(Px::new(2.5))
        .with_ask(Px::new(2.6))
        .with_open_interest(1200)
}

/// Let the bridge and watcher tasks drain what was pushed
pub async fn settle() {
    tokio::time::sleep(Duration::from_millis(30)).await;
}

//! Option chain service configuration

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::market_data::ReadinessPredicate;
use crate::provider::GenericTick;

/// Environment variable prefix for overrides (e.g. `OPTION_CHAINS__STORE_DIR`)
pub const ENV_PREFIX: &str = "OPTION_CHAINS";

/// Retry policy for provider calls. Only `Unavailable` errors are retried.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct RetryConfig {
    /// Retries after the first attempt (0 = fail fast)
    pub max_retries: u32,
    /// Delay before the first retry, doubled for each further one
    pub retry_delay_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 0,
            retry_delay_ms: 500,
        }
    }
}

/// Option chain service configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OptionChainsConfig {
    /// Directory holding one chain record per underlying
    pub store_dir: PathBuf,

    /// Exchange whose chain parameters are used for stock and index underlyings
    pub trading_exchange: String,

    /// Delay between successive per-contract market data requests
    pub request_throttle_ms: u64,

    /// Generic ticks requested with every option subscription
    pub generic_ticks: Vec<GenericTick>,

    /// Fields a tick must carry before a contract counts as ready
    pub readiness: ReadinessPredicate,

    /// Give up on a contract that is not ready after this long (None = wait forever)
    pub readiness_timeout_ms: Option<u64>,

    /// Also stream the underlying alongside every option
    pub subscribe_underlying: bool,

    /// Provider retry policy
    pub provider_retry: RetryConfig,
}

impl Default for OptionChainsConfig {
    fn default() -> Self {
        Self {
            store_dir: PathBuf::from("./data/option_chains"),
            trading_exchange: "SMART".to_string(),
            request_throttle_ms: 100,
            generic_ticks: GenericTick::option_defaults(),
            readiness: ReadinessPredicate::default(),
            readiness_timeout_ms: None,
            subscribe_underlying: false,
            provider_retry: RetryConfig::default(),
        }
    }
}

impl OptionChainsConfig {
    /// Load configuration from file, with `OPTION_CHAINS__*` environment overrides
    pub fn from_file(path: &str) -> Result<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::with_name(path))
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?;

        Ok(settings.try_deserialize()?)
    }

    /// Delay between per-contract requests
    #[must_use]
    pub const fn request_throttle(&self) -> Duration {
        Duration::from_millis(self.request_throttle_ms)
    }

    /// Readiness timeout, if any
    #[must_use]
    pub fn readiness_timeout(&self) -> Option<Duration> {
        self.readiness_timeout_ms.map(Duration::from_millis)
    }
}

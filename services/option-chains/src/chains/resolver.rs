//! Expiration-aware chain resolution
//!
//! Requests are split into cache hits and misses against the chain store.
//! Misses are built strike by strike from the provider's chain parameters,
//! qualified in one batch per expiration, merged into the store and
//! returned together with the hits.

use chrono::{Duration as ChronoDuration, NaiveDate};
use common::dates::{days_to_expiration, format_venue_date, parse_venue_dates};
use common::{ContractSpec, InstrumentRef, OptionRight, OptionSpec, SecurityType};
use std::collections::BTreeSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::store::ChainStore;
use super::types::{ChainMap, ChainResolution, OptionChain, ResolvedOption};
use crate::config::{OptionChainsConfig, RetryConfig};
use crate::errors::{ChainError, ChainResult};
use crate::provider::{ChainParameters, ContractProvider, ProviderResult};

/// Resolves option chains for an underlying, backed by a [`ChainStore`]
pub struct ChainResolver {
    provider: Arc<dyn ContractProvider>,
    store: Arc<ChainStore>,
    trading_exchange: String,
    retry: RetryConfig,
}

impl std::fmt::Debug for ChainResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainResolver")
            .field("store", &self.store)
            .field("trading_exchange", &self.trading_exchange)
            .field("retry", &self.retry)
            .finish()
    }
}

/// Qualified underlying plus the chain parameters selected for it
struct ChainContext {
    underlying: InstrumentRef,
    parameters: ChainParameters,
}

impl ChainResolver {
    /// Create a resolver
    pub fn new(
        provider: Arc<dyn ContractProvider>,
        store: Arc<ChainStore>,
        config: &OptionChainsConfig,
    ) -> Self {
        Self {
            provider,
            store,
            trading_exchange: config.trading_exchange.clone(),
            retry: config.provider_retry.clone(),
        }
    }

    /// Backing store
    #[must_use]
    pub fn store(&self) -> &ChainStore {
        &self.store
    }

    /// Chains for an explicit set of expirations
    pub async fn get_chains(
        &self,
        underlying: &ContractSpec,
        expirations: &BTreeSet<NaiveDate>,
    ) -> ChainResult<ChainResolution> {
        let ctx = self.chain_context(underlying).await?;
        self.resolve(&ctx, expirations).await
    }

    /// Chains for expirations given in venue encoding ("20240621")
    pub async fn get_chains_for_dates<S: AsRef<str>>(
        &self,
        underlying: &ContractSpec,
        venue_dates: &[S],
    ) -> ChainResult<ChainResolution> {
        let expirations: BTreeSet<NaiveDate> = parse_venue_dates(venue_dates)?.into_iter().collect();
        self.get_chains(underlying, &expirations).await
    }

    /// Chains for every listed expiration in `begin..=end`.
    ///
    /// Expirations before today are never part of the range; an empty or
    /// inverted range yields an empty resolution without provider calls.
    pub async fn get_chains_in_date_range(
        &self,
        underlying: &ContractSpec,
        begin: NaiveDate,
        end: NaiveDate,
    ) -> ChainResult<ChainResolution> {
        let begin = begin.max(self.store.today());
        if begin > end {
            debug!(symbol = %underlying.symbol, %begin, %end, "Empty expiration range");
            return Ok(ChainResolution::default());
        }

        let ctx = self.chain_context(underlying).await?;
        let expirations: BTreeSet<NaiveDate> = ctx
            .parameters
            .expirations
            .range(begin..=end)
            .copied()
            .collect();

        debug!(
            symbol = %ctx.underlying.symbol,
            %begin,
            %end,
            matched = expirations.len(),
            "Expirations in date range"
        );
        self.resolve(&ctx, &expirations).await
    }

    /// Chains whose days-to-expiration lie in `min_days..=max_days`
    pub async fn get_chains_in_dte_range(
        &self,
        underlying: &ContractSpec,
        min_days: i64,
        max_days: i64,
    ) -> ChainResult<ChainResolution> {
        let today = self.store.today();
        let begin = offset_date(today, min_days)?;
        let end = offset_date(today, max_days)?;
        self.get_chains_in_date_range(underlying, begin, end).await
    }

    /// Chains for every listed expiration up to `max_days` away
    pub async fn get_chains_up_to_dte(
        &self,
        underlying: &ContractSpec,
        max_days: i64,
    ) -> ChainResult<ChainResolution> {
        self.get_chains_in_dte_range(underlying, 0, max_days).await
    }

    async fn chain_context(&self, spec: &ContractSpec) -> ChainResult<ChainContext> {
        let underlying = self
            .with_retry("resolve_instrument", || self.provider.resolve_instrument(spec))
            .await?;

        let listed = self
            .with_retry("option_chain_parameters", || {
                self.provider.option_chain_parameters(&underlying)
            })
            .await?;

        let parameters = self.select_parameters(&underlying, listed)?;
        Ok(ChainContext {
            underlying,
            parameters,
        })
    }

    /// Futures carry their options on their own exchange; everything else
    /// uses the configured trading exchange.
    fn select_parameters(
        &self,
        underlying: &InstrumentRef,
        listed: Vec<ChainParameters>,
    ) -> ChainResult<ChainParameters> {
        let exchange = match underlying.security_type {
            SecurityType::Future => underlying.exchange.as_str(),
            _ => self.trading_exchange.as_str(),
        };

        listed
            .into_iter()
            .find(|p| p.exchange == exchange)
            .ok_or_else(|| ChainError::NoChainParameters {
                symbol: underlying.symbol.clone(),
                exchange: exchange.to_string(),
            })
    }

    async fn resolve(
        &self,
        ctx: &ChainContext,
        requested: &BTreeSet<NaiveDate>,
    ) -> ChainResult<ChainResolution> {
        let underlying = &ctx.underlying;
        let today = self.store.today();
        let mut resolution = ChainResolution::default();

        let mut valid = BTreeSet::new();
        for expiration in requested {
            // Listed but already past locally still cannot be cached
            if ctx.parameters.expirations.contains(expiration)
                && days_to_expiration(*expiration, today) >= 0
            {
                valid.insert(*expiration);
            } else {
                let err = ChainError::InvalidExpiration {
                    symbol: underlying.symbol.clone(),
                    expiration: *expiration,
                };
                warn!(venue_date = %format_venue_date(*expiration), "{err}");
                resolution.invalid_expirations.push(*expiration);
            }
        }

        let _guard = self.store.lock(underlying).await;
        let mut stored = self.store.load(underlying)?;

        let (hits, misses): (Vec<NaiveDate>, Vec<NaiveDate>) =
            valid.into_iter().partition(|e| stored.contains_key(e));

        debug!(
            symbol = %underlying.symbol,
            hits = hits.len(),
            misses = misses.len(),
            "Chain cache lookup"
        );

        for expiration in &hits {
            if let Some(chain) = stored.get(expiration) {
                resolution.chains.insert(*expiration, chain.clone());
            }
        }

        if misses.is_empty() {
            return Ok(resolution);
        }

        let mut fresh = ChainMap::new();
        let mut failure = None;
        for expiration in misses {
            match self
                .build_chain(ctx, expiration, &mut resolution.rejected)
                .await
            {
                Ok(chain) => {
                    fresh.insert(expiration, chain);
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        // Chains qualified before a failure are kept for the next call
        if !fresh.is_empty() {
            stored.extend(fresh.iter().map(|(e, c)| (*e, c.clone())));
            self.store.save(underlying, &stored)?;
            info!(
                symbol = %underlying.symbol,
                added = fresh.len(),
                stored = stored.len(),
                "Option chain cache updated"
            );
        }

        if let Some(err) = failure {
            warn!(symbol = %underlying.symbol, saved = fresh.len(), error = %err, "Chain resolution aborted");
            return Err(err);
        }

        resolution.chains.extend(fresh);
        Ok(resolution)
    }

    async fn build_chain(
        &self,
        ctx: &ChainContext,
        expiration: NaiveDate,
        rejected: &mut Vec<OptionSpec>,
    ) -> ChainResult<OptionChain> {
        let underlying = &ctx.underlying;
        info!(
            symbol = %underlying.symbol,
            %expiration,
            strikes = ctx.parameters.strikes.len(),
            "Creating option contracts"
        );

        let specs: Vec<OptionSpec> = [OptionRight::Call, OptionRight::Put]
            .into_iter()
            .flat_map(|right| {
                ctx.parameters.strikes.iter().map(move |strike| OptionSpec {
                    underlying_symbol: underlying.symbol.clone(),
                    underlying_con_id: underlying.con_id,
                    security_type: underlying.security_type.option_type(),
                    trading_class: ctx.parameters.trading_class.clone(),
                    exchange: ctx.parameters.exchange.clone(),
                    expiration,
                    strike: *strike,
                    right,
                })
            })
            .collect();

        let qualified = self
            .with_retry("qualify_options", || self.provider.qualify_options(&specs))
            .await?;

        let mut chain = OptionChain::new(underlying.clone(), expiration);
        let mut dropped = 0_usize;
        for (spec, contract) in specs.into_iter().zip(qualified) {
            match contract {
                Some(contract) => {
                    if let Err(option) = chain.insert(ResolvedOption::new(spec, contract)) {
                        warn!(option = %option, "Qualified option does not belong to chain, dropped");
                    }
                }
                None => {
                    let err = ChainError::QualificationRejected {
                        spec: Box::new(spec.clone()),
                    };
                    debug!("{err}");
                    dropped += 1;
                    rejected.push(spec);
                }
            }
        }

        if dropped > 0 {
            warn!(
                symbol = %underlying.symbol,
                %expiration,
                dropped,
                "Provider rejected some option contracts"
            );
        }
        info!(
            symbol = %underlying.symbol,
            %expiration,
            calls = chain.calls.len(),
            puts = chain.puts.len(),
            "Created option contracts"
        );

        Ok(chain)
    }

    async fn with_retry<T, F, Fut>(&self, operation: &str, mut call: F) -> ChainResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = ProviderResult<T>>,
    {
        let mut retries = 0;
        let mut delay = self.retry.retry_delay_ms;

        loop {
            match call().await {
                Ok(value) => return Ok(value),
                Err(e) if e.is_retryable() && retries < self.retry.max_retries => {
                    retries += 1;
                    warn!(
                        operation,
                        error = %e,
                        attempt = retries,
                        max_retries = self.retry.max_retries,
                        delay_ms = delay,
                        "Provider call failed, retrying"
                    );
                    sleep(Duration::from_millis(delay)).await;
                    delay = delay.saturating_mul(2);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }
}

fn offset_date(today: NaiveDate, days: i64) -> ChainResult<NaiveDate> {
    ChronoDuration::try_days(days)
        .and_then(|offset| today.checked_add_signed(offset))
        .ok_or(ChainError::DateOutOfRange { from: today, days })
}

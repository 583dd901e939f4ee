//! In-memory contract provider for tests and local development
//!
//! Serves scripted underlyings and chain parameters, hands out stable ids
//! for qualified options, records every request it sees and lets the
//! caller push ticks into the feed by hand.

use async_trait::async_trait;
use chrono::NaiveDate;
use common::{ContractSpec, InstrumentRef, OptionSpec, Px};
use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tracing::debug;

use super::{
    ChainParameters, ContractProvider, GenericTick, MarketDataHandle, ProviderError,
    ProviderResult,
};
use crate::market_data::MarketTick;

const FIRST_OPTION_CON_ID: i64 = 500_000;

#[derive(Default)]
struct MockState {
    underlyings: FxHashMap<String, InstrumentRef>,
    chain_parameters: FxHashMap<i64, Vec<ChainParameters>>,
    rejected: FxHashSet<(NaiveDate, Px)>,
    failing_expirations: FxHashSet<NaiveDate>,
    qualified: FxHashMap<OptionSpec, InstrumentRef>,
    unavailable: bool,
    failures_pending: u32,
    resolve_calls: usize,
    chain_parameter_calls: usize,
    qualification_batches: Vec<usize>,
    opened: Vec<(MarketDataHandle, i64)>,
    open: FxHashMap<MarketDataHandle, i64>,
    close_counts: FxHashMap<MarketDataHandle, usize>,
    last_generic_ticks: Vec<GenericTick>,
}

/// Scripted [`ContractProvider`]
pub struct MockProvider {
    state: Mutex<MockState>,
    tick_tx: Mutex<Option<mpsc::UnboundedSender<MarketTick>>>,
    tick_rx: Mutex<Option<mpsc::UnboundedReceiver<MarketTick>>>,
    next_con_id: AtomicI64,
    next_handle: AtomicU64,
}

impl Default for MockProvider {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for MockProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("MockProvider")
            .field("underlyings", &state.underlyings.len())
            .field("open_requests", &state.open.len())
            .field("unavailable", &state.unavailable)
            .finish()
    }
}

impl MockProvider {
    /// Create a provider with nothing listed
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            state: Mutex::new(MockState::default()),
            tick_tx: Mutex::new(Some(tx)),
            tick_rx: Mutex::new(Some(rx)),
            next_con_id: AtomicI64::new(FIRST_OPTION_CON_ID),
            next_handle: AtomicU64::new(1),
        }
    }

    /// List an underlying. `resolve_instrument` matches it by symbol.
    pub fn add_underlying(&self, underlying: InstrumentRef) {
        self.state
            .lock()
            .underlyings
            .insert(underlying.symbol.clone(), underlying);
    }

    /// List chain parameters for an underlying
    pub fn add_chain_parameters(&self, parameters: ChainParameters) {
        self.state
            .lock()
            .chain_parameters
            .entry(parameters.underlying_con_id)
            .or_default()
            .push(parameters);
    }

    /// Refuse to qualify both rights at `strike` for `expiration`
    pub fn reject_strike(&self, expiration: NaiveDate, strike: Px) {
        self.state.lock().rejected.insert((expiration, strike));
    }

    /// Fail qualification batches touching `expiration` with `Unavailable`
    pub fn fail_qualification_for(&self, expiration: NaiveDate) {
        self.state.lock().failing_expirations.insert(expiration);
    }

    /// Undo every [`Self::fail_qualification_for`]
    pub fn clear_qualification_failures(&self) {
        self.state.lock().failing_expirations.clear();
    }

    /// Fail every request with `Unavailable` until switched back
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unavailable = unavailable;
    }

    /// Fail the next `count` requests with `Unavailable`
    pub fn fail_next(&self, count: u32) {
        self.state.lock().failures_pending = count;
    }

    /// Inject a tick into the feed. Returns false once the feed is gone.
    pub fn push_tick(&self, tick: MarketTick) -> bool {
        self.tick_tx
            .lock()
            .as_ref()
            .is_some_and(|tx| tx.send(tick).is_ok())
    }

    /// End the tick feed, as a dropped connection would
    pub fn disconnect_feed(&self) {
        self.tick_tx.lock().take();
    }

    /// `resolve_instrument` calls so far
    #[must_use]
    pub fn resolve_calls(&self) -> usize {
        self.state.lock().resolve_calls
    }

    /// `option_chain_parameters` calls so far
    #[must_use]
    pub fn chain_parameter_calls(&self) -> usize {
        self.state.lock().chain_parameter_calls
    }

    /// `qualify_options` calls so far
    #[must_use]
    pub fn qualification_calls(&self) -> usize {
        self.state.lock().qualification_batches.len()
    }

    /// Batch sizes of every `qualify_options` call, in order
    #[must_use]
    pub fn qualification_batches(&self) -> Vec<usize> {
        self.state.lock().qualification_batches.clone()
    }

    /// Every market data request ever opened, in order
    #[must_use]
    pub fn opened(&self) -> Vec<(MarketDataHandle, i64)> {
        self.state.lock().opened.clone()
    }

    /// Requests opened and not yet closed
    #[must_use]
    pub fn open_count(&self) -> usize {
        self.state.lock().open.len()
    }

    /// How many times `handle` was closed
    #[must_use]
    pub fn close_count(&self, handle: MarketDataHandle) -> usize {
        self.state
            .lock()
            .close_counts
            .get(&handle)
            .copied()
            .unwrap_or(0)
    }

    /// Generic ticks of the most recent open request
    #[must_use]
    pub fn last_generic_ticks(&self) -> Vec<GenericTick> {
        self.state.lock().last_generic_ticks.clone()
    }

    fn check_available(state: &mut MockState) -> ProviderResult<()> {
        if state.failures_pending > 0 {
            state.failures_pending -= 1;
            return Err(ProviderError::Unavailable(
                "mock connection dropped".to_string(),
            ));
        }
        if state.unavailable {
            return Err(ProviderError::Unavailable(
                "mock provider offline".to_string(),
            ));
        }
        Ok(())
    }

    fn qualify_one(&self, state: &mut MockState, spec: &OptionSpec) -> Option<InstrumentRef> {
        if state.rejected.contains(&(spec.expiration, spec.strike)) {
            return None;
        }
        let next_con_id = &self.next_con_id;
        let contract = state.qualified.entry(spec.clone()).or_insert_with(|| {
            let local_symbol = format!(
                "{} {} {}{}",
                spec.underlying_symbol,
                common::dates::format_venue_date(spec.expiration),
                spec.strike,
                spec.right
            );
            InstrumentRef {
                con_id: next_con_id.fetch_add(1, Ordering::Relaxed),
                symbol: spec.underlying_symbol.clone(),
                security_type: spec.security_type,
                exchange: spec.exchange.clone(),
                currency: "USD".to_string(),
                local_symbol,
                trading_class: spec.trading_class.clone(),
            }
        });
        Some(contract.clone())
    }
}

#[async_trait]
impl ContractProvider for MockProvider {
    async fn resolve_instrument(&self, spec: &ContractSpec) -> ProviderResult<InstrumentRef> {
        let mut state = self.state.lock();
        state.resolve_calls += 1;
        Self::check_available(&mut state)?;

        state
            .underlyings
            .get(&spec.symbol)
            .filter(|u| u.security_type == spec.security_type)
            .cloned()
            .ok_or_else(|| ProviderError::NotFound(spec.to_string()))
    }

    async fn qualify_options(
        &self,
        specs: &[OptionSpec],
    ) -> ProviderResult<Vec<Option<InstrumentRef>>> {
        let mut state = self.state.lock();
        state.qualification_batches.push(specs.len());
        Self::check_available(&mut state)?;
        if let Some(spec) = specs
            .iter()
            .find(|s| state.failing_expirations.contains(&s.expiration))
        {
            return Err(ProviderError::Unavailable(format!(
                "mock qualification down for {}",
                spec.expiration
            )));
        }

        Ok(specs
            .iter()
            .map(|spec| self.qualify_one(&mut state, spec))
            .collect())
    }

    async fn option_chain_parameters(
        &self,
        underlying: &InstrumentRef,
    ) -> ProviderResult<Vec<ChainParameters>> {
        let mut state = self.state.lock();
        state.chain_parameter_calls += 1;
        Self::check_available(&mut state)?;

        Ok(state
            .chain_parameters
            .get(&underlying.con_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn open_market_data(
        &self,
        instrument: &InstrumentRef,
        generic_ticks: &[GenericTick],
    ) -> ProviderResult<MarketDataHandle> {
        let mut state = self.state.lock();
        Self::check_available(&mut state)?;

        let handle = MarketDataHandle(self.next_handle.fetch_add(1, Ordering::Relaxed));
        state.opened.push((handle, instrument.con_id));
        state.open.insert(handle, instrument.con_id);
        state.last_generic_ticks = generic_ticks.to_vec();
        debug!(%handle, con_id = instrument.con_id, "Mock market data opened");
        Ok(handle)
    }

    async fn close_market_data(&self, handle: MarketDataHandle) -> ProviderResult<()> {
        let mut state = self.state.lock();
        *state.close_counts.entry(handle).or_default() += 1;
        match state.open.remove(&handle) {
            Some(_) => Ok(()),
            None => Err(ProviderError::Rejected(format!("{handle} is not open"))),
        }
    }

    fn tick_feed(&self) -> ProviderResult<mpsc::UnboundedReceiver<MarketTick>> {
        self.tick_rx
            .lock()
            .take()
            .ok_or_else(|| ProviderError::Internal("tick feed already taken".to_string()))
    }
}

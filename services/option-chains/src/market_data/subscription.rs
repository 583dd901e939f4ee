//! Subscription nodes: one contract, one chain, a set of chains
//!
//! Every node moves `Unsubscribed -> Pending -> Ready` and back to
//! `Unsubscribed` on teardown. The readiness callback receives `Ok(())` once
//! the node is ready or the first error that prevents it, and is never
//! invoked after `unsubscribe`.

use chrono::NaiveDate;
use common::{InstrumentRef, Px};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fmt;
use std::ops::Index;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{CompletionBarrier, MarketDataContext, MarketTick, ReadinessPredicate, TickReceiver};
use crate::chains::{ChainMap, OptionChain, ResolvedOption};
use crate::errors::{SubscriptionError, SubscriptionResult};
use crate::provider::MarketDataHandle;

type ReadyCallback = Box<dyn FnOnce(SubscriptionResult<()>) + Send + 'static>;

/// Lifecycle of a subscription node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    /// No provider request open
    Unsubscribed,
    /// Requests open, waiting for data
    Pending,
    /// Every constituent has reported ready
    Ready,
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unsubscribed => "unsubscribed",
            Self::Pending => "pending",
            Self::Ready => "ready",
        };
        f.write_str(s)
    }
}

/// Resolves once with the outcome handed to a readiness callback
#[derive(Debug)]
pub struct ReadySignal {
    rx: oneshot::Receiver<SubscriptionResult<()>>,
}

impl ReadySignal {
    /// Wait for the outcome. A node unsubscribed first yields
    /// [`SubscriptionError::Cancelled`].
    pub async fn wait(self) -> SubscriptionResult<()> {
        self.rx.await.unwrap_or(Err(SubscriptionError::Cancelled))
    }
}

/// Callback and matching [`ReadySignal`] for awaiting readiness
pub fn readiness_channel() -> (
    impl FnOnce(SubscriptionResult<()>) + Send + 'static,
    ReadySignal,
) {
    let (tx, rx) = oneshot::channel();
    let callback = move |outcome: SubscriptionResult<()>| {
        // Receiver gone means nobody is waiting any more
        let _ = tx.send(outcome);
    };
    (callback, ReadySignal { rx })
}

/// State and pending callback shared between a node and its tasks
struct NodeShared {
    state: Mutex<SubscriptionState>,
    on_ready: Mutex<Option<ReadyCallback>>,
}

impl NodeShared {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(SubscriptionState::Unsubscribed),
            on_ready: Mutex::new(None),
        })
    }

    fn state(&self) -> SubscriptionState {
        *self.state.lock()
    }

    fn set_state(&self, state: SubscriptionState) {
        *self.state.lock() = state;
    }

    fn arm<F>(&self, on_ready: F)
    where
        F: FnOnce(SubscriptionResult<()>) + Send + 'static,
    {
        *self.on_ready.lock() = Some(Box::new(on_ready));
        self.set_state(SubscriptionState::Pending);
    }

    /// Mark ready and report. False if already reported or cancelled.
    fn complete(&self) -> bool {
        let callback = self.on_ready.lock().take();
        match callback {
            Some(callback) => {
                self.set_state(SubscriptionState::Ready);
                callback(Ok(()));
                true
            }
            None => false,
        }
    }

    /// Report a failure. False if already reported or cancelled.
    fn fail(&self, err: SubscriptionError) -> bool {
        let callback = self.on_ready.lock().take();
        match callback {
            Some(callback) => {
                callback(Err(err));
                true
            }
            None => false,
        }
    }

    fn cancel(&self) {
        self.on_ready.lock().take();
        self.set_state(SubscriptionState::Unsubscribed);
    }
}

/// Market data for one contract
pub struct InstrumentSubscription {
    ctx: MarketDataContext,
    option: ResolvedOption,
    underlying: Option<InstrumentRef>,
    shared: Arc<NodeShared>,
    latest_tick: Arc<Mutex<Option<MarketTick>>>,
    handles: Vec<MarketDataHandle>,
    watcher: Option<JoinHandle<()>>,
}

impl InstrumentSubscription {
    /// Subscription for `option`, not yet opened
    #[must_use]
    pub fn new(ctx: MarketDataContext, option: ResolvedOption) -> Self {
        Self {
            ctx,
            option,
            underlying: None,
            shared: NodeShared::new(),
            latest_tick: Arc::new(Mutex::new(None)),
            handles: Vec::new(),
            watcher: None,
        }
    }

    /// Underlying to stream alongside the option when the settings ask for it
    #[must_use]
    pub fn with_underlying(mut self, underlying: InstrumentRef) -> Self {
        self.underlying = Some(underlying);
        self
    }

    /// Open the provider request and start watching for readiness.
    ///
    /// Returns once the request is open; `on_ready` is invoked later from
    /// the tick delivery task. If opening fails the error is returned here
    /// and `on_ready` is dropped without being called.
    pub async fn subscribe<F>(&mut self, on_ready: F) -> SubscriptionResult<()>
    where
        F: FnOnce(SubscriptionResult<()>) + Send + 'static,
    {
        if !self.handles.is_empty() {
            return Err(SubscriptionError::AlreadySubscribed(self.to_string()));
        }

        // Registered before the request opens so the first tick cannot be missed
        let events = self.ctx.stream().events();
        let provider = Arc::clone(self.ctx.provider());
        let settings = self.ctx.settings().clone();

        let handle = provider
            .open_market_data(&self.option.contract, &settings.generic_ticks)
            .await?;
        self.handles.push(handle);

        if settings.subscribe_underlying {
            if let Some(underlying) = self.underlying.clone() {
                match provider.open_market_data(&underlying, &[]).await {
                    Ok(handle) => self.handles.push(handle),
                    Err(e) => {
                        // Close failures are already logged; the open error wins
                        let _ = self.close_handles().await;
                        return Err(e.into());
                    }
                }
            }
        }

        self.shared.arm(on_ready);
        debug!(option = %self.option, %handle, "Market data requested");

        let watch = ReadinessWatch {
            events,
            con_id: self.option.con_id(),
            predicate: settings.readiness,
            timeout: settings.readiness_timeout,
            label: self.option.to_string(),
            shared: Arc::clone(&self.shared),
            latest_tick: Arc::clone(&self.latest_tick),
        };
        self.watcher = Some(tokio::spawn(watch.run()));
        Ok(())
    }

    /// Close every provider request and drop the tick snapshot.
    ///
    /// A second call finds nothing open and does nothing. Close failures
    /// are logged; the first is returned after every request was attempted.
    pub async fn unsubscribe(&mut self) -> SubscriptionResult<()> {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        self.shared.cancel();
        let result = self.close_handles().await;
        self.latest_tick.lock().take();
        result
    }

    async fn close_handles(&mut self) -> SubscriptionResult<()> {
        let provider = Arc::clone(self.ctx.provider());
        let mut first_err = None;
        for handle in self.handles.drain(..) {
            if let Err(e) = provider.close_market_data(handle).await {
                warn!(option = %self.option, %handle, error = %e, "Failed to close market data");
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), |e| Err(e.into()))
    }

    /// Contract being followed
    #[must_use]
    pub const fn option(&self) -> &ResolvedOption {
        &self.option
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// True once readiness has been reported
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SubscriptionState::Ready
    }

    /// Most recent tick for this contract, until unsubscribed
    #[must_use]
    pub fn latest_tick(&self) -> Option<MarketTick> {
        self.latest_tick.lock().clone()
    }

    /// Provider requests currently open for this node
    #[must_use]
    pub fn handles(&self) -> &[MarketDataHandle] {
        &self.handles
    }
}

impl Drop for InstrumentSubscription {
    fn drop(&mut self) {
        if let Some(watcher) = self.watcher.take() {
            watcher.abort();
        }
        if !self.handles.is_empty() {
            warn!(
                option = %self.option,
                open = self.handles.len(),
                "Subscription dropped without unsubscribe, provider requests left open"
            );
        }
    }
}

impl fmt::Display for InstrumentSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.option)
    }
}

/// Tick filter for one contract, run as its own task
struct ReadinessWatch {
    events: TickReceiver,
    con_id: i64,
    predicate: ReadinessPredicate,
    timeout: Option<Duration>,
    label: String,
    shared: Arc<NodeShared>,
    latest_tick: Arc<Mutex<Option<MarketTick>>>,
}

impl ReadinessWatch {
    async fn run(mut self) {
        let outcome = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, self.wait_ready())
                .await
                .unwrap_or_else(|_| {
                    Err(SubscriptionError::Timeout {
                        target: self.label.clone(),
                        timeout_ms: super::duration_millis(limit),
                    })
                }),
            None => self.wait_ready().await,
        };

        match outcome {
            Ok(()) => {
                if self.shared.complete() {
                    debug!(option = %self.label, "Market data ready");
                }
            }
            Err(e) => {
                warn!(option = %self.label, error = %e, "Market data not ready");
                self.shared.fail(e);
                return;
            }
        }

        // Keep the snapshot current; readiness is never reported again
        while let Some(tick) = self.events.recv_for(self.con_id).await {
            *self.latest_tick.lock() = Some(tick);
        }
    }

    async fn wait_ready(&mut self) -> SubscriptionResult<()> {
        while let Some(tick) = self.events.recv_for(self.con_id).await {
            let ready = self.predicate.is_satisfied(&tick);
            *self.latest_tick.lock() = Some(tick);
            if ready {
                return Ok(());
            }
        }
        Err(SubscriptionError::StreamClosed(self.label.clone()))
    }
}

/// Market data for every contract of one option chain
pub struct ChainSubscription {
    ctx: MarketDataContext,
    underlying: InstrumentRef,
    expiration: NaiveDate,
    calls: BTreeMap<Px, InstrumentSubscription>,
    puts: BTreeMap<Px, InstrumentSubscription>,
    shared: Arc<NodeShared>,
    barrier: Option<Arc<CompletionBarrier>>,
}

impl ChainSubscription {
    /// One unopened subscription per contract of `chain`
    #[must_use]
    pub fn new(ctx: MarketDataContext, chain: &OptionChain) -> Self {
        let child = |option: &ResolvedOption| {
            InstrumentSubscription::new(ctx.clone(), option.clone())
                .with_underlying(chain.underlying.clone())
        };

        Self {
            calls: chain.calls.iter().map(|(k, o)| (*k, child(o))).collect(),
            puts: chain.puts.iter().map(|(k, o)| (*k, child(o))).collect(),
            underlying: chain.underlying.clone(),
            expiration: chain.expiration,
            shared: NodeShared::new(),
            barrier: None,
            ctx,
        }
    }

    /// Subscribe every contract, calls then puts, pausing for the
    /// configured throttle between requests.
    ///
    /// `on_ready` fires once every contract is ready, or with the first
    /// contract failure. An error opening a request stops the fan-out and is
    /// returned; contracts already opened stay open until `unsubscribe`.
    pub async fn subscribe<F>(&mut self, on_ready: F) -> SubscriptionResult<()>
    where
        F: FnOnce(SubscriptionResult<()>) + Send + 'static,
    {
        if self.barrier.is_some() {
            return Err(SubscriptionError::AlreadySubscribed(self.to_string()));
        }

        self.shared.arm(on_ready);
        let barrier = {
            let shared = Arc::clone(&self.shared);
            let label = self.to_string();
            Arc::new(CompletionBarrier::new(self.len(), move || {
                if shared.complete() {
                    info!("{label} is now subscribed");
                }
            }))
        };
        self.barrier = Some(Arc::clone(&barrier));

        let throttle = self.ctx.settings().request_throttle;
        let children = self.calls.values_mut().chain(self.puts.values_mut());
        for (i, child) in children.enumerate() {
            if i > 0 && !throttle.is_zero() {
                sleep(throttle).await;
            }

            let barrier = Arc::clone(&barrier);
            let shared = Arc::clone(&self.shared);
            let subscribed = child
                .subscribe(move |outcome| match outcome {
                    Ok(()) => barrier.signal(),
                    Err(e) => {
                        shared.fail(e);
                    }
                })
                .await;

            if let Err(e) = subscribed {
                warn!(option = %child, error = %e, "Failed to subscribe contract");
                self.shared.fail(e.clone());
                return Err(e);
            }
        }

        debug!(chain = %self, contracts = barrier.target(), "Chain market data requested");
        Ok(())
    }

    /// Unsubscribe every contract, ready or not
    pub async fn unsubscribe(&mut self) -> SubscriptionResult<()> {
        self.shared.cancel();
        self.barrier = None;

        let mut first_err = None;
        for child in self.calls.values_mut().chain(self.puts.values_mut()) {
            if let Err(e) = child.unsubscribe().await {
                first_err.get_or_insert(e);
            }
        }

        info!("{self} unsubscribed");
        first_err.map_or(Ok(()), Err)
    }

    /// Underlying instrument
    #[must_use]
    pub const fn underlying(&self) -> &InstrumentRef {
        &self.underlying
    }

    /// Expiration date
    #[must_use]
    pub const fn expiration(&self) -> NaiveDate {
        self.expiration
    }

    /// Call subscription at `strike`
    #[must_use]
    pub fn call(&self, strike: Px) -> Option<&InstrumentSubscription> {
        self.calls.get(&strike)
    }

    /// Put subscription at `strike`
    #[must_use]
    pub fn put(&self, strike: Px) -> Option<&InstrumentSubscription> {
        self.puts.get(&strike)
    }

    /// Calls then puts, each ascending by strike
    pub fn subscriptions(&self) -> impl Iterator<Item = &InstrumentSubscription> {
        self.calls.values().chain(self.puts.values())
    }

    /// Number of contracts
    #[must_use]
    pub fn len(&self) -> usize {
        self.calls.len() + self.puts.len()
    }

    /// True for a chain without contracts
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Contracts that have not reported ready yet
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.barrier
            .as_ref()
            .map_or_else(|| self.len(), |b| b.remaining())
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// True once every contract is ready
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SubscriptionState::Ready
    }
}

impl fmt::Display for ChainSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Option chain for {} on {}",
            self.underlying.symbol, self.expiration
        )
    }
}

/// Market data for several chains, indexed by expiration
pub struct ChainSetSubscription {
    ctx: MarketDataContext,
    chains: BTreeMap<NaiveDate, ChainSubscription>,
    shared: Arc<NodeShared>,
    barrier: Option<Arc<CompletionBarrier>>,
}

impl ChainSetSubscription {
    /// One unopened chain subscription per entry of `chains`
    #[must_use]
    pub fn new(ctx: MarketDataContext, chains: &ChainMap) -> Self {
        Self {
            chains: chains
                .iter()
                .map(|(e, c)| (*e, ChainSubscription::new(ctx.clone(), c)))
                .collect(),
            shared: NodeShared::new(),
            barrier: None,
            ctx,
        }
    }

    /// Subscribe every chain in expiration order.
    ///
    /// `on_ready` fires once every chain is ready, or with the first failure
    /// of any contract in any chain.
    pub async fn subscribe<F>(&mut self, on_ready: F) -> SubscriptionResult<()>
    where
        F: FnOnce(SubscriptionResult<()>) + Send + 'static,
    {
        if self.barrier.is_some() {
            return Err(SubscriptionError::AlreadySubscribed(self.to_string()));
        }

        self.shared.arm(on_ready);
        let barrier = {
            let shared = Arc::clone(&self.shared);
            let label = self.to_string();
            Arc::new(CompletionBarrier::new(self.chains.len(), move || {
                if shared.complete() {
                    info!("{label} is now subscribed");
                }
            }))
        };
        self.barrier = Some(Arc::clone(&barrier));

        let throttle = self.ctx.settings().request_throttle;
        for (i, chain) in self.chains.values_mut().enumerate() {
            if i > 0 && !throttle.is_zero() {
                sleep(throttle).await;
            }

            let barrier = Arc::clone(&barrier);
            let shared = Arc::clone(&self.shared);
            let subscribed = chain
                .subscribe(move |outcome| match outcome {
                    Ok(()) => barrier.signal(),
                    Err(e) => {
                        shared.fail(e);
                    }
                })
                .await;

            if let Err(e) = subscribed {
                self.shared.fail(e.clone());
                return Err(e);
            }
        }

        Ok(())
    }

    /// Unsubscribe every chain, ready or not
    pub async fn unsubscribe(&mut self) -> SubscriptionResult<()> {
        self.shared.cancel();
        self.barrier = None;

        let mut first_err = None;
        for chain in self.chains.values_mut() {
            if let Err(e) = chain.unsubscribe().await {
                first_err.get_or_insert(e);
            }
        }
        first_err.map_or(Ok(()), Err)
    }

    /// Chain subscription for `expiration`
    #[must_use]
    pub fn get(&self, expiration: NaiveDate) -> Option<&ChainSubscription> {
        self.chains.get(&expiration)
    }

    /// Expirations covered, ascending
    pub fn expirations(&self) -> impl Iterator<Item = NaiveDate> + '_ {
        self.chains.keys().copied()
    }

    /// Chain subscriptions in expiration order
    pub fn chains(&self) -> impl Iterator<Item = &ChainSubscription> {
        self.chains.values()
    }

    /// Number of chains
    #[must_use]
    pub fn len(&self) -> usize {
        self.chains.len()
    }

    /// True when no chains are covered
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.chains.is_empty()
    }

    /// Current lifecycle state
    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.shared.state()
    }

    /// True once every chain is ready
    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.state() == SubscriptionState::Ready
    }
}

impl Index<NaiveDate> for ChainSetSubscription {
    type Output = ChainSubscription;

    /// Panics when `expiration` is not covered, like `BTreeMap` indexing
    fn index(&self, expiration: NaiveDate) -> &Self::Output {
        &self.chains[&expiration]
    }
}

impl fmt::Display for ChainSetSubscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = self
            .chains
            .values()
            .next()
            .map_or("-", |c| c.underlying.symbol.as_str());
        write!(f, "Option chain set for {} ({} expirations)", symbol, self.chains.len())
    }
}

//! Broadcast bridge from the provider tick feed to subscribers
//!
//! One stream exists per process. Every tick from the provider is handed to
//! every registered receiver in arrival order; receivers filter by
//! instrument id themselves. Per-receiver queues are unbounded so a slow
//! subscriber never loses ticks.

use super::MarketTick;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

struct StreamInner {
    subscribers: RwLock<FxHashMap<u64, mpsc::UnboundedSender<MarketTick>>>,
    next_id: AtomicU64,
    published: AtomicU64,
}

/// Process-wide market data event stream
#[derive(Clone)]
pub struct MarketDataStream {
    inner: Arc<StreamInner>,
}

impl std::fmt::Debug for MarketDataStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MarketDataStream")
            .field("subscribers", &self.subscriber_count())
            .field("published", &self.published())
            .finish()
    }
}

impl Default for MarketDataStream {
    fn default() -> Self {
        Self::new()
    }
}

impl MarketDataStream {
    /// Create a stream with no subscribers
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(StreamInner {
                subscribers: RwLock::new(FxHashMap::default()),
                next_id: AtomicU64::new(1),
                published: AtomicU64::new(0),
            }),
        }
    }

    /// Register a receiver for every tick published from now on
    #[must_use]
    pub fn events(&self) -> TickReceiver {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.subscribers.write().insert(id, tx);
        TickReceiver {
            id,
            rx,
            stream: Arc::downgrade(&self.inner),
        }
    }

    /// Republish a tick to all receivers, returning how many got it
    pub fn publish(&self, tick: MarketTick) -> usize {
        self.inner.published.fetch_add(1, Ordering::Relaxed);

        let mut delivered = 0;
        let mut dead = Vec::new();
        {
            let subscribers = self.inner.subscribers.read();
            for (id, tx) in subscribers.iter() {
                if tx.send(tick.clone()).is_ok() {
                    delivered += 1;
                } else {
                    dead.push(*id);
                }
            }
        }

        if !dead.is_empty() {
            let mut subscribers = self.inner.subscribers.write();
            for id in dead {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    /// Forward a provider feed into this stream until the feed ends.
    ///
    /// When the feed ends all receivers are closed so pending subscriptions
    /// observe the disconnect instead of waiting forever.
    pub fn bridge(&self, mut feed: mpsc::UnboundedReceiver<MarketTick>) -> JoinHandle<()> {
        let stream = self.clone();
        tokio::spawn(async move {
            info!("Market data stream bridge started");
            while let Some(tick) = feed.recv().await {
                let delivered = stream.publish(tick);
                debug!(delivered, "Tick republished");
            }
            stream.close();
            info!(
                published = stream.published(),
                "Provider tick feed ended, market data stream closed"
            );
        })
    }

    /// Drop every registration; receivers see end-of-stream
    pub fn close(&self) {
        self.inner.subscribers.write().clear();
    }

    /// Number of live receivers
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subscribers.read().len()
    }

    /// Total ticks published so far
    #[must_use]
    pub fn published(&self) -> u64 {
        self.inner.published.load(Ordering::Relaxed)
    }
}

/// One registration on a [`MarketDataStream`]. Dropping it unregisters.
pub struct TickReceiver {
    id: u64,
    rx: mpsc::UnboundedReceiver<MarketTick>,
    stream: Weak<StreamInner>,
}

impl TickReceiver {
    /// Next tick, or `None` once the stream is closed
    pub async fn recv(&mut self) -> Option<MarketTick> {
        self.rx.recv().await
    }

    /// Next tick for one instrument, skipping all others
    pub async fn recv_for(&mut self, con_id: i64) -> Option<MarketTick> {
        while let Some(tick) = self.rx.recv().await {
            if tick.con_id == con_id {
                return Some(tick);
            }
        }
        None
    }
}

impl Drop for TickReceiver {
    fn drop(&mut self) {
        if let Some(inner) = self.stream.upgrade() {
            inner.subscribers.write().remove(&self.id);
        }
    }
}

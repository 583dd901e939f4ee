//! Count-down completion barrier

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

type CompletionFn = Box<dyn FnOnce() + Send + 'static>;

/// Fires a callback exactly once, when the `target`-th signal arrives.
///
/// A barrier with `target == 0` fires on construction. Signals past the
/// target are counted but otherwise ignored.
pub struct CompletionBarrier {
    target: usize,
    signals: AtomicUsize,
    on_complete: Mutex<Option<CompletionFn>>,
}

impl std::fmt::Debug for CompletionBarrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompletionBarrier")
            .field("target", &self.target)
            .field("signals", &self.signals())
            .field("complete", &self.is_complete())
            .finish()
    }
}

impl CompletionBarrier {
    /// Create a barrier expecting `target` signals
    pub fn new<F>(target: usize, on_complete: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let barrier = Self {
            target,
            signals: AtomicUsize::new(0),
            on_complete: Mutex::new(Some(Box::new(on_complete))),
        };
        if target == 0 {
            barrier.fire();
        }
        barrier
    }

    /// Record one completion
    pub fn signal(&self) {
        let count = self.signals.fetch_add(1, Ordering::AcqRel) + 1;
        if count == self.target {
            self.fire();
        }
    }

    fn fire(&self) {
        // Taken under the lock so concurrent signals cannot run it twice
        let callback = self.on_complete.lock().take();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Signals received so far
    #[must_use]
    pub fn signals(&self) -> usize {
        self.signals.load(Ordering::Acquire)
    }

    /// Signals still missing
    #[must_use]
    pub fn remaining(&self) -> usize {
        self.target.saturating_sub(self.signals())
    }

    /// Whether the target has been reached
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.signals() >= self.target
    }

    /// Expected number of signals
    #[must_use]
    pub const fn target(&self) -> usize {
        self.target
    }
}

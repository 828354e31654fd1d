//! Fixed-window counter implementation.

use std::sync::Arc;
use std::time::Duration;

use tracing::trace;

use super::key::ClientKey;
use super::store::CounterStore;

/// Request count for one key within its current window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowState {
    /// Hits recorded in the current window
    pub count: u64,
    /// When the current window started, in clock milliseconds
    pub window_start_ms: u64,
}

impl WindowState {
    /// Fresh, empty window starting at `now_ms`.
    pub fn new(now_ms: u64) -> Self {
        Self {
            count: 0,
            window_start_ms: now_ms,
        }
    }

    /// Start a new window if the current one has run its full length.
    ///
    /// A `now_ms` earlier than the window start counts as zero elapsed time,
    /// so a clock step backwards continues the window instead of resetting it.
    pub fn roll(&mut self, window_ms: u64, now_ms: u64) {
        if self.elapsed_ms(now_ms) >= window_ms {
            *self = Self::new(now_ms);
        }
    }

    /// Time since the window started, zero if the clock went backwards.
    pub fn elapsed_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.window_start_ms)
    }

    /// Time left until this window ends.
    pub fn reset_after_ms(&self, window_ms: u64, now_ms: u64) -> u64 {
        window_ms.saturating_sub(self.elapsed_ms(now_ms))
    }
}

/// Result of a single counter check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckOutcome {
    /// Within quota. `remaining` reflects the post-increment count.
    Admitted { remaining: u64, reset_after: Duration },
    /// Over quota for the rest of the window.
    Rejected { retry_after: Duration },
}

impl CheckOutcome {
    /// Whether the hit was within quota.
    pub fn is_admitted(&self) -> bool {
        matches!(self, CheckOutcome::Admitted { .. })
    }
}

/// Counts requests per key in fixed windows of `window` length.
pub struct FixedWindowCounter {
    window_ms: u64,
    max_requests: u64,
    store: Arc<dyn CounterStore>,
}

impl FixedWindowCounter {
    /// Create a counter over the given store.
    ///
    /// Windows and limits are validated by the limiter config before a counter
    /// is built; a zero window is clamped to one millisecond here.
    pub fn new(window: Duration, max_requests: u64, store: Arc<dyn CounterStore>) -> Self {
        Self {
            window_ms: (window.as_millis() as u64).max(1),
            max_requests,
            store,
        }
    }

    /// Record a hit for `key` at `now_ms` and decide admission.
    pub fn check(&self, key: &ClientKey, now_ms: u64) -> CheckOutcome {
        let state = self.store.hit(key, self.window_ms, now_ms);
        let reset_after = Duration::from_millis(state.reset_after_ms(self.window_ms, now_ms));

        trace!(
            client = %key,
            count = state.count,
            limit = self.max_requests,
            "Checked fixed window"
        );

        if state.count > self.max_requests {
            CheckOutcome::Rejected {
                retry_after: reset_after,
            }
        } else {
            CheckOutcome::Admitted {
                remaining: self.max_requests - state.count,
                reset_after,
            }
        }
    }

    /// Current count for `key`, if it has a live entry.
    pub fn current_count(&self, key: &ClientKey) -> Option<u64> {
        self.store.get(key).map(|state| state.count)
    }

    /// Drop keys idle for `idle_windows` whole windows or more.
    pub fn evict_idle(&self, now_ms: u64, idle_windows: u64) -> usize {
        let max_idle_ms = self.window_ms.saturating_mul(idle_windows.max(1));
        self.store.evict_idle(now_ms, max_idle_ms)
    }

    /// Get the window length for this counter.
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    /// Get the limit for this counter.
    pub fn max_requests(&self) -> u64 {
        self.max_requests
    }

    /// Get the store holding this counter's windows.
    pub fn store(&self) -> &Arc<dyn CounterStore> {
        &self.store
    }
}

impl std::fmt::Debug for FixedWindowCounter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FixedWindowCounter")
            .field("window_ms", &self.window_ms)
            .field("max_requests", &self.max_requests)
            .field("tracked_keys", &self.store.len())
            .finish()
    }
}

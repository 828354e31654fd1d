//! Counter storage for fixed-window limiters.

use dashmap::DashMap;
use tracing::trace;

use super::counter::WindowState;
use super::key::ClientKey;

/// Storage for per-key window state.
///
/// Each limiter owns its own store, so counters are never shared between
/// policies. Implementations backed by an external shared store make the
/// limiter correct across several processes; [`MemoryStore`] is only correct
/// within one.
pub trait CounterStore: Send + Sync {
    /// Record one hit for `key` and return the post-increment state.
    ///
    /// Expired windows are reset first (see [`WindowState::roll`]). The whole
    /// read-modify-write must happen under the key's lock.
    fn hit(&self, key: &ClientKey, window_ms: u64, now_ms: u64) -> WindowState;

    /// Current state for `key`, without touching it.
    fn get(&self, key: &ClientKey) -> Option<WindowState>;

    /// Drop entries whose window started at least `max_idle_ms` ago.
    ///
    /// Returns the number of evicted keys.
    fn evict_idle(&self, now_ms: u64, max_idle_ms: u64) -> usize;

    /// Number of tracked keys.
    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Forget every key.
    fn clear(&self);
}

/// In-process counter table.
#[derive(Debug, Default)]
pub struct MemoryStore {
    windows: DashMap<ClientKey, WindowState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CounterStore for MemoryStore {
    fn hit(&self, key: &ClientKey, window_ms: u64, now_ms: u64) -> WindowState {
        // The entry guard holds the shard write lock until it is dropped.
        let mut entry = self
            .windows
            .entry(key.clone())
            .or_insert_with(|| WindowState::new(now_ms));
        entry.roll(window_ms, now_ms);
        entry.count = entry.count.saturating_add(1);
        *entry
    }

    fn get(&self, key: &ClientKey) -> Option<WindowState> {
        self.windows.get(key).map(|state| *state)
    }

    fn evict_idle(&self, now_ms: u64, max_idle_ms: u64) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, state| now_ms.saturating_sub(state.window_start_ms) < max_idle_ms);
        let evicted = before.saturating_sub(self.windows.len());
        trace!(evicted, remaining = self.windows.len(), "Swept idle windows");
        evicted
    }

    fn len(&self) -> usize {
        self.windows.len()
    }

    fn clear(&self) {
        self.windows.clear();
    }
}

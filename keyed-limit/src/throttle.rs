use std::fmt::Debug;
use std::hash::Hash;
use std::ops::ControlFlow;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use quanta::Clock;
use quanta::Instant;
use tracing::debug;
use tracing::trace;

use super::KeyedStrategy;
use super::Reason;

/// Cooldown applied when none is given.
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_secs(10);

/// A per-key fixed-interval throttle.
///
/// Admits at most one request per key per cooldown interval: the degenerate
/// token-bucket-of-size-1 case. Only the last *admitted* timestamp is
/// retained per key, so this is the memory-light counterpart to
/// [`SlidingWindowLimiter`](crate::SlidingWindowLimiter) and every operation
/// is O(1).
///
/// A zero `min_interval` degenerates to always-allow. Accepted, not
/// validated.
#[derive(Debug)]
pub struct IntervalThrottle<K: Eq + Hash> {
    min_interval_ns: u64,
    /// Last admitted request time per key (nanos from anchor). Rejections
    /// never touch it.
    last_sent: DashMap<K, u64>,
    clock: Clock,
    anchor: Instant,
}

impl<K> IntervalThrottle<K>
where
    K: Eq + Hash,
{
    /// Creates a new `IntervalThrottle` requiring `min_interval` between
    /// admitted requests for the same key.
    pub fn new(min_interval: Duration) -> Self {
        Self::with_clock(min_interval, Clock::new())
    }

    /// As [`new`](Self::new), with an injected clock. The clock must be
    /// monotonic; `quanta::Clock::mock()` gives deterministic tests.
    pub fn with_clock(min_interval: Duration, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            min_interval_ns: min_interval.as_nanos() as u64,
            last_sent: DashMap::new(),
            clock,
            anchor,
        }
    }

    /// The configured cooldown.
    pub fn min_interval(&self) -> Duration {
        Duration::from_nanos(self.min_interval_ns)
    }

    /// Number of keys currently holding state. Slots persist until
    /// [`evict_idle`](Self::evict_idle) removes them.
    pub fn tracked_keys(&self) -> usize {
        self.last_sent.len()
    }

    /// Removes every key whose cooldown has fully elapsed (such keys behave
    /// identically to fresh ones), returning how many were evicted.
    pub fn evict_idle(&self) -> usize {
        let now = self.now_ns();
        let before = self.last_sent.len();
        self.last_sent
            .retain(|_, &mut last| now.saturating_sub(last) < self.min_interval_ns);
        let evicted = before.saturating_sub(self.last_sent.len());
        if evicted > 0 {
            trace!(evicted, "evicted idle keys");
        }
        evicted
    }

    fn now_ns(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }
}

impl<K> Default for IntervalThrottle<K>
where
    K: Eq + Hash,
{
    fn default() -> Self {
        Self::new(DEFAULT_MIN_INTERVAL)
    }
}

impl<K> KeyedStrategy<K> for IntervalThrottle<K>
where
    K: Clone + Debug + Eq + Hash,
{
    fn can_send(&self, key: &K) -> bool {
        let now = self.now_ns();
        match self.last_sent.get(key) {
            // The boundary is inclusive: exactly min_interval elapsed admits.
            Some(last) => now.saturating_sub(*last) >= self.min_interval_ns,
            None => true,
        }
    }

    fn record(&self, key: &K) -> ControlFlow<Reason> {
        let now = self.now_ns();
        // The entry guard makes the read-then-write atomic per key.
        match self.last_sent.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let last = *entry.get();
                if now.saturating_sub(last) >= self.min_interval_ns {
                    entry.insert(now);
                    ControlFlow::Continue(())
                } else {
                    let retry_after =
                        Duration::from_nanos((last + self.min_interval_ns).saturating_sub(now));
                    debug!(key = ?key, ?retry_after, "inside cooldown");
                    ControlFlow::Break(Reason::Overloaded { retry_after })
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                ControlFlow::Continue(())
            }
        }
    }

    fn time_until_next_allowed(&self, key: &K) -> Duration {
        let now = self.now_ns();
        match self.last_sent.get(key) {
            Some(last) => {
                Duration::from_nanos((*last + self.min_interval_ns).saturating_sub(now))
            }
            None => Duration::ZERO,
        }
    }
}

use std::collections::VecDeque;
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

/// A per-key Sliding Window Log implementation.
///
/// Each key owns a FIFO of admission timestamps. Entries expire in arrival
/// order, so a purge only ever pops a prefix: O(expired) amortized per call,
/// with the live suffix bounded by `max_requests`.
///
/// The window boundary is exclusive at the old end: a timestamp exactly
/// `window` old has already expired. Degenerate configuration is accepted
/// rather than validated: a zero `window` expires entries immediately
/// (everything is admitted), and a zero `max_requests` admits only a key's
/// first-ever request.
#[derive(Debug)]
pub struct SlidingWindowLimiter<K: Eq + Hash> {
    window_ns: u64,
    max_requests: usize,
    /// Per-key admission timestamps (nanos from anchor), oldest first.
    history: DashMap<K, VecDeque<u64>>,
    clock: Clock,
    anchor: Instant,
}

impl<K> SlidingWindowLimiter<K>
where
    K: Eq + Hash,
{
    /// Creates a new `SlidingWindowLimiter`.
    ///
    /// # Arguments
    ///
    /// * `window` - The length of the trailing time window.
    /// * `max_requests` - The maximum number of admissions per key within any
    ///   window-length interval.
    pub fn new(window: Duration, max_requests: usize) -> Self {
        Self::with_clock(window, max_requests, Clock::new())
    }

    /// As [`new`](Self::new), with an injected clock. The clock must be
    /// monotonic; `quanta::Clock::mock()` gives deterministic tests.
    pub fn with_clock(window: Duration, max_requests: usize, clock: Clock) -> Self {
        let anchor = clock.now();
        Self {
            window_ns: window.as_nanos() as u64,
            max_requests,
            history: DashMap::new(),
            clock,
            anchor,
        }
    }

    /// The configured window length.
    pub fn window(&self) -> Duration {
        Duration::from_nanos(self.window_ns)
    }

    /// The configured per-key cap.
    pub fn max_requests(&self) -> usize {
        self.max_requests
    }

    /// Number of keys currently holding state, including keys whose history
    /// has fully expired. Slots persist until [`evict_idle`](Self::evict_idle)
    /// removes them.
    pub fn tracked_keys(&self) -> usize {
        self.history.len()
    }

    /// Removes every key with no in-window activity, returning how many were
    /// evicted. Run this on whatever cadence fits the expected key
    /// cardinality; nothing evicts automatically.
    pub fn evict_idle(&self) -> usize {
        let now = self.now_ns();
        let before = self.history.len();
        self.history.retain(|_, log| {
            Self::purge(log, self.window_ns, now);
            !log.is_empty()
        });
        let evicted = before.saturating_sub(self.history.len());
        if evicted > 0 {
            trace!(evicted, "evicted idle keys");
        }
        evicted
    }

    fn now_ns(&self) -> u64 {
        self.clock.now().duration_since(self.anchor).as_nanos() as u64
    }

    /// Pops the expired prefix: a timestamp is expired iff `t + window <= now`.
    fn purge(log: &mut VecDeque<u64>, window_ns: u64, now: u64) {
        while log.front().is_some_and(|&t| t + window_ns <= now) {
            log.pop_front();
        }
    }

    fn wait_hint(&self, log: &VecDeque<u64>, now: u64) -> Duration {
        // The wait is until the oldest in-window entry ages out, freeing one
        // slot. An over-capacity key with an empty log (max_requests == 0)
        // reports a full window.
        let earliest = log.front().copied().unwrap_or(now);
        Duration::from_nanos((earliest + self.window_ns).saturating_sub(now))
    }
}

impl<K> KeyedStrategy<K> for SlidingWindowLimiter<K>
where
    K: Clone + Debug + Eq + Hash,
{
    fn can_send(&self, key: &K) -> bool {
        let now = self.now_ns();
        match self.history.get_mut(key) {
            Some(mut log) => {
                Self::purge(&mut log, self.window_ns, now);
                log.len() < self.max_requests
            }
            None => true,
        }
    }

    fn record(&self, key: &K) -> ControlFlow<Reason> {
        let now = self.now_ns();
        // The entry guard holds the key's shard for the whole
        // purge/check/append, so concurrent callers can never both observe
        // "under capacity" and both append.
        match self.history.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let log = entry.get_mut();
                Self::purge(log, self.window_ns, now);
                if log.len() < self.max_requests {
                    log.push_back(now);
                    ControlFlow::Continue(())
                } else {
                    let retry_after = self.wait_hint(log, now);
                    debug!(key = ?key, ?retry_after, "window at capacity");
                    ControlFlow::Break(Reason::Overloaded { retry_after })
                }
            }
            Entry::Vacant(entry) => {
                // A never-seen key is admitted unconditionally, mirroring the
                // fresh-key check in can_send.
                entry.insert(VecDeque::from([now]));
                ControlFlow::Continue(())
            }
        }
    }

    fn time_until_next_allowed(&self, key: &K) -> Duration {
        let now = self.now_ns();
        match self.history.get_mut(key) {
            Some(mut log) => {
                Self::purge(&mut log, self.window_ns, now);
                if log.len() < self.max_requests {
                    Duration::ZERO
                } else {
                    self.wait_hint(&log, now)
                }
            }
            None => Duration::ZERO,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::sync::Arc;

    use more_asserts::assert_gt;
    use quanta::Mock;

    fn mocked(window: Duration, max: usize) -> (SlidingWindowLimiter<&'static str>, Arc<Mock>) {
        let (clock, mock) = Clock::mock();
        (SlidingWindowLimiter::with_clock(window, max, clock), mock)
    }

    #[test]
    fn it_admits_again_once_the_window_expires() {
        let (rl, mock) = mocked(Duration::from_secs(10), 1);

        assert!(rl.record(&"A").is_continue());

        mock.increment(Duration::from_secs(5));
        assert!(!rl.can_send(&"A"));
        assert_eq!(rl.time_until_next_allowed(&"A"), Duration::from_secs(5));

        mock.increment(Duration::from_secs(6));
        assert!(rl.record(&"A").is_continue());
    }

    #[test]
    fn test_exact_window_boundary_is_expired() {
        let (rl, mock) = mocked(Duration::from_secs(10), 1);

        assert!(rl.record(&"A").is_continue());

        // A request exactly one window old has aged out.
        mock.increment(Duration::from_secs(10));
        assert!(rl.can_send(&"A"));
        assert_eq!(rl.time_until_next_allowed(&"A"), Duration::ZERO);
    }

    #[test]
    fn it_never_exceeds_the_cap() {
        let (rl, mock) = mocked(Duration::from_millis(100), 3);

        let admitted = (0..10).filter(|_| rl.record(&"A").is_continue()).count();
        assert_eq!(admitted, 3);

        // A fresh window restores full capacity, never more.
        mock.increment(Duration::from_millis(100));
        let admitted = (0..10).filter(|_| rl.record(&"A").is_continue()).count();
        assert_eq!(admitted, 3);
    }

    #[test]
    fn test_fresh_key_is_always_admissible() {
        let (rl, _mock) = mocked(Duration::from_secs(10), 1);

        assert!(rl.can_send(&"never-seen"));
        assert_eq!(rl.time_until_next_allowed(&"never-seen"), Duration::ZERO);
    }

    #[test]
    fn test_keys_are_independent() {
        let (rl, _mock) = mocked(Duration::from_secs(10), 2);

        assert!(rl.record(&"A").is_continue());
        assert!(rl.record(&"A").is_continue());
        assert!(rl.record(&"A").is_break());

        // "B" is unaffected by anything that happened to "A".
        assert!(rl.can_send(&"B"));
        assert!(rl.record(&"B").is_continue());
    }

    #[test]
    fn test_wait_time_consistency() {
        let (rl, mock) = mocked(Duration::from_secs(10), 1);

        assert_eq!(rl.time_until_next_allowed(&"A"), Duration::ZERO);
        let _ = rl.record(&"A");

        mock.increment(Duration::from_secs(3));
        assert!(!rl.can_send(&"A"));
        assert_gt!(rl.time_until_next_allowed(&"A"), Duration::ZERO);
    }

    #[test]
    fn test_queries_are_idempotent() {
        let (rl, mock) = mocked(Duration::from_secs(10), 1);

        let _ = rl.record(&"A");
        mock.increment(Duration::from_secs(4));

        for _ in 0..5 {
            assert!(!rl.can_send(&"A"));
            assert_eq!(rl.time_until_next_allowed(&"A"), Duration::from_secs(6));
        }
    }

    #[test]
    fn test_rejection_hint_matches_query() {
        let (rl, mock) = mocked(Duration::from_secs(10), 1);

        let _ = rl.record(&"A");
        mock.increment(Duration::from_secs(2));

        let ControlFlow::Break(Reason::Overloaded { retry_after }) = rl.record(&"A") else {
            panic!("second record within the window must be rejected");
        };
        assert_eq!(retry_after, rl.time_until_next_allowed(&"A"));
        assert_eq!(retry_after, Duration::from_secs(8));
    }

    #[test]
    fn test_zero_cap_admits_only_the_first_request() {
        let (rl, mock) = mocked(Duration::from_secs(10), 0);

        // The fresh-key path admits, after which the (empty) slot rejects
        // forever.
        assert!(rl.record(&"A").is_continue());
        assert!(rl.record(&"A").is_break());

        mock.increment(Duration::from_secs(20));
        assert!(rl.record(&"A").is_break());
    }

    #[test]
    fn test_zero_window_expires_immediately() {
        let (rl, _mock) = mocked(Duration::ZERO, 1);

        for _ in 0..3 {
            assert!(rl.record(&"A").is_continue());
        }
    }

    #[test]
    fn test_evict_idle_drops_only_expired_keys() {
        let (rl, mock) = mocked(Duration::from_secs(10), 1);

        let _ = rl.record(&"A");
        let _ = rl.record(&"B");
        assert_eq!(rl.tracked_keys(), 2);

        // Slots persist after their history expires, until a sweep runs.
        mock.increment(Duration::from_secs(10));
        let _ = rl.record(&"A");
        assert_eq!(rl.tracked_keys(), 2);

        assert_eq!(rl.evict_idle(), 1);
        assert_eq!(rl.tracked_keys(), 1);
        assert!(!rl.can_send(&"A"));
    }

    #[test]
    fn test_single_key_concurrency() {
        use std::thread;

        let capacity = 100;
        let rl = Arc::new(SlidingWindowLimiter::new(Duration::from_secs(60), capacity));

        let mut handles = vec![];
        for _ in 0..capacity * 2 {
            let rl_clone = Arc::clone(&rl);
            handles.push(thread::spawn(move || rl_clone.record(&"shared")));
        }

        let results: Vec<_> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        let success_count = results.iter().filter(|r| r.is_continue()).count();

        assert_eq!(
            success_count, capacity,
            "Keyed sliding window should admit exactly capacity during a burst"
        );
    }

    #[tokio::test]
    async fn test_single_key_concurrency_across_tasks() {
        let capacity = 100;
        let rl = Arc::new(SlidingWindowLimiter::new(Duration::from_secs(1), capacity));

        let mut handles = vec![];
        for _ in 0..capacity + 10 {
            let rl_clone = Arc::clone(&rl);
            handles.push(tokio::spawn(async move { rl_clone.record(&"shared") }));
        }

        let results = futures::future::join_all(handles).await;
        let success_count = results
            .into_iter()
            .filter(|r| matches!(r, Ok(ControlFlow::Continue(()))))
            .count();

        // Even with multiple tasks, exactly 'capacity' should pass
        assert_eq!(success_count, capacity);
    }
}

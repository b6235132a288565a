//! # keyed-limit
//!
//! `keyed-limit` provides per-key request admission control: given a stream of
//! requests tagged by an identifying key (a user id, an API token, a remote
//! address), decide whether each request may proceed and, if not, report when
//! it next may.
//!
//! ## Core Philosophy
//!
//! State is partitioned by key inside a sharded concurrent map, so calls for
//! different keys do not serialize against each other, while the purge/check/
//! append sequence for a single key is atomic with respect to concurrent
//! callers. Time comes from an injectable monotonic clock, which keeps the
//! admission maths deterministic under test.
//!
//! ## Key Concepts
//!
//! * **Keyed Strategy Trait**: a unified interface over the limiting
//!   algorithms, keyed by an opaque identifier compared by equality.
//! * **Non-Blocking**: no operation sleeps, suspends, or performs I/O; every
//!   verdict is computed synchronously from `now` and in-memory state.
//! * **Wait Hints**: rejections carry the duration until the next admission,
//!   and the same figure can be queried without mutating admission state.
//!
//! ## Example
//!
//! ```rust
//! use keyed_limit::KeyedStrategy;
//! use keyed_limit::SlidingWindowLimiter;
//! use std::time::Duration;
//!
//! // At most 3 requests per key within any trailing 10 second window.
//! let limiter = SlidingWindowLimiter::new(Duration::from_secs(10), 3);
//!
//! if limiter.record(&"user-1").is_continue() {
//!     // Request allowed
//! }
//! ```

use std::fmt::Debug;
use std::ops::ControlFlow;
use std::time::Duration;

mod sliding_window;
mod throttle;

pub use sliding_window::SlidingWindowLimiter;
pub use throttle::DEFAULT_MIN_INTERVAL;
pub use throttle::IntervalThrottle;

/// Reasons why a request might be rejected by a limiter.
#[derive(Debug, PartialEq)]
pub enum Reason {
    Overloaded { retry_after: Duration },
}

/// The core trait for per-key admission control.
///
/// Implementations must be `Send` and `Sync` to allow sharing across thread
/// boundaries via `Arc`. Keys are opaque; they are only compared by equality
/// and hashed, and an unknown key is always treated as "no prior activity",
/// never as an error.
pub trait KeyedStrategy<K>: Debug {
    /// Reports whether a request for `key` would currently be admitted.
    ///
    /// Never changes the admission outcome: calling this any number of times
    /// between [`record`](Self::record) calls yields the same verdict (expired
    /// history may be purged as a side effect).
    fn can_send(&self, key: &K) -> bool;

    /// Attempts to admit and record a single request for `key`.
    ///
    /// On admission the request is recorded against the key's state. On
    /// rejection state is left untouched and the returned `Reason` carries
    /// the wait until the next admission.
    fn record(&self, key: &K) -> ControlFlow<Reason>;

    /// Duration until a request for `key` would next be admitted.
    ///
    /// Zero whenever [`can_send`](Self::can_send) is true, strictly positive
    /// otherwise.
    fn time_until_next_allowed(&self, key: &K) -> Duration;
}

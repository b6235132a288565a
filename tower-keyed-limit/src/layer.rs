use std::sync::Arc;

use tower::Layer;

use crate::service::KeyedRateLimitService;

/// Applies per-key rate limiting to requests.
///
/// The key function maps each request to the key its admission state is
/// partitioned by. Services produced from the same layer share the limiter,
/// so a key's budget is enforced across every clone.
#[derive(Debug)]
pub struct KeyedRateLimitLayer<L, F>
where
    L: ?Sized,
{
    limiter: Arc<L>,
    key_fn: F,
}

impl<L, F> Clone for KeyedRateLimitLayer<L, F>
where
    L: ?Sized,
    F: Clone,
{
    fn clone(&self) -> Self {
        Self {
            limiter: Arc::clone(&self.limiter),
            key_fn: self.key_fn.clone(),
        }
    }
}

impl<L, F> KeyedRateLimitLayer<L, F>
where
    L: ?Sized,
{
    /// Create a KeyedRateLimitLayer from a limiter and a key function.
    pub fn new(limiter: Arc<L>, key_fn: F) -> Self {
        KeyedRateLimitLayer { limiter, key_fn }
    }
}

impl<L, F, S> Layer<S> for KeyedRateLimitLayer<L, F>
where
    L: ?Sized,
    F: Clone,
{
    type Service = KeyedRateLimitService<L, F, S>;

    fn layer(&self, service: S) -> Self::Service {
        KeyedRateLimitService::new(service, self.limiter.clone(), self.key_fn.clone())
    }
}

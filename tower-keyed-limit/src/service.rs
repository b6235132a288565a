use std::fmt;
use std::future::Future;
use std::ops::ControlFlow;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Context;
use std::task::Poll;

use opentelemetry::global;
use opentelemetry::metrics::Counter;
use pin_project_lite::pin_project;
use tower::BoxError;
use tower::Service;

use keyed_limit::KeyedStrategy;
use keyed_limit::Reason;

use crate::error::LimitError;

#[derive(Clone, Debug)]
struct KeyedRateLimitMetrics {
    rejected: Counter<u64>,
}

/// Applies a per-key admission strategy to each request.
///
/// The key is extracted from the request by the service's key function, so
/// admission is decided in [`call`](Service::call); `poll_ready` only
/// reflects the inner service. Rejected requests resolve immediately to
/// [`LimitError::RateLimited`] without reaching the inner service.
pub struct KeyedRateLimitService<L, F, S>
where
    L: ?Sized,
{
    inner: S,
    limiter: Arc<L>,
    key_fn: F,
    instruments: KeyedRateLimitMetrics,
}

pin_project! {
    /// The response future: either the inner service's future, or an
    /// immediate rejection.
    #[project = ResponseFutureProj]
    pub enum ResponseFuture<F> {
        Forwarded { #[pin] inner: F },
        Rejected { error: LimitError },
    }
}

impl<F, T, E> Future for ResponseFuture<F>
where
    F: Future<Output = Result<T, E>>,
    E: From<BoxError>,
{
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match self.project() {
            ResponseFutureProj::Forwarded { inner } => inner.poll(cx),
            ResponseFutureProj::Rejected { error } => {
                Poll::Ready(Err(E::from(Box::new(error.clone()))))
            }
        }
    }
}

impl<L, F, S> Clone for KeyedRateLimitService<L, F, S>
where
    L: ?Sized,
    F: Clone,
    S: Clone,
{
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
            limiter: Arc::clone(&self.limiter),
            key_fn: self.key_fn.clone(),
            instruments: self.instruments.clone(),
        }
    }
}

impl<L, F, S> fmt::Debug for KeyedRateLimitService<L, F, S>
where
    L: fmt::Debug + ?Sized,
    S: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyedRateLimitService")
            .field("inner", &self.inner)
            .field("limiter", &self.limiter)
            .finish_non_exhaustive()
    }
}

impl<K, L, F, S, Req> Service<Req> for KeyedRateLimitService<L, F, S>
where
    L: KeyedStrategy<K> + ?Sized + Send + Sync + 'static,
    F: Fn(&Req) -> K,
    S: Service<Req, Error = BoxError>,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = ResponseFuture<S::Future>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        let key = (self.key_fn)(&req);
        match self.limiter.record(&key) {
            ControlFlow::Continue(()) => ResponseFuture::Forwarded {
                inner: self.inner.call(req),
            },
            ControlFlow::Break(Reason::Overloaded { retry_after }) => {
                self.instruments.rejected.add(1, &[]);
                ResponseFuture::Rejected {
                    error: LimitError::RateLimited { retry_after },
                }
            }
        }
    }
}

impl<L, F, S> KeyedRateLimitService<L, F, S>
where
    L: ?Sized,
{
    pub fn new(inner: S, limiter: Arc<L>, key_fn: F) -> Self {
        let meter = global::meter("keyed_rate_limit_service");
        let instruments = KeyedRateLimitMetrics {
            rejected: meter.u64_counter("requests_rejected").build(),
        };

        Self {
            inner,
            limiter,
            key_fn,
            instruments,
        }
    }
}

//! # Tower Keyed Limit
//!
//! `tower-keyed-limit` applies a [`keyed_limit`] admission strategy to a
//! [Tower](https://github.com/tower-rs/tower) service, partitioning the limit
//! by a key extracted from each request (a user id, a client address, an API
//! token).
//!
//! Because the key only becomes known when the request arrives, admission is
//! decided in `call` and is fail-fast: a request over its key's limit
//! resolves immediately to [`LimitError::RateLimited`] carrying the
//! `retry_after` hint, rather than queueing. Requests for other keys are
//! unaffected.
//!
//! ## Feature Flags
//!
//! - `axum`: Enables `IntoResponse` for [`LimitError`], converting a
//!   rejection to `429 Too Many Requests` with a `Retry-After` header.

mod error;
mod layer;
mod service;


#[cfg(doc)]
use keyed_limit::KeyedStrategy;

pub use error::LimitError;
pub use layer::KeyedRateLimitLayer;
pub use service::KeyedRateLimitService;

/// Errors produced by the keyed rate limiting middleware.
#[derive(Debug, Clone, thiserror::Error)]
pub enum LimitError {
    /// The request was rejected because its key is over its limit.
    ///
    /// The duration indicates when the client should retry.
    /// When the `axum` feature is enabled, this converts to `429 Too Many
    /// Requests` with a `Retry-After` header.
    #[error("Rate limit exceeded; retry after {retry_after:?}")]
    RateLimited {
        /// The duration to wait before retrying.
        retry_after: std::time::Duration,
    },
}

#[cfg(feature = "axum")]
impl axum::response::IntoResponse for LimitError {
    fn into_response(self) -> axum::response::Response {
        use axum::http::StatusCode;

        let Self::RateLimited { retry_after } = &self;
        let secs = retry_after.as_secs().max(1);
        let val = axum::http::HeaderValue::from(secs);

        let mut response = (StatusCode::TOO_MANY_REQUESTS, self.to_string()).into_response();
        response
            .headers_mut()
            .insert(axum::http::header::RETRY_AFTER, val);
        response
    }
}

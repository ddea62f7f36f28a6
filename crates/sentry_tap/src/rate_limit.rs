//! Proactive client-side rate limiting.
//!
//! The remote API throttles aggressive callers; rather than reacting to 429
//! responses, every fetch waits on a shared limiter first.

use std::num::NonZeroU32;
use std::sync::Arc;

use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};
use governor::{Quota, RateLimiter};

/// Type alias for the governor rate limiter.
type GovernorRateLimiter = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

/// Conservative default for the Sentry API (requests per second).
pub const DEFAULT_RPS: u32 = 5;

/// A standalone API rate limiter using the governor crate.
///
/// Shared read-only across all concurrent fetch tasks.
///
/// # Example
///
/// ```ignore
/// use sentry_tap::rate_limit::ApiRateLimiter;
///
/// let limiter = ApiRateLimiter::new(5);
///
/// // Before each API call:
/// limiter.wait().await;
/// ```
#[derive(Clone)]
pub struct ApiRateLimiter {
    inner: Arc<GovernorRateLimiter>,
}

impl ApiRateLimiter {
    /// Create a new rate limiter with the specified requests per second.
    ///
    /// A zero argument is clamped to 1.
    pub fn new(requests_per_second: u32) -> Self {
        let rps = NonZeroU32::new(requests_per_second)
            .unwrap_or_else(|| NonZeroU32::new(1).expect("1 is non-zero"));
        let rate_limiter = RateLimiter::direct(Quota::per_second(rps));

        Self {
            inner: Arc::new(rate_limiter),
        }
    }

    /// Wait until the limiter permits the next request.
    pub async fn wait(&self) {
        self.inner.until_ready().await;
    }
}

//! Client-side request budget for the data service.
//!
//! The overlay scheduler already spaces its own fetches; this guards the
//! shared service against several views (or a misconfigured throttle)
//! hammering it at once.

use governor::{Quota, RateLimiter as GovLimiter};
use std::num::NonZeroU32;
use std::sync::Arc;

type DirectLimiter = GovLimiter<
    governor::state::NotKeyed,
    governor::state::InMemoryState,
    governor::clock::DefaultClock,
>;

/// Single token bucket shared by every request a client makes.
#[derive(Debug, Clone)]
pub struct RequestBudget {
    limiter: Arc<DirectLimiter>,
}

impl RequestBudget {
    /// Allow up to `per_sec` requests per second. Zero is treated as one.
    pub fn per_second(per_sec: u32) -> Self {
        let quota = Quota::per_second(NonZeroU32::new(per_sec).unwrap_or(NonZeroU32::MIN));
        Self {
            limiter: Arc::new(GovLimiter::direct(quota)),
        }
    }

    /// Wait until a request slot is available.
    pub async fn acquire(&self) {
        self.limiter.until_ready().await;
    }

    /// Take a slot without waiting. Returns true if acquired.
    pub fn try_acquire(&self) -> bool {
        self.limiter.check().is_ok()
    }
}

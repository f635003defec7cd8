//! Token-bucket gate in front of the Store Adapter.
//! Callers may block up to 5 seconds waiting for a token.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use governor::{Quota, RateLimiter};
use governor::clock::DefaultClock;
use governor::state::{InMemoryState, NotKeyed};

const WAIT_DEADLINE: Duration = Duration::from_secs(5);

#[derive(Clone)]
pub struct WriteRateLimiter {
    inner: Arc<RateLimiter<NotKeyed, InMemoryState, DefaultClock>>,
}

#[derive(Debug, thiserror::Error)]
#[error("store write rate limit wait exceeded {0:?}")]
pub struct RateLimitTimeout(pub Duration);

impl WriteRateLimiter {
    pub fn new(writes_per_second: u32) -> Self {
        let qps = NonZeroU32::new(writes_per_second.max(1)).expect("writes_per_second clamped to >= 1");
        Self {
            inner: Arc::new(RateLimiter::direct(Quota::per_second(qps))),
        }
    }

    pub async fn acquire(&self) -> Result<(), RateLimitTimeout> {
        tokio::time::timeout(WAIT_DEADLINE, self.inner.until_ready())
            .await
            .map_err(|_| RateLimitTimeout(WAIT_DEADLINE))
    }
}

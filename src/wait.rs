//! Bounded retry-until-success over an arbitrary async probe.
//!
//! Fixed-interval polling is intentional: the monitored state is bursty DOM
//! mutation, not a rate-limited remote resource, so backoff growth would only
//! add latency. A timeout is a normal outcome, never an error — callers
//! decide whether `None` becomes a reported failure.

use std::future::Future;
use std::time::Duration;
use tokio::time::{sleep, Instant};

/// Default polling interval for DOM probes.
pub const POLL_INTERVAL: Duration = Duration::from_millis(150);

/// Slower interval for probes that trigger page work on every tick.
pub const SLOW_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Repeatedly evaluate `probe` until it yields `Some`, sleeping `interval`
/// between attempts. Returns `None` once `timeout` has elapsed — no later
/// than `timeout` plus one interval. Never panics on a `None` outcome.
pub async fn wait_until<T, F, Fut>(timeout: Duration, interval: Duration, mut probe: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = Instant::now() + timeout;
    loop {
        if let Some(value) = probe().await {
            return Some(value);
        }
        if Instant::now() >= deadline {
            return None;
        }
        sleep(interval).await;
    }
}

//! Queue engine tests, one file per component.

mod paginated;
mod store;

use std::time::Duration;

use tokio::time::{sleep, Instant};
use uuid::Uuid;

use crate::config::QueueConfig;
use crate::registry::QueueControl;

/// Config tuned for tests: tiny pages, synchronous OFF for speed.
pub(crate) fn test_config(page_size: usize, max_retries: u32) -> QueueConfig {
    QueueConfig {
        page_size,
        max_retries,
        wait_period: Duration::ZERO,
        synchronous: 0,
        cache_size: -2000,
    }
}

/// Deterministic ids so order assertions stay readable.
pub(crate) fn uid(n: u32) -> Uuid {
    Uuid::from_u128(0x1000 + n as u128)
}

/// Poll an arbitrary condition; the queues report empty while the last
/// callback is still in flight, so count-based assertions wait here first.
pub(crate) async fn wait_for(what: &str, cond: impl Fn() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        if Instant::now() > deadline {
            panic!("timed out waiting for {what}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

/// Poll a state machine until its queues reach the expected sizes.
pub(crate) async fn wait_for_sizes(control: &dyn QueueControl, pending: usize, error: usize) {
    let deadline = Instant::now() + Duration::from_secs(5);
    loop {
        if let Ok(sizes) = control.sizes().await {
            if sizes.pending == pending && sizes.error == error {
                return;
            }
        }
        if Instant::now() > deadline {
            panic!("timed out waiting for sizes pending={pending} error={error}");
        }
        sleep(Duration::from_millis(10)).await;
    }
}

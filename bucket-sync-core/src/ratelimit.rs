//! Token-bucket limiter for object-store calls. Every list, head and
//! get-location call in a sync run acquires a token first; nothing in this
//! layer retries, so the limiter is the only thing standing between the
//! engine and the store's request quota.

use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

/// Capacity and refill rate both equal the configured requests/second, so a
/// short burst up to one second's worth of tokens passes straight through
/// while sustained load settles at the target rate.
#[derive(Debug)]
pub struct RateLimiter {
    state: Mutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

#[derive(Debug)]
struct BucketState {
    available: f64,
    last_refill: Instant,
}

impl RateLimiter {
    pub fn new(requests_per_second: u32) -> Self {
        let capacity = f64::from(requests_per_second.max(1));
        RateLimiter {
            state: Mutex::new(BucketState {
                available: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec: capacity,
        }
    }

    /// Waits until a token is available and takes it.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(state.last_refill).as_secs_f64();
                state.available =
                    (state.available + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = now;
                if state.available >= 1.0 {
                    state.available -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - state.available) / self.refill_per_sec)
            };
            sleep(wait).await;
        }
    }
}

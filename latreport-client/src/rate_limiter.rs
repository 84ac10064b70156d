use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::{sleep_until, Instant};

/// Throttle that spaces grants evenly at a fixed rate.
///
/// The first grant is immediate; every later grant is issued at least
/// `1 / rate` after the previous one, so no burst ever exceeds the rate.
/// Waiters are served in arrival order (tokio's mutex is fair). Share one
/// instance behind an `Arc` to bound the combined rate of several callers.
#[derive(Debug)]
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<Option<Instant>>,
}

impl RateLimiter {
    /// Create a limiter issuing at most `per_second` grants per second (minimum 1).
    pub fn new(per_second: u32) -> Self {
        let per_second = per_second.max(1);
        Self {
            interval: Duration::from_secs(1) / per_second,
            next_slot: Mutex::new(None),
        }
    }

    /// Minimum spacing between two grants.
    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Wait until one more call may be issued without exceeding the rate.
    pub async fn acquire(&self) {
        let slot = {
            let mut next = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = match *next {
                Some(reserved) if reserved > now => reserved,
                _ => now,
            };
            *next = Some(slot + self.interval);
            slot
        };
        sleep_until(slot).await;
    }
}

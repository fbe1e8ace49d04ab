use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;

/// Minimum spacing between outbound requests, per backend class. Callers reserve the
/// next free slot under the lock and sleep outside it, so requests to one class go out
/// in reservation order.
pub struct RateLimiter {
    interval: Duration,
    next_slot: Mutex<HashMap<String, Instant>>,
}

impl RateLimiter {
    pub fn new(interval: Duration) -> Self { Self { interval, next_slot: Mutex::new(HashMap::new()) } }

    fn reserve(&self, class: &str) -> Instant {
        let now = Instant::now();
        let mut slots = self.next_slot.lock();
        let slot = slots.get(class).map(|t| (*t).max(now)).unwrap_or(now);
        slots.insert(class.to_string(), slot + self.interval);
        slot
    }

    pub async fn acquire(&self, class: &str) {
        if self.interval.is_zero() { return; }
        let slot = self.reserve(class);
        tokio::time::sleep_until(slot).await;
    }
}

//! A leaky bucket capping sustained throughput at a byte rate.

use tokio::time::{Duration, Instant};

pub struct LeakyBucket {
    capacity: f64,
    current: f64,
    rate: f64,
    last_refill: Instant,
}

impl LeakyBucket {
    pub fn new(rate_bytes_per_sec: f64) -> Self {
        Self {
            capacity: rate_bytes_per_sec,
            current: rate_bytes_per_sec,
            rate: rate_bytes_per_sec,
            last_refill: Instant::now(),
        }
    }

    fn refill(&mut self) {
        let elapsed = self.last_refill.elapsed().as_secs_f64();
        self.last_refill = Instant::now();
        self.current = (self.current + self.rate * elapsed).min(self.capacity);
    }

    /// Reset the bucket's capacity (and rate) to a new fair share, clamping
    /// whatever is currently banked to the new ceiling.
    pub fn reset_capacity(&mut self, new_capacity: f64) {
        self.capacity = new_capacity;
        self.rate = new_capacity;
        self.current = self.current.min(self.capacity);
    }

    /// Consume `n` bytes, sleeping first if the bucket doesn't currently
    /// hold enough to cover it.
    pub async fn consume(&mut self, n: u64) {
        self.refill();
        let n = n as f64;

        if n > self.current {
            let deficit = n - self.current;
            let wait = Duration::from_secs_f64(deficit / self.rate);
            tokio::time::sleep(wait).await;
            self.refill();
        }

        self.current = (self.current - n).max(0.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_consume_within_capacity_does_not_block() {
        let mut bucket = LeakyBucket::new(1_000_000.0);
        let start = Instant::now();
        bucket.consume(100).await;
        assert!(start.elapsed() < Duration::from_millis(50));
    }

    #[test]
    fn test_reset_capacity_clamps_current() {
        let mut bucket = LeakyBucket::new(1000.0);
        bucket.current = 900.0;
        bucket.reset_capacity(100.0);
        assert_eq!(bucket.current, 100.0);
        assert_eq!(bucket.capacity, 100.0);
    }
}

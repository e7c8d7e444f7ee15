//! Token-bucket pacing for the remote service's published rate limit.

use std::time::{Duration, Instant};

use tokio::sync::Mutex;

struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Shared request pacer. Every remote call takes one token; tokens refill
/// at `requests_per_window / window`.
pub struct Pacer {
    bucket: Mutex<Bucket>,
    capacity: f64,
    refill_per_sec: f64,
}

impl Pacer {
    /// Pace to `requests` per `window`, allowing bursts of `burst` calls.
    pub fn new(requests: u32, window: Duration, burst: u32) -> Self {
        let capacity = f64::from(burst.max(1));
        let refill_per_sec = f64::from(requests.max(1)) / window.as_secs_f64().max(1e-3);
        Self {
            bucket: Mutex::new(Bucket {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec,
        }
    }

    /// Minimum spacing between calls once the burst is spent.
    pub fn interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.refill_per_sec)
    }

    /// Wait until a call may be made.
    pub async fn acquire(&self) {
        loop {
            let wait = {
                let mut bucket = self.bucket.lock().await;
                let now = Instant::now();
                let elapsed = now.duration_since(bucket.last_refill).as_secs_f64();
                bucket.tokens = (bucket.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                bucket.last_refill = now;
                if bucket.tokens >= 1.0 {
                    bucket.tokens -= 1.0;
                    return;
                }
                Duration::from_secs_f64((1.0 - bucket.tokens) / self.refill_per_sec)
            };
            tokio::time::sleep(wait).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_interval_from_rate() {
        let pacer = Pacer::new(300, Duration::from_secs(300), 10);
        assert_eq!(pacer.interval(), Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_burst_then_paced() {
        let pacer = Pacer::new(20, Duration::from_secs(1), 2);
        let started = Instant::now();
        pacer.acquire().await;
        pacer.acquire().await;
        assert!(started.elapsed() < Duration::from_millis(40));

        pacer.acquire().await;
        assert!(started.elapsed() >= Duration::from_millis(40));
    }
}

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{AcquireError, Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;

/// Bounds concurrent requests to one upstream and spaces out their start times.
///
/// SEC EDGAR asks clients to stay under 10 requests per second, which is the default.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    semaphore: Arc<Semaphore>,
    min_interval: Duration,
    next_slot: Arc<Mutex<Instant>>,
}

/// Held for the duration of one request.
#[derive(Debug)]
pub struct RatePermit {
    _permit: OwnedSemaphorePermit,
}

impl RateLimiter {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        RateLimiter {
            semaphore: Arc::new(Semaphore::new(max_concurrent.max(1))),
            min_interval,
            next_slot: Arc::new(Mutex::new(Instant::now())),
        }
    }

    pub fn edgar() -> Self {
        Self::new(10, Duration::from_millis(100))
    }

    pub async fn acquire(&self) -> Result<RatePermit, AcquireError> {
        let permit = self.semaphore.clone().acquire_owned().await?;

        let wait_until = {
            let mut next_slot = self.next_slot.lock().await;
            let now = Instant::now();
            let slot = (*next_slot).max(now);
            *next_slot = slot + self.min_interval;
            slot
        };
        tokio::time::sleep_until(wait_until).await;

        Ok(RatePermit { _permit: permit })
    }

    pub fn available_permits(&self) -> usize {
        self.semaphore.available_permits()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::edgar()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_spaces_out_request_starts() {
        let limiter = RateLimiter::new(10, Duration::from_millis(100));
        let start = Instant::now();

        let _a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        let _c = limiter.acquire().await.unwrap();

        assert!(start.elapsed() >= Duration::from_millis(200));
    }

    #[tokio::test]
    async fn test_bounds_concurrency() {
        let limiter = RateLimiter::new(2, Duration::ZERO);
        let a = limiter.acquire().await.unwrap();
        let _b = limiter.acquire().await.unwrap();
        assert_eq!(limiter.available_permits(), 0);

        drop(a);
        assert_eq!(limiter.available_permits(), 1);
    }
}

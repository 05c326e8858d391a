use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tokio_util::sync::CancellationToken;

const MICROS_PER_SECOND: u128 = 1_000_000;

/// Token bucket using integer-only math; tokens are scaled to microseconds.
#[derive(Debug)]
struct Bucket {
    rps: u64,
    capacity: u64,
    tokens: u128,
    last_refill: Instant,
}

impl Bucket {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed_micros = now.duration_since(self.last_refill).as_micros();
        if elapsed_micros == 0 {
            return;
        }

        let max_tokens = (self.capacity as u128) * MICROS_PER_SECOND;
        self.tokens = self
            .tokens
            .saturating_add((self.rps as u128) * elapsed_micros)
            .min(max_tokens);
        self.last_refill = now;
    }

    /// Take one token, or report how long until one is available.
    fn take(&mut self) -> Result<(), Duration> {
        self.refill();
        if self.tokens >= MICROS_PER_SECOND {
            self.tokens -= MICROS_PER_SECOND;
            return Ok(());
        }
        let deficit = MICROS_PER_SECOND - self.tokens;
        let wait_micros = deficit.div_ceil(self.rps.max(1) as u128);
        Err(Duration::from_micros(wait_micros as u64))
    }
}

/// Run-wide request rate cap shared by every virtual user.
#[derive(Debug, Clone)]
pub struct RateLimiter {
    bucket: Arc<Mutex<Bucket>>,
}

impl RateLimiter {
    /// Bucket holds one second worth of tokens, starting full.
    pub fn new(rps: u64) -> Self {
        let rps = rps.max(1);
        Self {
            bucket: Arc::new(Mutex::new(Bucket {
                rps,
                capacity: rps,
                tokens: (rps as u128) * MICROS_PER_SECOND,
                last_refill: Instant::now(),
            })),
        }
    }

    fn take(&self) -> Result<(), Duration> {
        match self.bucket.lock() {
            Ok(mut bucket) => bucket.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        }
    }

    /// Wait for a token. Returns false if `cancel` fires first.
    pub async fn acquire(&self, cancel: &CancellationToken) -> bool {
        loop {
            let wait = match self.take() {
                Ok(()) => return true,
                Err(wait) => wait,
            };
            tokio::select! {
                _ = cancel.cancelled() => return false,
                _ = sleep(wait) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_burst_then_empty() {
        let limiter = RateLimiter::new(100);

        for _ in 0..100 {
            assert!(limiter.take().is_ok());
        }
        assert!(!limiter.take().is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limiter_refill() {
        let limiter = RateLimiter::new(1000);
        for _ in 0..1000 {
            assert!(limiter.take().is_ok());
        }
        assert!(!limiter.take().is_ok());

        tokio::time::advance(Duration::from_millis(100)).await;

        let mut acquired = 0;
        for _ in 0..150 {
            if limiter.take().is_ok() {
                acquired += 1;
            }
        }
        assert_eq!(acquired, 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_token() {
        let limiter = RateLimiter::new(10);
        for _ in 0..10 {
            assert!(limiter.take().is_ok());
        }

        let cancel = CancellationToken::new();
        let start = Instant::now();
        assert!(limiter.acquire(&cancel).await);
        assert!(start.elapsed() >= Duration::from_millis(100));
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_observes_cancellation() {
        let limiter = RateLimiter::new(1);
        assert!(limiter.take().is_ok());

        let cancel = CancellationToken::new();
        cancel.cancel();
        assert!(!limiter.acquire(&cancel).await);
    }
}

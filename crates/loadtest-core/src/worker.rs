use chrono::Utc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::{sleep, sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::executor::RequestExecutor;
use crate::model::{LoadTestResult, ResultStatus};
use crate::rate_limiter::RateLimiter;

/// Counts virtual users currently inside their request loop.
#[derive(Debug, Clone, Default)]
pub struct ActiveUsers(Arc<AtomicU32>);

impl ActiveUsers {
    pub fn get(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }

    fn enter(&self) -> ActiveGuard {
        self.0.fetch_add(1, Ordering::Relaxed);
        ActiveGuard(self.0.clone())
    }
}

/// Decrements on drop, so aborted workers are uncounted too.
struct ActiveGuard(Arc<AtomicU32>);

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// One simulated client: request, report, think, repeat.
pub struct VirtualUser {
    pub id: u32,
    pub executor: Arc<dyn RequestExecutor>,
    pub think_time: Duration,
    pub end_time: Instant,
    pub cancel: CancellationToken,
    pub results: mpsc::Sender<LoadTestResult>,
    pub active: ActiveUsers,
    pub rate_limiter: Option<RateLimiter>,
}

impl VirtualUser {
    /// Runs until cancelled, the end time passes, or the result stream closes.
    /// Returns the number of requests issued.
    pub async fn run(self) -> u64 {
        let _active = self.active.enter();
        let mut request_id = 0u64;
        debug!(vu = self.id, executor = self.executor.name(), "virtual user started");

        loop {
            if self.cancel.is_cancelled() || Instant::now() >= self.end_time {
                break;
            }

            if let Some(limiter) = &self.rate_limiter {
                let acquired = tokio::select! {
                    acquired = limiter.acquire(&self.cancel) => acquired,
                    _ = sleep_until(self.end_time) => false,
                };
                if !acquired {
                    break;
                }
            }

            // An in-flight request is bounded by its own timeout, not by cancellation.
            let started = Instant::now();
            let outcome = self.executor.execute().await;
            let response_time_ms = started.elapsed().as_secs_f64() * 1000.0;

            let (response_code, bytes_received, error) = match outcome.response {
                Ok(response) => {
                    let error = (ResultStatus::classify(response.status_code)
                        == ResultStatus::Error)
                        .then(|| format!("HTTP {}", response.status_code));
                    (response.status_code, response.bytes_received, error)
                }
                Err(e) => (0, 0, Some(e.message)),
            };

            let result = LoadTestResult {
                timestamp: Utc::now(),
                virtual_user_id: self.id,
                request_id,
                status: ResultStatus::classify(response_code),
                response_time_ms,
                response_code,
                error,
                bytes_sent: outcome.bytes_sent,
                bytes_received,
            };
            request_id += 1;

            if self.results.send(result).await.is_err() {
                debug!(vu = self.id, "result stream closed");
                break;
            }

            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep_until(self.end_time) => break,
                _ = sleep(self.think_time) => {}
            }
        }

        debug!(vu = self.id, requests = request_id, "virtual user exited");
        request_id
    }
}

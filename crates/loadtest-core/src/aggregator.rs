use std::collections::VecDeque;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::time::{interval, Instant, MissedTickBehavior};
use tracing::debug;

use crate::config::Thresholds;
use crate::model::{LoadTestMetrics, LoadTestResult, LoadTestSummary, ThresholdResults};
use crate::stats;
use crate::worker::ActiveUsers;

/// What readers see while a run is in progress.
#[derive(Debug, Clone, Default)]
pub struct LiveSnapshot {
    pub metrics: LoadTestMetrics,
    pub results_recorded: u64,
}

/// Everything the aggregator collected, handed back once the stream closes.
#[derive(Debug, Default)]
pub struct AggregatorOutput {
    pub results: Vec<LoadTestResult>,
    /// Successful results per one-second bucket since run start.
    pub successes_per_second: Vec<u64>,
}

impl AggregatorOutput {
    pub fn peak_successes_per_second(&self) -> u64 {
        self.successes_per_second.iter().copied().max().unwrap_or(0)
    }

    /// Final metrics and summary over the full history for a run that lasted
    /// `duration`. Uses the same statistics as the live path.
    pub fn summarize(
        &self,
        duration: Duration,
        thresholds: &Thresholds,
    ) -> (LoadTestMetrics, LoadTestSummary) {
        let metrics = stats::compute_metrics(&self.results, duration.as_secs_f64(), 0);
        let total = self.results.len() as u64;
        let successful = self.results.iter().filter(|r| r.is_success()).count() as u64;

        let mut summary = LoadTestSummary {
            total_requests: total,
            successful_requests: successful,
            failed_requests: total - successful,
            total_duration_ms: duration.as_millis() as u64,
            average_response_time: metrics.response_time.avg,
            p95_response_time: metrics.response_time.p95,
            // Sub-second runs never fill a bucket, so fall back to the overall rate.
            peak_throughput: (self.peak_successes_per_second() as f64).max(metrics.throughput),
            error_rate: metrics.error_rate,
            threshold_results: ThresholdResults::new(),
        };
        summary.threshold_results = crate::thresholds::evaluate(&summary, thresholds);

        (metrics, summary)
    }
}

/// Sole consumer of the result stream and sole writer of live metrics and
/// result history.
pub struct MetricsAggregator {
    results_rx: mpsc::Receiver<LoadTestResult>,
    live_tx: watch::Sender<LiveSnapshot>,
    active: ActiveUsers,
    run_start: Instant,
    refresh: Duration,
    window_size: usize,
    window: VecDeque<(Instant, LoadTestResult)>,
    history: Vec<LoadTestResult>,
    successes_per_second: Vec<u64>,
}

impl MetricsAggregator {
    pub fn new(
        results_rx: mpsc::Receiver<LoadTestResult>,
        live_tx: watch::Sender<LiveSnapshot>,
        active: ActiveUsers,
        run_start: Instant,
        window_size: usize,
        refresh: Duration,
    ) -> Self {
        let window_size = window_size.max(1);
        let refresh = refresh.max(Duration::from_millis(1));
        Self {
            results_rx,
            live_tx,
            active,
            run_start,
            refresh,
            window_size,
            window: VecDeque::with_capacity(window_size),
            history: Vec::new(),
            successes_per_second: Vec::new(),
        }
    }

    /// Consume until every producer has dropped its sender.
    pub async fn run(mut self) -> AggregatorOutput {
        let mut ticker = interval(self.refresh);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                // Ticks first so a saturated stream cannot starve live metrics.
                _ = ticker.tick() => self.publish_live(),
                received = self.results_rx.recv() => match received {
                    Some(result) => self.record(result, Instant::now()),
                    None => break,
                },
            }
        }

        self.publish_live();
        AggregatorOutput {
            results: self.history,
            successes_per_second: self.successes_per_second,
        }
    }

    fn record(&mut self, result: LoadTestResult, arrived: Instant) {
        if result.is_success() {
            let bucket = arrived.duration_since(self.run_start).as_secs() as usize;
            if self.successes_per_second.len() <= bucket {
                self.successes_per_second.resize(bucket + 1, 0);
            }
            self.successes_per_second[bucket] += 1;
        }

        if self.window.len() == self.window_size {
            self.window.pop_front();
        }
        self.window.push_back((arrived, result.clone()));
        self.history.push(result);
    }

    /// Live rates are `window size / window span`, where the span runs from
    /// the oldest windowed arrival to now.
    fn live_metrics(&self, now: Instant) -> LoadTestMetrics {
        let span_secs = self
            .window
            .front()
            .map(|(arrived, _)| now.duration_since(*arrived).as_secs_f64())
            .unwrap_or(0.0);
        stats::compute_metrics(
            self.window.iter().map(|(_, result)| result),
            span_secs,
            self.active.get(),
        )
    }

    fn publish_live(&self) {
        let snapshot = LiveSnapshot {
            metrics: self.live_metrics(Instant::now()),
            results_recorded: self.history.len() as u64,
        };
        debug!(
            results = snapshot.results_recorded,
            rps = snapshot.metrics.requests_per_second,
            p95_ms = snapshot.metrics.response_time.p95,
            "live metrics"
        );
        self.live_tx.send_replace(snapshot);
    }
}

//! Statistics shared by live and final metrics. Both paths go through
//! [`compute_metrics`] so the same sample set always yields the same numbers.

use chrono::Utc;

use crate::model::{LoadTestMetrics, LoadTestResult, NetworkIo, ResponseTimeStats};

/// Nearest-rank percentile over samples sorted ascending.
///
/// `p` is a fraction in (0, 1]. The index is `floor(p * n)` clamped to
/// `[0, n - 1]`; an empty slice yields 0.
pub fn percentile(sorted: &[f64], p: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let n = sorted.len();
    let idx = ((p * n as f64).floor() as usize).min(n - 1);
    sorted[idx]
}

pub fn error_rate(total: u64, errors: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (errors as f64 / total as f64) * 100.0
}

/// Count per second over `span_secs`; 0 for an empty span.
pub fn per_second(count: u64, span_secs: f64) -> f64 {
    if span_secs <= 0.0 {
        return 0.0;
    }
    count as f64 / span_secs
}

impl ResponseTimeStats {
    pub fn from_samples(mut samples: Vec<f64>) -> Self {
        if samples.is_empty() {
            return Self::default();
        }
        samples.sort_by(|a, b| a.total_cmp(b));

        let sum: f64 = samples.iter().sum();
        Self {
            avg: sum / samples.len() as f64,
            min: samples[0],
            max: samples[samples.len() - 1],
            p50: percentile(&samples, 0.50),
            p90: percentile(&samples, 0.90),
            p95: percentile(&samples, 0.95),
            p99: percentile(&samples, 0.99),
        }
    }
}

/// Build a metrics snapshot from `results` observed over `span_secs`.
pub fn compute_metrics<'a, I>(results: I, span_secs: f64, active_users: u32) -> LoadTestMetrics
where
    I: IntoIterator<Item = &'a LoadTestResult>,
{
    let mut samples = Vec::new();
    let mut successes = 0u64;
    let mut bytes_sent = 0u64;
    let mut bytes_received = 0u64;

    for result in results {
        samples.push(result.response_time_ms);
        if result.is_success() {
            successes += 1;
        }
        bytes_sent += result.bytes_sent;
        bytes_received += result.bytes_received;
    }

    let total = samples.len() as u64;
    LoadTestMetrics {
        timestamp: Utc::now(),
        active_users,
        requests_per_second: per_second(total, span_secs),
        response_time: ResponseTimeStats::from_samples(samples),
        error_rate: error_rate(total, total - successes),
        throughput: per_second(successes, span_secs),
        network_io: NetworkIo {
            bytes_sent_per_sec: per_second(bytes_sent, span_secs),
            bytes_received_per_sec: per_second(bytes_received, span_secs),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultStatus;

    fn result(response_time_ms: f64, response_code: u16) -> LoadTestResult {
        LoadTestResult {
            timestamp: Utc::now(),
            virtual_user_id: 0,
            request_id: 0,
            status: ResultStatus::classify(response_code),
            response_time_ms,
            response_code,
            error: None,
            bytes_sent: 10,
            bytes_received: 100,
        }
    }

    #[test]
    fn test_percentile_nearest_rank() {
        let samples = [100.0, 200.0, 300.0, 400.0, 500.0];
        assert_eq!(percentile(&samples, 0.50), 300.0);
        assert_eq!(percentile(&samples, 0.90), 500.0);
        assert_eq!(percentile(&samples, 0.95), 500.0);
        assert_eq!(percentile(&samples, 0.99), 500.0);
        assert_eq!(percentile(&samples, 1.0), 500.0);
    }

    #[test]
    fn test_percentile_index_matches_floor_rule() {
        let samples: Vec<f64> = (1..=100).map(|v| v as f64).collect();
        for p in [0.01, 0.25, 0.5, 0.9, 0.95, 0.99] {
            let idx = ((p * 100.0f64).floor() as usize).min(99);
            assert_eq!(percentile(&samples, p), samples[idx], "p={p}");
        }
    }

    #[test]
    fn test_empty_samples_are_zero() {
        assert_eq!(percentile(&[], 0.5), 0.0);
        assert_eq!(ResponseTimeStats::from_samples(vec![]), ResponseTimeStats::default());
    }

    #[test]
    fn test_error_rate() {
        assert_eq!(error_rate(10, 2), 20.0);
        assert_eq!(error_rate(0, 0), 0.0);
    }

    #[test]
    fn test_response_time_stats_unsorted_input() {
        let stats = ResponseTimeStats::from_samples(vec![500.0, 100.0, 400.0, 200.0, 300.0]);
        assert_eq!(stats.min, 100.0);
        assert_eq!(stats.max, 500.0);
        assert_eq!(stats.avg, 300.0);
        assert_eq!(stats.p50, 300.0);
    }

    #[test]
    fn test_compute_metrics() {
        let results = vec![
            result(10.0, 200),
            result(20.0, 200),
            result(30.0, 500),
            result(40.0, 0),
        ];
        let metrics = compute_metrics(&results, 2.0, 3);

        assert_eq!(metrics.active_users, 3);
        assert_eq!(metrics.requests_per_second, 2.0);
        assert_eq!(metrics.throughput, 1.0);
        assert_eq!(metrics.error_rate, 50.0);
        assert_eq!(metrics.response_time.avg, 25.0);
        assert_eq!(metrics.network_io.bytes_received_per_sec, 200.0);
    }

    #[test]
    fn test_compute_metrics_zero_span() {
        let results = vec![result(10.0, 200)];
        let metrics = compute_metrics(&results, 0.0, 1);
        assert_eq!(metrics.requests_per_second, 0.0);
        assert_eq!(metrics.response_time.p99, 10.0);
    }
}

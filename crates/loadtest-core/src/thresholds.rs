use crate::config::Thresholds;
use crate::model::{LoadTestSummary, ThresholdCheck, ThresholdKind, ThresholdResults};

/// Judge a summary against configured limits. Each dimension is independent;
/// equality passes.
pub fn evaluate(summary: &LoadTestSummary, thresholds: &Thresholds) -> ThresholdResults {
    let mut results = ThresholdResults::new();

    results.insert(
        ThresholdKind::AvgResponseTime,
        at_most(summary.average_response_time, thresholds.avg_response_time_ms),
    );
    results.insert(
        ThresholdKind::P95ResponseTime,
        at_most(summary.p95_response_time, thresholds.p95_response_time_ms),
    );
    results.insert(
        ThresholdKind::ErrorRate,
        at_most(summary.error_rate, thresholds.error_rate_percent),
    );
    results.insert(
        ThresholdKind::Throughput,
        at_least(summary.peak_throughput, thresholds.throughput_rps),
    );

    results
}

fn at_most(actual: f64, limit: f64) -> ThresholdCheck {
    ThresholdCheck {
        passed: actual <= limit,
        actual,
        limit,
    }
}

fn at_least(actual: f64, limit: f64) -> ThresholdCheck {
    ThresholdCheck {
        passed: actual >= limit,
        actual,
        limit,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn summary() -> LoadTestSummary {
        LoadTestSummary {
            total_requests: 10,
            successful_requests: 8,
            failed_requests: 2,
            total_duration_ms: 10_000,
            average_response_time: 1000.0,
            p95_response_time: 1500.0,
            peak_throughput: 12.0,
            error_rate: 20.0,
            threshold_results: ThresholdResults::new(),
        }
    }

    #[test]
    fn test_equality_passes() {
        let thresholds = Thresholds {
            avg_response_time_ms: 1000.0,
            p95_response_time_ms: 1500.0,
            error_rate_percent: 20.0,
            throughput_rps: 12.0,
        };
        let results = evaluate(&summary(), &thresholds);

        assert_eq!(results.len(), 4);
        assert!(results.values().all(|c| c.passed));
    }

    #[test]
    fn test_error_rate_over_limit_fails_alone() {
        let thresholds = Thresholds {
            error_rate_percent: 5.0,
            ..Thresholds::default()
        };
        let results = evaluate(&summary(), &thresholds);

        assert!(!results[&ThresholdKind::ErrorRate].passed);
        assert_eq!(results[&ThresholdKind::ErrorRate].actual, 20.0);
        assert!(results[&ThresholdKind::AvgResponseTime].passed);
        assert!(results[&ThresholdKind::P95ResponseTime].passed);
        assert!(results[&ThresholdKind::Throughput].passed);
    }

    #[test]
    fn test_throughput_below_limit_fails() {
        let thresholds = Thresholds {
            throughput_rps: 12.5,
            ..Thresholds::default()
        };
        let results = evaluate(&summary(), &thresholds);
        assert!(!results[&ThresholdKind::Throughput].passed);
    }

    #[test]
    fn test_latency_limits_are_strict_above() {
        let thresholds = Thresholds {
            avg_response_time_ms: 999.9,
            p95_response_time_ms: 1499.0,
            ..Thresholds::default()
        };
        let results = evaluate(&summary(), &thresholds);
        assert!(!results[&ThresholdKind::AvgResponseTime].passed);
        assert!(!results[&ThresholdKind::P95ResponseTime].passed);
    }
}

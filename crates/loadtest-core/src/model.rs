use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Stopped,
}

impl ExecutionStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Success,
    Error,
}

impl ResultStatus {
    /// Any response in [200, 400) counts as a success.
    pub fn classify(response_code: u16) -> Self {
        if (200..400).contains(&response_code) {
            ResultStatus::Success
        } else {
            ResultStatus::Error
        }
    }
}

/// Outcome of one request issued by one virtual user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestResult {
    pub timestamp: DateTime<Utc>,
    pub virtual_user_id: u32,
    pub request_id: u64,
    pub status: ResultStatus,
    pub response_time_ms: f64,
    /// 0 when no response arrived (timeout, connection failure)
    pub response_code: u16,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub bytes_sent: u64,
    pub bytes_received: u64,
}

impl LoadTestResult {
    pub fn is_success(&self) -> bool {
        self.status == ResultStatus::Success
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseTimeStats {
    pub avg: f64,
    pub min: f64,
    pub max: f64,
    pub p50: f64,
    pub p90: f64,
    pub p95: f64,
    pub p99: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NetworkIo {
    pub bytes_sent_per_sec: f64,
    pub bytes_received_per_sec: f64,
}

/// Point-in-time metrics, rebuilt from a rolling window (live) or the whole run (final).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestMetrics {
    pub timestamp: DateTime<Utc>,
    pub active_users: u32,
    pub requests_per_second: f64,
    pub response_time: ResponseTimeStats,
    pub error_rate: f64,
    pub throughput: f64,
    pub network_io: NetworkIo,
}

impl Default for LoadTestMetrics {
    fn default() -> Self {
        Self {
            timestamp: Utc::now(),
            active_users: 0,
            requests_per_second: 0.0,
            response_time: ResponseTimeStats::default(),
            error_rate: 0.0,
            throughput: 0.0,
            network_io: NetworkIo::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThresholdKind {
    AvgResponseTime,
    P95ResponseTime,
    ErrorRate,
    Throughput,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThresholdCheck {
    pub passed: bool,
    pub actual: f64,
    pub limit: f64,
}

pub type ThresholdResults = BTreeMap<ThresholdKind, ThresholdCheck>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoadTestSummary {
    pub total_requests: u64,
    pub successful_requests: u64,
    pub failed_requests: u64,
    pub total_duration_ms: u64,
    pub average_response_time: f64,
    pub p95_response_time: f64,
    pub peak_throughput: f64,
    pub error_rate: f64,
    pub threshold_results: ThresholdResults,
}

impl LoadTestSummary {
    pub fn all_thresholds_passed(&self) -> bool {
        self.threshold_results.values().all(|check| check.passed)
    }
}

/// One run of a load test. Frozen once `status` leaves `Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestExecution {
    pub id: Uuid,
    pub config_id: String,
    pub status: ExecutionStatus,
    pub start_time: DateTime<Utc>,
    pub end_time: Option<DateTime<Utc>>,
    pub progress: f64,
    pub metrics: LoadTestMetrics,
    pub results_recorded: u64,
    /// Full history; only populated on the frozen record.
    pub results: Vec<LoadTestResult>,
    pub summary: Option<LoadTestSummary>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
}

/// The cheap read path: live metrics and progress only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionMetrics {
    pub execution_id: Uuid,
    pub status: ExecutionStatus,
    pub progress: f64,
    pub results_recorded: u64,
    pub metrics: LoadTestMetrics,
}

use loadtest_core::{
    EngineError, EngineSettings, ExecutionController, ExecutionStatus, ExecutionStore,
    HttpExecutorFactory, LoadProfile, LoadTestConfig, ProfileType, TargetConfig, ThresholdKind,
    Thresholds,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use wiremock::matchers::method;
use wiremock::{Mock, MockServer, ResponseTemplate};

fn controller() -> ExecutionController {
    let settings = EngineSettings {
        stop_grace_period_ms: 2_000,
        live_refresh_ms: 200,
        ..EngineSettings::default()
    };
    ExecutionController::new(
        Arc::new(ExecutionStore::new()),
        Arc::new(HttpExecutorFactory {
            timeout: settings.request_timeout(),
        }),
        settings,
    )
}

fn config(url: String, profile_type: ProfileType, virtual_users: u32, think_time_ms: u64) -> LoadTestConfig {
    LoadTestConfig {
        id: "integration".to_string(),
        name: "integration".to_string(),
        target: TargetConfig {
            url,
            method: "GET".to_string(),
            headers: HashMap::new(),
            body: None,
        },
        load_profile: LoadProfile {
            profile_type,
            virtual_users,
            duration_seconds: 10,
            ramp_up_seconds: None,
            think_time_ms,
            max_requests_per_second: None,
        },
        thresholds: Thresholds::default(),
    }
}

async fn target_with_delay(status: u16, delay: Duration) -> MockServer {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(status).set_delay(delay))
        .mount(&server)
        .await;
    server
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn constant_load_against_healthy_target() {
    let server = target_with_delay(200, Duration::from_millis(50)).await;
    let controller = controller();

    let id = controller
        .start(config(server.uri(), ProfileType::Constant, 3, 0))
        .unwrap();
    let record = controller.wait(id).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let summary = record.summary.as_ref().unwrap();
    assert_eq!(summary.error_rate, 0.0);
    assert!(
        (45.0..=120.0).contains(&summary.average_response_time),
        "avg: {}",
        summary.average_response_time
    );
    // 3 * (10000 / 50) = 600, minus scheduling jitter
    assert!(
        (400..=620).contains(&summary.total_requests),
        "total: {}",
        summary.total_requests
    );
    assert_eq!(summary.total_requests, record.results.len() as u64);
    assert!(record.results.iter().all(|r| r.response_code == 200));
    assert!(summary.all_thresholds_passed());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn server_errors_fail_the_error_rate_threshold() {
    let server = target_with_delay(500, Duration::from_millis(20)).await;
    let controller = controller();

    let mut cfg = config(server.uri(), ProfileType::Spike, 2, 100);
    cfg.thresholds.error_rate_percent = 5.0;
    let id = controller.start(cfg).unwrap();
    let record = controller.wait(id).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Completed);
    let summary = record.summary.as_ref().unwrap();
    assert_eq!(summary.error_rate, 100.0);
    assert!(!summary.threshold_results[&ThresholdKind::ErrorRate].passed);
    assert!(record
        .results
        .iter()
        .all(|r| r.error.as_deref() == Some("HTTP 500")));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn unreachable_target_is_recorded_not_raised() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let controller = controller();
    let id = controller
        .start(config(format!("http://{addr}/"), ProfileType::Constant, 2, 200))
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    let record = controller.stop(id).await.unwrap();

    assert_eq!(record.status, ExecutionStatus::Stopped);
    assert!(!record.results.is_empty());
    assert!(record.results.iter().all(|r| r.response_code == 0));
    assert_eq!(record.summary.as_ref().unwrap().error_rate, 100.0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn stop_discards_results_after_grace_period() {
    // Every request outlives the 2s grace period.
    let server = target_with_delay(200, Duration::from_secs(8)).await;
    let controller = controller();

    let id = controller
        .start(config(server.uri(), ProfileType::Constant, 4, 0))
        .unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    let stop_called = Instant::now();
    let record = controller.stop(id).await.unwrap();
    assert!(stop_called.elapsed() < Duration::from_secs(4));
    assert_eq!(record.status, ExecutionStatus::Stopped);
    assert_eq!(record.results_recorded, 0);

    // Nothing changes once frozen, even after the stragglers' requests would have landed.
    let frozen = serde_json::to_string(&*record).unwrap();
    tokio::time::sleep(Duration::from_secs(1)).await;
    let later = serde_json::to_string(&*controller.status(id).unwrap()).unwrap();
    assert_eq!(frozen, later);
}

#[tokio::test]
async fn zero_virtual_users_is_rejected() {
    let controller = controller();
    let err = controller
        .start(config("http://localhost/".to_string(), ProfileType::Constant, 0, 0))
        .unwrap_err();
    assert!(matches!(err, EngineError::Validation(_)));
    assert!(controller.store().is_empty());
}

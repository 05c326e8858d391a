use anyhow::{Context, Result};
use clap::Parser;
use loadtest_core::{
    Config, EngineError, EngineSettings, ExecutionController, ExecutionStatus, ExecutionStore,
    ExecutorFactory, HttpExecutorFactory, LoadTestExecution, MockExecutorFactory, RampPlanner,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "controller")]
#[command(about = "Load test runner - drives virtual users against one target and reports thresholds")]
struct Args {
    /// Path to run file (TOML)
    #[arg(long, default_value = "config/example.toml")]
    config: PathBuf,

    /// Request mode: mock or http
    #[arg(long, default_value = "http")]
    mode: String,

    /// Simulated latency for mock mode
    #[arg(long, default_value = "50")]
    mock_latency_ms: u64,

    /// Print progress every N milliseconds
    #[arg(long, default_value = "1000")]
    print_every_ms: u64,

    /// Only print the start schedule without running
    #[arg(long)]
    plan_only: bool,

    /// Directory for the execution record JSON
    #[arg(long, default_value = "results")]
    out_dir: PathBuf,

    /// Exit non-zero when any threshold fails
    #[arg(long)]
    fail_on_threshold: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();
    let config = Config::from_file(&args.config)
        .with_context(|| format!("Failed to load config from {:?}", args.config))?;

    print_schedule(&config);
    if args.plan_only {
        return Ok(());
    }

    let factory = build_factory(&args, &config.engine)?;
    let controller = ExecutionController::new(
        Arc::new(ExecutionStore::new()),
        factory,
        config.engine.clone(),
    );

    let id = controller
        .start(config.load_test.clone())
        .context("Failed to start load test")?;
    info!("Execution {} started in {} mode", id, args.mode);

    let record = tokio::select! {
        record = watch_progress(&controller, id, args.print_every_ms) => record?,
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping execution {}", id);
            match controller.stop(id).await {
                Ok(record) => record,
                // Already over by the time the stop landed.
                Err(EngineError::InvalidState { .. }) => controller.wait(id).await?,
                Err(e) => return Err(e.into()),
            }
        }
    };

    let output_path = save_record(&args.out_dir, &record)?;
    info!("Execution record written to {}", output_path.display());
    print_summary(&record);

    if record.status == ExecutionStatus::Failed {
        anyhow::bail!(
            "Execution failed: {}",
            record.failure_reason.as_deref().unwrap_or("unknown reason")
        );
    }
    if args.fail_on_threshold {
        let passed = record
            .summary
            .as_ref()
            .map(|s| s.all_thresholds_passed())
            .unwrap_or(false);
        if !passed {
            anyhow::bail!("One or more thresholds failed");
        }
    }

    Ok(())
}

fn build_factory(args: &Args, engine: &EngineSettings) -> Result<Arc<dyn ExecutorFactory>> {
    let factory: Arc<dyn ExecutorFactory> = match args.mode.as_str() {
        "mock" => Arc::new(MockExecutorFactory {
            latency: Duration::from_millis(args.mock_latency_ms),
            status_code: 200,
        }),
        "http" => Arc::new(HttpExecutorFactory {
            timeout: engine.request_timeout(),
        }),
        _ => anyhow::bail!("Invalid mode: {}, must be 'mock' or 'http'", args.mode),
    };
    Ok(factory)
}

async fn watch_progress(
    controller: &ExecutionController,
    id: uuid::Uuid,
    print_every_ms: u64,
) -> Result<Arc<LoadTestExecution>> {
    let mut ticker = tokio::time::interval(Duration::from_millis(print_every_ms.max(100)));
    let done = controller.wait(id);
    tokio::pin!(done);

    loop {
        tokio::select! {
            record = &mut done => return Ok(record?),
            _ = ticker.tick() => {
                let live = controller.metrics(id)?;
                let m = &live.metrics;
                info!(
                    "Progress: {:.0}% users={} results={} rps={:.1} errors={:.1}% p50={:.0}ms p95={:.0}ms p99={:.0}ms",
                    live.progress,
                    m.active_users,
                    live.results_recorded,
                    m.requests_per_second,
                    m.error_rate,
                    m.response_time.p50,
                    m.response_time.p95,
                    m.response_time.p99
                );
            }
        }
    }
}

fn print_schedule(config: &Config) {
    let profile = &config.load_test.load_profile;
    let planner = RampPlanner::new(profile);

    println!("\n=== Load Profile ({}) ===", config.load_test.id);
    println!("Target: {} {}", config.load_test.target.method, config.load_test.target.url);
    println!("Type: {:?}", profile.profile_type);
    println!("Virtual users: {}", profile.virtual_users);
    println!("Duration: {}s", profile.duration_seconds);
    println!("Think time: {}ms", profile.think_time_ms);
    if let Some(rps) = profile.max_requests_per_second {
        println!("Rate cap: {} req/s", rps);
    }
    println!("Last user starts at: +{}ms", planner.ramp_duration().as_millis());
    println!();
}

fn save_record(out_dir: &Path, record: &LoadTestExecution) -> Result<PathBuf> {
    std::fs::create_dir_all(out_dir)
        .with_context(|| format!("Failed to create {}", out_dir.display()))?;
    let timestamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
    let output_path = out_dir.join(format!("execution_{}_{}.json", record.id, timestamp));
    let json = serde_json::to_string_pretty(record)?;
    std::fs::write(&output_path, json)?;
    Ok(output_path)
}

fn print_summary(record: &LoadTestExecution) {
    println!("\n=== Execution {} ({}) ===", record.id, record.status);
    let Some(summary) = &record.summary else {
        println!("No results recorded.");
        println!();
        return;
    };

    println!("Duration: {}ms", summary.total_duration_ms);
    println!("Requests: {}", summary.total_requests);
    println!("Successful: {}", summary.successful_requests);
    println!("Failed: {}", summary.failed_requests);
    println!("Error rate: {:.2}%", summary.error_rate);
    println!("Avg response time: {:.1}ms", summary.average_response_time);
    println!("p95 response time: {:.1}ms", summary.p95_response_time);
    println!("Peak throughput: {:.1} req/s", summary.peak_throughput);
    println!();
    for (kind, check) in &summary.threshold_results {
        println!(
            "{:<20} {:>4}  actual={:.2} limit={:.2}",
            format!("{:?}", kind),
            if check.passed { "PASS" } else { "FAIL" },
            check.actual,
            check.limit
        );
    }
    println!();
}

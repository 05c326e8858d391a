use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::{sleep_until, timeout, Instant};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::aggregator::{AggregatorOutput, LiveSnapshot, MetricsAggregator};
use crate::config::{EngineSettings, LoadTestConfig};
use crate::error::{EngineError, Result};
use crate::executor::ExecutorFactory;
use crate::model::{ExecutionMetrics, ExecutionStatus, LoadTestExecution};
use crate::scheduler::RampScheduler;
use crate::store::{ExecutionEntry, ExecutionStore};
use crate::worker::ActiveUsers;

/// Owns execution lifecycles. The only entry point callers use.
pub struct ExecutionController {
    store: Arc<ExecutionStore>,
    factory: Arc<dyn ExecutorFactory>,
    settings: EngineSettings,
}

impl ExecutionController {
    pub fn new(
        store: Arc<ExecutionStore>,
        factory: Arc<dyn ExecutorFactory>,
        settings: EngineSettings,
    ) -> Self {
        Self {
            store,
            factory,
            settings,
        }
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn store(&self) -> &Arc<ExecutionStore> {
        &self.store
    }

    /// Validate `config` and launch a run in the background.
    ///
    /// Returns as soon as the run is registered. Must be called from within a
    /// Tokio runtime.
    pub fn start(&self, config: LoadTestConfig) -> Result<Uuid> {
        self.start_with_id(Uuid::new_v4(), config)
    }

    /// Like [`start`](Self::start), under an id allocated by the caller.
    /// An id that is already known (running or finished) is rejected.
    pub fn start_with_id(&self, id: Uuid, config: LoadTestConfig) -> Result<Uuid> {
        self.settings.validate()?;
        config.validate(&self.settings)?;

        let (live_tx, live_rx) = watch::channel(LiveSnapshot::default());
        let entry = Arc::new(ExecutionEntry::new(id, Arc::new(config), live_rx));
        self.store.insert(entry.clone())?;

        info!(
            "Starting execution {} for config '{}': {} virtual users for {}s",
            id,
            entry.config.id,
            entry.config.load_profile.virtual_users,
            entry.config.load_profile.duration_seconds
        );

        tokio::spawn(supervise(
            entry,
            self.factory.clone(),
            self.settings.clone(),
            live_tx,
        ));
        Ok(id)
    }

    /// Current snapshot, or the frozen record once the run has ended.
    pub fn status(&self, id: Uuid) -> Result<Arc<LoadTestExecution>> {
        Ok(self.store.get(id)?.snapshot())
    }

    /// Live metrics and progress only.
    pub fn metrics(&self, id: Uuid) -> Result<ExecutionMetrics> {
        Ok(self.store.get(id)?.metrics())
    }

    /// Cooperative stop. Resolves once the run is frozen as `stopped`, which
    /// happens within the grace period. A run that ends on its own before
    /// the stop lands is reported as `InvalidState` with its final status.
    pub async fn stop(&self, id: Uuid) -> Result<Arc<LoadTestExecution>> {
        let entry = self.store.get(id)?;
        let status = entry.status();
        if status.is_terminal() {
            return Err(EngineError::InvalidState { id, status });
        }

        info!("Stop requested for execution {}", id);
        entry.request_stop();
        let record = entry.wait_frozen().await;
        if record.status != ExecutionStatus::Stopped {
            return Err(EngineError::InvalidState {
                id,
                status: record.status,
            });
        }
        Ok(record)
    }

    /// Wait for the run to end and return its frozen record.
    pub async fn wait(&self, id: Uuid) -> Result<Arc<LoadTestExecution>> {
        Ok(self.store.get(id)?.wait_frozen().await)
    }
}

/// Runs the execution in its own task and freezes a `failed` record if that
/// task dies before freezing one itself.
async fn supervise(
    entry: Arc<ExecutionEntry>,
    factory: Arc<dyn ExecutorFactory>,
    settings: EngineSettings,
    live_tx: watch::Sender<LiveSnapshot>,
) {
    let run = tokio::spawn(run_execution(entry.clone(), factory, settings, live_tx));
    if let Err(e) = run.await {
        error!("Execution {}: run task died: {}", entry.id, e);
        entry.cancel_token().cancel();
        let record = finalize(
            &entry,
            ExecutionStatus::Failed,
            AggregatorOutput::default(),
            Some(format!("run task died: {e}")),
        );
        entry.freeze(record);
    }
}

async fn run_execution(
    entry: Arc<ExecutionEntry>,
    factory: Arc<dyn ExecutorFactory>,
    settings: EngineSettings,
    live_tx: watch::Sender<LiveSnapshot>,
) {
    let run_start = entry.started();
    let Some(end_time) = run_start.checked_add(entry.config.load_profile.duration()) else {
        let reason = format!(
            "duration of {}s is out of range",
            entry.config.load_profile.duration_seconds
        );
        error!("Execution {} failed: {}", entry.id, reason);
        let record = finalize(
            &entry,
            ExecutionStatus::Failed,
            AggregatorOutput::default(),
            Some(reason),
        );
        entry.freeze(record);
        return;
    };
    let cancel = entry.cancel_token();
    let active = ActiveUsers::default();

    let (results_tx, results_rx) = mpsc::channel(settings.result_channel_capacity.max(1));
    let aggregator = MetricsAggregator::new(
        results_rx,
        live_tx,
        active.clone(),
        run_start,
        settings.live_window_size,
        settings.live_refresh(),
    );
    let aggregator_handle = tokio::spawn(aggregator.run());

    let mut workers = JoinSet::new();
    let report = RampScheduler {
        config: entry.config.clone(),
        factory,
        end_time,
        cancel: cancel.clone(),
        results: results_tx,
        active,
    }
    .spawn_all(run_start, &mut workers)
    .await;

    let failure_reason = report.all_failed().then(|| {
        format!(
            "no virtual user could be started: {}",
            report.last_error.as_deref().unwrap_or("unknown error")
        )
    });

    if let Some(reason) = &failure_reason {
        error!("Execution {} failed: {}", entry.id, reason);
    } else {
        info!(
            "Execution {}: {} virtual users running ({} failed to start)",
            entry.id, report.spawned, report.failed
        );
        tokio::select! {
            _ = sleep_until(end_time) => {}
            _ = cancel.cancelled() => {}
        }
    }

    // Wake sleepers; in-flight requests get the grace period to finish.
    cancel.cancel();
    let grace = settings.grace_period();
    let drained = timeout(grace, async {
        while workers.join_next().await.is_some() {}
    })
    .await;
    if drained.is_err() {
        warn!(
            "Execution {}: grace period of {}ms elapsed, aborting {} virtual users",
            entry.id,
            grace.as_millis(),
            workers.len()
        );
        workers.abort_all();
        while workers.join_next().await.is_some() {}
    }

    let output = match aggregator_handle.await {
        Ok(output) => output,
        Err(e) => {
            error!("Execution {}: aggregator task failed: {}", entry.id, e);
            AggregatorOutput::default()
        }
    };

    let status = if failure_reason.is_some() {
        ExecutionStatus::Failed
    } else if entry.stop_requested() {
        ExecutionStatus::Stopped
    } else {
        ExecutionStatus::Completed
    };
    let record = finalize(&entry, status, output, failure_reason);

    info!(
        "Execution {} {}: {} requests, error rate {:.2}%",
        entry.id,
        record.status,
        record.results_recorded,
        record.metrics.error_rate
    );
    entry.freeze(record);
}

fn finalize(
    entry: &ExecutionEntry,
    status: ExecutionStatus,
    output: AggregatorOutput,
    failure_reason: Option<String>,
) -> LoadTestExecution {
    let ended = Instant::now();
    let duration = ended.saturating_duration_since(entry.started());
    let (metrics, summary) = output.summarize(duration, &entry.config.thresholds);

    // A failed run with nothing recorded has nothing to summarize.
    let summary = (status != ExecutionStatus::Failed || !output.results.is_empty()).then_some(summary);
    let progress = match status {
        ExecutionStatus::Completed => 100.0,
        _ => entry.progress_at(ended),
    };

    LoadTestExecution {
        id: entry.id,
        config_id: entry.config.id.clone(),
        status,
        start_time: entry.start_time,
        end_time: Some(Utc::now()),
        progress,
        metrics,
        results_recorded: output.results.len() as u64,
        results: output.results,
        summary,
        failure_reason,
    }
}

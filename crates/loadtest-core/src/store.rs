use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::aggregator::LiveSnapshot;
use crate::config::LoadTestConfig;
use crate::error::{EngineError, Result};
use crate::model::{ExecutionMetrics, ExecutionStatus, LoadTestExecution};

/// Shared state for one execution. The live view is written only by the
/// aggregator; the frozen record is written exactly once by the run task.
pub struct ExecutionEntry {
    pub id: Uuid,
    pub config: Arc<LoadTestConfig>,
    pub start_time: DateTime<Utc>,
    started: Instant,
    cancel: CancellationToken,
    stop_requested: AtomicBool,
    live: watch::Receiver<LiveSnapshot>,
    frozen: watch::Sender<Option<Arc<LoadTestExecution>>>,
}

impl ExecutionEntry {
    pub fn new(id: Uuid, config: Arc<LoadTestConfig>, live: watch::Receiver<LiveSnapshot>) -> Self {
        let (frozen, _) = watch::channel(None);
        Self {
            id,
            config,
            start_time: Utc::now(),
            started: Instant::now(),
            cancel: CancellationToken::new(),
            stop_requested: AtomicBool::new(false),
            live,
            frozen,
        }
    }

    pub fn started(&self) -> Instant {
        self.started
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.cancel.cancel();
    }

    pub fn stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn status(&self) -> ExecutionStatus {
        self.frozen
            .borrow()
            .as_ref()
            .map(|record| record.status)
            .unwrap_or(ExecutionStatus::Running)
    }

    pub fn frozen(&self) -> Option<Arc<LoadTestExecution>> {
        self.frozen.borrow().clone()
    }

    /// Store the final record. Only the first call has any effect.
    pub fn freeze(&self, record: LoadTestExecution) -> bool {
        let record = Arc::new(record);
        self.frozen.send_if_modified(|slot| {
            if slot.is_some() {
                return false;
            }
            *slot = Some(record);
            true
        })
    }

    pub async fn wait_frozen(&self) -> Arc<LoadTestExecution> {
        let mut rx = self.frozen.subscribe();
        // The sender lives as long as `self`, so the wait only ends on a freeze.
        let frozen = rx
            .wait_for(Option::is_some)
            .await
            .ok()
            .and_then(|slot| (*slot).clone());
        frozen.unwrap_or_else(|| self.snapshot())
    }

    /// Percent of the configured duration elapsed at `now`, clamped to [0, 100].
    pub fn progress_at(&self, now: Instant) -> f64 {
        let total = self.config.load_profile.duration().as_secs_f64();
        if total <= 0.0 {
            return 100.0;
        }
        let elapsed = now.saturating_duration_since(self.started).as_secs_f64();
        (elapsed / total * 100.0).clamp(0.0, 100.0)
    }

    pub fn live(&self) -> LiveSnapshot {
        self.live.borrow().clone()
    }

    /// Current view: the frozen record once the run has ended, otherwise a
    /// running snapshot without result history.
    pub fn snapshot(&self) -> Arc<LoadTestExecution> {
        if let Some(record) = self.frozen() {
            return record;
        }
        let live = self.live();
        Arc::new(LoadTestExecution {
            id: self.id,
            config_id: self.config.id.clone(),
            status: ExecutionStatus::Running,
            start_time: self.start_time,
            end_time: None,
            progress: self.progress_at(Instant::now()),
            metrics: live.metrics,
            results_recorded: live.results_recorded,
            results: Vec::new(),
            summary: None,
            failure_reason: None,
        })
    }

    pub fn metrics(&self) -> ExecutionMetrics {
        if let Some(record) = self.frozen() {
            return ExecutionMetrics {
                execution_id: self.id,
                status: record.status,
                progress: record.progress,
                results_recorded: record.results_recorded,
                metrics: record.metrics.clone(),
            };
        }
        let live = self.live();
        ExecutionMetrics {
            execution_id: self.id,
            status: ExecutionStatus::Running,
            progress: self.progress_at(Instant::now()),
            results_recorded: live.results_recorded,
            metrics: live.metrics,
        }
    }
}

/// In-memory map of execution id to execution, created once and handed to
/// the controller.
#[derive(Default)]
pub struct ExecutionStore {
    entries: DashMap<Uuid, Arc<ExecutionEntry>>,
}

impl ExecutionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution; an existing id is never replaced.
    pub fn insert(&self, entry: Arc<ExecutionEntry>) -> Result<()> {
        match self.entries.entry(entry.id) {
            Entry::Occupied(existing) => Err(EngineError::InvalidState {
                id: entry.id,
                status: existing.get().status(),
            }),
            Entry::Vacant(slot) => {
                slot.insert(entry);
                Ok(())
            }
        }
    }

    pub fn get(&self, id: Uuid) -> Result<Arc<ExecutionEntry>> {
        self.entries
            .get(&id)
            .map(|entry| entry.value().clone())
            .ok_or(EngineError::NotFound(id))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

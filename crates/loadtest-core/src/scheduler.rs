use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinSet;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::LoadTestConfig;
use crate::executor::ExecutorFactory;
use crate::model::LoadTestResult;
use crate::ramp::RampPlanner;
use crate::rate_limiter::RateLimiter;
use crate::worker::{ActiveUsers, VirtualUser};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SpawnReport {
    pub spawned: u32,
    pub failed: u32,
    pub last_error: Option<String>,
}

impl SpawnReport {
    /// Every attempted spawn failed.
    pub fn all_failed(&self) -> bool {
        self.spawned == 0 && self.failed > 0
    }
}

/// Starts virtual users on the planner's schedule.
pub struct RampScheduler {
    pub config: Arc<LoadTestConfig>,
    pub factory: Arc<dyn ExecutorFactory>,
    pub end_time: Instant,
    pub cancel: CancellationToken,
    pub results: mpsc::Sender<LoadTestResult>,
    pub active: ActiveUsers,
}

impl RampScheduler {
    /// Spawn every worker into `workers`, waiting out each start offset.
    /// Stops early on cancellation. The result sender is released on return.
    pub async fn spawn_all(self, run_start: Instant, workers: &mut JoinSet<u64>) -> SpawnReport {
        let profile = &self.config.load_profile;
        let planner = RampPlanner::new(profile);
        let rate_limiter = profile.max_requests_per_second.map(RateLimiter::new);
        let mut report = SpawnReport::default();

        info!(
            "Scheduling {} virtual users ({:?}), last start at +{}ms",
            profile.virtual_users,
            profile.profile_type,
            planner.ramp_duration().as_millis()
        );

        for (idx, offset) in planner.offsets().into_iter().enumerate() {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = sleep_until(run_start + offset) => {}
            }

            let id = idx as u32;
            match self.factory.create(&self.config.target, id) {
                Ok(executor) => {
                    let vu = VirtualUser {
                        id,
                        executor,
                        think_time: profile.think_time(),
                        end_time: self.end_time,
                        cancel: self.cancel.clone(),
                        results: self.results.clone(),
                        active: self.active.clone(),
                        rate_limiter: rate_limiter.clone(),
                    };
                    workers.spawn(vu.run());
                    report.spawned += 1;
                }
                Err(e) => {
                    warn!("Failed to start virtual user {}: {}", id, e);
                    report.failed += 1;
                    report.last_error = Some(e.to_string());
                }
            }
        }

        report
    }
}

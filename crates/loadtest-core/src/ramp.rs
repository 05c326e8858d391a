use std::time::Duration;

use crate::config::{LoadProfile, ProfileType};

/// Deterministic start planner: one offset per virtual user, using integer
/// milliseconds only.
///
/// `spike` schedules like `constant` and `stress` like `ramp-up`; those
/// profiles differ only in the thresholds usually applied to them.
#[derive(Debug, Clone)]
pub struct RampPlanner {
    virtual_users: u32,
    ramp_up_ms: Option<u64>,
    profile_type: ProfileType,
}

impl RampPlanner {
    pub fn new(profile: &LoadProfile) -> Self {
        Self {
            virtual_users: profile.virtual_users,
            ramp_up_ms: profile.ramp_up_seconds.map(|s| s.saturating_mul(1000)),
            profile_type: profile.profile_type,
        }
    }

    fn staggered(&self) -> Option<u64> {
        match self.profile_type {
            ProfileType::Constant | ProfileType::Spike => None,
            ProfileType::RampUp | ProfileType::Stress => self.ramp_up_ms,
        }
    }

    /// Start offset for worker `idx`: `idx * ramp_up / n`.
    pub fn offset(&self, idx: u32) -> Duration {
        match self.staggered() {
            Some(ramp_up_ms) if self.virtual_users > 0 => {
                let ms = (idx as u64).saturating_mul(ramp_up_ms) / self.virtual_users as u64;
                Duration::from_millis(ms)
            }
            _ => Duration::ZERO,
        }
    }

    /// Offsets for every worker, in spawn order.
    pub fn offsets(&self) -> Vec<Duration> {
        (0..self.virtual_users).map(|idx| self.offset(idx)).collect()
    }

    /// Time from run start until the last worker has been started.
    pub fn ramp_duration(&self) -> Duration {
        self.virtual_users
            .checked_sub(1)
            .map(|last| self.offset(last))
            .unwrap_or(Duration::ZERO)
    }
}

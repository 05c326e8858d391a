//! Load-test execution engine.
//!
//! [`ExecutionController`] validates a [`LoadTestConfig`], starts virtual
//! users on the [`RampPlanner`] schedule, streams their results to a single
//! [`MetricsAggregator`], and freezes a final [`LoadTestExecution`] with a
//! threshold-checked summary.

pub mod aggregator;
pub mod config;
pub mod controller;
pub mod error;
pub mod executor;
pub mod model;
pub mod ramp;
pub mod rate_limiter;
pub mod scheduler;
pub mod stats;
pub mod store;
pub mod thresholds;
pub mod worker;

pub use aggregator::*;
pub use config::*;
pub use controller::*;
pub use error::*;
pub use executor::*;
pub use model::*;
pub use ramp::*;
pub use rate_limiter::*;
pub use scheduler::*;
pub use store::*;
pub use thresholds::evaluate;
pub use worker::*;

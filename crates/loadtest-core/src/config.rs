use reqwest::header::{HeaderName, HeaderValue};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::error::{EngineError, Result};

/// Shortest run the engine accepts, in seconds.
pub const MIN_DURATION_SECONDS: u64 = 10;

/// Longest run the engine accepts, in seconds (one week).
pub const MAX_DURATION_SECONDS: u64 = 7 * 24 * 60 * 60;

/// Upper bound on `result_channel_capacity`.
pub const MAX_RESULT_CHANNEL_CAPACITY: usize = 1_000_000;

/// Upper bound on `live_window_size`.
pub const MAX_LIVE_WINDOW_SIZE: usize = 100_000;

/// A run file: one load test plus optional engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub load_test: LoadTestConfig,
    #[serde(default)]
    pub engine: EngineSettings,
}

impl Config {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("read {}: {e}", path.display())))?;
        Self::from_toml(&contents)
    }

    pub fn from_toml(contents: &str) -> Result<Self> {
        let config: Self =
            toml::from_str(contents).map_err(|e| EngineError::Config(e.to_string()))?;
        config
            .engine
            .validate()
            .map_err(|e| EngineError::Config(e.to_string()))?;
        Ok(config)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadTestConfig {
    pub id: String,
    #[serde(default)]
    pub name: String,
    pub target: TargetConfig,
    pub load_profile: LoadProfile,
    #[serde(default)]
    pub thresholds: Thresholds,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: HashMap<String, String>,
    /// A JSON string is sent verbatim; any other value is sent as JSON.
    #[serde(default)]
    pub body: Option<serde_json::Value>,
}

fn default_method() -> String {
    "GET".to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ProfileType {
    Constant,
    RampUp,
    Spike,
    Stress,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadProfile {
    #[serde(rename = "type")]
    pub profile_type: ProfileType,
    pub virtual_users: u32,
    pub duration_seconds: u64,
    #[serde(default)]
    pub ramp_up_seconds: Option<u64>,
    #[serde(default = "default_think_time_ms")]
    pub think_time_ms: u64,
    /// Run-wide cap on request issue rate, shared by all virtual users.
    #[serde(default)]
    pub max_requests_per_second: Option<u64>,
}

fn default_think_time_ms() -> u64 {
    1000
}

impl LoadProfile {
    pub fn duration(&self) -> Duration {
        Duration::from_secs(self.duration_seconds)
    }

    pub fn think_time(&self) -> Duration {
        Duration::from_millis(self.think_time_ms)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Thresholds {
    #[serde(default = "default_avg_response_time_ms")]
    pub avg_response_time_ms: f64,
    #[serde(default = "default_p95_response_time_ms")]
    pub p95_response_time_ms: f64,
    #[serde(default = "default_error_rate_percent")]
    pub error_rate_percent: f64,
    #[serde(default = "default_throughput_rps")]
    pub throughput_rps: f64,
}

fn default_avg_response_time_ms() -> f64 {
    1000.0
}

fn default_p95_response_time_ms() -> f64 {
    2000.0
}

fn default_error_rate_percent() -> f64 {
    5.0
}

fn default_throughput_rps() -> f64 {
    10.0
}

impl Default for Thresholds {
    fn default() -> Self {
        Self {
            avg_response_time_ms: default_avg_response_time_ms(),
            p95_response_time_ms: default_p95_response_time_ms(),
            error_rate_percent: default_error_rate_percent(),
            throughput_rps: default_throughput_rps(),
        }
    }
}

/// Engine-wide knobs, shared by every execution a controller runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Per-request timeout in milliseconds
    pub request_timeout_ms: u64,
    /// How long in-flight workers may run after a stop or the end time
    pub stop_grace_period_ms: u64,
    /// Upper bound on `virtual_users` for a single run
    pub max_virtual_users: u32,
    /// Capacity of the result stream between workers and the aggregator
    pub result_channel_capacity: usize,
    /// Number of most recent results used for live metrics
    pub live_window_size: usize,
    /// How often live metrics are republished, in milliseconds
    pub live_refresh_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            stop_grace_period_ms: 5_000,
            max_virtual_users: 10_000,
            result_channel_capacity: 10_000,
            live_window_size: 100,
            live_refresh_ms: 1_000,
        }
    }
}

impl EngineSettings {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_millis(self.stop_grace_period_ms)
    }

    pub fn live_refresh(&self) -> Duration {
        Duration::from_millis(self.live_refresh_ms.max(1))
    }

    pub fn validate(&self) -> Result<()> {
        if self.request_timeout_ms == 0 {
            return Err(invalid("request_timeout_ms must be positive"));
        }
        if self.max_virtual_users == 0 {
            return Err(invalid("max_virtual_users must be at least 1"));
        }
        if !(1..=MAX_RESULT_CHANNEL_CAPACITY).contains(&self.result_channel_capacity) {
            return Err(invalid(format!(
                "result_channel_capacity must be between 1 and {MAX_RESULT_CHANNEL_CAPACITY}, got {}",
                self.result_channel_capacity
            )));
        }
        if !(1..=MAX_LIVE_WINDOW_SIZE).contains(&self.live_window_size) {
            return Err(invalid(format!(
                "live_window_size must be between 1 and {MAX_LIVE_WINDOW_SIZE}, got {}",
                self.live_window_size
            )));
        }
        if self.live_refresh_ms == 0 {
            return Err(invalid("live_refresh_ms must be positive"));
        }
        Ok(())
    }
}

impl LoadTestConfig {
    /// Check every invariant a run depends on. Nothing is created when this fails.
    pub fn validate(&self, settings: &EngineSettings) -> Result<()> {
        let profile = &self.load_profile;

        if profile.virtual_users < 1 {
            return Err(invalid("virtual_users must be at least 1"));
        }
        if profile.virtual_users > settings.max_virtual_users {
            return Err(invalid(format!(
                "virtual_users {} exceeds the engine limit of {}",
                profile.virtual_users, settings.max_virtual_users
            )));
        }
        if !(MIN_DURATION_SECONDS..=MAX_DURATION_SECONDS).contains(&profile.duration_seconds) {
            return Err(invalid(format!(
                "duration_seconds must be between {MIN_DURATION_SECONDS} and {MAX_DURATION_SECONDS}, got {}",
                profile.duration_seconds
            )));
        }
        if let Some(ramp_up) = profile.ramp_up_seconds {
            if ramp_up > profile.duration_seconds {
                return Err(invalid(format!(
                    "ramp_up_seconds ({ramp_up}) must not exceed duration_seconds ({})",
                    profile.duration_seconds
                )));
            }
        }
        if profile.max_requests_per_second == Some(0) {
            return Err(invalid("max_requests_per_second must be positive when set"));
        }

        self.target.validate()?;
        self.thresholds.validate()
    }
}

impl TargetConfig {
    pub fn parsed_method(&self) -> Result<Method> {
        Method::from_bytes(self.method.to_ascii_uppercase().as_bytes())
            .map_err(|_| invalid(format!("invalid HTTP method: {}", self.method)))
    }

    fn validate(&self) -> Result<()> {
        let url = url::Url::parse(&self.url)
            .map_err(|e| invalid(format!("invalid target url {}: {e}", self.url)))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(invalid(format!(
                "target url must be http:// or https:// (got {})",
                self.url
            )));
        }
        self.parsed_method()?;

        for (name, value) in &self.headers {
            HeaderName::from_bytes(name.as_bytes())
                .map_err(|_| invalid(format!("invalid header name: {name}")))?;
            HeaderValue::from_str(value)
                .map_err(|_| invalid(format!("invalid value for header {name}")))?;
        }
        Ok(())
    }
}

impl Thresholds {
    fn validate(&self) -> Result<()> {
        let limits = [
            ("avg_response_time_ms", self.avg_response_time_ms),
            ("p95_response_time_ms", self.p95_response_time_ms),
            ("error_rate_percent", self.error_rate_percent),
            ("throughput_rps", self.throughput_rps),
        ];
        for (name, value) in limits {
            if !value.is_finite() || value < 0.0 {
                return Err(invalid(format!(
                    "threshold {name} must be a non-negative number, got {value}"
                )));
            }
        }
        Ok(())
    }
}

fn invalid(msg: impl Into<String>) -> EngineError {
    EngineError::Validation(msg.into())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::sample_config;

    const RUN_FILE: &str = r#"
[load_test]
id = "checkout-smoke"
name = "Checkout smoke"

[load_test.target]
url = "http://localhost:8080/checkout"
method = "post"
body = { sku = "A-1", qty = 2 }

[load_test.target.headers]
"x-api-key" = "test"

[load_test.load_profile]
type = "ramp-up"
virtual_users = 50
duration_seconds = 60
ramp_up_seconds = 20
think_time_ms = 250

[load_test.thresholds]
p95_response_time_ms = 800.0

[engine]
stop_grace_period_ms = 2000
"#;

    #[test]
    fn test_config_serde() {
        let config = Config::from_toml(RUN_FILE).unwrap();
        let lt = &config.load_test;

        assert_eq!(lt.id, "checkout-smoke");
        assert_eq!(lt.target.method, "post");
        assert_eq!(lt.target.headers.get("x-api-key").unwrap(), "test");
        assert_eq!(lt.load_profile.profile_type, ProfileType::RampUp);
        assert_eq!(lt.load_profile.ramp_up_seconds, Some(20));
        assert_eq!(lt.thresholds.p95_response_time_ms, 800.0);
        // unspecified thresholds fall back to defaults
        assert_eq!(lt.thresholds.error_rate_percent, 5.0);
        assert_eq!(config.engine.stop_grace_period_ms, 2000);
        assert_eq!(config.engine.request_timeout_ms, 30_000);
        assert!(lt.validate(&config.engine).is_ok());
    }

    #[test]
    fn test_think_time_defaults_to_one_second() {
        let profile: LoadProfile = toml::from_str(
            r#"
type = "constant"
virtual_users = 1
duration_seconds = 10
"#,
        )
        .unwrap();
        assert_eq!(profile.think_time_ms, 1000);
        assert_eq!(profile.ramp_up_seconds, None);
    }

    #[test]
    fn test_unknown_profile_type_rejected() {
        let parsed: std::result::Result<LoadProfile, _> = toml::from_str(
            r#"
type = "soak"
virtual_users = 1
duration_seconds = 10
"#,
        );
        assert!(parsed.is_err());
    }

    #[test]
    fn test_validate_rejects_zero_users() {
        let mut config = sample_config();
        config.load_profile.virtual_users = 0;
        let err = config.validate(&EngineSettings::default()).unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[test]
    fn test_validate_rejects_too_many_users() {
        let mut config = sample_config();
        config.load_profile.virtual_users = 10_001;
        assert!(config.validate(&EngineSettings::default()).is_err());
    }

    #[test]
    fn test_validate_rejects_short_duration() {
        let mut config = sample_config();
        config.load_profile.duration_seconds = 9;
        assert!(config.validate(&EngineSettings::default()).is_err());
    }

    #[test]
    fn test_validate_rejects_long_duration() {
        let mut config = sample_config();
        config.load_profile.duration_seconds = MAX_DURATION_SECONDS;
        assert!(config.validate(&EngineSettings::default()).is_ok());

        config.load_profile.duration_seconds = MAX_DURATION_SECONDS + 1;
        assert!(config.validate(&EngineSettings::default()).is_err());

        config.load_profile.duration_seconds = u64::MAX;
        assert!(matches!(
            config.validate(&EngineSettings::default()),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_ramp_up_bounded_by_duration() {
        let mut config = sample_config();
        config.load_profile.ramp_up_seconds = Some(10);
        assert!(config.validate(&EngineSettings::default()).is_ok());

        config.load_profile.ramp_up_seconds = Some(11);
        assert!(config.validate(&EngineSettings::default()).is_err());
    }

    #[test]
    fn test_validate_target() {
        let settings = EngineSettings::default();

        let mut config = sample_config();
        config.target.url = "ftp://example.com".to_string();
        assert!(config.validate(&settings).is_err());

        let mut config = sample_config();
        config.target.method = "GE T".to_string();
        assert!(config.validate(&settings).is_err());

        let mut config = sample_config();
        config
            .target
            .headers
            .insert("bad header".to_string(), "x".to_string());
        assert!(config.validate(&settings).is_err());
    }

    #[test]
    fn test_validate_thresholds() {
        let mut config = sample_config();
        config.thresholds.error_rate_percent = -1.0;
        assert!(config.validate(&EngineSettings::default()).is_err());

        let mut config = sample_config();
        config.thresholds.throughput_rps = f64::NAN;
        assert!(config.validate(&EngineSettings::default()).is_err());
    }

    #[test]
    fn test_engine_settings_defaults_are_valid() {
        assert!(EngineSettings::default().validate().is_ok());
    }

    #[test]
    fn test_engine_settings_reject_zero_timeout() {
        let settings = EngineSettings {
            request_timeout_ms: 0,
            ..EngineSettings::default()
        };
        assert!(matches!(settings.validate(), Err(EngineError::Validation(_))));
    }

    #[test]
    fn test_engine_settings_bound_channel_capacity() {
        for capacity in [0, MAX_RESULT_CHANNEL_CAPACITY + 1, usize::MAX] {
            let settings = EngineSettings {
                result_channel_capacity: capacity,
                ..EngineSettings::default()
            };
            assert!(settings.validate().is_err(), "capacity {capacity}");
        }
    }

    #[test]
    fn test_engine_settings_bound_live_window() {
        for window in [0, MAX_LIVE_WINDOW_SIZE + 1, usize::MAX] {
            let settings = EngineSettings {
                live_window_size: window,
                ..EngineSettings::default()
            };
            assert!(settings.validate().is_err(), "window {window}");
        }
    }

    #[test]
    fn test_engine_settings_reject_zero_refresh_and_user_limit() {
        let settings = EngineSettings {
            live_refresh_ms: 0,
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());

        let settings = EngineSettings {
            max_virtual_users: 0,
            ..EngineSettings::default()
        };
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_run_file_with_invalid_engine_rejected() {
        let contents = RUN_FILE.replace(
            "stop_grace_period_ms = 2000",
            "stop_grace_period_ms = 2000\nrequest_timeout_ms = 0",
        );
        let err = Config::from_toml(&contents).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(err.to_string().contains("request_timeout_ms"), "{err}");
    }
}

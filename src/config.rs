//! Service configuration from environment variables

use crate::retry::{RetryPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CLOSE_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct AppConfig {
    pub port: u16,
    /// SQLite file; in-memory when unset
    pub db_path: Option<PathBuf>,
    pub retry: RetryPolicy,
    /// Probability in `[0, 1]` that a simulated store call fails
    pub failure_rate: f64,
    pub latency_min: Duration,
    pub latency_max: Duration,
    /// Delay between the completion notice and the duplex close frame
    pub close_grace: Duration,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            db_path: None,
            retry: RetryPolicy::default(),
            failure_rate: 0.0,
            latency_min: Duration::ZERO,
            latency_max: Duration::ZERO,
            close_grace: DEFAULT_CLOSE_GRACE,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup. Unparseable values fall back to
    /// their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let millis = |key: &str, default: Duration| {
            parse_var::<u64>(&lookup, key).map_or(default, Duration::from_millis)
        };

        let retry = RetryPolicy::new(
            parse_var(&lookup, "SURVEY_RETRY_MAX_ATTEMPTS").unwrap_or(DEFAULT_MAX_ATTEMPTS),
            millis("SURVEY_RETRY_BASE_DELAY_MS", DEFAULT_BASE_DELAY),
        );

        let failure_rate = parse_var::<f64>(&lookup, "SURVEY_FAILURE_RATE")
            .filter(|rate| rate.is_finite())
            .map_or(0.0, |rate| rate.clamp(0.0, 1.0));

        Self {
            port: parse_var(&lookup, "SURVEY_PORT").unwrap_or(DEFAULT_PORT),
            db_path: lookup("SURVEY_DB_PATH")
                .filter(|p| !p.trim().is_empty())
                .map(PathBuf::from),
            retry,
            failure_rate,
            latency_min: millis("SURVEY_LATENCY_MIN_MS", Duration::ZERO),
            latency_max: millis("SURVEY_LATENCY_MAX_MS", Duration::ZERO),
            close_grace: millis("SURVEY_CLOSE_GRACE_MS", DEFAULT_CLOSE_GRACE),
        }
    }

    /// Whether the store should be wrapped in the network simulation
    pub fn simulates_network(&self) -> bool {
        self.failure_rate > 0.0 || !self.latency_max.is_zero()
    }
}

fn parse_var<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let value = lookup(key)?;
    let parsed = value.trim().parse().ok();
    if parsed.is_none() {
        tracing::warn!(key, value = %value, "Ignoring unparseable configuration value");
    }
    parsed
}

// Process settings shared by the API, worker and CLI
// Every value comes from the environment with a local-development default

use crate::error::ConfigError;
use crate::redis::DEFAULT_TTL_SECONDS;
use std::env;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct Settings {
    pub redis_url: String,
    pub api_bind_addr: String,
    pub worker_health_addr: String,
    /// Upper bound on runs one worker process executes at the same time
    pub worker_concurrency: usize,
    pub result_ttl_seconds: u64,
    /// Per-case budget. `None` keeps the unbounded behavior.
    pub case_timeout: Option<Duration>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: "redis://127.0.0.1:6379".to_string(),
            api_bind_addr: "0.0.0.0:3000".to_string(),
            worker_health_addr: "0.0.0.0:9090".to_string(),
            worker_concurrency: 4,
            result_ttl_seconds: DEFAULT_TTL_SECONDS,
            case_timeout: None,
        }
    }
}

impl Settings {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build settings from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let worker_concurrency = match lookup("WORKER_CONCURRENCY") {
            Some(v) => parse_number::<usize>("WORKER_CONCURRENCY", &v)?.max(1),
            None => defaults.worker_concurrency,
        };
        let result_ttl_seconds = match lookup("RESULT_TTL_SECONDS") {
            Some(v) => parse_number("RESULT_TTL_SECONDS", &v)?,
            None => defaults.result_ttl_seconds,
        };
        let case_timeout = match lookup("CASE_TIMEOUT_SECONDS") {
            Some(v) if !v.trim().is_empty() => Some(Duration::from_secs(parse_number(
                "CASE_TIMEOUT_SECONDS",
                &v,
            )?)),
            _ => None,
        };

        Ok(Self {
            redis_url: lookup("REDIS_URL").unwrap_or(defaults.redis_url),
            api_bind_addr: lookup("API_BIND_ADDR").unwrap_or(defaults.api_bind_addr),
            worker_health_addr: lookup("WORKER_HEALTH_ADDR").unwrap_or(defaults.worker_health_addr),
            worker_concurrency,
            result_ttl_seconds,
            case_timeout,
        })
    }
}

fn parse_number<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidNumber {
        key: key.to_string(),
        value: value.to_string(),
    })
}

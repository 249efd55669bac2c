//! Configuration management for Turnstile.
//!
//! Values are layered: built-in defaults, then an optional YAML file, then
//! `TURNSTILE_`-prefixed environment variables using `__` between nesting
//! levels (`TURNSTILE_LIMITS__IP__CAPACITY=40`).

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::detector::DetectorPolicy;
use crate::error::{Result, TurnstileError};
use crate::ratelimit::BucketBudget;

/// Prefix of environment variable overrides.
const ENV_PREFIX: &str = "TURNSTILE";

/// Main configuration for the Turnstile service.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TurnstileConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Counter store configuration
    #[serde(default)]
    pub store: StoreConfig,

    /// Token bucket budgets
    #[serde(default)]
    pub limits: LimitsConfig,

    /// Behavioral detector policy
    #[serde(default)]
    pub detector: DetectorPolicy,
}

/// Server configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// HTTP listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
        }
    }
}

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([0, 0, 0, 0], 8000))
}

/// Which counter store implementation to run against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum StoreBackend {
    /// Shared Redis server
    Redis,
    /// Process-local maps, budgets are not shared between instances
    Memory,
}

/// What to do with a request when the counter store fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Let the request through
    FailOpen,
    /// Answer 503 without calling the handler
    FailClosed,
}

/// Counter store configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Store implementation
    #[serde(default = "default_backend")]
    pub backend: StoreBackend,

    /// Redis connection URL
    #[serde(default = "default_redis_url")]
    pub redis_url: String,

    /// Deadline for a single store round-trip in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout_ms: u64,

    /// Behavior when the store is unreachable or times out
    #[serde(default = "default_failure_policy")]
    pub failure_policy: FailurePolicy,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            redis_url: default_redis_url(),
            timeout_ms: default_timeout_ms(),
            failure_policy: default_failure_policy(),
        }
    }
}

impl StoreConfig {
    /// Round-trip deadline as a duration.
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

fn default_backend() -> StoreBackend {
    StoreBackend::Redis
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379/0".to_string()
}

fn default_timeout_ms() -> u64 {
    250
}

fn default_failure_policy() -> FailurePolicy {
    FailurePolicy::FailClosed
}

/// Token bucket budgets per scope family.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Budget per API key
    #[serde(default = "default_api_key_budget")]
    pub api_key: BucketBudget,

    /// Budget per client address
    #[serde(default = "default_ip_budget")]
    pub ip: BucketBudget,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            api_key: default_api_key_budget(),
            ip: default_ip_budget(),
        }
    }
}

fn default_api_key_budget() -> BucketBudget {
    BucketBudget::new(60.0, 5.0)
}

fn default_ip_budget() -> BucketBudget {
    BucketBudget::new(20.0, 1.0)
}

impl TurnstileConfig {
    /// Load configuration from defaults, an optional YAML file and the environment.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        Self::load_with_env(path, Self::environment())
    }

    fn environment() -> config::Environment {
        config::Environment::with_prefix(ENV_PREFIX)
            .prefix_separator("_")
            .separator("__")
            .try_parsing(true)
    }

    fn load_with_env(path: Option<&Path>, env: config::Environment) -> Result<Self> {
        let defaults = config::Config::try_from(&TurnstileConfig::default())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        let mut builder = config::Config::builder().add_source(defaults);

        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path)
                    .format(config::FileFormat::Yaml)
                    .required(true),
            );
        }

        let config: TurnstileConfig = builder
            .add_source(env)
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| TurnstileError::Config(e.to_string()))?;

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: TurnstileConfig = serde_yaml::from_str(yaml)
            .map_err(|e| TurnstileError::Config(format!("Failed to parse config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject budgets and policies that cannot be enforced.
    pub fn validate(&self) -> Result<()> {
        validate_budget("limits.api_key", &self.limits.api_key)?;
        validate_budget("limits.ip", &self.limits.ip)?;

        if self.detector.window_seconds == 0 {
            return Err(TurnstileError::Config(
                "detector.window_seconds must be positive".to_string(),
            ));
        }
        if self.detector.max_distinct == 0 {
            return Err(TurnstileError::Config(
                "detector.max_distinct must be positive".to_string(),
            ));
        }
        if self.store.timeout_ms == 0 {
            return Err(TurnstileError::Config(
                "store.timeout_ms must be positive".to_string(),
            ));
        }

        Ok(())
    }
}

fn validate_budget(name: &str, budget: &BucketBudget) -> Result<()> {
    if !budget.capacity.is_finite() || budget.capacity <= 0.0 {
        return Err(TurnstileError::Config(format!(
            "{}.capacity must be a positive number, got {}",
            name, budget.capacity
        )));
    }
    if !budget.refill_per_second.is_finite() || budget.refill_per_second < 0.0 {
        return Err(TurnstileError::Config(format!(
            "{}.refill_per_second must be zero or positive, got {}",
            name, budget.refill_per_second
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn env_from(vars: &[(&str, &str)]) -> config::Environment {
        let mut source = config::Map::new();
        for (key, value) in vars {
            source.insert(key.to_string(), value.to_string());
        }
        TurnstileConfig::environment().source(Some(source))
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = TurnstileConfig::default();
        config.validate().unwrap();

        assert_eq!(config.server.listen_addr.port(), 8000);
        assert_eq!(config.store.backend, StoreBackend::Redis);
        assert_eq!(config.store.failure_policy, FailurePolicy::FailClosed);
        assert_eq!(config.store.timeout(), Duration::from_millis(250));
        assert_eq!(config.limits.api_key, BucketBudget::new(60.0, 5.0));
        assert_eq!(config.limits.ip, BucketBudget::new(20.0, 1.0));
        assert_eq!(config.detector, DetectorPolicy::default());
    }

    #[test]
    fn test_partial_yaml_keeps_defaults() {
        let yaml = r#"
store:
  backend: memory
  failure_policy: fail_open
limits:
  api_key:
    capacity: 2
    refill_per_second: 0
detector:
  max_distinct: 3
"#;
        let config = TurnstileConfig::from_yaml(yaml).unwrap();

        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.store.failure_policy, FailurePolicy::FailOpen);
        assert_eq!(config.store.redis_url, "redis://127.0.0.1:6379/0");
        assert_eq!(config.limits.api_key, BucketBudget::new(2.0, 0.0));
        assert_eq!(config.limits.ip, BucketBudget::new(20.0, 1.0));
        assert_eq!(config.detector.max_distinct, 3);
        assert_eq!(config.detector.window_seconds, 30);
    }

    #[test]
    fn test_non_positive_capacity_rejected() {
        let yaml = r#"
limits:
  ip:
    capacity: 0
    refill_per_second: 1
"#;
        let err = TurnstileConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(
            err,
            TurnstileError::Config(ref msg) if msg.contains("limits.ip.capacity")
        ));
    }

    #[test]
    fn test_negative_refill_rejected() {
        let mut config = TurnstileConfig::default();
        config.limits.api_key.refill_per_second = -1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_window_and_threshold_rejected() {
        let mut config = TurnstileConfig::default();
        config.detector.window_seconds = 0;
        assert!(config.validate().is_err());

        let mut config = TurnstileConfig::default();
        config.detector.max_distinct = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_overrides() {
        let env = env_from(&[
            ("TURNSTILE_LIMITS__API_KEY__CAPACITY", "7"),
            ("TURNSTILE_LIMITS__IP__REFILL_PER_SECOND", "0.5"),
            ("TURNSTILE_STORE__BACKEND", "memory"),
            ("TURNSTILE_DETECTOR__WINDOW_SECONDS", "45"),
        ]);

        let config = TurnstileConfig::load_with_env(None, env).unwrap();

        assert_eq!(config.limits.api_key.capacity, 7.0);
        assert_eq!(config.limits.api_key.refill_per_second, 5.0);
        assert_eq!(config.limits.ip.refill_per_second, 0.5);
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.detector.window_seconds, 45);
        assert_eq!(config.detector.max_distinct, 10);
    }

    #[test]
    fn test_invalid_environment_value_rejected() {
        let env = env_from(&[("TURNSTILE_LIMITS__IP__CAPACITY", "-3")]);
        assert!(TurnstileConfig::load_with_env(None, env).is_err());
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let env = env_from(&[]);
        let result = TurnstileConfig::load_with_env(
            Some(Path::new("/nonexistent/turnstile.yaml")),
            env,
        );
        assert!(matches!(result, Err(TurnstileError::Config(_))));
    }
}

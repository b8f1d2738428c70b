// ABOUTME: Configuration loading and validation for the execution engine.
// ABOUTME: Reads retry, timeout, and parallelism settings from environment variables.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during configuration loading.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{var} is not a valid {expected}: {value}")]
    InvalidValue {
        var: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("MAESTRO_STEP_TIMEOUT_MS must be greater than zero")]
    ZeroTimeout,
}

/// Engine settings applied to every run.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    /// Total attempts per step, including the first.
    pub max_retries: u32,
    /// Base delay of the exponential backoff between attempts.
    pub retry_delay: Duration,
    /// Hard limit on one invocation attempt.
    pub step_timeout: Duration,
    /// When false, parallel and mixed plans run one step at a time.
    pub enable_parallel: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_millis(1000),
            step_timeout: Duration::from_millis(60_000),
            enable_parallel: true,
        }
    }
}

impl EngineConfig {
    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_delay(mut self, retry_delay: Duration) -> Self {
        self.retry_delay = retry_delay;
        self
    }

    pub fn step_timeout(mut self, step_timeout: Duration) -> Self {
        self.step_timeout = step_timeout;
        self
    }

    pub fn enable_parallel(mut self, enable_parallel: bool) -> Self {
        self.enable_parallel = enable_parallel;
        self
    }

    /// Load configuration from environment variables with the defaults above.
    ///
    /// Environment variables:
    /// - MAESTRO_MAX_RETRIES: attempts per step (default: 3)
    /// - MAESTRO_RETRY_DELAY_MS: backoff base delay (default: 1000)
    /// - MAESTRO_STEP_TIMEOUT_MS: per-attempt timeout (default: 60000)
    /// - MAESTRO_ENABLE_PARALLEL: run independent steps concurrently (default: true)
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let max_retries = read_u64("MAESTRO_MAX_RETRIES")?
            .map(|v| u32::try_from(v).unwrap_or(u32::MAX))
            .unwrap_or(defaults.max_retries);

        let retry_delay = read_u64("MAESTRO_RETRY_DELAY_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.retry_delay);

        let step_timeout = read_u64("MAESTRO_STEP_TIMEOUT_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.step_timeout);
        if step_timeout.is_zero() {
            return Err(ConfigError::ZeroTimeout);
        }

        let enable_parallel = match std::env::var("MAESTRO_ENABLE_PARALLEL") {
            Ok(v) => match v.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" => true,
                "false" | "0" | "no" => false,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "MAESTRO_ENABLE_PARALLEL",
                        expected: "boolean",
                        value: v,
                    });
                }
            },
            Err(_) => defaults.enable_parallel,
        };

        Ok(Self {
            max_retries,
            retry_delay,
            step_timeout,
            enable_parallel,
        })
    }
}

fn read_u64(var: &'static str) -> Result<Option<u64>, ConfigError> {
    match std::env::var(var) {
        Ok(raw) if raw.trim().is_empty() => Ok(None),
        Ok(raw) => raw
            .trim()
            .parse::<u64>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                var,
                expected: "non-negative integer",
                value: raw,
            }),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    fn clear_env() {
        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe {
            std::env::remove_var("MAESTRO_MAX_RETRIES");
            std::env::remove_var("MAESTRO_RETRY_DELAY_MS");
            std::env::remove_var("MAESTRO_STEP_TIMEOUT_MS");
            std::env::remove_var("MAESTRO_ENABLE_PARALLEL");
        }
    }

    #[test]
    fn config_loads_defaults() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();

        let config = EngineConfig::from_env().unwrap();

        assert_eq!(config, EngineConfig::default());
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.retry_delay, Duration::from_millis(1000));
        assert_eq!(config.step_timeout, Duration::from_millis(60_000));
        assert!(config.enable_parallel);
    }

    #[test]
    fn config_reads_overrides() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe {
            std::env::set_var("MAESTRO_MAX_RETRIES", "5");
            std::env::set_var("MAESTRO_RETRY_DELAY_MS", "10");
            std::env::set_var("MAESTRO_ENABLE_PARALLEL", "no");
        }

        let config = EngineConfig::from_env();
        clear_env();

        let config = config.unwrap();
        assert_eq!(config.max_retries, 5);
        assert_eq!(config.retry_delay, Duration::from_millis(10));
        assert!(!config.enable_parallel);
    }

    #[test]
    fn config_rejects_garbage() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe { std::env::set_var("MAESTRO_STEP_TIMEOUT_MS", "soon") };

        let result = EngineConfig::from_env();
        clear_env();

        let err = result.unwrap_err();
        assert!(
            err.to_string().contains("MAESTRO_STEP_TIMEOUT_MS"),
            "error should name the variable: {}",
            err
        );
    }

    #[test]
    fn config_rejects_zero_timeout() {
        let _guard = ENV_MUTEX.lock().unwrap();
        clear_env();
        // SAFETY: test-only code, serialized by ENV_MUTEX
        unsafe { std::env::set_var("MAESTRO_STEP_TIMEOUT_MS", "0") };

        let result = EngineConfig::from_env();
        clear_env();

        assert!(matches!(result, Err(ConfigError::ZeroTimeout)));
    }
}

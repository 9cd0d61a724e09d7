//! Propagation engine configuration.

use std::str::FromStr;
use std::time::Duration;

use tracing::warn;

use crate::jobs::lifecycle::DEFAULT_CHECKPOINT_INTERVAL;
use crate::jobs::types::{DEFAULT_MAX_RETRIES, RetryPolicy};

pub const ENV_EXECUTOR_NAME: &str = "ORGFLAGS_EXECUTOR_NAME";
pub const ENV_WORKERS: &str = "ORGFLAGS_WORKERS";
pub const ENV_CHECKPOINT_INTERVAL: &str = "ORGFLAGS_CHECKPOINT_INTERVAL";
pub const ENV_RETRY_BASE_DELAY_MS: &str = "ORGFLAGS_RETRY_BASE_DELAY_MS";
pub const ENV_MAX_RETRIES: &str = "ORGFLAGS_MAX_RETRIES";

/// Settings for the propagation worker pool and job bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropagationConfig {
    /// Name used for worker threads and logs
    pub name: String,
    /// Number of worker threads
    pub workers: usize,
    /// Processed organizations between progress writes
    pub checkpoint_interval: usize,
    /// Backoff unit; the n-th retry waits `retry_base_delay * 2^n`
    pub retry_base_delay: Duration,
    /// Automatic retry budget of newly created jobs
    pub max_retries: u32,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            name: "flag-propagation".to_string(),
            workers: 4,
            checkpoint_interval: DEFAULT_CHECKPOINT_INTERVAL,
            retry_base_delay: Duration::from_secs(1),
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }
}

impl PropagationConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn with_checkpoint_interval(mut self, interval: usize) -> Self {
        self.checkpoint_interval = interval;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::exponential(self.retry_base_delay)
    }

    /// Defaults overridden by `ORGFLAGS_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Like [`PropagationConfig::from_env`] with an explicit source.
    ///
    /// Unparseable values are logged and ignored.
    pub fn from_lookup<L>(lookup: L) -> Self
    where
        L: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup(ENV_EXECUTOR_NAME) {
            let name = name.trim();
            if name.is_empty() {
                warn!(key = ENV_EXECUTOR_NAME, "empty value ignored");
            } else {
                config.name = name.to_string();
            }
        }
        if let Some(workers) = setting::<usize, _>(&lookup, ENV_WORKERS, false) {
            config.workers = workers;
        }
        if let Some(interval) = setting::<usize, _>(&lookup, ENV_CHECKPOINT_INTERVAL, false) {
            config.checkpoint_interval = interval;
        }
        if let Some(ms) = setting::<u64, _>(&lookup, ENV_RETRY_BASE_DELAY_MS, true) {
            config.retry_base_delay = Duration::from_millis(ms);
        }
        if let Some(max) = setting::<u32, _>(&lookup, ENV_MAX_RETRIES, true) {
            config.max_retries = max;
        }

        config
    }
}

fn setting<T, L>(lookup: &L, key: &str, allow_zero: bool) -> Option<T>
where
    T: FromStr + Default + PartialEq,
    L: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse::<T>() {
        Ok(value) if allow_zero || value != T::default() => Some(value),
        Ok(_) => {
            warn!(key, "zero is not allowed; using default");
            None
        }
        Err(_) => {
            warn!(key, value = %raw, "invalid value; using default");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults() {
        let config = PropagationConfig::default();
        assert_eq!(config.workers, 4);
        assert_eq!(config.checkpoint_interval, 10);
        assert_eq!(config.retry_base_delay, Duration::from_secs(1));
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.name, "flag-propagation");
    }

    #[test]
    fn empty_environment_gives_defaults() {
        assert_eq!(
            PropagationConfig::from_lookup(lookup(&[])),
            PropagationConfig::default()
        );
    }

    #[test]
    fn overrides_are_applied() {
        let config = PropagationConfig::from_lookup(lookup(&[
            (ENV_EXECUTOR_NAME, "flags"),
            (ENV_WORKERS, "8"),
            (ENV_CHECKPOINT_INTERVAL, " 25 "),
            (ENV_RETRY_BASE_DELAY_MS, "0"),
            (ENV_MAX_RETRIES, "0"),
        ]));

        assert_eq!(config.name, "flags");
        assert_eq!(config.workers, 8);
        assert_eq!(config.checkpoint_interval, 25);
        assert_eq!(config.retry_base_delay, Duration::ZERO);
        assert_eq!(config.max_retries, 0);
    }

    #[test]
    fn invalid_values_fall_back() {
        let config = PropagationConfig::from_lookup(lookup(&[
            (ENV_EXECUTOR_NAME, "  "),
            (ENV_WORKERS, "0"),
            (ENV_CHECKPOINT_INTERVAL, "ten"),
            (ENV_MAX_RETRIES, "-1"),
        ]));

        assert_eq!(config, PropagationConfig::default());
    }

    #[test]
    fn retry_policy_uses_base_delay() {
        let config = PropagationConfig::default().with_retry_base_delay(Duration::from_millis(5));
        assert_eq!(config.retry_policy().delay_for(2), Duration::from_millis(20));
    }
}

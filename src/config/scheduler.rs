//! Scheduler configuration structure.

use std::collections::HashMap;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::core::AppResult;

/// Prefix for environment variables read by [`SchedulerConfig::from_env`].
pub const ENV_PREFIX: &str = "ODDJOB_";

fn default_total_capacity() -> u32 {
    u32::try_from(num_cpus::get()).unwrap_or(u32::MAX).max(1)
}

const fn default_max_queue_depth() -> usize {
    10_000
}

const fn default_sweep_interval_ms() -> u64 {
    5_000
}

const fn default_poll_interval_ms() -> u64 {
    50
}

const fn default_thread_stack_size() -> usize {
    2 * 1024 * 1024
}

/// Scheduler configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerConfig {
    /// Capacity units (cores) shared by all running jobs.
    #[serde(default = "default_total_capacity")]
    pub total_capacity: u32,
    /// Worker threads; defaults to one per capacity unit.
    #[serde(default)]
    pub worker_count: Option<usize>,
    /// Maximum number of waiting jobs before submissions are rejected.
    #[serde(default = "default_max_queue_depth")]
    pub max_queue_depth: usize,
    /// Safety-net interval between background sweeps, in milliseconds.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,
    /// How often a worker checks its process between cancel checks, in milliseconds.
    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
    /// File holding the last issued job ID; IDs are volatile when unset.
    #[serde(default)]
    pub id_counter_path: Option<PathBuf>,
    /// Stack size for worker threads.
    #[serde(default = "default_thread_stack_size")]
    pub thread_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            total_capacity: default_total_capacity(),
            worker_count: None,
            max_queue_depth: default_max_queue_depth(),
            sweep_interval_ms: default_sweep_interval_ms(),
            poll_interval_ms: default_poll_interval_ms(),
            id_counter_path: None,
            thread_stack_size: default_thread_stack_size(),
        }
    }
}

impl SchedulerConfig {
    /// Defaults: one capacity unit per logical CPU.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set total capacity units.
    #[must_use]
    pub const fn with_total_capacity(mut self, units: u32) -> Self {
        self.total_capacity = units;
        self
    }

    /// Set the worker thread count.
    #[must_use]
    pub const fn with_worker_count(mut self, workers: usize) -> Self {
        self.worker_count = Some(workers);
        self
    }

    /// Set the waiting queue limit.
    #[must_use]
    pub const fn with_max_queue_depth(mut self, depth: usize) -> Self {
        self.max_queue_depth = depth;
        self
    }

    /// Set the background sweep interval.
    #[must_use]
    pub fn with_sweep_interval(mut self, interval: Duration) -> Self {
        self.sweep_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the process poll interval.
    #[must_use]
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval_ms = u64::try_from(interval.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Persist the job ID counter at `path`.
    #[must_use]
    pub fn with_id_counter_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.id_counter_path = Some(path.into());
        self
    }

    /// Worker threads that will actually be spawned.
    #[must_use]
    pub fn effective_worker_count(&self) -> usize {
        self.worker_count
            .unwrap_or_else(|| usize::try_from(self.total_capacity).unwrap_or(usize::MAX))
    }

    /// Background sweep interval.
    #[must_use]
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    /// Process poll interval.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.total_capacity == 0 {
            return Err("total_capacity must be greater than 0".into());
        }
        if let Some(workers) = self.worker_count {
            let needed = usize::try_from(self.total_capacity).unwrap_or(usize::MAX);
            if workers < needed {
                return Err(format!(
                    "worker_count ({workers}) must be at least total_capacity ({needed})"
                ));
            }
        }
        if self.max_queue_depth == 0 {
            return Err("max_queue_depth must be greater than 0".into());
        }
        if self.sweep_interval_ms == 0 {
            return Err("sweep_interval_ms must be greater than 0".into());
        }
        if self.poll_interval_ms == 0 {
            return Err("poll_interval_ms must be greater than 0".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from `ODDJOB_*` environment variables, loading a
    /// `.env` file first when present. Unset variables keep their defaults.
    ///
    /// # Errors
    ///
    /// Fails when a variable does not parse or the result is invalid.
    pub fn from_env() -> AppResult<Self> {
        if let Ok(path) = dotenvy::dotenv() {
            tracing::debug!(path = %path.display(), "loaded .env file");
        }
        Self::from_vars(std::env::vars())
    }

    /// Build configuration from `(name, value)` pairs using the `ODDJOB_*`
    /// names understood by [`SchedulerConfig::from_env`].
    ///
    /// # Errors
    ///
    /// Fails when a variable does not parse or the result is invalid.
    pub fn from_vars<I>(vars: I) -> AppResult<Self>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let vars: HashMap<String, String> = vars
            .into_iter()
            .filter_map(|(k, v)| k.strip_prefix(ENV_PREFIX).map(|k| (k.to_string(), v)))
            .collect();

        let mut cfg = Self::default();
        if let Some(v) = parse_var(&vars, "TOTAL_CAPACITY")? {
            cfg.total_capacity = v;
        }
        if let Some(v) = parse_var(&vars, "WORKER_COUNT")? {
            cfg.worker_count = Some(v);
        }
        if let Some(v) = parse_var(&vars, "MAX_QUEUE_DEPTH")? {
            cfg.max_queue_depth = v;
        }
        if let Some(v) = parse_var(&vars, "SWEEP_INTERVAL_MS")? {
            cfg.sweep_interval_ms = v;
        }
        if let Some(v) = parse_var(&vars, "POLL_INTERVAL_MS")? {
            cfg.poll_interval_ms = v;
        }
        if let Some(v) = parse_var(&vars, "THREAD_STACK_SIZE")? {
            cfg.thread_stack_size = v;
        }
        if let Some(path) = vars.get("ID_COUNTER_PATH").filter(|p| !p.trim().is_empty()) {
            cfg.id_counter_path = Some(PathBuf::from(path.trim()));
        }

        cfg.validate()
            .map_err(anyhow::Error::msg)
            .context("invalid scheduler configuration from environment")?;
        Ok(cfg)
    }
}

fn parse_var<T>(vars: &HashMap<String, String>, name: &str) -> AppResult<Option<T>>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    vars.get(name)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .with_context(|| format!("{ENV_PREFIX}{name}={raw:?} is not valid"))
        })
        .transpose()
}

use std::env;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::SchedulerError;

/// Load .env file (silently ignores if missing).
pub fn load_dotenv() {
    dotenvy::dotenv().ok();
}

fn env_opt(key: &str) -> Option<String> {
    env::var(key).ok().filter(|s| !s.is_empty())
}

// ── Top-level config ──────────────────────────────────────────

/// Scheduler configuration, typically parsed from `cadence.toml`.
///
/// Every section is optional in TOML; missing sections use defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CadenceConfig {
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,
    #[serde(default)]
    pub virtual_time: VirtualTimeConfig,
}

/// Dispatch discipline of a worker queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueKind {
    /// One action at a time, strictly in submission order.
    #[default]
    Serial,
    /// Actions start in submission order but may overlap.
    Concurrent,
}

impl std::str::FromStr for QueueKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "serial" => Ok(Self::Serial),
            "concurrent" => Ok(Self::Concurrent),
            other => Err(SchedulerError::Config(format!(
                "invalid queue kind '{other}', expected 'serial' or 'concurrent'"
            ))),
        }
    }
}

/// Worker pool section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    #[serde(default)]
    pub kind: QueueKind,
    /// Number of worker threads. 0 = available parallelism.
    #[serde(default)]
    pub threads: usize,
    /// Prefix for worker thread names.
    #[serde(default = "default_thread_name")]
    pub thread_name: String,
    /// Start with the queue suspended; nothing runs until `resume()`.
    #[serde(default)]
    pub start_suspended: bool,
}

fn default_thread_name() -> String {
    "cadence-worker".into()
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            kind: QueueKind::default(),
            threads: 0,
            thread_name: default_thread_name(),
            start_suspended: false,
        }
    }
}

impl WorkerPoolConfig {
    /// A dedicated single-threaded serial queue.
    pub fn serial() -> Self {
        Self {
            kind: QueueKind::Serial,
            threads: 1,
            ..Self::default()
        }
    }

    /// A concurrent pool with `threads` workers (0 = available parallelism).
    pub fn concurrent(threads: usize) -> Self {
        Self {
            kind: QueueKind::Concurrent,
            threads,
            ..Self::default()
        }
    }

    /// Resolve worker thread count. Serial queues always use one thread;
    /// otherwise 0 means use available parallelism.
    pub fn resolved_threads(&self) -> usize {
        if self.kind == QueueKind::Serial {
            1
        } else if self.threads == 0 {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(4)
        } else {
            self.threads
        }
    }
}

/// Virtual time section.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VirtualTimeConfig {
    /// Initial virtual clock value.
    #[serde(default = "default_start")]
    pub start: DateTime<Utc>,
    /// Upper bound on actions executed by a single `run()`.
    #[serde(default = "default_run_step_limit")]
    pub run_step_limit: usize,
}

fn default_start() -> DateTime<Utc> {
    DateTime::<Utc>::UNIX_EPOCH
}

fn default_run_step_limit() -> usize {
    1_000_000
}

impl Default for VirtualTimeConfig {
    fn default() -> Self {
        Self {
            start: default_start(),
            run_step_limit: default_run_step_limit(),
        }
    }
}

impl CadenceConfig {
    /// Parse config from a TOML string.
    pub fn from_toml(toml_str: &str) -> Result<Self, SchedulerError> {
        let mut config: Self = toml::from_str(toml_str)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load config from a file path.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, SchedulerError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_toml(&content)
    }

    /// Defaults plus environment overrides.
    pub fn from_env() -> Result<Self, SchedulerError> {
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment variable overrides.
    ///
    /// Convention: `CADENCE_SECTION_KEY` overrides `section.key`.
    /// - `CADENCE_POOL_KIND` -> `worker_pool.kind`
    /// - `CADENCE_POOL_THREADS` -> `worker_pool.threads`
    /// - `CADENCE_POOL_THREAD_NAME` -> `worker_pool.thread_name`
    /// - `CADENCE_VIRTUAL_START` -> `virtual_time.start` (RFC 3339)
    /// - `CADENCE_VIRTUAL_RUN_STEP_LIMIT` -> `virtual_time.run_step_limit`
    pub fn apply_env_overrides(&mut self) -> Result<(), SchedulerError> {
        if let Some(v) = env_opt("CADENCE_POOL_KIND") {
            self.worker_pool.kind = v.parse()?;
        }
        if let Some(v) = env_opt("CADENCE_POOL_THREADS") {
            self.worker_pool.threads = v.parse().map_err(|_| {
                SchedulerError::Config(format!("CADENCE_POOL_THREADS: not a number: '{v}'"))
            })?;
        }
        if let Some(v) = env_opt("CADENCE_POOL_THREAD_NAME") {
            self.worker_pool.thread_name = v;
        }
        if let Some(v) = env_opt("CADENCE_VIRTUAL_START") {
            self.virtual_time.start = DateTime::parse_from_rfc3339(&v)
                .map_err(|e| SchedulerError::Config(format!("CADENCE_VIRTUAL_START: {e}")))?
                .with_timezone(&Utc);
        }
        if let Some(v) = env_opt("CADENCE_VIRTUAL_RUN_STEP_LIMIT") {
            self.virtual_time.run_step_limit = v.parse().map_err(|_| {
                SchedulerError::Config(format!(
                    "CADENCE_VIRTUAL_RUN_STEP_LIMIT: not a number: '{v}'"
                ))
            })?;
        }
        Ok(())
    }

    /// Validate ranges that serde cannot express.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.worker_pool.kind == QueueKind::Serial && self.worker_pool.threads > 1 {
            return Err(SchedulerError::Config(format!(
                "serial worker pool cannot use {} threads",
                self.worker_pool.threads
            )));
        }
        if self.worker_pool.thread_name.trim().is_empty() {
            return Err(SchedulerError::Config(
                "worker_pool.thread_name must not be empty".into(),
            ));
        }
        if self.virtual_time.run_step_limit == 0 {
            return Err(SchedulerError::Config(
                "virtual_time.run_step_limit must be greater than zero".into(),
            ));
        }
        Ok(())
    }

    /// Print a summary for startup logs.
    pub fn log_summary(&self) {
        tracing::info!("Config loaded:");
        tracing::info!(
            "  worker_pool:  kind={:?}, threads={}, thread_name={}, start_suspended={}",
            self.worker_pool.kind,
            self.worker_pool.resolved_threads(),
            self.worker_pool.thread_name,
            self.worker_pool.start_suspended
        );
        tracing::info!(
            "  virtual_time: start={}, run_step_limit={}",
            self.virtual_time.start,
            self.virtual_time.run_step_limit
        );
    }
}

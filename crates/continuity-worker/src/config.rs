//! Worker configuration.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use continuity_models::TRANSITION_BASE_COST;

/// Worker configuration.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Maximum concurrently executing jobs
    pub max_concurrent_jobs: usize,
    /// Delay between status queries of one generation operation
    pub poll_interval: Duration,
    /// Maximum wall-clock time from `running` to a terminal state
    pub liveness_timeout: Duration,
    /// Periodic scan for queued jobs, in addition to submit wake-ups
    pub dispatch_interval: Duration,
    /// Graceful shutdown timeout
    pub shutdown_timeout: Duration,
    /// Work directory for stitched outputs
    pub work_dir: PathBuf,
    /// Consecutive transient poll errors tolerated before the job fails
    pub max_poll_failures: u32,
    /// Retries for transient generation submit and stitching errors
    pub external_max_retries: u32,
    /// First backoff delay for those retries
    pub retry_base_delay: Duration,
    /// Interval of the stale job sweep
    pub stale_check_interval: Duration,
    /// Credits charged per transition before add-ons
    pub base_cost: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jobs: 2,
            poll_interval: Duration::from_secs(10),
            liveness_timeout: Duration::from_secs(1800), // 30 minutes
            dispatch_interval: Duration::from_millis(1000),
            shutdown_timeout: Duration::from_secs(30),
            work_dir: PathBuf::from("/tmp/continuity"),
            max_poll_failures: 5,
            external_max_retries: 3,
            retry_base_delay: Duration::from_millis(500),
            stale_check_interval: Duration::from_secs(30),
            base_cost: TRANSITION_BASE_COST,
        }
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default)
}

impl WorkerConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_concurrent_jobs: env_or("WORKER_MAX_CONCURRENT_JOBS", defaults.max_concurrent_jobs).max(1),
            poll_interval: Duration::from_secs(env_or("WORKER_POLL_INTERVAL_SECS", 10)),
            liveness_timeout: Duration::from_secs(env_or("WORKER_LIVENESS_TIMEOUT_SECS", 1800)),
            dispatch_interval: Duration::from_millis(env_or("WORKER_DISPATCH_INTERVAL_MS", 1000u64).max(1)),
            shutdown_timeout: Duration::from_secs(env_or("WORKER_SHUTDOWN_TIMEOUT_SECS", 30)),
            work_dir: std::env::var("WORKER_WORK_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.work_dir),
            max_poll_failures: env_or("WORKER_MAX_POLL_FAILURES", defaults.max_poll_failures),
            external_max_retries: env_or("WORKER_EXTERNAL_MAX_RETRIES", defaults.external_max_retries),
            retry_base_delay: Duration::from_millis(env_or("WORKER_RETRY_BASE_MS", 500)),
            stale_check_interval: Duration::from_secs(env_or("STALE_CHECK_INTERVAL_SECS", 30u64).max(1)),
            base_cost: env_or("TRANSITION_BASE_COST", defaults.base_cost),
        }
    }

    /// Where the stitched output of a job is written.
    pub fn output_path(&self, job_id: &continuity_models::JobId) -> PathBuf {
        self.work_dir.join(job_id.as_str()).join("transition.mp4")
    }
}

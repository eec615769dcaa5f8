//! Background service that repeats the recovery sweep.
//!
//! Running jobs whose liveness deadline passed are timed out and refunded,
//! debited jobs that never reached the queue are re-queued, and failed jobs
//! whose refund was interrupted are refunded.

use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

use continuity_worker::{JobManager, RecoveryReport, WorkerResult};

/// Stale job detector service.
pub struct StaleJobDetector {
    manager: JobManager,
    interval: Duration,
    enabled: bool,
}

impl StaleJobDetector {
    /// Create a new stale job detector.
    pub fn new(manager: JobManager) -> Self {
        let enabled = std::env::var("ENABLE_STALE_DETECTION")
            .map(|v| v == "true" || v == "1")
            .unwrap_or(true); // Enabled by default
        let interval = manager
            .config()
            .stale_check_interval
            .max(std::time::Duration::from_secs(1));

        Self {
            manager,
            interval,
            enabled,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Run the detection loop forever. Spawn it as a background task.
    pub async fn run(&self) {
        if !self.enabled {
            info!("Stale job detection is disabled");
            return;
        }

        info!("Starting stale job detector (interval: {:?})", self.interval);

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The dispatcher already swept at startup
        ticker.tick().await;

        loop {
            ticker.tick().await;

            if let Err(e) = self.check_once().await {
                error!("Stale job detection error: {}", e);
            }
        }
    }

    /// Run a single detection and recovery cycle.
    pub async fn check_once(&self) -> WorkerResult<RecoveryReport> {
        continuity_worker::sweep(&self.manager).await
    }
}

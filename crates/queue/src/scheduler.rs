//! Periodic poll status updates.
//!
//! One task drives the poll status job on a fixed cadence. Each tick is
//! awaited before the next one is taken, and ticks missed while a run
//! overruns are skipped, so runs never overlap or pile up.

use std::sync::Arc;
use std::time::Duration;

use livepoll_common::config::SchedulerSettings;
use livepoll_core::{PollStatusUpdater, TickReport};
use tokio::task::JoinHandle;
use tokio::time::{MissedTickBehavior, interval};

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Interval between poll status updates (default: 30 seconds).
    pub poll_status_interval: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            poll_status_interval: Duration::from_secs(30),
        }
    }
}

impl From<&SchedulerSettings> for SchedulerConfig {
    fn from(settings: &SchedulerSettings) -> Self {
        Self {
            poll_status_interval: settings.interval(),
        }
    }
}

/// Job executor trait for scheduled jobs.
#[async_trait::async_trait]
pub trait JobExecutor: Send + Sync {
    /// Apply time-based transitions to every poll.
    async fn update_poll_statuses(
        &self,
    ) -> Result<TickReport, Box<dyn std::error::Error + Send + Sync>>;
}

#[async_trait::async_trait]
impl JobExecutor for PollStatusUpdater {
    async fn update_poll_statuses(
        &self,
    ) -> Result<TickReport, Box<dyn std::error::Error + Send + Sync>> {
        Ok(self.run_tick().await?)
    }
}

/// Spawn the scheduler task.
///
/// A failed run is logged and the next tick proceeds as usual. Abort the
/// returned handle to stop the scheduler.
pub fn run_scheduler<E: JobExecutor + 'static>(
    config: SchedulerConfig,
    executor: Arc<E>,
) -> JoinHandle<()> {
    let period = config.poll_status_interval;

    tokio::spawn(async move {
        tracing::info!(interval_secs = period.as_secs(), "Poll scheduler started");

        let mut interval = interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            interval.tick().await;
            match executor.update_poll_statuses().await {
                Ok(report) => {
                    if report.started > 0 || report.closed > 0 {
                        tracing::debug!(
                            started = report.started,
                            closed = report.closed,
                            "Updated poll statuses"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(error = %e, "Failed to update poll statuses");
                }
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[derive(Default)]
    struct SlowExecutor {
        runs: AtomicU32,
        in_flight: AtomicU32,
        max_in_flight: AtomicU32,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl JobExecutor for SlowExecutor {
        async fn update_poll_statuses(
            &self,
        ) -> Result<TickReport, Box<dyn std::error::Error + Send + Sync>> {
            let current = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(current, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(25)).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
            self.runs.fetch_add(1, Ordering::SeqCst);

            if self.fail {
                return Err("store unavailable".into());
            }
            Ok(TickReport::default())
        }
    }

    fn every(millis: u64) -> SchedulerConfig {
        SchedulerConfig {
            poll_status_interval: Duration::from_millis(millis),
        }
    }

    #[test]
    fn test_scheduler_config_default() {
        let config = SchedulerConfig::default();
        assert_eq!(config.poll_status_interval, Duration::from_secs(30));
    }

    #[test]
    fn test_scheduler_config_from_settings() {
        let settings = SchedulerSettings { interval_secs: 5 };
        let config = SchedulerConfig::from(&settings);
        assert_eq!(config.poll_status_interval, Duration::from_secs(5));
    }

    #[tokio::test(start_paused = true)]
    async fn test_overrunning_ticks_do_not_overlap() {
        let executor = Arc::new(SlowExecutor::default());
        let handle = run_scheduler(every(10), executor.clone());

        tokio::time::sleep(Duration::from_millis(200)).await;
        handle.abort();

        let runs = executor.runs.load(Ordering::SeqCst);
        assert!(runs >= 2);
        assert!(runs <= 10);
        assert_eq!(executor.max_in_flight.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failures_do_not_stop_scheduler() {
        let executor = Arc::new(SlowExecutor {
            fail: true,
            ..SlowExecutor::default()
        });
        let handle = run_scheduler(every(50), executor.clone());

        tokio::time::sleep(Duration::from_millis(300)).await;
        handle.abort();

        assert!(executor.runs.load(Ordering::SeqCst) >= 3);
    }
}

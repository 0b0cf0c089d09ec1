use chrono::{
    DateTime, Duration as ChronoDuration, FixedOffset, NaiveDate, NaiveTime, TimeZone, Utc,
};
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::config::SchedulerConfig;
use crate::error::{RecError, Result};
use crate::services::batch::{BatchOrchestrator, BatchOutcome};

/// Runs batch jobs on their own multi-thread runtime so a long run never
/// competes with request handlers for worker threads.
pub struct BatchExecutor {
    runtime: Option<Runtime>,
    orchestrator: Arc<BatchOrchestrator>,
    offset: FixedOffset,
}

impl BatchExecutor {
    pub fn new(
        orchestrator: Arc<BatchOrchestrator>,
        worker_threads: usize,
        offset: FixedOffset,
    ) -> Result<Self> {
        let runtime = Builder::new_multi_thread()
            .worker_threads(worker_threads.max(1))
            .thread_name("recommend-batch")
            .enable_all()
            .build()?;
        info!(worker_threads, "Batch executor started");

        Ok(Self {
            runtime: Some(runtime),
            orchestrator,
            offset,
        })
    }

    /// Today's date in the schedule zone.
    pub fn today(&self) -> NaiveDate {
        Utc::now().with_timezone(&self.offset).date_naive()
    }

    /// Starts a run for today and returns immediately.
    pub fn trigger(&self) -> Result<JoinHandle<BatchOutcome>> {
        self.trigger_at(self.today())
    }

    pub fn trigger_at(&self, as_of: NaiveDate) -> Result<JoinHandle<BatchOutcome>> {
        let runtime = self
            .runtime
            .as_ref()
            .ok_or_else(|| RecError::Internal("batch executor is shut down".to_string()))?;
        let orchestrator = self.orchestrator.clone();
        Ok(runtime.spawn(async move { orchestrator.run_once(as_of).await }))
    }
}

impl Drop for BatchExecutor {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            runtime.shutdown_background();
        }
    }
}

/// Fires once a day at a fixed local wall-clock time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailySchedule {
    at: NaiveTime,
    offset: FixedOffset,
}

impl DailySchedule {
    pub fn new(hour: u32, minute: u32, offset: FixedOffset) -> Result<Self> {
        let at = NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| {
            RecError::Validation(format!("invalid schedule time {:02}:{:02}", hour, minute))
        })?;
        Ok(Self { at, offset })
    }

    pub fn from_config(config: &SchedulerConfig) -> Result<Self> {
        Self::new(config.hour, config.minute, config.offset()?)
    }

    /// First firing strictly after `now`.
    pub fn next_after(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        let local_date = now.with_timezone(&self.offset).date_naive();
        let shift = ChronoDuration::seconds(i64::from(self.offset.local_minus_utc()));

        let today = Utc.from_utc_datetime(&(local_date.and_time(self.at) - shift));
        if today > now {
            today
        } else {
            today + ChronoDuration::days(1)
        }
    }
}

/// Triggers a batch at every scheduled time until `shutdown` fires.
pub async fn run_scheduler(
    schedule: DailySchedule,
    executor: Arc<BatchExecutor>,
    mut shutdown: broadcast::Receiver<()>,
) {
    loop {
        let now = Utc::now();
        let next = schedule.next_after(now);
        let wait = (next - now).to_std().unwrap_or_default();
        info!(next_run = %next, "Next batch run scheduled");

        tokio::select! {
            _ = tokio::time::sleep(wait) => {
                match executor.trigger() {
                    Ok(handle) => {
                        tokio::spawn(async move {
                            match handle.await {
                                Ok(outcome) => {
                                    info!(outcome = ?outcome, "Scheduled batch finished")
                                }
                                Err(e) => {
                                    warn!(error = %e, "Scheduled batch task was cancelled")
                                }
                            }
                        });
                    }
                    Err(e) => error!(error = %e, "Failed to start scheduled batch"),
                }
            }
            _ = shutdown.recv() => {
                info!("Received shutdown signal, stopping batch scheduler");
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::batch::{BatchSettings, SkipReason};
    use crate::services::cache::MemoryCacheClient;
    use crate::services::store::MemoryCatalogStore;
    use std::time::Duration;

    fn seoul() -> FixedOffset {
        FixedOffset::east_opt(9 * 3600).unwrap()
    }

    fn utc(y: i32, m: u32, d: u32, h: u32, min: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, h, min, 0).unwrap()
    }

    #[test]
    fn next_run_is_later_the_same_local_day() {
        let schedule = DailySchedule::new(3, 0, seoul()).unwrap();
        // 2024-06-01 01:00 local
        let now = utc(2024, 5, 31, 16, 0);
        assert_eq!(schedule.next_after(now), utc(2024, 5, 31, 18, 0));
    }

    #[test]
    fn next_run_rolls_to_tomorrow_once_passed() {
        let schedule = DailySchedule::new(3, 0, seoul()).unwrap();
        let exactly = utc(2024, 5, 31, 18, 0);
        assert_eq!(schedule.next_after(exactly), utc(2024, 6, 1, 18, 0));
        assert_eq!(schedule.next_after(utc(2024, 6, 1, 2, 0)), utc(2024, 6, 1, 18, 0));
    }

    #[test]
    fn rejects_impossible_times() {
        assert!(DailySchedule::new(24, 0, seoul()).is_err());
        assert!(DailySchedule::new(3, 60, seoul()).is_err());
    }

    #[tokio::test]
    async fn trigger_runs_off_the_caller_runtime() {
        let orchestrator = Arc::new(BatchOrchestrator::new(
            Arc::new(MemoryCatalogStore::new()),
            Arc::new(MemoryCacheClient::new()),
            BatchSettings {
                candidate_pool_size: 10,
                lock_ttl: Duration::from_secs(60),
                group_ttl: Duration::from_secs(60),
                track_membership: false,
            },
        ));
        let executor = BatchExecutor::new(orchestrator, 1, seoul()).unwrap();

        let outcome = executor.trigger().unwrap().await.unwrap();
        assert!(matches!(
            outcome,
            BatchOutcome::Skipped {
                reason: SkipReason::EmptyCandidatePool
            }
        ));
    }
}

pub mod membership;

pub use membership::MembershipIndex;

use chrono::NaiveDate;
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::algorithms::{resolve_group_key, score_pool, UserSignal};
use crate::config::Config;
use crate::error::Result;
use crate::services::cache::{keys, CacheClient};
use crate::services::loader::{BatchSnapshot, BulkLoader};
use crate::services::store::CatalogStore;
use crate::utils::metrics::{BatchMetrics, BatchTimings};
use crate::utils::millis;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchPhase {
    LockAcquired,
    Loading,
    Writing,
    Succeeded,
    Failed,
    LockReleased,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    LockHeld,
    EmptyCandidatePool,
}

#[derive(Debug, Clone, Serialize)]
pub struct BatchReport {
    pub run_id: Uuid,
    pub as_of: NaiveDate,
    pub elapsed_ms: f64,
    pub metrics: BatchMetrics,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum BatchOutcome {
    Skipped { reason: SkipReason },
    Completed(BatchReport),
    Failed { run_id: Uuid, error: String },
}

impl BatchOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, BatchOutcome::Completed(_))
    }
}

#[derive(Debug, Clone)]
pub struct BatchSettings {
    pub candidate_pool_size: usize,
    pub lock_ttl: Duration,
    pub group_ttl: Duration,
    pub track_membership: bool,
}

impl From<&Config> for BatchSettings {
    fn from(config: &Config) -> Self {
        Self {
            candidate_pool_size: config.batch.candidate_pool_size,
            lock_ttl: config.batch.lock_ttl(),
            group_ttl: config.batch.group_ttl(),
            track_membership: config.batch.track_membership,
        }
    }
}

/// Precomputes every user segment's ranking under a cluster-wide lock.
pub struct BatchOrchestrator {
    cache: Arc<dyn CacheClient>,
    loader: BulkLoader,
    membership: MembershipIndex,
    settings: BatchSettings,
}

impl BatchOrchestrator {
    pub fn new(
        store: Arc<dyn CatalogStore>,
        cache: Arc<dyn CacheClient>,
        settings: BatchSettings,
    ) -> Self {
        Self {
            loader: BulkLoader::new(store, settings.candidate_pool_size),
            membership: MembershipIndex::new(cache.clone(), settings.group_ttl),
            cache,
            settings,
        }
    }

    pub fn membership(&self) -> &MembershipIndex {
        &self.membership
    }

    /// Runs one batch with `as_of` as the reference date for ages and recency.
    ///
    /// Never returns an error: lock contention and an empty pool are skips,
    /// and failures (including panics) are reported in the outcome after the
    /// lock has been released.
    pub async fn run_once(&self, as_of: NaiveDate) -> BatchOutcome {
        let run_id = Uuid::new_v4();
        let started = Instant::now();

        match self
            .cache
            .set_nx_ex(keys::BATCH_LOCK, keys::BATCH_LOCK_VALUE, self.settings.lock_ttl)
            .await
        {
            Ok(true) => {}
            Ok(false) => {
                info!(%run_id, "Batch lock held elsewhere, skipping run");
                return BatchOutcome::Skipped {
                    reason: SkipReason::LockHeld,
                };
            }
            Err(e) => {
                error!(%run_id, error = %e, "Failed to acquire batch lock");
                return BatchOutcome::Failed {
                    run_id,
                    error: e.to_string(),
                };
            }
        }
        debug!(%run_id, phase = ?BatchPhase::LockAcquired);

        let result = AssertUnwindSafe(self.execute(run_id, as_of)).catch_unwind().await;
        self.release_lock(run_id).await;

        let elapsed_ms = millis(started.elapsed());
        info!(%run_id, elapsed_ms, "recommend/batch finished");

        match result {
            Ok(Ok(Some(metrics))) => {
                debug!(%run_id, phase = ?BatchPhase::Succeeded);
                BatchOutcome::Completed(BatchReport {
                    run_id,
                    as_of,
                    elapsed_ms,
                    metrics,
                })
            }
            Ok(Ok(None)) => BatchOutcome::Skipped {
                reason: SkipReason::EmptyCandidatePool,
            },
            Ok(Err(e)) => {
                error!(%run_id, phase = ?BatchPhase::Failed, error = %e, "Batch run failed");
                BatchOutcome::Failed {
                    run_id,
                    error: e.to_string(),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    %run_id,
                    phase = ?BatchPhase::Failed,
                    panic = %message,
                    "Batch run panicked"
                );
                BatchOutcome::Failed {
                    run_id,
                    error: message,
                }
            }
        }
    }

    async fn execute(&self, run_id: Uuid, as_of: NaiveDate) -> Result<Option<BatchMetrics>> {
        debug!(%run_id, phase = ?BatchPhase::Loading);
        let Some(snapshot) = self.loader.load(as_of).await? else {
            info!(%run_id, "Candidate pool is empty, nothing to rank");
            return Ok(None);
        };

        debug!(%run_id, phase = ?BatchPhase::Writing, users = snapshot.users.len());
        let timings = self.write_segments(&snapshot).await?;
        let metrics = timings.calculate_metrics();

        info!(
            %run_id,
            users = metrics.users,
            segments = metrics.segments,
            items = metrics.items_written,
            avg_compute_ms = metrics.avg_compute_ms,
            avg_io_ms = metrics.avg_io_ms,
            io_compute_ratio = ?metrics.io_compute_ratio,
            "[batch timing] avgCPU={:.4}ms avgIO={:.4}ms W/C={}",
            metrics.avg_compute_ms,
            metrics.avg_io_ms,
            metrics
                .io_compute_ratio
                .map(|r| format!("{:.2}", r))
                .unwrap_or_else(|| "n/a".to_string()),
        );
        Ok(Some(metrics))
    }

    /// Scores the pool for every user and overwrites that user's segment.
    /// Users sharing a segment write in turn; the last one processed wins.
    async fn write_segments(&self, snapshot: &BatchSnapshot) -> Result<BatchTimings> {
        let mut timings = BatchTimings::new();
        let item_ids: Vec<i64> = snapshot.candidates.iter().map(|item| item.id).collect();

        for user in &snapshot.users {
            let pets = snapshot.pets_of(user.id);

            let segment = resolve_group_key(user, pets, &snapshot.region_names, snapshot.as_of);

            let compute_started = Instant::now();
            let signal = UserSignal::new(user, pets, &snapshot.region_names, snapshot.as_of);
            let scores = score_pool(
                &signal,
                &snapshot.candidates,
                &snapshot.comment_counts,
                &snapshot.author_signals,
                snapshot.as_of,
            );
            timings.record_compute(compute_started.elapsed());

            let io_started = Instant::now();
            let written = self
                .cache
                .zadd_many_with_expire(&segment.cache_key(), &scores, self.settings.group_ttl)
                .await?;
            if self.settings.track_membership {
                self.membership.remember(segment.as_str(), &item_ids).await?;
            }
            timings.record_write(segment.as_str(), io_started.elapsed(), written);
        }

        Ok(timings)
    }

    async fn release_lock(&self, run_id: Uuid) {
        match self.cache.del(&[keys::BATCH_LOCK.to_string()]).await {
            Ok(()) => debug!(%run_id, phase = ?BatchPhase::LockReleased),
            Err(e) => warn!(
                %run_id,
                error = %e,
                "Failed to release batch lock, it will expire on its own"
            ),
        }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "batch task panicked".to_string()
    }
}

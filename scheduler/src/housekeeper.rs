// Housekeeper: crash recovery and retention for the task store

use crate::config::QueueConfig;
use crate::db::TaskRepository;
use crate::errors::StoreError;
use crate::models::TaskStatus;
use chrono::{DateTime, Duration, Utc};
use std::sync::Arc;
use tracing::{debug, info, instrument};

/// Outcome of one housekeeping pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HousekeepingReport {
    /// Stale `running` tasks reset to `pending`
    pub reclaimed: u64,
    /// Rows deleted by the retention purge
    pub purged: u64,
}

/// Cleans up after crashed invocations and enforces retention
///
/// Runs once per invocation, before any task executes. Tasks stuck in
/// `running` past the staleness threshold are handed back to the queue;
/// rows older than the retention window are deleted whatever their status.
pub struct Housekeeper {
    tasks: Arc<TaskRepository>,
    stale_after: Duration,
    retention: Duration,
}

impl Housekeeper {
    pub fn new(tasks: Arc<TaskRepository>, config: &QueueConfig) -> Self {
        Self {
            tasks,
            stale_after: Duration::seconds(config.stale_after_seconds as i64),
            retention: Duration::days(i64::from(config.retention_days)),
        }
    }

    /// Run one housekeeping pass at the given time
    #[instrument(skip(self))]
    pub async fn run(&self, now: DateTime<Utc>) -> Result<HousekeepingReport, StoreError> {
        let stale_ids = self.tasks.find_stale_running(now - self.stale_after).await?;

        let reclaimed = if stale_ids.is_empty() {
            0
        } else {
            info!(count = stale_ids.len(), "Resetting stale running tasks");
            self.tasks
                .mark_status(&stale_ids, TaskStatus::Pending, now)
                .await?
        };

        let purged = self.tasks.purge_older_than(now - self.retention).await?;
        if purged > 0 {
            debug!(purged, "Purged tasks past the retention window");
        }

        Ok(HousekeepingReport { reclaimed, purged })
    }
}

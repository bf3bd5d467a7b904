// Task repository implementation: the durable store behind the queue

use crate::db::DbPool;
use crate::errors::StoreError;
use crate::models::{NewTask, Task, TaskKind, TaskStatus};
use chrono::{DateTime, Utc};
use tracing::instrument;

/// Column list shared by every query that decodes a full `Task` row
const TASK_COLUMNS: &str = r#"id, type, "group", hook, data, status, timestamp"#;

const DEFAULT_INSERT_BATCH_SIZE: usize = 50;

/// Repository for task-related database operations
///
/// Every operation is a durable SQLite read or write; nothing is cached in
/// memory, so a crashed invocation loses no queue state.
pub struct TaskRepository {
    pool: DbPool,
    insert_batch_size: usize,
}

impl TaskRepository {
    /// Create a new TaskRepository
    pub fn new(pool: DbPool) -> Self {
        Self {
            pool,
            insert_batch_size: DEFAULT_INSERT_BATCH_SIZE,
        }
    }

    /// Override the number of rows per multi-row INSERT in `schedule_bulk`
    pub fn with_insert_batch_size(mut self, insert_batch_size: usize) -> Self {
        self.insert_batch_size = insert_batch_size.max(1);
        self
    }

    /// Create the task table and its indexes if they do not exist
    ///
    /// Safe to call on every boot.
    #[instrument(skip(self))]
    pub async fn setup(&self) -> Result<(), StoreError> {
        let statements = [
            r#"
            CREATE TABLE IF NOT EXISTS scheduler_tasks (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                type TEXT NOT NULL DEFAULT 'action',
                "group" TEXT NOT NULL,
                hook TEXT NOT NULL,
                data TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'pending',
                timestamp INTEGER NOT NULL
            )
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_scheduler_tasks_status_timestamp
            ON scheduler_tasks (status, timestamp)
            "#,
            r#"
            CREATE INDEX IF NOT EXISTS idx_scheduler_tasks_group_status
            ON scheduler_tasks ("group", status, timestamp)
            "#,
        ];

        for statement in statements {
            sqlx::query(statement)
                .execute(self.pool.pool())
                .await
                .map_err(|e| StoreError::SetupFailed(e.to_string()))?;
        }

        tracing::debug!("Task table ready");
        Ok(())
    }

    /// Enqueue a single task
    ///
    /// The task is created `pending` with kind `action`; `run_at` defaults to
    /// now. Returns the id assigned by the store.
    #[instrument(skip(self, data), fields(group = %group, hook = %hook))]
    pub async fn schedule(
        &self,
        group: &str,
        hook: &str,
        data: serde_json::Value,
        run_at: Option<DateTime<Utc>>,
    ) -> Result<i64, StoreError> {
        let timestamp = run_at.unwrap_or_else(Utc::now).timestamp();
        let payload = serde_json::to_string(&data)?;

        let result = sqlx::query(
            r#"
            INSERT INTO scheduler_tasks (type, "group", hook, data, status, timestamp)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(TaskKind::Action.to_string())
        .bind(group)
        .bind(hook)
        .bind(payload)
        .bind(TaskStatus::Pending.to_string())
        .bind(timestamp)
        .execute(self.pool.pool())
        .await?;

        let id = result.last_insert_rowid();
        tracing::debug!(task_id = id, "Task scheduled");
        Ok(id)
    }

    /// Enqueue many tasks, preserving their order
    ///
    /// A single-element list degrades to `schedule`; longer lists are written
    /// in multi-row INSERT chunks. Returns the number of rows inserted.
    #[instrument(skip(self, tasks), fields(task_count = tasks.len()))]
    pub async fn schedule_bulk(&self, mut tasks: Vec<NewTask>) -> Result<u64, StoreError> {
        if tasks.is_empty() {
            return Ok(0);
        }
        if tasks.len() == 1 {
            let task = tasks.swap_remove(0);
            self.schedule(&task.group, &task.hook, task.data, task.timestamp)
                .await?;
            return Ok(1);
        }

        let now = Utc::now();
        let mut inserted = 0u64;

        for chunk in tasks.chunks(self.insert_batch_size) {
            let placeholders = vec!["(?, ?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                r#"
                INSERT INTO scheduler_tasks (type, "group", hook, data, status, timestamp)
                VALUES {}
                "#,
                placeholders
            );

            let mut query = sqlx::query(&sql);
            for task in chunk {
                let kind = task.kind.clone().unwrap_or_default();
                let timestamp = task.timestamp.unwrap_or(now).timestamp();
                let payload = serde_json::to_string(&task.data)?;

                query = query
                    .bind(kind.to_string())
                    .bind(&task.group)
                    .bind(&task.hook)
                    .bind(payload)
                    .bind(TaskStatus::Pending.to_string())
                    .bind(timestamp);
            }

            let result = query.execute(self.pool.pool()).await?;
            inserted += result.rows_affected();
        }

        tracing::debug!(inserted, "Tasks scheduled in bulk");
        Ok(inserted)
    }

    /// Find the group that must run next
    ///
    /// Returns the group of the lowest-id task that is `pending` or `running`
    /// and due at `now`, or `None` when the queue has no due work.
    #[instrument(skip(self))]
    pub async fn next_eligible_group(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<String>, StoreError> {
        let group = sqlx::query_scalar::<_, String>(
            r#"
            SELECT "group" FROM scheduler_tasks
            WHERE status IN ('pending', 'running') AND timestamp <= ?
            ORDER BY id
            LIMIT 1
            "#,
        )
        .bind(now.timestamp())
        .fetch_optional(self.pool.pool())
        .await?;

        Ok(group)
    }

    /// Atomically claim the next batch of due pending tasks in a group
    ///
    /// Flips up to `limit` tasks to `running` (timestamp = now) and returns
    /// them ordered by id. The flip and the read are one statement, so a task
    /// can be claimed by at most one caller even when invocations overlap.
    #[instrument(skip(self), fields(group = %group))]
    pub async fn claim_batch(
        &self,
        group: &str,
        now: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            r#"
            UPDATE scheduler_tasks
            SET status = 'running', timestamp = ?
            WHERE id IN (
                SELECT id FROM scheduler_tasks
                WHERE status = 'pending' AND "group" = ? AND timestamp <= ?
                ORDER BY id
                LIMIT ?
            )
            RETURNING {}
            "#,
            TASK_COLUMNS
        );

        let mut tasks = sqlx::query_as::<_, Task>(&sql)
            .bind(now.timestamp())
            .bind(group)
            .bind(now.timestamp())
            .bind(i64::from(limit))
            .fetch_all(self.pool.pool())
            .await?;

        // RETURNING order is unspecified; restore insertion order
        tasks.sort_by_key(|task| task.id);

        tracing::debug!(claimed = tasks.len(), "Claimed task batch");
        Ok(tasks)
    }

    /// Bulk status update, stamping the change time
    ///
    /// Returns the number of tasks updated. Unknown ids are skipped silently.
    #[instrument(skip(self, ids), fields(id_count = ids.len(), status = %status))]
    pub async fn mark_status(
        &self,
        ids: &[i64],
        status: TaskStatus,
        at: DateTime<Utc>,
    ) -> Result<u64, StoreError> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE scheduler_tasks SET status = ?, timestamp = ? WHERE id IN ({})",
            placeholders
        );

        let mut query = sqlx::query(&sql).bind(status.to_string()).bind(at.timestamp());
        for id in ids {
            query = query.bind(id);
        }

        let result = query.execute(self.pool.pool()).await?;
        Ok(result.rows_affected())
    }

    /// Record a task as successfully completed
    ///
    /// The timestamp is left untouched: it still records when the task was
    /// claimed, which is what the retention purge keys on.
    #[instrument(skip(self))]
    pub async fn mark_complete(&self, id: i64) -> Result<(), StoreError> {
        let result = sqlx::query("UPDATE scheduler_tasks SET status = 'complete' WHERE id = ?")
            .bind(id)
            .execute(self.pool.pool())
            .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Task not found: {}", id)));
        }
        Ok(())
    }

    /// Record a task as terminally failed
    ///
    /// Failed tasks are never retried automatically; `timestamp` becomes the
    /// failure time.
    #[instrument(skip(self))]
    pub async fn mark_failed(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let result =
            sqlx::query("UPDATE scheduler_tasks SET status = 'failed', timestamp = ? WHERE id = ?")
                .bind(now.timestamp())
                .bind(id)
                .execute(self.pool.pool())
                .await?;

        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(format!("Task not found: {}", id)));
        }
        Ok(())
    }

    /// Find `running` tasks whose last status change is older than `cutoff`
    ///
    /// These are assumed to belong to a crashed invocation. The comparison is
    /// strict: a task claimed exactly at the cutoff is not yet stale.
    #[instrument(skip(self))]
    pub async fn find_stale_running(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<i64>, StoreError> {
        let ids = sqlx::query_scalar::<_, i64>(
            "SELECT id FROM scheduler_tasks WHERE status = 'running' AND timestamp < ? ORDER BY id",
        )
        .bind(cutoff.timestamp())
        .fetch_all(self.pool.pool())
        .await?;

        Ok(ids)
    }

    /// Delete all tasks older than `cutoff`, regardless of status
    ///
    /// This keys on age alone: a `pending` task that sat in the queue longer
    /// than the retention window is removed without ever running.
    #[instrument(skip(self))]
    pub async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let result = sqlx::query("DELETE FROM scheduler_tasks WHERE timestamp < ?")
            .bind(cutoff.timestamp())
            .execute(self.pool.pool())
            .await?;

        Ok(result.rows_affected())
    }

    /// Find a task by id
    #[instrument(skip(self))]
    pub async fn find_by_id(&self, id: i64) -> Result<Option<Task>, StoreError> {
        let sql = format!(
            "SELECT {} FROM scheduler_tasks WHERE id = ?",
            TASK_COLUMNS
        );

        let task = sqlx::query_as::<_, Task>(&sql)
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await?;

        Ok(task)
    }

    /// Find all tasks in a status, in insertion order
    #[instrument(skip(self))]
    pub async fn find_by_status(&self, status: TaskStatus) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {} FROM scheduler_tasks WHERE status = ? ORDER BY id",
            TASK_COLUMNS
        );

        let tasks = sqlx::query_as::<_, Task>(&sql)
            .bind(status.to_string())
            .fetch_all(self.pool.pool())
            .await?;

        Ok(tasks)
    }

    /// Count tasks in a status
    #[instrument(skip(self))]
    pub async fn count_by_status(&self, status: TaskStatus) -> Result<i64, StoreError> {
        let count = sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM scheduler_tasks WHERE status = ?",
        )
        .bind(status.to_string())
        .fetch_one(self.pool.pool())
        .await?;

        Ok(count)
    }

    /// Count tasks per group, busiest first
    #[instrument(skip(self))]
    pub async fn group_counts(&self) -> Result<Vec<(String, i64)>, StoreError> {
        let counts = sqlx::query_as::<_, (String, i64)>(
            r#"
            SELECT "group", COUNT(*) AS task_count FROM scheduler_tasks
            GROUP BY "group"
            ORDER BY task_count DESC, "group"
            "#,
        )
        .fetch_all(self.pool.pool())
        .await?;

        Ok(counts)
    }

    /// Most recently enqueued tasks, newest first
    #[instrument(skip(self))]
    pub async fn find_recent(&self, limit: u32) -> Result<Vec<Task>, StoreError> {
        let sql = format!(
            "SELECT {} FROM scheduler_tasks ORDER BY id DESC LIMIT ?",
            TASK_COLUMNS
        );

        let tasks = sqlx::query_as::<_, Task>(&sql)
            .bind(i64::from(limit))
            .fetch_all(self.pool.pool())
            .await?;

        Ok(tasks)
    }
}

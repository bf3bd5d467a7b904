// Core data models for the durable task queue

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{FromRow, Row};
use std::str::FromStr;

/// Task represents one durable unit of work in the queue
///
/// A task is eligible to run once its status is `pending` and its timestamp
/// is not in the future. Timestamps are stored as whole unix seconds, so
/// sub-second precision is dropped on the way into the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique id, monotonically assigned by the store
    pub id: i64,
    /// Dispatch kind; currently always `action`, reserved for future kinds
    #[serde(rename = "type")]
    pub kind: TaskKind,
    /// Ordering tag; a group is drained completely before any other group runs
    pub group: String,
    /// Name of the registered handler to invoke
    pub hook: String,
    /// Opaque JSON payload handed to the handler
    pub data: serde_json::Value,
    pub status: TaskStatus,
    /// Earliest eligible execution time; doubles as the last status change
    /// time for `running` and `failed` tasks
    pub timestamp: DateTime<Utc>,
}

impl FromRow<'_, SqliteRow> for Task {
    fn from_row(row: &SqliteRow) -> Result<Self, sqlx::Error> {
        let kind: String = row.try_get("type")?;
        let status: String = row.try_get("status")?;
        let data: String = row.try_get("data")?;
        let timestamp: i64 = row.try_get("timestamp")?;

        Ok(Task {
            id: row.try_get("id")?,
            kind: kind.parse().map_err(|e: String| decode_error("type", e))?,
            group: row.try_get("group")?,
            hook: row.try_get("hook")?,
            data: serde_json::from_str(&data)
                .map_err(|e| decode_error("data", e.to_string()))?,
            status: status
                .parse()
                .map_err(|e: String| decode_error("status", e))?,
            timestamp: DateTime::from_timestamp(timestamp, 0)
                .ok_or_else(|| decode_error("timestamp", format!("out of range: {}", timestamp)))?,
        })
    }
}

fn decode_error(column: &str, message: String) -> sqlx::Error {
    sqlx::Error::ColumnDecode {
        index: column.to_string(),
        source: message.into(),
    }
}

/// NewTask describes a task to enqueue, with optional overrides
///
/// `timestamp` defaults to now and `kind` to `action` when the task is
/// written to the store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTask {
    pub group: String,
    pub hook: String,
    pub data: serde_json::Value,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default, rename = "type")]
    pub kind: Option<TaskKind>,
}

impl NewTask {
    /// Create a task due immediately with the default kind
    pub fn new(
        group: impl Into<String>,
        hook: impl Into<String>,
        data: serde_json::Value,
    ) -> Self {
        Self {
            group: group.into(),
            hook: hook.into(),
            data,
            timestamp: None,
            kind: None,
        }
    }

    /// Defer the task until the given time
    pub fn at(mut self, run_at: DateTime<Utc>) -> Self {
        self.timestamp = Some(run_at);
        self
    }
}

/// TaskStatus represents the lifecycle state of a task
///
/// `complete` and `failed` are terminal; failed tasks are never retried
/// automatically and must be re-enqueued by a producer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Complete,
    Failed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskStatus::Pending => write!(f, "pending"),
            TaskStatus::Running => write!(f, "running"),
            TaskStatus::Complete => write!(f, "complete"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

impl FromStr for TaskStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "complete" => Ok(TaskStatus::Complete),
            "failed" => Ok(TaskStatus::Failed),
            _ => Err(format!("Invalid task status: {}", s)),
        }
    }
}

impl TryFrom<String> for TaskStatus {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

/// TaskKind represents the dispatch kind of a task
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Action,
}

impl Default for TaskKind {
    fn default() -> Self {
        TaskKind::Action
    }
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TaskKind::Action => write!(f, "action"),
        }
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "action" => Ok(TaskKind::Action),
            _ => Err(format!("Invalid task kind: {}", s)),
        }
    }
}

impl TryFrom<String> for TaskKind {
    type Error = String;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        Self::from_str(&s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display_round_trip() {
        for status in [
            TaskStatus::Pending,
            TaskStatus::Running,
            TaskStatus::Complete,
            TaskStatus::Failed,
        ] {
            let parsed: TaskStatus = status.to_string().parse().unwrap();
            assert_eq!(parsed, status);
        }
    }

    #[test]
    fn test_invalid_status_rejected() {
        assert!("completed".parse::<TaskStatus>().is_err());
        assert!("".parse::<TaskStatus>().is_err());
    }

    #[test]
    fn test_kind_parses_action_only() {
        assert_eq!("action".parse::<TaskKind>().unwrap(), TaskKind::Action);
        assert!("webhook".parse::<TaskKind>().is_err());
    }

    #[test]
    fn test_task_serializes_kind_as_type() {
        let task = Task {
            id: 1,
            kind: TaskKind::Action,
            group: "products".to_string(),
            hook: "sync_products".to_string(),
            data: serde_json::json!({"page": 1}),
            status: TaskStatus::Pending,
            timestamp: Utc::now(),
        };
        let value = serde_json::to_value(&task).unwrap();
        assert_eq!(value["type"], "action");
        assert_eq!(value["status"], "pending");
    }

    #[test]
    fn test_new_task_defaults_from_json() {
        let task: NewTask =
            serde_json::from_str(r#"{"group": "g", "hook": "h", "data": {}}"#).unwrap();
        assert!(task.timestamp.is_none());
        assert!(task.kind.is_none());
    }

    #[test]
    fn test_new_task_at_sets_timestamp() {
        let run_at = Utc::now() + chrono::Duration::seconds(90);
        let task = NewTask::new("g", "h", serde_json::json!(null)).at(run_at);
        assert_eq!(task.timestamp, Some(run_at));
    }
}

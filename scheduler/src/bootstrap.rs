// Bootstrap utilities for embedding hosts, examples, and tests

use crate::config::Settings;
use crate::db::{DbPool, TaskRepository};
use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

/// Initialize the task store from settings
///
/// Creates the parent directory of the database file if needed, opens the
/// pool, verifies connectivity and runs the idempotent schema setup.
///
/// # Errors
/// Returns error if the directory, pool or schema cannot be created
#[tracing::instrument(skip(settings))]
pub async fn init_task_store(settings: &Settings) -> Result<Arc<TaskRepository>> {
    info!("Initializing task store");

    if let Some(parent) = Path::new(&settings.database.path).parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create database directory")?;
            info!(path = %parent.display(), "Created database directory");
        }
    }

    let db_pool = DbPool::new(&settings.database)
        .await
        .context("Failed to initialize database pool")?;

    db_pool
        .health_check()
        .await
        .context("Database health check failed")?;

    let tasks = TaskRepository::new(db_pool)
        .with_insert_batch_size(settings.queue.insert_batch_size);
    tasks.setup().await.context("Failed to set up task table")?;

    info!("Task store initialized");
    Ok(Arc::new(tasks))
}

/// Initialize tracing for JSON logging
///
/// This sets up structured JSON logging with thread IDs and log levels
pub fn init_json_tracing() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(true)
        .with_level(true)
        .json()
        .init();
}

/// Initialize tracing for human-readable logging
///
/// Respects `RUST_LOG` when set, falling back to the given filter
pub fn init_human_tracing(default_filter: &str) {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_task_store_creates_directory_and_schema() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = Settings::default();
        settings.database.path = dir
            .path()
            .join("nested/queue/tasks.db")
            .to_string_lossy()
            .into_owned();

        let tasks = init_task_store(&settings).await.unwrap();
        let id = tasks
            .schedule("g", "h", serde_json::json!({}), None)
            .await
            .unwrap();
        assert!(tasks.find_by_id(id).await.unwrap().is_some());
    }
}

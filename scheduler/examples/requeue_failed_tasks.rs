use chrono::Utc;
use scheduler::config::DatabaseConfig;
use scheduler::db::{DbPool, TaskRepository};
use scheduler::models::TaskStatus;
use std::env;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let db_path = env::var("SCHEDULER_DB").unwrap_or_else(|_| "data/scheduler.db".to_string());

    println!("Opening {}", db_path);

    let config = DatabaseConfig {
        path: db_path,
        ..DatabaseConfig::default()
    };
    let pool = DbPool::new(&config).await?;
    let tasks = TaskRepository::new(pool);
    tasks.setup().await?;

    let failed = tasks.find_by_status(TaskStatus::Failed).await?;
    println!("Found {} failed tasks", failed.len());

    if failed.is_empty() {
        return Ok(());
    }

    for task in &failed {
        println!(
            "Re-queuing task: #{} (group: {}, hook: {}, failed at: {})",
            task.id, task.group, task.hook, task.timestamp
        );
    }

    let ids: Vec<i64> = failed.iter().map(|task| task.id).collect();
    let updated = tasks
        .mark_status(&ids, TaskStatus::Pending, Utc::now())
        .await?;

    println!("  -> Re-queued {} tasks", updated);

    Ok(())
}

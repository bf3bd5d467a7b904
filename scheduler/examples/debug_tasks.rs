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

    println!("Tasks by status:");
    for status in [
        TaskStatus::Pending,
        TaskStatus::Running,
        TaskStatus::Complete,
        TaskStatus::Failed,
    ] {
        let count = tasks.count_by_status(status).await?;
        println!("  {:<10} {}", status.to_string(), count);
    }

    let groups = tasks.group_counts().await?;
    println!("Tasks by group ({} groups):", groups.len());
    for (group, count) in groups {
        println!("  {:<30} {}", group, count);
    }

    let recent = tasks.find_recent(10).await?;
    println!("Most recent {} tasks:", recent.len());
    for task in recent {
        println!(
            "  #{} | {} | group: {} | hook: {} | timestamp: {}",
            task.id, task.status, task.group, task.hook, task.timestamp
        );
        println!("    data: {}", task.data);
    }

    Ok(())
}

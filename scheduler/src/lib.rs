// Durable task queue with group-ordered execution over SQLite

pub mod bootstrap;
pub mod config;
pub mod db;
pub mod engine;
pub mod errors;
pub mod housekeeper;
pub mod models;
pub mod registry;

pub use config::Settings;
pub use db::{DbPool, TaskRepository};
pub use engine::{RunSummary, Scheduler, SchedulerEngine};
pub use errors::StoreError;
pub use housekeeper::{Housekeeper, HousekeepingReport};
pub use models::{NewTask, Task, TaskKind, TaskStatus};
pub use registry::{HookRegistry, TaskHandler};

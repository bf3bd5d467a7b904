// Scenario tests for the engine drain loop: group ordering, crash
// recovery, failure handling and the run time budget

use chrono::Utc;
use scheduler::config::{DatabaseConfig, QueueConfig};
use scheduler::db::{DbPool, TaskRepository};
use scheduler::engine::{Scheduler, SchedulerEngine};
use scheduler::models::TaskStatus;
use scheduler::registry::HookRegistry;
use serde_json::json;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::sync::Mutex;

type Recorder = Arc<Mutex<Vec<String>>>;

async fn open_store(dir: &TempDir) -> Arc<TaskRepository> {
    let config = DatabaseConfig {
        path: dir.path().join("tasks.db").to_string_lossy().into_owned(),
        max_connections: 5,
        min_connections: 1,
        connect_timeout_seconds: 5,
    };
    let pool = DbPool::new(&config).await.unwrap();
    let repo = TaskRepository::new(pool);
    repo.setup().await.unwrap();
    Arc::new(repo)
}

/// Registry whose handlers append the payload's `label` to the recorder
fn recording_registry(recorder: &Recorder, hooks: &[&str]) -> HookRegistry {
    let mut registry = HookRegistry::new();
    for hook in hooks {
        let recorder = recorder.clone();
        registry.register_fn(*hook, move |payload: serde_json::Value| {
            let recorder = recorder.clone();
            async move {
                let label = payload["label"].as_str().unwrap_or_default().to_string();
                recorder.lock().await.push(label);
                Ok(())
            }
        });
    }
    registry
}

#[tokio::test]
async fn test_groups_drain_oldest_first() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&recorder, &["import_step"]);

    // Interleave two groups; "categories" owns the oldest task
    let now = Utc::now();
    for (group, label) in [
        ("categories", "cat-0"),
        ("products", "prod-0"),
        ("categories", "cat-1"),
        ("products", "prod-1"),
    ] {
        store
            .schedule(group, "import_step", json!({"label": label}), Some(now))
            .await
            .unwrap();
    }

    let engine = SchedulerEngine::new(QueueConfig::default(), store.clone(), Arc::new(registry));
    let summary = engine.process_queue().await.unwrap();

    assert_eq!(summary.completed, 4);
    assert_eq!(summary.failed, 0);
    assert_eq!(
        *recorder.lock().await,
        vec!["cat-0", "cat-1", "prod-0", "prod-1"]
    );
}

#[tokio::test]
async fn test_locked_group_takes_late_arrivals_before_next_group() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));

    let mut registry = HookRegistry::new();
    let rec = recorder.clone();
    let enqueue_store = store.clone();
    registry.register_fn("import_step", move |payload: serde_json::Value| {
        let rec = rec.clone();
        let store = enqueue_store.clone();
        async move {
            let label = payload["label"].as_str().unwrap_or_default().to_string();
            if label == "cat-0" {
                // Arrives while its group is locked, so it joins the drain
                store
                    .schedule(
                        "categories",
                        "import_step",
                        json!({"label": "cat-late"}),
                        Some(Utc::now()),
                    )
                    .await?;
            }
            rec.lock().await.push(label);
            Ok(())
        }
    });

    let now = Utc::now();
    store
        .schedule("categories", "import_step", json!({"label": "cat-0"}), Some(now))
        .await
        .unwrap();
    store
        .schedule("products", "import_step", json!({"label": "prod-0"}), Some(now))
        .await
        .unwrap();

    let config = QueueConfig {
        batch_size: 1,
        ..QueueConfig::default()
    };
    let engine = SchedulerEngine::new(config, store.clone(), Arc::new(registry));
    let summary = engine.process_queue().await.unwrap();

    assert_eq!(summary.completed, 3);
    assert_eq!(*recorder.lock().await, vec!["cat-0", "cat-late", "prod-0"]);
}

#[tokio::test]
async fn test_front_group_with_only_running_work_ends_invocation() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&recorder, &["import_step"]);

    let now = Utc::now();
    let blocked = store
        .schedule("categories", "import_step", json!({"label": "cat-busy"}), Some(now))
        .await
        .unwrap();
    // Freshly claimed by an overlapping invocation that is still alive
    store
        .mark_status(&[blocked], TaskStatus::Running, now)
        .await
        .unwrap();
    store
        .schedule("products", "import_step", json!({"label": "prod-0"}), Some(now))
        .await
        .unwrap();

    let engine = SchedulerEngine::new(QueueConfig::default(), store.clone(), Arc::new(registry));
    let summary = engine.process_queue().await.unwrap();

    // Nothing ran: the front group is busy and younger groups must wait
    assert_eq!(summary.total(), 0);
    assert!(recorder.lock().await.is_empty());
    let task = store.find_by_id(blocked).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Running);
    assert_eq!(store.count_by_status(TaskStatus::Pending).await.unwrap(), 1);
}

#[tokio::test]
async fn test_stale_running_task_is_reclaimed_and_run() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&recorder, &["import_step"]);

    // Claimed ten minutes ago by an invocation that died mid-run
    let now = Utc::now();
    let crashed_at = now - chrono::Duration::seconds(600);
    let crashed = store
        .schedule("orders", "import_step", json!({"label": "order-0"}), Some(crashed_at))
        .await
        .unwrap();
    store
        .mark_status(&[crashed], TaskStatus::Running, crashed_at)
        .await
        .unwrap();

    let engine = SchedulerEngine::new(QueueConfig::default(), store.clone(), Arc::new(registry));
    let summary = engine.process_queue().await.unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(*recorder.lock().await, vec!["order-0"]);
    let task = store.find_by_id(crashed).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Complete);
}

#[tokio::test]
async fn test_failed_task_is_recorded_and_not_retried() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));

    let mut registry = recording_registry(&recorder, &["import_step"]);
    registry.register_fn("broken_step", |_| async {
        anyhow::bail!("downstream unavailable")
    });

    let now = Utc::now();
    let bad = store
        .schedule("g", "broken_step", json!({"label": "bad"}), Some(now))
        .await
        .unwrap();
    store
        .schedule("g", "import_step", json!({"label": "good"}), Some(now))
        .await
        .unwrap();

    let engine = SchedulerEngine::new(QueueConfig::default(), store.clone(), Arc::new(registry));
    let summary = engine.process_queue().await.unwrap();

    assert_eq!(summary.completed, 1);
    assert_eq!(summary.failed, 1);
    assert_eq!(*recorder.lock().await, vec!["good"]);
    let task = store.find_by_id(bad).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);

    // A later invocation leaves the failed task alone
    let second = engine.process_queue().await.unwrap();
    assert_eq!(second.total(), 0);
    assert_eq!(store.count_by_status(TaskStatus::Failed).await.unwrap(), 1);
}

#[tokio::test]
async fn test_unregistered_hook_marks_task_failed() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    let id = store
        .schedule("g", "mystery_hook", json!({}), Some(Utc::now()))
        .await
        .unwrap();

    let engine = SchedulerEngine::new(
        QueueConfig::default(),
        store.clone(),
        Arc::new(HookRegistry::new()),
    );
    let summary = engine.process_queue().await.unwrap();

    assert_eq!(summary.failed, 1);
    let task = store.find_by_id(id).await.unwrap().unwrap();
    assert_eq!(task.status, TaskStatus::Failed);
}

#[tokio::test]
async fn test_budget_is_checked_between_batches() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&recorder, &["import_step"]);

    let now = Utc::now();
    for seq in 0..3 {
        store
            .schedule("g", "import_step", json!({"label": format!("t{}", seq)}), Some(now))
            .await
            .unwrap();
    }

    // Zero budget with single-task batches: exactly one batch per invocation
    let config = QueueConfig {
        batch_size: 1,
        run_time_budget_seconds: 0,
        ..QueueConfig::default()
    };
    let engine = SchedulerEngine::new(config, store.clone(), Arc::new(registry));

    assert_eq!(engine.process_queue().await.unwrap().completed, 1);
    assert_eq!(store.count_by_status(TaskStatus::Pending).await.unwrap(), 2);

    // The next invocation picks up where the last one stopped
    assert_eq!(engine.process_queue().await.unwrap().completed, 1);
    assert_eq!(store.count_by_status(TaskStatus::Pending).await.unwrap(), 1);
    assert_eq!(*recorder.lock().await, vec!["t0", "t1"]);
}

#[tokio::test]
async fn test_budget_stops_a_self_refilling_group() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;

    // The handler re-enqueues itself, so the group never drains on its own
    let mut registry = HookRegistry::new();
    let refill_store = store.clone();
    let runs = Arc::new(std::sync::atomic::AtomicUsize::new(0));
    let seen = runs.clone();
    registry.register_fn("refill", move |_| {
        let store = refill_store.clone();
        let seen = seen.clone();
        async move {
            seen.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            store
                .schedule("loop", "refill", json!({}), Some(Utc::now()))
                .await?;
            Ok(())
        }
    });

    store
        .schedule("loop", "refill", json!({}), Some(Utc::now()))
        .await
        .unwrap();

    let config = QueueConfig {
        batch_size: 1,
        run_time_budget_seconds: 0,
        ..QueueConfig::default()
    };
    let engine = SchedulerEngine::new(config, store.clone(), Arc::new(registry));
    let summary = engine.process_queue().await.unwrap();

    // One batch ran, then the exhausted budget ended the invocation
    assert_eq!(summary.completed, 1);
    assert_eq!(runs.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(store.count_by_status(TaskStatus::Pending).await.unwrap(), 1);
}

#[tokio::test]
async fn test_multi_batch_drain_runs_each_task_once() {
    let dir = tempfile::tempdir().unwrap();
    let store = open_store(&dir).await;
    let recorder: Recorder = Arc::new(Mutex::new(Vec::new()));
    let registry = recording_registry(&recorder, &["import_step"]);

    let now = Utc::now();
    for seq in 0..5 {
        store
            .schedule("g", "import_step", json!({"label": format!("t{}", seq)}), Some(now))
            .await
            .unwrap();
    }

    // Five tasks over two-task batches: three claim rounds in one invocation
    let config = QueueConfig {
        batch_size: 2,
        ..QueueConfig::default()
    };
    let engine = SchedulerEngine::new(config, store.clone(), Arc::new(registry));
    let summary = engine.process_queue().await.unwrap();

    assert_eq!(summary.completed, 5);
    assert_eq!(*recorder.lock().await, vec!["t0", "t1", "t2", "t3", "t4"]);
    assert_eq!(store.count_by_status(TaskStatus::Complete).await.unwrap(), 5);
}

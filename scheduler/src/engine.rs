// Scheduler engine: invocation driver, group sequencing and task dispatch

use crate::config::QueueConfig;
use crate::db::TaskRepository;
use crate::errors::StoreError;
use crate::housekeeper::Housekeeper;
use crate::models::Task;
use crate::registry::HookRegistry;
use async_trait::async_trait;
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::time::{interval, sleep};
use tracing::{debug, error, info, instrument, warn};

/// Aggregate outcome of one invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub completed: u64,
    pub failed: u64,
}

impl RunSummary {
    pub fn total(&self) -> u64 {
        self.completed + self.failed
    }
}

/// Scheduler trait for queue processing operations
#[async_trait]
pub trait Scheduler: Send + Sync {
    /// Start the periodic invocation loop
    async fn start(&self) -> Result<(), StoreError>;

    /// Stop the loop gracefully
    async fn stop(&self);

    /// Run exactly one invocation of the queue
    async fn process_queue(&self) -> Result<RunSummary, StoreError>;
}

/// Main scheduler engine implementation
///
/// One invocation (`process_queue`) runs housekeeping once, then drains the
/// queue group by group until no due work remains or the wall-clock budget
/// runs out. Hosts with their own cron mechanism call `process_queue`
/// directly; long-running hosts use `start`/`stop` to tick it on an interval.
pub struct SchedulerEngine {
    config: QueueConfig,
    tasks: Arc<TaskRepository>,
    registry: Arc<HookRegistry>,
    housekeeper: Housekeeper,
    shutdown_tx: tokio::sync::broadcast::Sender<()>,
}

impl SchedulerEngine {
    /// Create a new scheduler engine
    ///
    /// The registry must already hold every handler the queued tasks refer
    /// to; hooks registered after the first invocation are picked up, but any
    /// task dispatched before that is recorded as failed.
    pub fn new(
        config: QueueConfig,
        tasks: Arc<TaskRepository>,
        registry: Arc<HookRegistry>,
    ) -> Self {
        let (shutdown_tx, _shutdown_rx) = tokio::sync::broadcast::channel(1);
        let housekeeper = Housekeeper::new(tasks.clone(), &config);

        Self {
            config,
            tasks,
            registry,
            housekeeper,
            shutdown_tx,
        }
    }

    /// Get a shutdown signal receiver
    pub fn shutdown_receiver(&self) -> tokio::sync::broadcast::Receiver<()> {
        self.shutdown_tx.subscribe()
    }

    /// Execute one claimed task and record its outcome
    ///
    /// Handler failures and unregistered hooks mark the task failed and are
    /// contained here; only store failures propagate.
    #[instrument(skip(self, task, summary), fields(task_id = task.id, group = %task.group, hook = %task.hook))]
    async fn run_task(&self, task: Task, summary: &mut RunSummary) -> Result<(), StoreError> {
        match self.registry.get(&task.hook) {
            Some(handler) => match handler(task.data).await {
                Ok(()) => {
                    self.tasks.mark_complete(task.id).await?;
                    summary.completed += 1;
                    debug!("Task completed");
                }
                Err(err) => {
                    self.tasks.mark_failed(task.id, Utc::now()).await?;
                    summary.failed += 1;
                    error!(error = ?err, "Task failed");
                }
            },
            None => {
                self.tasks.mark_failed(task.id, Utc::now()).await?;
                summary.failed += 1;
                error!("No handler registered for hook");
            }
        }

        Ok(())
    }
}

#[async_trait]
impl Scheduler for SchedulerEngine {
    /// Start the periodic invocation loop
    ///
    /// Each tick runs one full invocation. Errors are logged and the next
    /// tick retries; all queue state is in the store, so nothing is lost.
    #[instrument(skip(self))]
    async fn start(&self) -> Result<(), StoreError> {
        info!(
            tick_interval_seconds = self.config.tick_interval_seconds,
            "Starting scheduler engine"
        );

        let mut tick_interval = interval(Duration::from_secs(self.config.tick_interval_seconds));
        let mut shutdown_rx = self.shutdown_receiver();

        loop {
            tokio::select! {
                _ = tick_interval.tick() => {
                    match self.process_queue().await {
                        Ok(summary) => {
                            if summary.total() > 0 {
                                info!(
                                    completed = summary.completed,
                                    failed = summary.failed,
                                    "Invocation finished"
                                );
                            } else {
                                debug!("No tasks due");
                            }
                        }
                        Err(e) => {
                            error!(error = %e, "Error processing task queue");
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping scheduler");
                    break;
                }
            }
        }

        info!("Scheduler engine stopped");
        Ok(())
    }

    /// Stop the scheduler gracefully
    #[instrument(skip(self))]
    async fn stop(&self) {
        info!("Stopping scheduler engine");

        // Send shutdown signal
        let _ = self.shutdown_tx.send(());

        // Give some time for an in-flight invocation to notice
        sleep(Duration::from_secs(2)).await;

        info!("Scheduler engine stopped gracefully");
    }

    /// Run exactly one invocation of the queue
    ///
    /// Housekeeping first, then the drain loop: lock onto the group of the
    /// earliest due task and claim batch after batch of it. When a claim
    /// comes back empty the sequencer reconsiders; if the drained group is
    /// still first (it holds only running work), the invocation ends rather
    /// than skip ahead to a younger group. The budget is checked between
    /// batches, so a slow handler can overrun it by at most one batch.
    #[instrument(skip(self))]
    async fn process_queue(&self) -> Result<RunSummary, StoreError> {
        let started = Instant::now();
        let budget = Duration::from_secs(self.config.run_time_budget_seconds);

        self.housekeeper.run(Utc::now()).await?;

        let mut summary = RunSummary::default();
        let mut locked_group: Option<String> = None;

        loop {
            let now = Utc::now();
            let first_group = self.tasks.next_eligible_group(now).await?;

            let group = match (&locked_group, &first_group) {
                (None, None) => break,
                (None, Some(first)) => {
                    debug!(group = %first, "Locked onto group");
                    locked_group = Some(first.clone());
                    first.clone()
                }
                (Some(current), _) => current.clone(),
            };

            let batch = self
                .tasks
                .claim_batch(&group, now, self.config.batch_size)
                .await?;

            if batch.is_empty() {
                if first_group.as_deref() == Some(group.as_str()) {
                    // Only running work left in the front group; do not skip ahead
                    break;
                }
                locked_group = first_group;
            } else {
                if summary.total() == 0 {
                    debug!("Processing task queue");
                }
                for task in batch {
                    self.run_task(task, &mut summary).await?;
                }
            }

            if started.elapsed() >= budget {
                debug!("Run time budget exhausted");
                break;
            }
        }

        let elapsed_seconds = started.elapsed().as_secs();
        if summary.completed > 0 {
            info!(
                completed = summary.completed,
                elapsed_seconds, "Completed tasks"
            );
        }
        if summary.failed > 0 {
            warn!(failed = summary.failed, "Failed tasks");
        }

        Ok(summary)
    }
}

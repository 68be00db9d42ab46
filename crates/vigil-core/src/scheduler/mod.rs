//! Recurring task scheduler.
//!
//! One coarse ticker drives discovery of due tasks; each due task runs on
//! its own tokio task, unordered relative to the others. A task's
//! `next_run` is recomputed only after it returns, so a slow run delays
//! its own next firing instead of double-firing, and a `running` marker
//! keeps a task from overlapping itself across ticks. Tasks may overlap
//! *each other* freely; any exclusivity a specific task needs is its own
//! responsibility.
//!
//! Failure semantics: a task returning an error is logged and rescheduled
//! exactly as on success. Stopping the scheduler only prevents new
//! dispatches; in-flight runs are not interrupted.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, Notify, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::CoreError;

/// A named unit of recurring work.
#[async_trait]
pub trait Task: Send + Sync {
    /// Unique identifier, used for registry keys and log lines.
    fn name(&self) -> &str;

    async fn run(&self) -> Result<(), CoreError>;
}

/// Outcome of one dispatched task run, reported on the completion
/// channel so tests (and operators) can observe runs deterministically.
#[derive(Debug)]
pub struct TaskCompletion {
    pub task: String,
    pub result: Result<(), CoreError>,
    pub finished_at: DateTime<Utc>,
}

struct TaskEntry {
    task: Arc<dyn Task>,
    interval: Duration,
    next_run: DateTime<Utc>,
    running: bool,
}

/// Owns the registry of recurring tasks and the dispatch loop.
pub struct TaskScheduler {
    tasks: Arc<RwLock<HashMap<String, TaskEntry>>>,
    tick: Duration,
    shutdown: Arc<Notify>,
    completions: Option<mpsc::UnboundedSender<TaskCompletion>>,
}

impl TaskScheduler {
    pub fn new(tick: Duration) -> Self {
        Self {
            tasks: Arc::new(RwLock::new(HashMap::new())),
            tick,
            shutdown: Arc::new(Notify::new()),
            completions: None,
        }
    }

    /// Subscribe to per-run completion events. May be called once,
    /// before `start`.
    pub fn subscribe_completions(&mut self) -> mpsc::UnboundedReceiver<TaskCompletion> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.completions = Some(tx);
        rx
    }

    /// Register a task with a fixed re-run interval.
    ///
    /// With `run_at_start` the task becomes due on the first tick;
    /// otherwise its first run happens one full interval from now.
    pub async fn add_task(&self, task: Arc<dyn Task>, interval: Duration, run_at_start: bool) {
        let now = Utc::now();
        let next_run = if run_at_start {
            now
        } else {
            now + chrono::Duration::from_std(interval).unwrap_or_default()
        };
        let name = task.name().to_string();
        let mut tasks = self.tasks.write().await;
        tasks.insert(
            name.clone(),
            TaskEntry {
                task,
                interval,
                next_run,
                running: false,
            },
        );
        debug!(task = %name, "registered task");
    }

    /// Launch the dispatch loop. Returns the loop's join handle.
    pub fn start(&self) -> JoinHandle<()> {
        let tasks = self.tasks.clone();
        let shutdown = self.shutdown.clone();
        let completions = self.completions.clone();
        let tick = self.tick;

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(tick);
            // The first interval tick fires immediately.
            loop {
                tokio::select! {
                    _ = shutdown.notified() => {
                        info!("scheduler shutting down");
                        break;
                    }
                    _ = ticker.tick() => {
                        dispatch_due(&tasks, &completions, Utc::now()).await;
                    }
                }
            }
        })
    }

    /// Request shutdown of the dispatch loop. In-flight task runs are
    /// left to finish on their own.
    pub fn stop(&self) {
        // notify_one stores a permit, so a stop requested before the loop
        // reaches its first select is still observed.
        self.shutdown.notify_one();
    }

    /// Dispatch every task with `next_run <= now`. Exposed so tests can
    /// drive the scheduler without wall-clock sleeps; returns the join
    /// handles of the spawned runs.
    pub async fn dispatch_due(&self, now: DateTime<Utc>) -> Vec<JoinHandle<()>> {
        dispatch_due(&self.tasks, &self.completions, now).await
    }
}

async fn dispatch_due(
    tasks: &Arc<RwLock<HashMap<String, TaskEntry>>>,
    completions: &Option<mpsc::UnboundedSender<TaskCompletion>>,
    now: DateTime<Utc>,
) -> Vec<JoinHandle<()>> {
    // Snapshot the due set under the read lock, then mark each dispatched
    // entry running under the write lock before spawning.
    let due: Vec<String> = {
        let registry = tasks.read().await;
        registry
            .iter()
            .filter(|(_, entry)| !entry.running && entry.next_run <= now)
            .map(|(name, _)| name.clone())
            .collect()
    };

    let mut handles = Vec::with_capacity(due.len());
    for name in due {
        let task = {
            let mut registry = tasks.write().await;
            match registry.get_mut(&name) {
                Some(entry) if !entry.running => {
                    entry.running = true;
                    entry.task.clone()
                }
                _ => continue,
            }
        };

        let tasks = tasks.clone();
        let completions = completions.clone();
        handles.push(tokio::spawn(async move {
            let result = task.run().await;
            if let Err(e) = &result {
                error!(task = %task.name(), "task run failed: {e}");
            }

            let mut registry = tasks.write().await;
            if let Some(entry) = registry.get_mut(task.name()) {
                entry.running = false;
                entry.next_run = Utc::now()
                    + chrono::Duration::from_std(entry.interval).unwrap_or_default();
            }
            drop(registry);

            if let Some(tx) = completions {
                let _ = tx.send(TaskCompletion {
                    task: task.name().to_string(),
                    result,
                    finished_at: Utc::now(),
                });
            }
        }));
    }
    handles
}

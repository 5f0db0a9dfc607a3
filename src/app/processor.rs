use std::sync::Arc;

use serde::Serialize;
use uuid::Uuid;

use crate::app::model::{TaskKind, TaskStatus};
use crate::app::queue::WorkerPool;
use crate::app::runner::{TaskRunner, mark_failed};
use crate::app::task_store::TaskStore;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TaskFailure {
    pub id: Uuid,
    pub kind: TaskKind,
    pub error: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct QueueSummary {
    pub claimed: usize,
    pub completed: Vec<Uuid>,
    pub failed: Vec<TaskFailure>,
}

/// Drains one batch of the durable queue.
#[derive(Clone)]
pub struct QueueProcessor {
    tasks: TaskStore,
    runner: Arc<TaskRunner>,
}

impl QueueProcessor {
    pub fn new(tasks: TaskStore, runner: TaskRunner) -> Self {
        Self {
            tasks,
            runner: Arc::new(runner),
        }
    }

    /// Claim up to `max_tasks` runnable tasks, run them with at most
    /// `max_parallelism` in flight, and write the outcomes back in one step.
    pub fn process_queue(
        &self,
        max_tasks: usize,
        max_parallelism: usize,
    ) -> anyhow::Result<QueueSummary> {
        if max_tasks == 0 {
            return Ok(QueueSummary::default());
        }
        let batch = self.tasks.claim(max_tasks)?;
        if batch.is_empty() {
            tracing::info!("queue has no runnable tasks");
            return Ok(QueueSummary::default());
        }
        tracing::info!(claimed = batch.len(), max_parallelism, "processing queue batch");

        let jobs: Vec<_> = batch
            .iter()
            .cloned()
            .map(|task| {
                let runner = Arc::clone(&self.runner);
                move || runner.run_task(task)
            })
            .collect();
        let results = WorkerPool::new(max_parallelism).run_all(jobs)?;

        let finished: Vec<_> = batch
            .into_iter()
            .zip(results)
            .map(|(claimed, result)| match result {
                Ok(task) => task,
                Err(panic) => {
                    tracing::error!(task_id = %claimed.id, panic = %panic, "task worker panicked");
                    let mut task = claimed;
                    mark_failed(&mut task, panic);
                    task
                }
            })
            .collect();
        self.tasks.finish(&finished)?;

        let mut summary = QueueSummary {
            claimed: finished.len(),
            ..QueueSummary::default()
        };
        for task in finished {
            match task.status {
                TaskStatus::Completed => summary.completed.push(task.id),
                _ => summary.failed.push(TaskFailure {
                    id: task.id,
                    kind: task.kind,
                    error: task.error.unwrap_or_default(),
                }),
            }
        }
        tracing::info!(
            completed = summary.completed.len(),
            failed = summary.failed.len(),
            "queue batch finished"
        );
        Ok(summary)
    }
}

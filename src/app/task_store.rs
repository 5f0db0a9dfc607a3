use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::app::model::{Queue, QueueEntry, Task, TaskKind, TaskStatus};
use crate::store::DocumentStore;

/// Sole writer of the queue document. Every mutation is one locked
/// read-modify-write.
#[derive(Debug, Clone)]
pub struct TaskStore {
    store: DocumentStore,
    path: PathBuf,
    stale_after: chrono::Duration,
}

impl TaskStore {
    pub fn new(store: DocumentStore, path: impl Into<PathBuf>, stale_after: std::time::Duration) -> Self {
        Self {
            store,
            path: path.into(),
            stale_after: chrono::Duration::from_std(stale_after)
                .unwrap_or_else(|_| chrono::Duration::MAX),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn enqueue(&self, kind: TaskKind, payload: serde_json::Value) -> anyhow::Result<Task> {
        let task = Task::new(kind, payload);
        self.modify(|queue| {
            queue.push(QueueEntry::Task(task.clone()));
            Ok(())
        })
        .context("enqueue task")?;
        tracing::info!(task_id = %task.id, kind = ?task.kind, "enqueued task");
        Ok(task)
    }

    pub fn list(&self) -> anyhow::Result<Queue> {
        self.store
            .read(&self.path)
            .with_context(|| format!("read queue: {}", self.path.display()))
    }

    /// Mark up to `max_tasks` runnable tasks as processing, in queue order,
    /// and return them. A processing task whose claim is older than the stale
    /// window counts as runnable again.
    pub fn claim(&self, max_tasks: usize) -> anyhow::Result<Vec<Task>> {
        self.claim_at(max_tasks, Utc::now())
    }

    fn claim_at(&self, max_tasks: usize, now: DateTime<Utc>) -> anyhow::Result<Vec<Task>> {
        let stale_after = self.stale_after;
        self.modify(|queue| {
            let mut batch = Vec::new();
            for (position, entry) in queue.iter_mut().enumerate() {
                if batch.len() >= max_tasks {
                    break;
                }
                let task = match entry {
                    QueueEntry::Task(task) => task,
                    QueueEntry::Malformed(_) => {
                        tracing::warn!(position, "skipping malformed queue entry");
                        continue;
                    }
                };
                if !is_runnable(task, now, stale_after) {
                    continue;
                }
                if task.status == TaskStatus::Processing {
                    tracing::warn!(task_id = %task.id, "reclaiming stale processing task");
                }
                task.status = TaskStatus::Processing;
                task.updated_at = Some(now);
                task.attempts += 1;
                task.error = None;
                batch.push(task.clone());
            }
            Ok(batch)
        })
        .context("claim tasks")
    }

    /// Write a finished batch back: every entry that was not part of the batch
    /// keeps its place, then this batch's failed tasks are appended. Completed
    /// tasks leave the queue.
    pub fn finish(&self, batch: &[Task]) -> anyhow::Result<()> {
        let ids: HashSet<Uuid> = batch.iter().map(|task| task.id).collect();
        self.modify(|queue| {
            queue.retain(|entry| entry.as_task().is_none_or(|task| !ids.contains(&task.id)));
            queue.extend(
                batch
                    .iter()
                    .filter(|task| task.status != TaskStatus::Completed)
                    .cloned()
                    .map(QueueEntry::Task),
            );
            Ok(())
        })
        .context("write back finished tasks")
    }

    /// Make failed tasks runnable again. Returns how many were reset.
    pub fn retry_failed(&self) -> anyhow::Result<usize> {
        let now = Utc::now();
        self.modify(|queue| {
            let mut reset = 0;
            for entry in queue.iter_mut() {
                if let QueueEntry::Task(task) = entry
                    && task.status == TaskStatus::Failed
                {
                    task.status = TaskStatus::Pending;
                    task.updated_at = Some(now);
                    reset += 1;
                }
            }
            Ok(reset)
        })
        .context("retry failed tasks")
    }

    /// Drop failed tasks. Returns how many were removed.
    pub fn clear_failed(&self) -> anyhow::Result<usize> {
        self.modify(|queue| {
            let before = queue.len();
            queue.retain(|entry| {
                entry
                    .as_task()
                    .is_none_or(|task| task.status != TaskStatus::Failed)
            });
            Ok(before - queue.len())
        })
        .context("clear failed tasks")
    }

    fn modify<R>(&self, f: impl FnOnce(&mut Queue) -> anyhow::Result<R>) -> anyhow::Result<R> {
        let (result, _) = self.store.update(&self.path, f)?;
        Ok(result)
    }
}

fn is_runnable(task: &Task, now: DateTime<Utc>, stale_after: chrono::Duration) -> bool {
    match task.status {
        TaskStatus::Pending => true,
        TaskStatus::Processing => {
            let claimed = task.updated_at.unwrap_or(task.timestamp);
            now.signed_duration_since(claimed) >= stale_after
        }
        TaskStatus::Completed | TaskStatus::Failed => false,
    }
}

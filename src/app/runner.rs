use chrono::Utc;

use crate::app::model::{
    AddComicPayload, RewriteUrlPayload, SyncChaptersPayload, Task, TaskKind, TaskStatus,
};
use crate::chapter_key::ChapterRange;
use crate::sync::{ChapterStatus, SyncReport, SyncRequest, Synchronizer};

/// Executes one claimed task against the catalog.
#[derive(Clone)]
pub struct TaskRunner {
    synchronizer: Synchronizer,
}

impl TaskRunner {
    pub fn new(synchronizer: Synchronizer) -> Self {
        Self { synchronizer }
    }

    /// Run the task and return it with its final status. Never fails: every
    /// error becomes the task's `failed` state.
    pub fn run_task(&self, mut task: Task) -> Task {
        tracing::info!(task_id = %task.id, kind = ?task.kind, attempt = task.attempts, "running task");
        match self.try_run_task(&task) {
            Ok(summary) => {
                tracing::info!(task_id = %task.id, summary = %summary, "task completed");
                task.status = TaskStatus::Completed;
                task.error = None;
            }
            Err(err) => {
                tracing::error!(task_id = %task.id, ?err, "task failed");
                mark_failed(&mut task, format!("{err:#}"));
            }
        }
        task.updated_at = Some(Utc::now());
        task
    }

    fn try_run_task(&self, task: &Task) -> anyhow::Result<String> {
        match task.kind {
            TaskKind::AddComic => {
                let payload: AddComicPayload = task.payload()?;
                let report = self.synchronizer.add_comic(&payload.source_url)?;
                ensure_no_failed_chapters(&report.sync)?;
                Ok(format!(
                    "{} {} ({} chapter(s) fetched)",
                    if report.created { "added" } else { "refreshed" },
                    report.comic_id,
                    report.sync.fetched()
                ))
            }
            TaskKind::SyncChapters => {
                let payload: SyncChaptersPayload = task.payload()?;
                let mut request = SyncRequest::new(
                    payload.source_url,
                    ChapterRange::from_options(payload.start, payload.end),
                )
                .overwrite(payload.overwrite);
                if let Some(comic_id) = payload.comic_id {
                    request = request.comic_id(comic_id);
                }
                let report = self.synchronizer.sync(&request)?;
                ensure_no_failed_chapters(&report)?;
                Ok(format!(
                    "synced {} ({} chapter(s) fetched)",
                    report.comic_id,
                    report.fetched()
                ))
            }
            TaskKind::RewriteUrl => {
                let catalog = self.synchronizer.catalog();
                match task.payload::<RewriteUrlPayload>()? {
                    RewriteUrlPayload::Comic {
                        comic_id,
                        new_source_url,
                    } => {
                        let changed = catalog.rewrite_source_location(&comic_id, &new_source_url)?;
                        Ok(format!("rewrote source of {comic_id} (changed: {changed})"))
                    }
                    RewriteUrlPayload::Domain { old, new } => {
                        let report = catalog.rewrite_all_occurrences(&old, &new)?;
                        Ok(format!("rewrote {} comic(s)", report.changed_count()))
                    }
                }
            }
        }
    }
}

pub fn mark_failed(task: &mut Task, error: String) {
    task.status = TaskStatus::Failed;
    task.error = Some(error);
    task.updated_at = Some(Utc::now());
}

/// Chapters that failed to fetch fail the task, so an operator retry picks
/// them up. Chapters already written are skipped on the retry.
fn ensure_no_failed_chapters(report: &SyncReport) -> anyhow::Result<()> {
    let failed: Vec<&str> = report
        .outcomes
        .iter()
        .filter(|outcome| matches!(outcome.status, ChapterStatus::FetchFailed { .. }))
        .map(|outcome| outcome.key.as_str())
        .collect();
    if !failed.is_empty() {
        anyhow::bail!(
            "{}: chapter(s) failed to fetch: {}",
            report.comic_id,
            failed.join(", ")
        );
    }
    Ok(())
}

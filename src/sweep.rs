use serde::{Deserialize, Serialize};

use crate::chapter_key::{ChapterNumber, ChapterRange, latest_chapter};
use crate::sync::{SyncReport, SyncRequest, Synchronizer};

/// How far one sweep advances each comic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SweepReach {
    /// Only the lowest listed chapter above the latest known one.
    #[default]
    Next,
    /// Every listed chapter above the latest known one.
    All,
}

impl SweepReach {
    pub fn parse(raw: &str) -> anyhow::Result<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "" | "next" => Ok(Self::Next),
            "all" => Ok(Self::All),
            other => anyhow::bail!("unsupported sweep reach: {other} (expected next|all)"),
        }
    }

    fn limit(self) -> Option<usize> {
        match self {
            Self::Next => Some(1),
            Self::All => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SweepFailure {
    pub comic_id: String,
    pub source_url: Option<String>,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub succeeded: Vec<String>,
    pub failed: Vec<SweepFailure>,
    pub reports: Vec<SyncReport>,
}

/// Pull every comic in the index forward. A failing comic is recorded and the
/// sweep moves on; only an unreadable index is an error.
pub fn sweep_all(synchronizer: &Synchronizer, reach: SweepReach) -> anyhow::Result<SweepReport> {
    let index = synchronizer.catalog().index()?;
    tracing::info!(comics = index.len(), ?reach, "sweep started");

    let mut report = SweepReport::default();
    for (comic_id, entry) in index {
        let fail = |reason: String| {
            tracing::warn!(comic_id = %comic_id, reason = %reason, "sweep skipped comic");
            SweepFailure {
                comic_id: comic_id.clone(),
                source_url: entry.source_url.clone(),
                reason,
            }
        };

        let Some(source_url) = entry.source_url.as_deref().filter(|url| !url.trim().is_empty())
        else {
            report.failed.push(fail("index entry has no source_url".to_owned()));
            continue;
        };
        let record = match synchronizer.catalog().comic(&comic_id) {
            Ok(Some(record)) => record,
            Ok(None) => {
                report.failed.push(fail("comic document is missing".to_owned()));
                continue;
            }
            Err(err) => {
                report.failed.push(fail(format!("{err:#}")));
                continue;
            }
        };

        let latest = latest_chapter(record.chapters.keys()).unwrap_or_else(ChapterNumber::zero);
        let request = SyncRequest::new(source_url, ChapterRange::after(latest))
            .limit(reach.limit())
            .comic_id(comic_id.as_str());
        match synchronizer.sync(&request) {
            Ok(sync) if sync.failed() > 0 => {
                report.failed.push(fail(format!(
                    "{} chapter(s) failed to fetch",
                    sync.failed()
                )));
                report.reports.push(sync);
            }
            Ok(sync) => {
                report.succeeded.push(comic_id.clone());
                report.reports.push(sync);
            }
            Err(err) => report.failed.push(fail(format!("{err:#}"))),
        }
    }

    tracing::info!(
        succeeded = report.succeeded.len(),
        failed = report.failed.len(),
        "sweep finished"
    );
    Ok(report)
}

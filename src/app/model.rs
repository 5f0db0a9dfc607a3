use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use uuid::Uuid;

use crate::chapter_key::ChapterNumber;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    Processing,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    #[serde(alias = "comic_add")]
    AddComic,
    #[serde(alias = "comic_update")]
    SyncChapters,
    #[serde(alias = "source_update")]
    RewriteUrl,
}

/// A durable unit of intent. `payload` stays raw JSON until dispatch so a bad
/// payload only fails its own task.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Task {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(alias = "type")]
    pub kind: TaskKind,
    #[serde(default, alias = "data")]
    pub payload: serde_json::Value,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Task {
    pub fn new(kind: TaskKind, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payload,
            status: TaskStatus::Pending,
            timestamp: Utc::now(),
            updated_at: None,
            attempts: 0,
            error: None,
        }
    }

    pub fn payload<T: serde::de::DeserializeOwned>(&self) -> anyhow::Result<T> {
        serde_json::from_value(self.payload.clone())
            .map_err(|err| anyhow::anyhow!("invalid {:?} payload: {err}", self.kind))
    }
}

/// One element of the queue document. Anything that does not decode as a task
/// is carried through untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(untagged)]
pub enum QueueEntry {
    Task(Task),
    Malformed(serde_json::Value),
}

impl QueueEntry {
    pub fn as_task(&self) -> Option<&Task> {
        match self {
            Self::Task(task) => Some(task),
            Self::Malformed(_) => None,
        }
    }
}

pub type Queue = Vec<QueueEntry>;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddComicPayload {
    #[serde(alias = "url", alias = "comic_url")]
    pub source_url: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncChaptersPayload {
    #[serde(alias = "url", alias = "comic_url")]
    pub source_url: String,
    #[serde(
        default,
        alias = "start_chapter",
        deserialize_with = "chapter_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub start: Option<ChapterNumber>,
    #[serde(
        default,
        alias = "end_chapter",
        deserialize_with = "chapter_opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub end: Option<ChapterNumber>,
    #[serde(default)]
    pub overwrite: bool,
    /// Stored comic to merge into when it differs from the id the URL
    /// resolves to.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub comic_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "scope", rename_all = "snake_case")]
pub enum RewriteUrlPayload {
    /// Point one comic at a new upstream URL.
    Comic {
        comic_id: String,
        #[serde(alias = "new_url")]
        new_source_url: String,
    },
    /// Replace a URL fragment (usually a domain) everywhere.
    Domain { old: String, new: String },
}

/// Chapter bounds written by hand or by older tools may be JSON numbers.
fn chapter_opt<'de, D>(deserializer: D) -> Result<Option<ChapterNumber>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    let raw = Option::<Raw>::deserialize(deserializer)?;
    let text = match raw {
        None => return Ok(None),
        Some(Raw::Text(text)) => text,
        Some(Raw::Number(number)) => number.to_string(),
    };
    text.parse().map(Some).map_err(serde::de::Error::custom)
}

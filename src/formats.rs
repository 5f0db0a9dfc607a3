use std::collections::BTreeMap;

use serde::{Deserialize, Deserializer, Serialize};

pub type Index = BTreeMap<String, IndexEntry>;
pub type ChapterMap = BTreeMap<String, Chapter>;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IndexEntry {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default, rename = "cover", alias = "cover_url")]
    pub cover_url: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub genre: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub total_chapters: usize,
}

impl IndexEntry {
    /// Entry derived from a comic record. `source_url` falls back to the
    /// previous entry's when the record has none.
    pub fn from_record(record: &ComicRecord, previous: Option<&IndexEntry>) -> Self {
        Self {
            title: record.title.clone(),
            synopsis: record.synopsis.clone(),
            cover_url: record.cover_url.clone(),
            genre: record.genre.clone(),
            kind: record.kind.clone(),
            author: record.author.clone(),
            source_url: record
                .source_url
                .clone()
                .or_else(|| previous.and_then(|entry| entry.source_url.clone())),
            total_chapters: record.chapters.len(),
        }
    }
}

/// Per-comic document. Keys this type does not know about are kept in `extra`
/// so read-modify-write never drops them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ComicRecord {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub synopsis: String,
    #[serde(default, rename = "cover", alias = "cover_url")]
    pub cover_url: String,
    #[serde(default, deserialize_with = "string_or_list")]
    pub genre: String,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub author: String,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    #[serde(default)]
    pub chapters: ChapterMap,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl ComicRecord {
    /// Fill empty display fields from freshly scraped metadata. Non-empty
    /// fields are left alone.
    pub fn fill_missing_metadata(&mut self, metadata: &ComicMetadata) {
        fill(&mut self.title, &metadata.title);
        fill(&mut self.synopsis, &metadata.synopsis);
        fill(&mut self.cover_url, &metadata.cover_url);
        fill(&mut self.genre, &metadata.genre);
        fill(&mut self.kind, &metadata.kind);
        fill(&mut self.author, &metadata.author);
    }

    /// Overwrite display fields with scraped metadata where the scrape found
    /// something.
    pub fn refresh_metadata(&mut self, metadata: &ComicMetadata) {
        replace_non_empty(&mut self.title, &metadata.title);
        replace_non_empty(&mut self.synopsis, &metadata.synopsis);
        replace_non_empty(&mut self.cover_url, &metadata.cover_url);
        replace_non_empty(&mut self.genre, &metadata.genre);
        replace_non_empty(&mut self.kind, &metadata.kind);
        replace_non_empty(&mut self.author, &metadata.author);
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Chapter {
    #[serde(default, alias = "images")]
    pub pages: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, alias = "url", skip_serializing_if = "Option::is_none")]
    pub source_chapter_url: Option<String>,
}

/// Display metadata scraped from a comic's landing page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ComicMetadata {
    pub title: String,
    pub synopsis: String,
    pub cover_url: String,
    pub genre: String,
    pub kind: String,
    pub author: String,
}

fn fill(field: &mut String, value: &str) {
    if field.trim().is_empty() && !value.trim().is_empty() {
        *field = value.trim().to_owned();
    }
}

fn replace_non_empty(field: &mut String, value: &str) {
    if !value.trim().is_empty() {
        *field = value.trim().to_owned();
    }
}

fn string_or_list<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum StringOrList {
        One(String),
        Many(Vec<String>),
        Null(()),
    }

    Ok(match StringOrList::deserialize(deserializer)? {
        StringOrList::One(value) => value,
        StringOrList::Many(values) => values.join(", "),
        StringOrList::Null(()) => String::new(),
    })
}

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use anyhow::Context as _;
use serde::Serialize;

use crate::formats::{ComicRecord, Index, IndexEntry};
use crate::store::DocumentStore;

const INDEX_FILE: &str = "index.json";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpsertOutcome {
    pub comic_written: bool,
    pub index_written: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RewriteReport {
    pub comics_changed: Vec<String>,
    pub index_entries_changed: Vec<String>,
}

impl RewriteReport {
    /// Distinct comics whose comic document or index entry changed.
    pub fn changed_count(&self) -> usize {
        self.comics_changed
            .iter()
            .chain(&self.index_entries_changed)
            .collect::<BTreeSet<_>>()
            .len()
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RebuildReport {
    pub refreshed: Vec<String>,
    pub skipped: Vec<String>,
    pub orphaned: Vec<String>,
}

/// Sole writer of the index and comic documents.
#[derive(Debug, Clone)]
pub struct Catalog {
    store: DocumentStore,
    data_dir: PathBuf,
}

impl Catalog {
    pub fn new(store: DocumentStore, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            store,
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn index_path(&self) -> PathBuf {
        self.data_dir.join(INDEX_FILE)
    }

    pub fn comic_path(&self, comic_id: &str) -> anyhow::Result<PathBuf> {
        validate_comic_id(comic_id)?;
        Ok(self.data_dir.join(format!("{comic_id}.json")))
    }

    pub fn index(&self) -> anyhow::Result<Index> {
        self.store.read(&self.index_path()).context("read index")
    }

    pub fn index_entry(&self, comic_id: &str) -> anyhow::Result<Option<IndexEntry>> {
        Ok(self.index()?.remove(comic_id))
    }

    pub fn comic(&self, comic_id: &str) -> anyhow::Result<Option<ComicRecord>> {
        let path = self.comic_path(comic_id)?;
        self.store
            .read_existing(&path)
            .with_context(|| format!("read comic {comic_id}"))
    }

    /// Ids known to the index or present as comic documents, sorted.
    pub fn comic_ids(&self) -> anyhow::Result<Vec<String>> {
        let mut ids: BTreeSet<String> = self.index()?.into_keys().collect();
        for path in self.store.list_documents(&self.data_dir)? {
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if path.file_name().and_then(|n| n.to_str()) == Some(INDEX_FILE) {
                continue;
            }
            ids.insert(stem.to_owned());
        }
        Ok(ids.into_iter().collect())
    }

    pub fn upsert_comic(
        &self,
        comic_id: &str,
        record: ComicRecord,
    ) -> anyhow::Result<UpsertOutcome> {
        let ((), outcome) = self.upsert_comic_with(comic_id, |current| {
            *current = record;
            Ok(())
        })?;
        Ok(outcome)
    }

    /// Modify the comic document under its lock, then recompute its index
    /// entry from what was written.
    ///
    /// The two documents are written separately. If the process dies between
    /// them the index is stale until the next upsert of that comic.
    pub fn upsert_comic_with<R>(
        &self,
        comic_id: &str,
        f: impl FnOnce(&mut ComicRecord) -> anyhow::Result<R>,
    ) -> anyhow::Result<(R, UpsertOutcome)> {
        let path = self.comic_path(comic_id)?;
        let ((result, record), comic_written) = self
            .store
            .update(&path, |record: &mut ComicRecord| {
                let result = f(record)?;
                Ok((result, record.clone()))
            })
            .with_context(|| format!("write comic {comic_id}"))?;

        let index_written = self.refresh_index_entry(comic_id, &record)?;
        if comic_written || index_written {
            tracing::info!(
                comic_id,
                chapters = record.chapters.len(),
                comic_written,
                index_written,
                "upserted comic"
            );
        }
        Ok((
            result,
            UpsertOutcome {
                comic_written,
                index_written,
            },
        ))
    }

    fn refresh_index_entry(&self, comic_id: &str, record: &ComicRecord) -> anyhow::Result<bool> {
        let ((), written) = self
            .store
            .update(&self.index_path(), |index: &mut Index| {
                let entry = IndexEntry::from_record(record, index.get(comic_id));
                index.insert(comic_id.to_owned(), entry);
                Ok(())
            })
            .context("write index")?;
        Ok(written)
    }

    /// Point one comic at a new upstream URL. Returns whether anything changed.
    pub fn rewrite_source_location(
        &self,
        comic_id: &str,
        new_source_url: &str,
    ) -> anyhow::Result<bool> {
        let new_url = crate::source_url::parse_source_url(new_source_url)?;
        let new_source_url = new_url.to_string();
        if let Ok(resolved) = crate::source_url::resolve_comic_id(&new_source_url)
            && resolved != comic_id
        {
            tracing::warn!(
                comic_id,
                resolved,
                "new source url resolves to a different comic id; keeping the stored id"
            );
        }

        let path = self.comic_path(comic_id)?;
        let has_document = path.exists();
        let mut changed = false;

        if has_document {
            let ((), written) = self.upsert_comic_with(comic_id, |record| {
                record.source_url = Some(new_source_url.clone());
                Ok(())
            })?;
            changed |= written.comic_written || written.index_written;
        }

        let (known, written) = self
            .store
            .update(&self.index_path(), |index: &mut Index| {
                Ok(match index.get_mut(comic_id) {
                    Some(entry) => {
                        entry.source_url = Some(new_source_url.clone());
                        true
                    }
                    None => false,
                })
            })
            .context("write index")?;
        changed |= written;

        if !has_document && !known {
            anyhow::bail!("unknown comic: {comic_id}");
        }
        tracing::info!(comic_id, new_source_url = %new_source_url, changed, "rewrote source location");
        Ok(changed)
    }

    /// Replace `old` with `new` in every stored URL of the index and of every
    /// comic document. Documents whose fields come out identical are not
    /// written, so a repeated call reports nothing changed.
    pub fn rewrite_all_occurrences(&self, old: &str, new: &str) -> anyhow::Result<RewriteReport> {
        if old.is_empty() {
            anyhow::bail!("fragment to replace must not be empty");
        }

        let mut report = RewriteReport::default();
        for comic_id in self.comic_ids()? {
            let path = self.comic_path(&comic_id)?;
            if !path.exists() {
                continue;
            }
            let (changed, _) = self
                .store
                .update(&path, |record: &mut ComicRecord| {
                    Ok(rewrite_record(record, old, new))
                })
                .with_context(|| format!("rewrite comic {comic_id}"))?;
            if changed {
                report.comics_changed.push(comic_id);
            }
        }

        let (entries_changed, _) = self
            .store
            .update(&self.index_path(), |index: &mut Index| {
                let mut changed = Vec::new();
                for (comic_id, entry) in index.iter_mut() {
                    let mut touched = rewrite_field(&mut entry.cover_url, old, new);
                    if let Some(source_url) = entry.source_url.as_mut() {
                        touched |= rewrite_field(source_url, old, new);
                    }
                    if touched {
                        changed.push(comic_id.clone());
                    }
                }
                Ok(changed)
            })
            .context("rewrite index")?;
        report.index_entries_changed = entries_changed;

        tracing::info!(
            old,
            new,
            comics = report.comics_changed.len(),
            index_entries = report.index_entries_changed.len(),
            "rewrote stored urls"
        );
        Ok(report)
    }

    /// Regenerate index entries from the comic documents on disk.
    pub fn rebuild_index(&self) -> anyhow::Result<RebuildReport> {
        let mut report = RebuildReport::default();
        let mut records = Vec::new();
        for comic_id in self.comic_ids()? {
            match self.comic(&comic_id)? {
                Some(record) if !record.title.trim().is_empty() || !record.chapters.is_empty() => {
                    records.push((comic_id, record));
                }
                Some(_) => {
                    tracing::warn!(comic_id = %comic_id, "comic document is empty; skipping");
                    report.skipped.push(comic_id);
                }
                None => {
                    tracing::warn!(comic_id = %comic_id, "index entry has no comic document");
                    report.orphaned.push(comic_id);
                }
            }
        }

        self.store
            .update(&self.index_path(), |index: &mut Index| {
                for (comic_id, record) in &records {
                    let entry = IndexEntry::from_record(record, index.get(comic_id));
                    index.insert(comic_id.clone(), entry);
                }
                Ok(())
            })
            .context("write index")?;
        report.refreshed = records.into_iter().map(|(comic_id, _)| comic_id).collect();
        Ok(report)
    }
}

fn validate_comic_id(comic_id: &str) -> anyhow::Result<()> {
    if comic_id.is_empty()
        || comic_id == "."
        || comic_id == ".."
        || comic_id.contains(['/', '\\'])
        || format!("{comic_id}.json") == INDEX_FILE
    {
        anyhow::bail!("invalid comic id: {comic_id:?}");
    }
    Ok(())
}

fn rewrite_record(record: &mut ComicRecord, old: &str, new: &str) -> bool {
    let mut changed = rewrite_field(&mut record.cover_url, old, new);
    if let Some(source_url) = record.source_url.as_mut() {
        changed |= rewrite_field(source_url, old, new);
    }
    for chapter in record.chapters.values_mut() {
        if let Some(url) = chapter.source_chapter_url.as_mut() {
            changed |= rewrite_field(url, old, new);
        }
        for page in &mut chapter.pages {
            changed |= rewrite_field(page, old, new);
        }
    }
    changed
}

fn rewrite_field(field: &mut String, old: &str, new: &str) -> bool {
    let rewritten = replace_fragment(field, old, new);
    if rewritten == *field {
        return false;
    }
    *field = rewritten;
    true
}

/// Replace `old` with `new`. When `new` itself contains `old`, text that
/// already reads `new` is left alone so applying the rewrite twice is a no-op.
fn replace_fragment(input: &str, old: &str, new: &str) -> String {
    if !input.contains(old) {
        return input.to_owned();
    }
    if !new.contains(old) {
        return input.replace(old, new);
    }

    let mut out = String::with_capacity(input.len() + new.len());
    let mut rest = input;
    while !rest.is_empty() {
        if rest.starts_with(new) {
            out.push_str(new);
            rest = &rest[new.len()..];
        } else if rest.starts_with(old) {
            out.push_str(new);
            rest = &rest[old.len()..];
        } else {
            let mut chars = rest.chars();
            if let Some(ch) = chars.next() {
                out.push(ch);
            }
            rest = chars.as_str();
        }
    }
    out
}

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use anyhow::Context as _;
use serde::Serialize;

use crate::catalog::{Catalog, UpsertOutcome};
use crate::chapter_key::{ChapterNumber, ChapterRange};
use crate::fetch::Fetcher;
use crate::formats::{Chapter, ComicMetadata};
use crate::mirror::{Mirror, cover_placement, page_placement};
use crate::scrape::Scraper;
use crate::source_url::resolve_comic_id;

#[derive(Debug, Clone)]
pub struct SyncRequest {
    pub source_url: String,
    pub range: ChapterRange,
    pub overwrite: bool,
    /// Cap on how many in-range chapters are considered, lowest first.
    pub limit: Option<usize>,
    /// Catalog id the chapters belong to. Resolved from `source_url` when
    /// unset; a stored comic may point at a URL whose slug differs from its id.
    pub comic_id: Option<String>,
}

impl SyncRequest {
    pub fn new(source_url: impl Into<String>, range: ChapterRange) -> Self {
        Self {
            source_url: source_url.into(),
            range,
            overwrite: false,
            limit: None,
            comic_id: None,
        }
    }

    pub fn overwrite(mut self, overwrite: bool) -> Self {
        self.overwrite = overwrite;
        self
    }

    pub fn limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }

    pub fn comic_id(mut self, comic_id: impl Into<String>) -> Self {
        self.comic_id = Some(comic_id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ChapterStatus {
    Fetched,
    SkippedExists,
    NoImages,
    FetchFailed { reason: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ChapterOutcome {
    pub key: String,
    #[serde(flatten)]
    pub status: ChapterStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub comic_id: String,
    pub outcomes: Vec<ChapterOutcome>,
    #[serde(skip)]
    pub persisted: UpsertOutcome,
}

impl SyncReport {
    pub fn count(&self, wanted: fn(&ChapterStatus) -> bool) -> usize {
        self.outcomes.iter().filter(|o| wanted(&o.status)).count()
    }

    pub fn fetched(&self) -> usize {
        self.count(|s| matches!(s, ChapterStatus::Fetched))
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, ChapterStatus::FetchFailed { .. }))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AddReport {
    pub comic_id: String,
    pub created: bool,
    pub sync: SyncReport,
}

/// Reconciles comic records against the upstream site.
#[derive(Clone)]
pub struct Synchronizer {
    catalog: Catalog,
    fetcher: Arc<dyn Fetcher>,
    scraper: Arc<dyn Scraper>,
    mirror: Arc<dyn Mirror>,
}

impl Synchronizer {
    pub fn new(
        catalog: Catalog,
        fetcher: Arc<dyn Fetcher>,
        scraper: Arc<dyn Scraper>,
        mirror: Arc<dyn Mirror>,
    ) -> Self {
        Self {
            catalog,
            fetcher,
            scraper,
            mirror,
        }
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Bring the comic behind `request.source_url` up to date for the requested
    /// range.
    ///
    /// Chapter-level failures end up in the report. Only an unresolvable comic
    /// id, an unreachable listing page or a store failure is an error.
    pub fn sync(&self, request: &SyncRequest) -> anyhow::Result<SyncReport> {
        let comic_id = match &request.comic_id {
            Some(comic_id) => comic_id.clone(),
            None => resolve_comic_id(&request.source_url)?,
        };
        let page = self.fetch_listing(&request.source_url)?;
        let listing = self.scraper.chapter_listing(&request.source_url, &page);
        if listing.is_empty() {
            anyhow::bail!("no chapters listed at {}", request.source_url);
        }
        self.sync_listed(&comic_id, request, &page, &listing)
    }

    /// Create or refresh a comic from its landing page, then fetch the first
    /// listed chapter.
    pub fn add_comic(&self, source_url: &str) -> anyhow::Result<AddReport> {
        let comic_id = resolve_comic_id(source_url)?;
        let page = self.fetch_listing(source_url)?;
        let metadata = self.mirrored_metadata(&comic_id, source_url, &page);

        let (created, _) = self.catalog.upsert_comic_with(&comic_id, |record| {
            let created = record.title.trim().is_empty() && record.chapters.is_empty();
            record.refresh_metadata(&metadata);
            record.source_url = Some(source_url.trim().to_owned());
            Ok(created)
        })?;
        tracing::info!(comic_id = %comic_id, created, title = %metadata.title, "added comic");

        let listing = self.scraper.chapter_listing(source_url, &page);
        let request = SyncRequest::new(source_url.trim(), ChapterRange::all()).limit(Some(1));
        let sync = if listing.is_empty() {
            tracing::warn!(comic_id = %comic_id, source_url, "comic lists no chapters yet");
            SyncReport {
                comic_id: comic_id.clone(),
                outcomes: Vec::new(),
                persisted: UpsertOutcome::default(),
            }
        } else {
            self.sync_listed(&comic_id, &request, &page, &listing)?
        };

        Ok(AddReport {
            comic_id,
            created,
            sync,
        })
    }

    fn fetch_listing(&self, source_url: &str) -> anyhow::Result<String> {
        self.fetcher
            .fetch_page(source_url)
            .with_context(|| format!("fetch chapter listing: {source_url}"))
    }

    fn sync_listed(
        &self,
        comic_id: &str,
        request: &SyncRequest,
        listing_page: &str,
        listing: &BTreeMap<ChapterNumber, String>,
    ) -> anyhow::Result<SyncReport> {
        let existing = self.catalog.comic(comic_id)?;
        let known = existing
            .as_ref()
            .map(|record| chapter_numbers(record.chapters.keys()))
            .unwrap_or_default();

        let candidates: Vec<(&ChapterNumber, &String)> = listing
            .iter()
            .filter(|(number, _)| request.range.contains(number))
            .take(request.limit.unwrap_or(usize::MAX))
            .collect();
        tracing::info!(
            comic_id,
            listed = listing.len(),
            candidates = candidates.len(),
            range = %request.range,
            overwrite = request.overwrite,
            "syncing chapters"
        );

        let mut outcomes = Vec::with_capacity(candidates.len());
        let mut staged = BTreeMap::new();
        for (number, chapter_url) in candidates {
            let key = number.key();
            let status = if known.contains(number) && !request.overwrite {
                ChapterStatus::SkippedExists
            } else {
                match self.fetch_chapter(comic_id, &key, chapter_url) {
                    Ok(Some(chapter)) => {
                        staged.insert(number.clone(), chapter);
                        ChapterStatus::Fetched
                    }
                    Ok(None) => ChapterStatus::NoImages,
                    Err(err) => {
                        let reason = format!("{err:#}");
                        tracing::error!(comic_id, chapter = %key, reason = %reason, "chapter fetch failed");
                        ChapterStatus::FetchFailed { reason }
                    }
                }
            };
            outcomes.push(ChapterOutcome { key, status });
        }

        let metadata = existing
            .is_none()
            .then(|| self.mirrored_metadata(comic_id, &request.source_url, listing_page));
        let source_url = request.source_url.trim().to_owned();
        let overwrite = request.overwrite;

        let (raced, persisted) = self.catalog.upsert_comic_with(comic_id, move |record| {
            if record.source_url.is_none() {
                record.source_url = Some(source_url);
            }
            if let Some(metadata) = &metadata {
                record.fill_missing_metadata(metadata);
            }
            let present = chapter_numbers(record.chapters.keys());
            let mut raced = Vec::new();
            for (number, chapter) in staged {
                let key = number.key();
                if overwrite {
                    record
                        .chapters
                        .retain(|existing, _| existing.parse::<ChapterNumber>().ok().as_ref() != Some(&number));
                    record.chapters.insert(key, chapter);
                } else if present.contains(&number) {
                    raced.push(key);
                } else {
                    record.chapters.insert(key, chapter);
                }
            }
            Ok(raced)
        })?;

        for outcome in &mut outcomes {
            if raced.contains(&outcome.key) {
                outcome.status = ChapterStatus::SkippedExists;
            }
        }

        let report = SyncReport {
            comic_id: comic_id.to_owned(),
            outcomes,
            persisted,
        };
        tracing::info!(
            comic_id,
            fetched = report.fetched(),
            failed = report.failed(),
            written = persisted.comic_written,
            "sync finished"
        );
        Ok(report)
    }

    /// `Ok(None)` when the chapter page has no images. Any page that cannot
    /// be mirrored fails the whole chapter so no record ever has gaps.
    fn fetch_chapter(
        &self,
        comic_id: &str,
        key: &str,
        chapter_url: &str,
    ) -> anyhow::Result<Option<Chapter>> {
        let page = self
            .fetcher
            .fetch_page(chapter_url)
            .with_context(|| format!("fetch chapter page: {chapter_url}"))?;
        let images = self.scraper.chapter_images(chapter_url, &page);
        if images.is_empty() {
            tracing::warn!(comic_id, chapter = key, chapter_url, "chapter has no images");
            return Ok(None);
        }

        let mut pages = Vec::with_capacity(images.len());
        for (index, image) in images.iter().enumerate() {
            let placement = page_placement(comic_id, key, index + 1);
            let mirrored = self
                .mirror
                .mirror_image(image, &placement)
                .with_context(|| format!("mirror page {} of {}", index + 1, images.len()))?;
            pages.push(mirrored);
        }
        tracing::debug!(comic_id, chapter = key, pages = pages.len(), "chapter mirrored");

        Ok(Some(Chapter {
            pages,
            title: None,
            source_chapter_url: Some(chapter_url.to_owned()),
        }))
    }

    /// Scraped metadata with the cover moved to the media host. A cover that
    /// cannot be mirrored keeps its upstream URL.
    fn mirrored_metadata(&self, comic_id: &str, source_url: &str, page: &str) -> ComicMetadata {
        let mut metadata = self.scraper.comic_metadata(source_url, page);
        if !metadata.cover_url.is_empty() {
            match self
                .mirror
                .mirror_image(&metadata.cover_url, &cover_placement(comic_id))
            {
                Ok(url) => metadata.cover_url = url,
                Err(err) => {
                    tracing::warn!(comic_id, ?err, "cover mirror failed; keeping upstream url");
                }
            }
        }
        metadata
    }
}

/// Chapter numbers of stored keys, so legacy spellings such as `"01"` match
/// their canonical form.
fn chapter_numbers<'a>(keys: impl IntoIterator<Item = &'a String>) -> BTreeSet<ChapterNumber> {
    keys.into_iter().filter_map(|key| key.parse().ok()).collect()
}

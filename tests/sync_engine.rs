mod stub_site;

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use comichub::catalog::Catalog;
use comichub::chapter_key::{ChapterNumber, ChapterRange};
use comichub::config::{CloudinaryConfig, HttpConfig};
use comichub::fetch::HttpFetcher;
use comichub::formats::{Chapter, ComicRecord, Index, IndexEntry};
use comichub::mirror::{CloudinaryMirror, Mirror, PassthroughMirror};
use comichub::scrape::KomikuScraper;
use comichub::store::DocumentStore;
use comichub::sweep::{SweepReach, sweep_all};
use comichub::sync::{ChapterStatus, SyncRequest, Synchronizer};
use stub_site::StubSite;

fn http_config(retries: u32) -> HttpConfig {
    HttpConfig {
        timeout_secs: 5,
        retries,
        retry_delay_ms: 0,
        ..HttpConfig::default()
    }
}

fn store(dir: &Path) -> DocumentStore {
    DocumentStore::new(dir.join("locks")).with_lock_timeout(Duration::from_secs(5))
}

fn synchronizer(dir: &Path, mirror: Arc<dyn Mirror>) -> anyhow::Result<Synchronizer> {
    let catalog = Catalog::new(store(dir), dir.join("data"));
    Ok(Synchronizer::new(
        catalog,
        Arc::new(HttpFetcher::new(&http_config(2))?),
        Arc::new(KomikuScraper::new()?),
        mirror,
    ))
}

fn cloudinary(site: &StubSite) -> anyhow::Result<Arc<dyn Mirror>> {
    let config = CloudinaryConfig {
        cloud_name: Some("demo".to_owned()),
        api_key: Some("key".to_owned()),
        api_secret: Some("secret".to_owned()),
        folder: "greedycomichub".to_owned(),
        api_base_url: site.cloudinary_base(),
    };
    Ok(Arc::new(CloudinaryMirror::new(&config, &http_config(1))?))
}

fn n(raw: &str) -> ChapterNumber {
    raw.parse().expect("chapter number")
}

fn statuses(report: &comichub::sync::SyncReport) -> Vec<(String, ChapterStatus)> {
    report
        .outcomes
        .iter()
        .map(|o| (o.key.clone(), o.status.clone()))
        .collect()
}

#[test]
fn repeated_sync_fetches_nothing_and_writes_nothing() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("magic-emperor", "Magic Emperor", &["1", "2", "3"]);
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;
    let request = SyncRequest::new(
        site.comic_url("magic-emperor"),
        ChapterRange::inclusive(n("1"), n("3")),
    );

    let first = sync.sync(&request)?;
    assert_eq!(first.fetched(), 3);
    let comic_path = sync.catalog().comic_path("magic-emperor")?;
    let comic_before = std::fs::read(&comic_path)?;
    let index_before = std::fs::read(sync.catalog().index_path())?;

    let second = sync.sync(&request)?;
    assert!(
        second
            .outcomes
            .iter()
            .all(|o| o.status == ChapterStatus::SkippedExists)
    );
    assert!(!second.persisted.comic_written);
    assert!(!second.persisted.index_written);
    assert_eq!(std::fs::read(&comic_path)?, comic_before);
    assert_eq!(std::fs::read(sync.catalog().index_path())?, index_before);
    assert_eq!(site.hits(&StubSite::chapter_path("magic-emperor", "2")), 1);
    Ok(())
}

#[test]
fn sync_merges_without_touching_existing_chapters() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("magic-emperor", "Magic Emperor", &["1", "2", "3"]);
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;

    let mut existing = ComicRecord {
        title: "Hand Edited Title".to_owned(),
        ..ComicRecord::default()
    };
    existing.chapters.insert(
        "1".to_owned(),
        Chapter {
            pages: vec!["https://cdn.example/kept.jpg".to_owned()],
            ..Chapter::default()
        },
    );
    existing
        .extra
        .insert("views".to_owned(), serde_json::json!(1234));
    sync.catalog().upsert_comic("magic-emperor", existing)?;

    let report = sync.sync(&SyncRequest::new(
        site.comic_url("magic-emperor"),
        ChapterRange::all(),
    ))?;
    assert_eq!(
        statuses(&report),
        [
            ("1".to_owned(), ChapterStatus::SkippedExists),
            ("2".to_owned(), ChapterStatus::Fetched),
            ("3".to_owned(), ChapterStatus::Fetched),
        ]
    );

    let record = sync.catalog().comic("magic-emperor")?.expect("record");
    assert_eq!(record.title, "Hand Edited Title");
    assert_eq!(record.chapters["1"].pages, ["https://cdn.example/kept.jpg"]);
    assert_eq!(
        record.chapters["2"].pages,
        [
            site.image_url("magic-emperor", "2", 1),
            site.image_url("magic-emperor", "2", 2)
        ]
    );
    assert_eq!(record.extra.get("views"), Some(&serde_json::json!(1234)));
    assert_eq!(
        record.source_url.as_deref(),
        Some(site.comic_url("magic-emperor").as_str())
    );
    Ok(())
}

#[test]
fn overwrite_replaces_only_the_requested_chapters() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("magic-emperor", "Magic Emperor", &["1", "2", "3"]);
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;

    let mut existing = ComicRecord::default();
    for key in ["1", "2", "3"] {
        existing.chapters.insert(
            key.to_owned(),
            Chapter {
                pages: vec![format!("https://cdn.example/old-{key}.jpg")],
                ..Chapter::default()
            },
        );
    }
    sync.catalog().upsert_comic("magic-emperor", existing)?;

    let report = sync.sync(
        &SyncRequest::new(
            site.comic_url("magic-emperor"),
            ChapterRange::inclusive(n("2"), n("2")),
        )
        .overwrite(true),
    )?;
    assert_eq!(statuses(&report), [("2".to_owned(), ChapterStatus::Fetched)]);

    let record = sync.catalog().comic("magic-emperor")?.expect("record");
    assert_eq!(record.chapters["1"].pages, ["https://cdn.example/old-1.jpg"]);
    assert_eq!(record.chapters["3"].pages, ["https://cdn.example/old-3.jpg"]);
    assert_eq!(record.chapters["2"].pages[0], site.image_url("magic-emperor", "2", 1));
    Ok(())
}

#[test]
fn a_chapter_with_an_unmirrorable_page_is_not_written() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("magic-emperor", "Magic Emperor", &["1", "2", "3"]);
    site.reject_uploads_containing("/img/magic-emperor/2/2.jpg");
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), cloudinary(&site)?)?;

    let report = sync.sync(&SyncRequest::new(
        site.comic_url("magic-emperor"),
        ChapterRange::all(),
    ))?;
    assert_eq!(report.fetched(), 2);
    assert_eq!(report.failed(), 1);
    assert!(matches!(
        &report.outcomes[1].status,
        ChapterStatus::FetchFailed { reason } if reason.contains("resource not found")
    ));

    let record = sync.catalog().comic("magic-emperor")?.expect("record");
    assert_eq!(
        record.chapters.keys().collect::<Vec<_>>(),
        ["1", "3"]
    );
    assert_eq!(
        record.chapters["1"].pages,
        [
            "https://res.cloudinary.test/demo/greedycomichub/magic-emperor/chapter_1/page_1.jpg",
            "https://res.cloudinary.test/demo/greedycomichub/magic-emperor/chapter_1/page_2.jpg",
        ]
    );
    assert_eq!(
        record.cover_url,
        "https://res.cloudinary.test/demo/greedycomichub/magic-emperor/cover.jpg"
    );
    Ok(())
}

#[test]
fn sync_repairs_a_stale_index_entry() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("magic-emperor", "Magic Emperor", &["1", "2"]);
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;
    let request = SyncRequest::new(site.comic_url("magic-emperor"), ChapterRange::all());
    sync.sync(&request)?;

    let index_path = sync.catalog().index_path();
    let mut index: Index = store(temp.path()).read(&index_path)?;
    index.get_mut("magic-emperor").expect("entry").total_chapters = 40;
    store(temp.path()).write(&index_path, &index)?;

    let report = sync.sync(&request)?;
    assert!(!report.persisted.comic_written);
    assert!(report.persisted.index_written);
    let entry = sync.catalog().index_entry("magic-emperor")?.expect("entry");
    assert_eq!(entry.total_chapters, 2);
    assert_eq!(entry.title, "Magic Emperor");
    assert_eq!(entry.kind, "Manhwa");
    assert_eq!(entry.genre, "Action, Drama");
    Ok(())
}

#[test]
fn unreachable_listing_fails_the_call() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;

    let err = sync
        .sync(&SyncRequest::new(site.comic_url("nowhere"), ChapterRange::all()))
        .unwrap_err();
    assert!(format!("{err:#}").contains("fetch chapter listing"), "{err:#}");
    assert!(sync.catalog().comic("nowhere")?.is_none());
    Ok(())
}

#[test]
fn fractional_chapters_are_ordered_numerically() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("magic-emperor", "Magic Emperor", &["9", "10", "10.5", "11"]);
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;

    let report = sync.sync(&SyncRequest::new(
        site.comic_url("magic-emperor"),
        ChapterRange::after(n("9.5")),
    ))?;
    let keys: Vec<&str> = report.outcomes.iter().map(|o| o.key.as_str()).collect();
    assert_eq!(keys, ["10", "10.5", "11"]);
    Ok(())
}

#[test]
fn add_comic_creates_the_record_and_its_first_chapter() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("manga-solo-leveling", "Solo Leveling", &["0", "1", "2"]);
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;

    let report = sync.add_comic(&site.comic_url("manga-solo-leveling"))?;
    assert_eq!(report.comic_id, "solo-leveling");
    assert!(report.created);
    assert_eq!(statuses(&report.sync), [("0".to_owned(), ChapterStatus::Fetched)]);

    let record = sync.catalog().comic("solo-leveling")?.expect("record");
    assert_eq!(record.title, "Solo Leveling");
    assert_eq!(record.synopsis, "Synopsis of Solo Leveling.");
    assert_eq!(record.author, "Stub Author");
    assert_eq!(
        record.cover_url,
        format!("{}/img/manga-solo-leveling/cover.jpg", site.base_url)
    );
    assert_eq!(record.chapters.len(), 1);

    let again = sync.add_comic(&site.comic_url("manga-solo-leveling"))?;
    assert!(!again.created);
    assert_eq!(
        statuses(&again.sync),
        [("0".to_owned(), ChapterStatus::SkippedExists)]
    );
    Ok(())
}

#[test]
fn sweep_isolates_failing_comics() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("healthy", "Healthy", &["1", "2", "3", "4"]);
    site.add_comic("broken", "Broken", &["1", "2"]);
    site.fail_path("/manga/broken/");
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;

    sync.sync(&SyncRequest::new(
        site.comic_url("healthy"),
        ChapterRange::inclusive(n("1"), n("2")),
    ))?;
    let mut broken = ComicRecord {
        title: "Broken".to_owned(),
        source_url: Some(site.comic_url("broken")),
        ..ComicRecord::default()
    };
    broken.chapters.insert("1".to_owned(), Chapter::default());
    sync.catalog().upsert_comic("broken", broken)?;

    let index_path = sync.catalog().index_path();
    let mut index: Index = store(temp.path()).read(&index_path)?;
    index.insert(
        "no-source".to_owned(),
        IndexEntry {
            title: "No Source".to_owned(),
            ..IndexEntry::default()
        },
    );
    index.insert(
        "no-document".to_owned(),
        IndexEntry {
            title: "No Document".to_owned(),
            source_url: Some(site.comic_url("no-document")),
            ..IndexEntry::default()
        },
    );
    store(temp.path()).write(&index_path, &index)?;

    let report = sweep_all(&sync, SweepReach::Next)?;
    assert_eq!(report.succeeded, ["healthy"]);
    let failed: Vec<&str> = report.failed.iter().map(|f| f.comic_id.as_str()).collect();
    assert_eq!(failed, ["broken", "no-document", "no-source"]);
    assert_eq!(
        report.failed[0].source_url.as_deref(),
        Some(site.comic_url("broken").as_str())
    );

    let healthy = sync.catalog().comic("healthy")?.expect("record");
    assert_eq!(healthy.chapters.keys().collect::<Vec<_>>(), ["1", "2", "3"]);

    let report = sweep_all(&sync, SweepReach::All)?;
    assert_eq!(report.succeeded, ["healthy"]);
    let healthy = sync.catalog().comic("healthy")?.expect("record");
    assert_eq!(healthy.chapters.len(), 4);
    Ok(())
}

#[test]
fn sweep_advances_the_stored_comic_after_its_source_moved() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("new-slug", "Magic Emperor", &["1", "2", "3"]);
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;

    let mut existing = ComicRecord {
        title: "Magic Emperor".to_owned(),
        source_url: Some(site.comic_url("magic-emperor")),
        ..ComicRecord::default()
    };
    existing.chapters.insert("1".to_owned(), Chapter::default());
    sync.catalog().upsert_comic("magic-emperor", existing)?;
    sync.catalog()
        .rewrite_source_location("magic-emperor", &site.comic_url("new-slug"))?;

    let report = sweep_all(&sync, SweepReach::Next)?;
    assert_eq!(report.succeeded, ["magic-emperor"]);
    assert!(report.failed.is_empty());
    assert_eq!(report.reports[0].comic_id, "magic-emperor");
    assert_eq!(statuses(&report.reports[0]), [("2".to_owned(), ChapterStatus::Fetched)]);

    let record = sync.catalog().comic("magic-emperor")?.expect("record");
    assert_eq!(record.chapters.keys().collect::<Vec<_>>(), ["1", "2"]);
    assert!(sync.catalog().comic("new-slug")?.is_none());
    let index = sync.catalog().index()?;
    assert_eq!(index.keys().collect::<Vec<_>>(), ["magic-emperor"]);
    assert_eq!(index["magic-emperor"].total_chapters, 2);
    Ok(())
}

#[test]
fn a_chapter_without_images_is_reported_and_not_written() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("magic-emperor", "Magic Emperor", &["1", "2", "3"]);
    site.empty_chapter("magic-emperor", "2");
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;

    let report = sync.sync(&SyncRequest::new(
        site.comic_url("magic-emperor"),
        ChapterRange::all(),
    ))?;
    assert_eq!(
        statuses(&report),
        [
            ("1".to_owned(), ChapterStatus::Fetched),
            ("2".to_owned(), ChapterStatus::NoImages),
            ("3".to_owned(), ChapterStatus::Fetched),
        ]
    );
    let record = sync.catalog().comic("magic-emperor")?.expect("record");
    assert_eq!(record.chapters.keys().collect::<Vec<_>>(), ["1", "3"]);
    Ok(())
}

#[test]
fn an_empty_refetch_keeps_the_stored_chapter() -> anyhow::Result<()> {
    let site = StubSite::spawn();
    site.add_comic("magic-emperor", "Magic Emperor", &["1", "2"]);
    let temp = tempfile::TempDir::new()?;
    let sync = synchronizer(temp.path(), Arc::new(PassthroughMirror))?;
    sync.sync(&SyncRequest::new(
        site.comic_url("magic-emperor"),
        ChapterRange::all(),
    ))?;
    let before = sync.catalog().comic("magic-emperor")?.expect("record");
    let comic_bytes = std::fs::read(sync.catalog().comic_path("magic-emperor")?)?;

    site.empty_chapter("magic-emperor", "2");
    let report = sync.sync(
        &SyncRequest::new(
            site.comic_url("magic-emperor"),
            ChapterRange::inclusive(n("2"), n("2")),
        )
        .overwrite(true),
    )?;
    assert_eq!(statuses(&report), [("2".to_owned(), ChapterStatus::NoImages)]);
    assert!(!report.persisted.comic_written);

    let after = sync.catalog().comic("magic-emperor")?.expect("record");
    assert_eq!(after, before);
    assert_eq!(
        after.chapters["2"].pages,
        [
            site.image_url("magic-emperor", "2", 1),
            site.image_url("magic-emperor", "2", 2)
        ]
    );
    assert_eq!(
        std::fs::read(sync.catalog().comic_path("magic-emperor")?)?,
        comic_bytes
    );
    Ok(())
}

use std::collections::{BTreeMap, HashSet};

use anyhow::Context as _;
use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use url::Url;

use crate::chapter_key::ChapterNumber;
use crate::formats::ComicMetadata;
use crate::source_url::absolutize;

/// Site-specific extraction over already fetched page content.
///
/// Every method is best effort: when no strategy matches, the result is empty
/// rather than an error, so callers never need to know which markup variant
/// the site served.
pub trait Scraper: Send + Sync {
    fn chapter_listing(&self, source_url: &str, page: &str) -> BTreeMap<ChapterNumber, String>;
    fn chapter_images(&self, chapter_url: &str, page: &str) -> Vec<String>;
    fn comic_metadata(&self, source_url: &str, page: &str) -> ComicMetadata;
}

const LISTING_SELECTORS: &[&str] = &[
    "td.judulseries a[href]",
    "#Daftar_Chapter a[href]",
    "ul.chapters a[href]",
    "#chapterlist a[href]",
    "a[href*='chapter']",
];

const IMAGE_SELECTORS: &[&str] = &[
    "#Baca_Komik img",
    "div.baca-komik img",
    "div.konten img",
    "div.reader-area img",
    "img[itemprop='image']",
];

const IMAGE_ATTRS: &[&str] = &["data-src", "data-lazy-src", "src"];
const IMAGE_PLACEHOLDERS: &[&str] = &["lazy.jpg", "thumbnail", "loading.gif"];

/// Scraper for komiku-style comic sites.
#[derive(Debug, Clone)]
pub struct KomikuScraper {
    chapter_pattern: Regex,
}

impl KomikuScraper {
    pub fn new() -> anyhow::Result<Self> {
        Ok(Self {
            chapter_pattern: Regex::new(r"(?i)chapter[-_ ]*0*(\d+(?:[.\-]\d+)?)")
                .context("compile chapter pattern")?,
        })
    }

    fn chapter_number(&self, text: &str) -> Option<ChapterNumber> {
        let captures = self.chapter_pattern.captures(text)?;
        let raw = captures.get(1)?.as_str().replace('-', ".");
        raw.parse().ok()
    }
}

impl Scraper for KomikuScraper {
    fn chapter_listing(&self, source_url: &str, page: &str) -> BTreeMap<ChapterNumber, String> {
        let Ok(base) = Url::parse(source_url) else {
            return BTreeMap::new();
        };
        let document = Html::parse_document(page);

        for raw_selector in LISTING_SELECTORS {
            let Some(selector) = selector(raw_selector) else {
                continue;
            };
            let mut chapters = BTreeMap::new();
            for link in document.select(&selector) {
                let Some(href) = link.value().attr("href") else {
                    continue;
                };
                let number = self
                    .chapter_number(href)
                    .or_else(|| self.chapter_number(&element_text(&link)));
                let (Some(number), Some(url)) = (number, absolutize(&base, href)) else {
                    continue;
                };
                chapters.entry(number).or_insert(url);
            }
            if !chapters.is_empty() {
                tracing::debug!(selector = raw_selector, chapters = chapters.len(), "chapter listing matched");
                return chapters;
            }
        }

        tracing::warn!(source_url, "no chapter listing strategy matched");
        BTreeMap::new()
    }

    fn chapter_images(&self, chapter_url: &str, page: &str) -> Vec<String> {
        let Ok(base) = Url::parse(chapter_url) else {
            return Vec::new();
        };
        let document = Html::parse_document(page);

        for raw_selector in IMAGE_SELECTORS {
            let Some(selector) = selector(raw_selector) else {
                continue;
            };
            let mut seen = HashSet::new();
            let mut images = Vec::new();
            for img in document.select(&selector) {
                let Some(src) = IMAGE_ATTRS
                    .iter()
                    .filter_map(|attr| img.value().attr(attr))
                    .map(str::trim)
                    .find(|src| !src.is_empty() && !is_placeholder(src))
                else {
                    continue;
                };
                if let Some(url) = absolutize(&base, src)
                    && seen.insert(url.clone())
                {
                    images.push(url);
                }
            }
            if !images.is_empty() {
                tracing::debug!(selector = raw_selector, images = images.len(), "chapter images matched");
                return images;
            }
        }

        tracing::warn!(chapter_url, "no chapter image strategy matched");
        Vec::new()
    }

    fn comic_metadata(&self, source_url: &str, page: &str) -> ComicMetadata {
        let document = Html::parse_document(page);
        let base = Url::parse(source_url).ok();

        let cover_url = first_attr(
            &document,
            &[
                ("div.ims img", "src"),
                ("img[itemprop='image']", "src"),
                ("img.cover", "src"),
                ("meta[property='og:image']", "content"),
            ],
        )
        .and_then(|src| match &base {
            Some(base) => absolutize(base, &src),
            None => Some(src),
        })
        .unwrap_or_default();

        ComicMetadata {
            title: first_text(
                &document,
                &["h1.judul", "h1[itemprop='name']", "#Judul h1", "h1.title", "h1"],
            )
            .unwrap_or_default(),
            synopsis: first_text(
                &document,
                &["div.sinopsis", "p.desc", "div.desc", "div[itemprop='description']"],
            )
            .or_else(|| first_attr(&document, &[("meta[name='description']", "content")]))
            .unwrap_or_default(),
            cover_url,
            genre: all_texts(&document, &["a[itemprop='genre']", "ul.genre li a", "a.genre"])
                .join(", "),
            kind: first_text(&document, &["span.jenis-komik"])
                .or_else(|| table_value(&document, &["jenis", "type"]))
                .unwrap_or_default(),
            author: table_value(&document, &["pengarang", "komikus", "author"])
                .or_else(|| first_text(&document, &["span.author", "a[rel='tag']"]))
                .unwrap_or_default(),
        }
    }
}

fn selector(raw: &str) -> Option<Selector> {
    match Selector::parse(raw) {
        Ok(selector) => Some(selector),
        Err(err) => {
            tracing::debug!(selector = raw, %err, "invalid css selector");
            None
        }
    }
}

fn is_placeholder(src: &str) -> bool {
    let lower = src.to_ascii_lowercase();
    IMAGE_PLACEHOLDERS.iter().any(|marker| lower.contains(marker))
}

fn element_text(element: &ElementRef<'_>) -> String {
    element
        .text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn first_text(document: &Html, selectors: &[&str]) -> Option<String> {
    selectors.iter().find_map(|raw| {
        let selector = selector(raw)?;
        document
            .select(&selector)
            .map(|element| element_text(&element))
            .find(|text| !text.is_empty())
    })
}

fn first_attr(document: &Html, selectors: &[(&str, &str)]) -> Option<String> {
    selectors.iter().find_map(|(raw, attr)| {
        let selector = selector(raw)?;
        document
            .select(&selector)
            .filter_map(|element| element.value().attr(attr))
            .map(str::trim)
            .find(|value| !value.is_empty())
            .map(str::to_owned)
    })
}

fn all_texts(document: &Html, selectors: &[&str]) -> Vec<String> {
    for raw in selectors {
        let Some(selector) = selector(raw) else {
            continue;
        };
        let mut seen = HashSet::new();
        let texts: Vec<String> = document
            .select(&selector)
            .map(|element| element_text(&element))
            .filter(|text| !text.is_empty() && seen.insert(text.clone()))
            .collect();
        if !texts.is_empty() {
            return texts;
        }
    }
    Vec::new()
}

/// Value cell of an info-table row whose label cell starts with one of `labels`.
fn table_value(document: &Html, labels: &[&str]) -> Option<String> {
    let rows = selector("table tr")?;
    let cells = selector("td, th")?;
    document.select(&rows).find_map(|row| {
        let mut row_cells = row.select(&cells);
        let label = element_text(&row_cells.next()?).to_lowercase();
        if !labels.iter().any(|wanted| label.starts_with(wanted)) {
            return None;
        }
        let value = element_text(&row_cells.next()?);
        (!value.is_empty()).then_some(value)
    })
}

use anyhow::Context as _;
use url::Url;

/// Slug prefixes the upstream site puts in front of the comic slug.
const SLUG_PREFIXES: &[&str] = &["manga-"];

pub fn parse_source_url(raw: &str) -> anyhow::Result<Url> {
    let url = Url::parse(raw.trim()).with_context(|| format!("parse source url: {raw}"))?;
    if url.scheme() != "http" && url.scheme() != "https" {
        anyhow::bail!("source url must be http/https: {url}");
    }
    Ok(url)
}

/// Strip query, fragment and trailing slashes.
pub fn canonical_source_url(url: &Url) -> Url {
    let mut canonical = url.clone();
    canonical.set_fragment(None);
    canonical.set_query(None);
    let mut path = canonical.path().to_owned();
    while path.len() > 1 && path.ends_with('/') {
        path.pop();
    }
    canonical.set_path(&path);
    canonical
}

/// Derive the stable comic id from a source URL.
///
/// Only the last path segment matters, so mirror domains, schemes, trailing
/// slashes, queries and fragments all map to the same id.
pub fn resolve_comic_id(source_url: &str) -> anyhow::Result<String> {
    let url = parse_source_url(source_url)?;
    let canonical = canonical_source_url(&url);
    let segment = canonical
        .path_segments()
        .and_then(|mut segments| segments.next_back())
        .unwrap_or_default();

    let decoded = percent_decode(segment);
    let mut slug = decoded.trim().to_lowercase().replace(' ', "-");
    for prefix in SLUG_PREFIXES {
        if let Some(rest) = slug.strip_prefix(prefix)
            && !rest.is_empty()
        {
            slug = rest.to_owned();
        }
    }

    if slug.is_empty() {
        anyhow::bail!("cannot resolve comic id from url without a path slug: {source_url}");
    }
    if slug == "." || slug == ".." || slug.contains(['/', '\\']) {
        anyhow::bail!("comic id resolved to an unsafe file name: {slug:?}");
    }
    Ok(slug)
}

/// Resolve an href found on a page against the page URL.
pub fn absolutize(base: &Url, href: &str) -> Option<String> {
    let href = href.trim();
    if href.is_empty() || href.starts_with("data:") || href.starts_with("javascript:") {
        return None;
    }
    base.join(href).ok().map(|url| url.to_string())
}

fn percent_decode(segment: &str) -> String {
    url::form_urlencoded::parse(format!("s={segment}").as_bytes())
        .next()
        .map(|(_, value)| value.into_owned())
        .unwrap_or_else(|| segment.to_owned())
}

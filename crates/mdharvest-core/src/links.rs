use pulldown_cmark::{Event, Parser, Tag};
use url::Url;

/// Normalizes a URL for identity comparison: scheme, host, path and query
/// as provided, fragment dropped. Unparseable input is returned trimmed.
pub fn normalize_url(raw: &str) -> String {
    let raw = raw.trim();
    match Url::parse(raw) {
        Ok(mut url) => {
            url.set_fragment(None);
            url.to_string()
        }
        Err(_) => raw.split('#').next().unwrap_or(raw).to_string(),
    }
}

/// Resolves `href` against `base`, keeping only http(s) targets.
pub fn resolve_link(base: &Url, href: &str) -> Option<String> {
    let mut url = base.join(href.trim()).ok()?;
    if !matches!(url.scheme(), "http" | "https") {
        return None;
    }
    url.set_fragment(None);
    Some(url.to_string())
}

/// Collects the outgoing links of a page.
///
/// Links reported by the content service come first, followed by inline
/// Markdown links found in the content. Each target appears once, in
/// first-seen order.
pub fn collect_links(page_url: &str, reported: &[String], markdown: &str) -> Vec<String> {
    let Ok(base) = Url::parse(page_url) else {
        return Vec::new();
    };

    let from_markdown = Parser::new(markdown).filter_map(|event| match event {
        Event::Start(Tag::Link { dest_url, .. }) => Some(dest_url.into_string()),
        _ => None,
    });

    let mut seen = std::collections::HashSet::new();
    reported
        .iter()
        .cloned()
        .chain(from_markdown)
        .filter_map(|href| resolve_link(&base, &href))
        .filter(|url| seen.insert(url.clone()))
        .collect()
}

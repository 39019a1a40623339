//! Atom and RSS link extraction.
//!
//! Feeds are crawl inputs, not conversion targets, so only the reference
//! strings matter; spans are carried for uniformity.

use std::sync::LazyLock;

use regex::Regex;

use crate::ExtractedLink;

static ATOM_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<link\b[^>]*?\bhref\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("atom link regex is valid")
});

static RSS_LINK_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<link\s*>\s*([^<\s][^<]*?)\s*</link\s*>").expect("rss link regex is valid")
});

static RSS_ENCLOSURE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<enclosure\b[^>]*?\burl\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("enclosure regex is valid")
});

static RSS_GUID_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<guid\b[^>]*>\s*(https?://[^<\s]+)\s*</guid\s*>")
        .expect("guid regex is valid")
});

/// Extract `<link href=...>` references from an Atom feed.
#[must_use]
pub fn extract_atom_links(text: &str) -> Vec<ExtractedLink> {
    let mut links = Vec::new();
    for caps in ATOM_LINK_RE.captures_iter(text) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            push(&mut links, m.as_str(), m.start());
        }
    }
    links
}

/// Extract item links, enclosures and permalink GUIDs from an RSS feed.
#[must_use]
pub fn extract_rss_links(text: &str) -> Vec<ExtractedLink> {
    let mut links = Vec::new();
    for caps in RSS_LINK_RE.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            push(&mut links, m.as_str(), m.start());
        }
    }
    for caps in RSS_ENCLOSURE_RE.captures_iter(text) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            push(&mut links, m.as_str(), m.start());
        }
    }
    for caps in RSS_GUID_RE.captures_iter(text) {
        if let Some(m) = caps.get(1) {
            push(&mut links, m.as_str(), m.start());
        }
    }
    links
}

fn push(links: &mut Vec<ExtractedLink>, raw: &str, pos: usize) {
    if raw.is_empty() {
        return;
    }
    links.push(ExtractedLink::new(raw, pos, raw.len()));
}

//! Sitemap parsing: XML (plain and gzipped) and plain-text forms.
//!
//! See <https://www.sitemaps.org/protocol.html>. A `<loc>` inside a
//! `<sitemap>` block points at a child sitemap and must be fetched as one;
//! a `<loc>` inside a `<url>` block is an ordinary page.

use std::io::Read;
use std::sync::LazyLock;

use flate2::read::GzDecoder;
use regex::Regex;

use crate::ExtractedLink;

static LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<(sitemap|url)\b[^>]*>.*?<loc\s*>\s*([^<\s]+)\s*</loc\s*>")
        .expect("loc regex is valid")
});

static BARE_LOC_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<loc\s*>\s*([^<\s]+)\s*</loc\s*>").expect("bare loc regex is valid")
});

/// One sitemap reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SitemapEntry {
    pub link: ExtractedLink,
    /// True when the entry points at a child sitemap rather than a page.
    pub is_sitemap: bool,
}

/// Extract entries from a sitemap XML document.
#[must_use]
pub fn extract_sitemap_links(text: &str) -> Vec<SitemapEntry> {
    let mut entries = Vec::new();
    let mut seen_spans = Vec::new();

    for caps in LOC_RE.captures_iter(text) {
        let kind = caps.get(1).map(|m| m.as_str().to_ascii_lowercase());
        if let Some(m) = caps.get(2) {
            seen_spans.push(m.start());
            entries.push(SitemapEntry {
                link: ExtractedLink::new(m.as_str(), m.start(), m.len()),
                is_sitemap: kind.as_deref() == Some("sitemap"),
            });
        }
    }

    // Tolerate sloppy generators that emit <loc> outside <url> blocks.
    for caps in BARE_LOC_RE.captures_iter(text) {
        if let Some(m) = caps.get(1)
            && !seen_spans.contains(&m.start())
        {
            entries.push(SitemapEntry {
                link: ExtractedLink::new(m.as_str(), m.start(), m.len()),
                is_sitemap: false,
            });
        }
    }

    entries
}

/// Extract entries from a gzipped sitemap body.
///
/// Returns `None` when the buffer is not valid gzip.
#[must_use]
pub fn extract_sitemap_links_gz(bytes: &[u8]) -> Option<Vec<SitemapEntry>> {
    let mut decoder = GzDecoder::new(bytes);
    let mut text = String::new();
    match decoder.read_to_string(&mut text) {
        Ok(_) => Some(extract_sitemap_links(&text)),
        Err(e) => {
            tracing::warn!("sitemap gzip decode failed: {e}");
            None
        }
    }
}

/// Extract entries from a plain-text sitemap: one URL per line.
#[must_use]
pub fn extract_sitemap_links_text(text: &str) -> Vec<SitemapEntry> {
    let mut entries = Vec::new();
    let mut pos = 0;
    for line in text.split_inclusive('\n') {
        let trimmed = line.trim();
        if !trimmed.is_empty() && !trimmed.starts_with('#') {
            let lead = line.len() - line.trim_start().len();
            entries.push(SitemapEntry {
                link: ExtractedLink::new(trimmed, pos + lead, trimmed.len()),
                is_sitemap: false,
            });
        }
        pos += line.len();
    }
    entries
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use flate2::Compression;
    use flate2::write::GzEncoder;
    use pretty_assertions::assert_eq;

    use super::{extract_sitemap_links, extract_sitemap_links_gz, extract_sitemap_links_text};

    const SITEMAP_INDEX: &str = r#"<?xml version="1.0"?>
        <sitemapindex xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
          <sitemap><loc>http://h/sitemap-a.xml</loc></sitemap>
          <sitemap><loc>http://h/sitemap-b.xml</loc></sitemap>
        </sitemapindex>"#;

    const URLSET: &str = r#"<?xml version="1.0"?>
        <urlset xmlns="http://www.sitemaps.org/schemas/sitemap/0.9">
          <url><loc>http://h/a.html</loc><priority>0.8</priority></url>
          <url><loc>http://h/b.html</loc></url>
        </urlset>"#;

    #[test]
    fn index_entries_are_sitemaps() {
        let entries = extract_sitemap_links(SITEMAP_INDEX);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| e.is_sitemap));
        assert_eq!(entries[0].link.raw, "http://h/sitemap-a.xml");
    }

    #[test]
    fn urlset_entries_are_pages() {
        let entries = extract_sitemap_links(URLSET);
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(|e| !e.is_sitemap));
    }

    #[test]
    fn gzipped_roundtrip() {
        let mut enc = GzEncoder::new(Vec::new(), Compression::default());
        enc.write_all(URLSET.as_bytes()).unwrap();
        let gz = enc.finish().unwrap();

        let entries = extract_sitemap_links_gz(&gz).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(extract_sitemap_links_gz(b"not gzip").is_none());
    }

    #[test]
    fn text_sitemap_lines() {
        let entries =
            extract_sitemap_links_text("http://h/x\n\n  http://h/y  \n# comment\nhttp://h/z");
        let raws: Vec<&str> = entries.iter().map(|e| e.link.raw.as_str()).collect();
        assert_eq!(raws, vec!["http://h/x", "http://h/y", "http://h/z"]);
    }
}

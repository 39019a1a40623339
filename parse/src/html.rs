//! HTML link extraction.
//!
//! The scanner walks raw bytes rather than a DOM: the conversion post-pass
//! rewrites saved documents in place, so every extracted reference must
//! carry its exact byte span in the file as written. Tags are located
//! first, then URL-bearing attributes within each tag, so attribute-shaped
//! text outside markup is not picked up.

use std::sync::LazyLock;

use regex::bytes::Regex;
use trawl_types::decode_to_utf8;

use crate::ExtractedLink;

/// Attributes that carry URLs, across the tags that matter for mirroring.
const URL_ATTRIBUTES: &[&str] = &[
    "href",
    "src",
    "srcset",
    "poster",
    "action",
    "formaction",
    "cite",
    "background",
    "data",
];

static TAG_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?s)<([a-zA-Z][a-zA-Z0-9-]*)((?:[^>"']|"[^"]*"|'[^']*')*)>"#)
        .expect("tag regex is valid")
});

static ATTR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r#"(?i)\b([a-zA-Z-]+)\s*=\s*(?:"([^"]*)"|'([^']*)'|([^\s>"'`]+))"#,
    )
    .expect("attribute regex is valid")
});

static META_REFRESH_URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)^\s*\d+\s*;\s*url\s*=\s*['"]?([^'"]+)"#).expect("refresh regex is valid")
});

static CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)charset\s*=\s*['"]?\s*([a-zA-Z0-9_][a-zA-Z0-9._-]*)"#)
        .expect("charset regex is valid")
});

/// The result of scanning one HTML document.
#[derive(Debug, Default)]
pub struct HtmlDocument {
    /// Value of the first `<base href>`, if any.
    pub base: Option<String>,
    /// Charset declared in a `<meta>` tag, if any.
    pub encoding: Option<String>,
    /// Every URL reference found, in document order.
    pub links: Vec<ExtractedLink>,
}

/// Extract links from an HTML buffer.
///
/// `source_encoding` is the encoding the bytes are believed to be in; the
/// extracted reference strings are recoded to UTF-8, but spans always index
/// the raw input.
#[must_use]
pub fn extract_html_links(bytes: &[u8], source_encoding: Option<&str>) -> HtmlDocument {
    let mut doc = HtmlDocument::default();

    for tag in TAG_RE.captures_iter(bytes) {
        let name = tag.get(1).map(|m| m.as_bytes()).unwrap_or_default();
        let Some(attrs) = tag.get(2) else { continue };
        let attrs_offset = attrs.start();

        let lname = name.to_ascii_lowercase();
        match lname.as_slice() {
            b"base" => {
                if doc.base.is_none()
                    && let Some((value, _, _)) = find_attr(attrs.as_bytes(), b"href")
                {
                    doc.base = Some(decode_to_utf8(value, source_encoding));
                }
                continue;
            }
            b"meta" => {
                scan_meta_tag(&mut doc, attrs.as_bytes(), attrs_offset, source_encoding);
                continue;
            }
            _ => {}
        }

        for attr in ATTR_RE.captures_iter(attrs.as_bytes()) {
            let attr_name = attr.get(1).map(|m| m.as_bytes()).unwrap_or_default();
            let attr_name = attr_name.to_ascii_lowercase();
            let attr_name = String::from_utf8_lossy(&attr_name);
            if !URL_ATTRIBUTES.contains(&attr_name.as_ref()) {
                continue;
            }

            let Some(value) = attr.get(2).or_else(|| attr.get(3)).or_else(|| attr.get(4)) else {
                continue;
            };
            let pos = attrs_offset + value.start();

            if attr_name == "srcset" {
                push_srcset(&mut doc.links, value.as_bytes(), pos, source_encoding);
            } else {
                push_link(&mut doc.links, value.as_bytes(), pos, source_encoding);
            }
        }
    }

    doc
}

fn scan_meta_tag(
    doc: &mut HtmlDocument,
    attrs: &[u8],
    attrs_offset: usize,
    source_encoding: Option<&str>,
) {
    // <meta charset=...> or <meta http-equiv=Content-Type content="...; charset=...">
    if doc.encoding.is_none()
        && let Some(caps) = CHARSET_RE.captures(attrs)
        && let Some(value) = caps.get(1)
    {
        doc.encoding = Some(String::from_utf8_lossy(value.as_bytes()).into_owned());
    }

    // <meta http-equiv=refresh content="0; url=...">
    let Some((equiv, _, _)) = find_attr(attrs, b"http-equiv") else {
        return;
    };
    if !equiv.eq_ignore_ascii_case(b"refresh") {
        return;
    }
    let Some((content, content_pos, _)) = find_attr(attrs, b"content") else {
        return;
    };
    if let Some(caps) = META_REFRESH_URL_RE.captures(content)
        && let Some(value) = caps.get(1)
    {
        push_link(
            &mut doc.links,
            value.as_bytes(),
            attrs_offset + content_pos + value.start(),
            source_encoding,
        );
    }
}

/// Locate a named attribute inside a tag's attribute section.
///
/// Returns the value bytes, the value's offset within `attrs`, and its length.
fn find_attr<'a>(attrs: &'a [u8], wanted: &[u8]) -> Option<(&'a [u8], usize, usize)> {
    for attr in ATTR_RE.captures_iter(attrs) {
        let name = attr.get(1)?.as_bytes();
        if !name.eq_ignore_ascii_case(wanted) {
            continue;
        }
        let value = attr.get(2).or_else(|| attr.get(3)).or_else(|| attr.get(4))?;
        return Some((value.as_bytes(), value.start(), value.len()));
    }
    None
}

fn push_link(links: &mut Vec<ExtractedLink>, raw: &[u8], pos: usize, encoding: Option<&str>) {
    let trimmed = trim_ascii(raw);
    if trimmed.is_empty() || trimmed.starts_with(b"#") {
        return;
    }
    // data:, javascript: and friends are dead weight for a retriever.
    if has_opaque_scheme(trimmed) {
        return;
    }
    let lead = raw.len() - trim_start_len(raw);
    links.push(ExtractedLink::new(
        decode_to_utf8(trimmed, encoding),
        pos + lead,
        trimmed.len(),
    ));
}

/// srcset: comma-separated `URL [descriptor]` entries, each its own link.
fn push_srcset(links: &mut Vec<ExtractedLink>, value: &[u8], pos: usize, encoding: Option<&str>) {
    let mut offset = 0;
    for entry in value.split(|&b| b == b',') {
        let lead = entry.len() - trim_start_len(entry);
        let entry_trim = trim_ascii(entry);
        let url = entry_trim
            .split(|&b| b == b' ' || b == b'\t' || b == b'\n' || b == b'\r')
            .next()
            .unwrap_or_default();
        if !url.is_empty() {
            push_link(links, url, pos + offset + lead, encoding);
        }
        offset += entry.len() + 1;
    }
}

fn has_opaque_scheme(raw: &[u8]) -> bool {
    for prefix in [b"data:".as_slice(), b"javascript:", b"mailto:", b"tel:"] {
        if raw.len() >= prefix.len() && raw[..prefix.len()].eq_ignore_ascii_case(prefix) {
            return true;
        }
    }
    false
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes.len() - trim_start_len(bytes);
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |i| i + 1);
    &bytes[start..end.max(start)]
}

fn trim_start_len(bytes: &[u8]) -> usize {
    bytes.iter().skip_while(|b| b.is_ascii_whitespace()).count()
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::extract_html_links;

    #[test]
    fn finds_hrefs_and_srcs() {
        let html = br#"<html><body>
            <a href="b.html">b</a>
            <img src='img/c.png'>
            <script src=/js/d.js></script>
        </body></html>"#;
        let doc = extract_html_links(html, None);
        let raws: Vec<&str> = doc.links.iter().map(|l| l.raw.as_str()).collect();
        assert_eq!(raws, vec!["b.html", "img/c.png", "/js/d.js"]);
    }

    #[test]
    fn spans_index_the_raw_buffer() {
        let html = br#"<a href="b.html">x</a>"#;
        let doc = extract_html_links(html, None);
        let link = &doc.links[0];
        assert_eq!(&html[link.pos..link.pos + link.len], b"b.html");
    }

    #[test]
    fn base_href_detected() {
        let html = br#"<head><base href="http://h/sub/"></head><a href="x">x</a>"#;
        let doc = extract_html_links(html, None);
        assert_eq!(doc.base.as_deref(), Some("http://h/sub/"));
    }

    #[test]
    fn meta_charset_detected() {
        let html = br#"<meta charset="iso-8859-1"><a href="x.html">x</a>"#;
        let doc = extract_html_links(html, None);
        assert_eq!(doc.encoding.as_deref(), Some("iso-8859-1"));

        let html = br#"<meta http-equiv="Content-Type" content="text/html; charset=utf-8">"#;
        let doc = extract_html_links(html, None);
        assert_eq!(doc.encoding.as_deref(), Some("utf-8"));
    }

    #[test]
    fn meta_refresh_url() {
        let html = br#"<meta http-equiv="refresh" content="0; url=next.html">"#;
        let doc = extract_html_links(html, None);
        assert_eq!(doc.links[0].raw, "next.html");
        assert_eq!(
            &html[doc.links[0].pos..doc.links[0].pos + doc.links[0].len],
            b"next.html"
        );
    }

    #[test]
    fn srcset_splits_entries() {
        let html = br#"<img srcset="a.png 1x, b.png 2x">"#;
        let doc = extract_html_links(html, None);
        let raws: Vec<&str> = doc.links.iter().map(|l| l.raw.as_str()).collect();
        assert_eq!(raws, vec!["a.png", "b.png"]);
        for link in &doc.links {
            assert_eq!(
                &html[link.pos..link.pos + link.len],
                link.raw.as_bytes(),
                "span mismatch for {}",
                link.raw
            );
        }
    }

    #[test]
    fn skips_fragments_and_opaque_schemes() {
        let html = br##"<a href="#top">t</a>
            <a href="javascript:void(0)">j</a>
            <a href="mailto:x@y">m</a>
            <a href="real.html">r</a>"##;
        let doc = extract_html_links(html, None);
        assert_eq!(doc.links.len(), 1);
        assert_eq!(doc.links[0].raw, "real.html");
    }

    #[test]
    fn attribute_text_outside_tags_ignored() {
        let html = br#"<p>write href="nope.html" in text</p><a href="yes.html">y</a>"#;
        let doc = extract_html_links(html, None);
        let raws: Vec<&str> = doc.links.iter().map(|l| l.raw.as_str()).collect();
        assert_eq!(raws, vec!["yes.html"]);
    }

    #[test]
    fn unquoted_attribute_values() {
        let html = br#"<a href=plain.html>x</a>"#;
        let doc = extract_html_links(html, None);
        assert_eq!(doc.links[0].raw, "plain.html");
    }

    #[test]
    fn latin1_reference_recoded() {
        let html = b"<a href=\"/caf\xe9.html\">c</a>";
        let doc = extract_html_links(html, Some("iso-8859-1"));
        assert_eq!(doc.links[0].raw, "/café.html");
        // span still covers the raw (undecoded) bytes
        assert_eq!(doc.links[0].len, 10);
    }
}

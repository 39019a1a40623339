//! CSS link extraction: `url(...)` tokens and `@import` rules.

use std::sync::LazyLock;

use regex::bytes::Regex;
use trawl_types::decode_to_utf8;

use crate::ExtractedLink;

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)url\(\s*(?:"([^"]*)"|'([^']*)'|([^)'"\s]+))\s*\)"#)
        .expect("url() regex is valid")
});

static IMPORT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@import\s+(?:"([^"]*)"|'([^']*)')"#).expect("@import regex is valid")
});

static CHARSET_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)@charset\s+"([^"]+)""#).expect("@charset regex is valid")
});

/// Extract `url(...)` and `@import` references from a stylesheet.
///
/// Returns the links plus the `@charset` declaration when present.
#[must_use]
pub fn extract_css_links(
    bytes: &[u8],
    source_encoding: Option<&str>,
) -> (Vec<ExtractedLink>, Option<String>) {
    let mut links = Vec::new();

    let encoding = CHARSET_RE
        .captures(bytes)
        .and_then(|c| c.get(1))
        .map(|m| String::from_utf8_lossy(m.as_bytes()).into_owned());
    let effective = encoding.as_deref().or(source_encoding);

    for caps in URL_RE.captures_iter(bytes) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)).or_else(|| caps.get(3)) {
            push(&mut links, m.as_bytes(), m.start(), effective);
        }
    }

    // @import "x.css"; the url(...) form is already covered above.
    for caps in IMPORT_RE.captures_iter(bytes) {
        if let Some(m) = caps.get(1).or_else(|| caps.get(2)) {
            push(&mut links, m.as_bytes(), m.start(), effective);
        }
    }

    (links, encoding)
}

fn push(links: &mut Vec<ExtractedLink>, raw: &[u8], pos: usize, encoding: Option<&str>) {
    if raw.is_empty() || raw.starts_with(b"data:") {
        return;
    }
    links.push(ExtractedLink::new(
        decode_to_utf8(raw, encoding),
        pos,
        raw.len(),
    ));
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::extract_css_links;

    #[test]
    fn url_tokens_in_all_quote_styles() {
        let css = br#"
            body { background: url("bg.png"); }
            .a { background: url('i/a.gif'); }
            .b { background: url(/i/b.gif); }
        "#;
        let (links, _) = extract_css_links(css, None);
        let raws: Vec<&str> = links.iter().map(|l| l.raw.as_str()).collect();
        assert_eq!(raws, vec!["bg.png", "i/a.gif", "/i/b.gif"]);
        for link in &links {
            assert_eq!(&css[link.pos..link.pos + link.len], link.raw.as_bytes());
        }
    }

    #[test]
    fn import_rules() {
        let css = br#"@import "reset.css"; @import url(extra.css);"#;
        let (links, _) = extract_css_links(css, None);
        let raws: Vec<&str> = links.iter().map(|l| l.raw.as_str()).collect();
        assert_eq!(raws, vec!["extra.css", "reset.css"]);
    }

    #[test]
    fn charset_declaration() {
        let css = br#"@charset "iso-8859-1"; body { background: url(x.png); }"#;
        let (_, encoding) = extract_css_links(css, None);
        assert_eq!(encoding.as_deref(), Some("iso-8859-1"));
    }

    #[test]
    fn data_uris_skipped() {
        let css = br#".x { background: url(data:image/png;base64,AAAA); }"#;
        let (links, _) = extract_css_links(css, None);
        assert!(links.is_empty());
    }
}

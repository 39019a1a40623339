//! Metalink parsing.
//!
//! Two inputs feed the chunked-download machinery: RFC 5854 metalink XML
//! bodies (with their Metalink/3 predecessors tolerated), and RFC 6249
//! `Link:` response headers announcing mirrors (`rel=duplicate`) or a
//! description document (`rel=describedby`).

use std::sync::LazyLock;

use regex::Regex;

/// A parsed metalink description.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Metalink {
    /// File name as declared in the description.
    pub name: String,
    /// Total size in bytes.
    pub size: u64,
    /// Piecewise hashes; empty when the description carries none.
    pub pieces: Vec<MetalinkPiece>,
    /// Hash algorithm of the pieces (lowercase), when declared.
    pub piece_type: Option<String>,
    /// Mirrors, sorted by ascending priority (best first).
    pub mirrors: Vec<MetalinkMirror>,
    /// Whole-file hash, when declared: `(algorithm, lowercase hex)`.
    pub global_hash: Option<(String, String)>,
}

/// One piece of a piecewise-hashed file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetalinkPiece {
    /// Byte offset of the piece within the file.
    pub position: u64,
    /// Piece length; the final piece may be shorter.
    pub length: u64,
    /// Lowercase hex hash of the piece, when declared.
    pub hash: Option<String>,
}

/// One mirror URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetalinkMirror {
    pub url: String,
    /// Lower is better.
    pub priority: u32,
}

static FILE_NAME_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<file\b[^>]*\bname\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
        .expect("file regex is valid")
});

static SIZE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<size\s*>\s*(\d+)\s*</size\s*>").expect("size regex is valid")
});

static HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<hash\b[^>]*\btype\s*=\s*(?:"([^"]*)"|'([^']*)')[^>]*>\s*([0-9a-fA-F]+)\s*</hash\s*>"#)
        .expect("hash regex is valid")
});

static PIECES_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?is)<pieces\b([^>]*)>(.*?)</pieces\s*>"#).expect("pieces regex is valid")
});

static PIECE_HASH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<hash\b[^>]*>\s*([0-9a-fA-F]+)\s*</hash\s*>")
        .expect("piece hash regex is valid")
});

static ATTR_LENGTH_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\blength\s*=\s*(?:"(\d+)"|'(\d+)'|(\d+))"#).expect("length regex is valid")
});

static ATTR_TYPE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\btype\s*=\s*(?:"([^"]*)"|'([^']*)')"#).expect("type regex is valid")
});

static URL_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?is)<url\b([^>]*)>\s*([^<\s]+)\s*</url\s*>").expect("url regex is valid")
});

static ATTR_PRIORITY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bpriority\s*=\s*(?:"(\d+)"|'(\d+)'|(\d+))"#)
        .expect("priority regex is valid")
});

static ATTR_PREFERENCE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)\bpreference\s*=\s*(?:"(\d+)"|'(\d+)'|(\d+))"#)
        .expect("preference regex is valid")
});

/// Parse a metalink description body.
///
/// Returns `None` when the body carries no usable file entry (no name, no
/// size, or no mirrors).
#[must_use]
pub fn parse_metalink(text: &str) -> Option<Metalink> {
    let name = FILE_NAME_RE
        .captures(text)
        .and_then(|c| c.get(1).or_else(|| c.get(2)))
        .map(|m| m.as_str().to_string())?;

    let size: u64 = SIZE_RE.captures(text)?.get(1)?.as_str().parse().ok()?;
    if size == 0 {
        return None;
    }

    let mut mirrors = Vec::new();
    for caps in URL_RE.captures_iter(text) {
        let attrs = caps.get(1).map_or("", |m| m.as_str());
        let url = caps.get(2)?.as_str();
        if !url.starts_with("http://") && !url.starts_with("https://") {
            continue;
        }
        mirrors.push(MetalinkMirror {
            url: url.to_string(),
            priority: mirror_priority(attrs),
        });
    }
    if mirrors.is_empty() {
        return None;
    }
    mirrors.sort_by_key(|m| m.priority);

    let mut pieces = Vec::new();
    let mut piece_type = None;
    if let Some(caps) = PIECES_RE.captures(text) {
        let attrs = caps.get(1).map_or("", |m| m.as_str());
        let body = caps.get(2).map_or("", |m| m.as_str());
        piece_type = ATTR_TYPE_RE
            .captures(attrs)
            .and_then(|c| c.get(1).or_else(|| c.get(2)))
            .map(|m| m.as_str().to_ascii_lowercase());
        if let Some(length) = first_number(&ATTR_LENGTH_RE, attrs) {
            let mut position = 0u64;
            for h in PIECE_HASH_RE.captures_iter(body) {
                let hash = h.get(1).map(|m| m.as_str().to_ascii_lowercase());
                let remaining = size.saturating_sub(position);
                if remaining == 0 {
                    break;
                }
                pieces.push(MetalinkPiece {
                    position,
                    length: length.min(remaining),
                    hash,
                });
                position += length;
            }
        }
    }

    // Whole-file hash: a <hash> outside <pieces>.
    let pieces_span = PIECES_RE.find(text).map(|m| (m.start(), m.end()));
    let global_hash = HASH_RE.captures_iter(text).find_map(|caps| {
        let m = caps.get(0)?;
        if let Some((start, end)) = pieces_span
            && m.start() >= start
            && m.end() <= end
        {
            return None;
        }
        let algo = caps.get(1).or_else(|| caps.get(2))?.as_str().to_ascii_lowercase();
        let hex = caps.get(3)?.as_str().to_ascii_lowercase();
        Some((algo, hex))
    });

    Some(Metalink {
        name,
        size,
        pieces,
        piece_type,
        mirrors,
        global_hash,
    })
}

fn mirror_priority(attrs: &str) -> u32 {
    // RFC 5854 priority: lower is better. Metalink/3 preference: higher is
    // better, range 1..=100; fold it into the same ordering.
    if let Some(p) = first_number(&ATTR_PRIORITY_RE, attrs) {
        return p as u32;
    }
    if let Some(p) = first_number(&ATTR_PREFERENCE_RE, attrs) {
        return 101u32.saturating_sub(p.min(100) as u32);
    }
    999_999
}

fn first_number(re: &Regex, attrs: &str) -> Option<u64> {
    let caps = re.captures(attrs)?;
    caps.get(1)
        .or_else(|| caps.get(2))
        .or_else(|| caps.get(3))?
        .as_str()
        .parse()
        .ok()
}

/// Relation of an RFC 6249 `Link:` header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RfcLinkRel {
    DescribedBy,
    Duplicate,
    Other,
}

/// One parsed `Link:` header value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RfcLink {
    pub uri: String,
    pub rel: RfcLinkRel,
    /// Mirror priority; lower is better. Defaults high when absent.
    pub pri: u32,
    pub media_type: Option<String>,
}

/// Parse RFC 6249 `Link:` header values.
///
/// Each value looks like `<uri>; rel=duplicate; pri=2; type="..."`; several
/// may be comma-joined in one header line.
#[must_use]
pub fn parse_link_headers<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<RfcLink> {
    let mut links = Vec::new();
    for value in values {
        for part in split_link_values(value) {
            if let Some(link) = parse_one_link(part) {
                links.push(link);
            }
        }
    }
    links
}

/// Split a comma-joined Link header, keeping commas inside `<...>` and quotes.
fn split_link_values(value: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let (mut depth, mut quoted, mut start) = (0i32, false, 0usize);
    for (idx, ch) in value.char_indices() {
        match ch {
            '<' if !quoted => depth += 1,
            '>' if !quoted => depth -= 1,
            '"' => quoted = !quoted,
            ',' if depth == 0 && !quoted => {
                parts.push(value[start..idx].trim());
                start = idx + 1;
            }
            _ => {}
        }
    }
    parts.push(value[start..].trim());
    parts.retain(|p| !p.is_empty());
    parts
}

fn parse_one_link(part: &str) -> Option<RfcLink> {
    let open = part.find('<')?;
    let close = part[open..].find('>')? + open;
    let uri = part[open + 1..close].trim().to_string();
    if uri.is_empty() {
        return None;
    }

    let mut rel = RfcLinkRel::Other;
    let mut pri = u32::MAX;
    let mut media_type = None;

    for param in part[close + 1..].split(';') {
        let Some((key, val)) = param.split_once('=') else {
            continue;
        };
        let key = key.trim().to_ascii_lowercase();
        let val = val.trim().trim_matches('"');
        match key.as_str() {
            "rel" => {
                rel = match val.to_ascii_lowercase().as_str() {
                    "describedby" => RfcLinkRel::DescribedBy,
                    "duplicate" => RfcLinkRel::Duplicate,
                    _ => RfcLinkRel::Other,
                };
            }
            "pri" => pri = val.parse().unwrap_or(u32::MAX),
            "type" => media_type = Some(val.to_string()),
            _ => {}
        }
    }

    Some(RfcLink {
        uri,
        rel,
        pri,
        media_type,
    })
}

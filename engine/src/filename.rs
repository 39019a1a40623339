//! Local filename construction.
//!
//! Maps a URL to the path its body is saved under, honoring the directory
//! layout options (`directory_prefix`, `protocol_directories`,
//! `host_directories`, `cut_dirs`), the `default_page` for directory URLs,
//! query-string handling, and `restrict_file_names` escaping.

use std::path::PathBuf;

use trawl_config::{Config, NameCase, RestrictNames};
use trawl_types::CanonicalUrl;

/// Derive the local path for a URL.
#[must_use]
pub fn local_filename(config: &Config, url: &CanonicalUrl) -> PathBuf {
    let mut path = config.directory_prefix.clone();

    if config.protocol_directories {
        path.push(url.scheme().as_str());
    }

    if config.host_directories {
        let mut dir = url.host().to_string();
        if url.port() != url.scheme().default_port() {
            dir.push_str(&format!("+{}", url.port()));
        }
        path.push(restrict(&dir, &config.restrict_file_names));
    }

    let mut components: Vec<&str> = url.path().split('/').filter(|c| !c.is_empty()).collect();
    let ends_in_slash = url.path().ends_with('/');
    let file_component = if ends_in_slash { None } else { components.pop() };

    for component in components.iter().skip(config.cut_dirs as usize) {
        path.push(restrict(&percent_decode(component), &config.restrict_file_names));
    }

    let mut name = match file_component {
        Some(c) => percent_decode(c),
        None => config.default_page.clone(),
    };

    if !config.cut_file_get_vars
        && let Some(query) = url.url().query()
        && !query.is_empty()
    {
        name.push('?');
        name.push_str(query);
    }

    path.push(restrict(&name, &config.restrict_file_names));
    path
}

fn percent_decode(component: &str) -> String {
    let bytes = component.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut idx = 0;
    while idx < bytes.len() {
        if bytes[idx] == b'%'
            && idx + 2 < bytes.len()
            && let (Some(hi), Some(lo)) = (hex_val(bytes[idx + 1]), hex_val(bytes[idx + 2]))
        {
            out.push(hi * 16 + lo);
            idx += 3;
        } else {
            out.push(bytes[idx]);
            idx += 1;
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

fn hex_val(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Apply `restrict_file_names` escaping to one path component.
#[must_use]
pub fn restrict(component: &str, rules: &RestrictNames) -> String {
    let mut out = String::with_capacity(component.len());

    for ch in component.chars() {
        let escape = (ch == '/')
            || (rules.nocontrol && ch.is_control())
            || (rules.windows && matches!(ch, '\\' | '<' | '>' | ':' | '"' | '|' | '?' | '*'))
            || (rules.ascii && !ch.is_ascii());

        if escape {
            let mut buf = [0u8; 4];
            for byte in ch.encode_utf8(&mut buf).as_bytes() {
                out.push_str(&format!("%{byte:02X}"));
            }
        } else {
            out.push(ch);
        }
    }

    match rules.case {
        NameCase::Keep => out,
        NameCase::Lower => out.to_lowercase(),
        NameCase::Upper => out.to_uppercase(),
    }
}

/// The extension `adjust_extension` would add for a content type, when the
/// name does not already carry it (case-insensitively).
#[must_use]
pub fn adjusted_extension(content_type: &str, name: &str) -> Option<&'static str> {
    let ext = match content_type.to_ascii_lowercase().as_str() {
        "text/html" | "application/xhtml+xml" => ".html",
        "text/css" => ".css",
        "application/atom+xml" => ".atom",
        "application/rss+xml" => ".rss",
        _ => return None,
    };

    let lower = name.to_ascii_lowercase();
    if lower.ends_with(ext) || (ext == ".html" && lower.ends_with(".htm")) {
        None
    } else {
        Some(ext)
    }
}

/// Whether a content type is one the engine parses for links.
#[must_use]
pub fn is_parseable_content_type(content_type: &str, sitemap_job: bool) -> bool {
    let ct = content_type.to_ascii_lowercase();
    matches!(
        ct.as_str(),
        "text/html" | "application/xhtml+xml" | "text/css" | "application/atom+xml"
            | "application/rss+xml" | "application/metalink4+xml" | "application/metalink+xml"
    ) || (sitemap_job
        && matches!(ct.as_str(), "application/xml" | "text/xml" | "application/x-gzip" | "text/plain"))
}

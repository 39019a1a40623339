//! Post-retrieval link conversion.
//!
//! While the crawl runs, every saved HTML document leaves behind a
//! conversion record: its path, base URL, encoding and the byte spans of
//! the links found in it. After the worker pool has drained, each document
//! is rewritten in place: references whose target exists locally become
//! relative paths, everything else becomes an absolute URL.

use std::path::{Path, PathBuf};

use trawl_parse::ExtractedLink;
use trawl_types::CanonicalUrl;
use url::Url;

use crate::Engine;

/// One saved document awaiting the rewrite pass.
#[derive(Debug)]
pub struct ConversionRecord {
    pub filename: PathBuf,
    pub base: Url,
    pub encoding: Option<String>,
    /// Link spans, as byte offsets into the file as saved.
    pub links: Vec<ExtractedLink>,
}

/// Run the post-pass over every recorded document.
pub fn convert_all(engine: &Engine) {
    let records = {
        let mut conversions = engine.conversions.lock().expect("conversions lock");
        std::mem::take(&mut *conversions)
    };

    for record in records {
        if let Err(e) = convert_one(engine, &record) {
            tracing::error!(file = %record.filename.display(), "link conversion failed: {e}");
            engine.stats.set_exit_status(trawl_types::ExitStatus::Io);
        }
    }
}

fn convert_one(engine: &Engine, record: &ConversionRecord) -> std::io::Result<()> {
    let data = std::fs::read(&record.filename)?;
    tracing::info!(
        file = %record.filename.display(),
        base = %record.base,
        "converting links"
    );

    let mut links: Vec<&ExtractedLink> = record
        .links
        .iter()
        .filter(|l| l.pos + l.len <= data.len() && !l.raw.starts_with('#'))
        .collect();
    links.sort_by_key(|l| l.pos);
    links.dedup_by_key(|l| l.pos);

    let mut out: Vec<u8> = Vec::with_capacity(data.len());
    let mut cursor = 0usize;
    let mut changed = false;

    for link in links {
        if link.pos < cursor {
            continue;
        }

        let Ok(url) = CanonicalUrl::parse_with_base(
            &link.raw,
            Some(&record.base),
            record.encoding.as_deref(),
        ) else {
            continue;
        };

        let local = crate::filename::local_filename(&engine.config, &url);
        let replacement = if local.is_file() {
            relative_path(&record.filename, &local)
        } else {
            url.canonical().to_string()
        };

        let original = &data[link.pos..link.pos + link.len];
        if original == replacement.as_bytes() {
            continue;
        }

        out.extend_from_slice(&data[cursor..link.pos]);
        out.extend_from_slice(replacement.as_bytes());
        cursor = link.pos + link.len;
        changed = true;
    }

    if !changed {
        return Ok(());
    }
    out.extend_from_slice(&data[cursor..]);

    if engine.config.backup_converted {
        let mut backup = record.filename.clone().into_os_string();
        backup.push(".orig");
        std::fs::rename(&record.filename, PathBuf::from(backup))?;
    }

    std::fs::write(&record.filename, out)
}

/// The relative path from the directory of `doc` to `link`.
///
/// `h/a/b/x.html` → `h/a/c/y.html` yields `../c/y.html`.
#[must_use]
pub fn relative_path(doc: &Path, link: &Path) -> String {
    let doc_dir: Vec<_> = doc.parent().map_or_else(Vec::new, |p| p.components().collect());
    let link_comps: Vec<_> = link.components().collect();

    let common = doc_dir
        .iter()
        .zip(link_comps.iter())
        .take_while(|(a, b)| a == b)
        .count();

    let mut out = String::new();
    for _ in common..doc_dir.len() {
        out.push_str("../");
    }
    let rest: Vec<String> = link_comps[common..]
        .iter()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    out.push_str(&rest.join("/"));
    out
}

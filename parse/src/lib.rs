//! Content parsers.
//!
//! Every parser here is a pure function over a byte buffer: no I/O, no
//! shared state, no scheduling. The engine decides which parser to call
//! (by Content-Type and job flags) and what to do with the extracted
//! links; the parsers only find them.
//!
//! Links come back as [`ExtractedLink`]s carrying the byte span of the
//! raw reference inside the input buffer, so the link-conversion post-pass
//! can rewrite documents in place without re-parsing.

mod css;
mod feed;
mod html;
mod metalink;
mod robots;
mod sitemap;

pub use css::extract_css_links;
pub use feed::{extract_atom_links, extract_rss_links};
pub use html::{HtmlDocument, extract_html_links};
pub use metalink::{Metalink, MetalinkMirror, MetalinkPiece, RfcLink, RfcLinkRel, parse_link_headers, parse_metalink};
pub use robots::{RobotsRules, parse_robots};
pub use sitemap::{SitemapEntry, extract_sitemap_links, extract_sitemap_links_gz, extract_sitemap_links_text};

/// One link found in a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtractedLink {
    /// The reference exactly as written in the document (possibly relative).
    pub raw: String,
    /// Byte offset of the reference within the input buffer.
    pub pos: usize,
    /// Byte length of the reference within the input buffer.
    pub len: usize,
}

impl ExtractedLink {
    #[must_use]
    pub fn new(raw: impl Into<String>, pos: usize, len: usize) -> Self {
        Self {
            raw: raw.into(),
            pos,
            len,
        }
    }
}

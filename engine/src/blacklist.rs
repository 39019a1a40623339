//! The admission blacklist.
//!
//! Every URI that ever enters the frontier is recorded here first; the set
//! only grows. `admit` is the single gate that makes duplicate discovery
//! and redirect loops impossible.

use std::collections::HashSet;

use trawl_types::CanonicalUrl;

#[derive(Debug, Default)]
pub struct Blacklist {
    entries: HashSet<String>,
}

impl Blacklist {
    /// Insert the canonical key; true iff it was not present before.
    pub fn admit(&mut self, url: &CanonicalUrl) -> bool {
        self.entries.insert(url.canonical().to_string())
    }

    #[must_use]
    pub fn contains(&self, url: &CanonicalUrl) -> bool {
        self.entries.contains(url.canonical())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use trawl_types::CanonicalUrl;

    use super::Blacklist;

    #[test]
    fn admits_once() {
        let mut blacklist = Blacklist::default();
        let url = CanonicalUrl::parse("http://h/a").unwrap();
        assert!(blacklist.admit(&url));
        assert!(!blacklist.admit(&url));
        assert!(blacklist.contains(&url));
        assert_eq!(blacklist.len(), 1);
    }

    #[test]
    fn fragment_variants_collapse() {
        let mut blacklist = Blacklist::default();
        let a = CanonicalUrl::parse("http://h/a#x").unwrap();
        let b = CanonicalUrl::parse("http://h/a#y").unwrap();
        assert!(blacklist.admit(&a));
        assert!(!blacklist.admit(&b));
    }
}

//! The plugin boundary.
//!
//! Plugins are stateless between calls as far as the engine is concerned;
//! every hook has a do-nothing default, so implementations override only
//! what they need and the engine tolerates absence everywhere.

use std::path::{Path, PathBuf};

use trawl_types::CanonicalUrl;

/// What a plugin decided about a URL at admission time.
#[derive(Debug, Default)]
pub struct UrlVerdict {
    /// Do not fetch this URL at all.
    pub reject: bool,
    /// Fetch this URL instead of the proposed one.
    pub alt_url: Option<CanonicalUrl>,
    /// Save under this name instead of the derived one.
    pub alt_filename: Option<PathBuf>,
    /// Accept regardless of accept/reject pattern filters.
    pub accept: bool,
}

pub trait Plugin: Send + Sync {
    /// Inspect (and possibly veto or rewrite) a URL before admission.
    fn url_verdict(&self, _url: &CanonicalUrl) -> UrlVerdict {
        UrlVerdict::default()
    }

    /// Notification for each downloaded file. Returned URLs are admitted
    /// as if discovered in the file.
    fn downloaded_file(
        &self,
        _url: &CanonicalUrl,
        _local_path: Option<&Path>,
        _size: u64,
    ) -> Vec<String> {
        Vec::new()
    }
}

/// Fold the verdicts of all plugins: first reject wins; later rewrites
/// override earlier ones.
#[must_use]
pub fn combined_verdict(plugins: &[Box<dyn Plugin>], url: &CanonicalUrl) -> UrlVerdict {
    let mut combined = UrlVerdict::default();
    for plugin in plugins {
        let verdict = plugin.url_verdict(combined.alt_url.as_ref().unwrap_or(url));
        if verdict.reject {
            combined.reject = true;
            return combined;
        }
        if verdict.alt_url.is_some() {
            combined.alt_url = verdict.alt_url;
        }
        if verdict.alt_filename.is_some() {
            combined.alt_filename = verdict.alt_filename;
        }
        combined.accept |= verdict.accept;
    }
    combined
}

#[cfg(test)]
mod tests {
    use trawl_types::CanonicalUrl;

    use super::{Plugin, UrlVerdict, combined_verdict};

    struct Rejector;
    impl Plugin for Rejector {
        fn url_verdict(&self, url: &CanonicalUrl) -> UrlVerdict {
            UrlVerdict {
                reject: url.path().contains("blocked"),
                ..UrlVerdict::default()
            }
        }
    }

    struct Accepter;
    impl Plugin for Accepter {
        fn url_verdict(&self, _url: &CanonicalUrl) -> UrlVerdict {
            UrlVerdict {
                accept: true,
                ..UrlVerdict::default()
            }
        }
    }

    #[test]
    fn reject_short_circuits() {
        let plugins: Vec<Box<dyn Plugin>> = vec![Box::new(Rejector), Box::new(Accepter)];
        let verdict = combined_verdict(
            &plugins,
            &CanonicalUrl::parse("http://h/blocked/x").unwrap(),
        );
        assert!(verdict.reject);

        let verdict = combined_verdict(&plugins, &CanonicalUrl::parse("http://h/ok").unwrap());
        assert!(!verdict.reject);
        assert!(verdict.accept);
    }

    #[test]
    fn defaults_are_null_tolerant() {
        struct Inert;
        impl Plugin for Inert {}
        let plugins: Vec<Box<dyn Plugin>> = vec![Box::new(Inert)];
        let verdict = combined_verdict(&plugins, &CanonicalUrl::parse("http://h/").unwrap());
        assert!(!verdict.reject && !verdict.accept);
        assert!(verdict.alt_url.is_none() && verdict.alt_filename.is_none());
    }
}

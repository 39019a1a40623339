//! Accept/reject and host-spanning rules.
//!
//! Two filter phases exist: the filename phase always runs in the file
//! sink, and the URI phase additionally runs at admission when
//! `filter_urls` is set. When both glob patterns and a regex are
//! configured, both must pass.

use globset::{Glob, GlobSet, GlobSetBuilder};
use regex::Regex;
use trawl_config::Config;
use trawl_types::CanonicalUrl;

use crate::error::{ErrorKind, FetchError};

#[derive(Debug, Default)]
pub struct FilterSet {
    accept_globs: Option<GlobSet>,
    reject_globs: Option<GlobSet>,
    accept_regex: Option<Regex>,
    reject_regex: Option<Regex>,
}

impl FilterSet {
    pub fn from_config(config: &Config) -> Result<Self, FetchError> {
        Ok(Self {
            accept_globs: build_globs(&config.accept_patterns)?,
            reject_globs: build_globs(&config.reject_patterns)?,
            accept_regex: build_regex(config.accept_regex.as_deref())?,
            reject_regex: build_regex(config.reject_regex.as_deref())?,
        })
    }

    #[must_use]
    pub fn is_configured(&self) -> bool {
        self.accept_globs.is_some()
            || self.reject_globs.is_some()
            || self.accept_regex.is_some()
            || self.reject_regex.is_some()
    }

    /// Whether `candidate` (a URI or a would-be filename) survives the
    /// accept side. All configured accept rules must pass.
    #[must_use]
    pub fn accepted(&self, candidate: &str) -> bool {
        if let Some(globs) = &self.accept_globs
            && !globs.is_match(candidate)
        {
            return false;
        }
        if let Some(regex) = &self.accept_regex
            && !regex.is_match(candidate)
        {
            return false;
        }
        true
    }

    /// Whether `candidate` hits any reject rule.
    #[must_use]
    pub fn rejected(&self, candidate: &str) -> bool {
        if let Some(globs) = &self.reject_globs
            && globs.is_match(candidate)
        {
            return true;
        }
        if let Some(regex) = &self.reject_regex
            && regex.is_match(candidate)
        {
            return true;
        }
        false
    }

    /// Combined verdict: excluded iff not accepted or explicitly rejected.
    #[must_use]
    pub fn excluded(&self, candidate: &str) -> bool {
        !self.accepted(candidate) || self.rejected(candidate)
    }
}

fn build_globs(patterns: &[String]) -> Result<Option<GlobSet>, FetchError> {
    if patterns.is_empty() {
        return Ok(None);
    }
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        // Bare suffix patterns ("html") mean "*.html", wget-style.
        let pattern = if pattern.contains(['*', '?', '[']) || pattern.contains('/') {
            pattern.clone()
        } else {
            format!("*.{}", pattern.trim_start_matches('.'))
        };
        let glob = Glob::new(&format!("**/{pattern}")).map_err(|e| {
            FetchError::new(ErrorKind::MalformedInput, format!("bad pattern '{pattern}': {e}"))
        })?;
        builder.add(glob);
        // Also match without any directory component.
        if let Ok(glob) = Glob::new(&pattern) {
            builder.add(glob);
        }
    }
    let set = builder.build().map_err(|e| {
        FetchError::new(ErrorKind::MalformedInput, format!("bad patterns: {e}"))
    })?;
    Ok(Some(set))
}

fn build_regex(pattern: Option<&str>) -> Result<Option<Regex>, FetchError> {
    match pattern {
        None => Ok(None),
        Some(p) => Regex::new(p).map(Some).map_err(|e| {
            FetchError::new(ErrorKind::MalformedInput, format!("bad regex '{p}': {e}"))
        }),
    }
}

/// Host-pattern match for `domains` / `exclude_domains`: either the exact
/// host or a dot-boundary suffix (`example.com` matches `a.example.com`).
#[must_use]
pub fn host_matches(patterns: &[String], host: &str) -> bool {
    patterns.iter().any(|pattern| {
        let p = pattern.trim_start_matches('.');
        host.eq_ignore_ascii_case(p)
            || (host.len() > p.len()
                && host[..host.len() - p.len()].ends_with('.')
                && host[host.len() - p.len()..].eq_ignore_ascii_case(p))
    })
}

/// The spanning decision for a discovered URL under recursion.
///
/// Returns a refusal reason, or None when the host may be followed.
#[must_use]
pub fn span_refusal(config: &Config, url: &CanonicalUrl) -> Option<&'static str> {
    let host = url.host();
    if host.is_empty() {
        return Some("missing ip/host/domain");
    }
    if !config.span_hosts && !config.domains.is_empty() && !host_matches(&config.domains, host) {
        return Some("no host-spanning requested");
    }
    if config.span_hosts
        && !config.exclude_domains.is_empty()
        && host_matches(&config.exclude_domains, host)
    {
        return Some("domain explicitly excluded");
    }
    None
}

/// The no-parent rule: the URL must live at or below one recorded seed
/// directory on the same host.
#[must_use]
pub fn under_a_parent(parents: &[CanonicalUrl], url: &CanonicalUrl) -> bool {
    parents.iter().any(|parent| {
        parent.host() == url.host()
            && parent.port() == url.port()
            && url.path().starts_with(parent.dir())
    })
}

//! URL admission: the single path from "string found somewhere" to "job in
//! the frontier".
//!
//! Order of the gauntlet: redirect cap, query cutting, parse/canonicalize,
//! plugin verdict, scheme policy, blacklist, host-spanning rules, parent
//! rule, robots rules, URI-phase accept/reject, then job construction and
//! enqueue. Everything from the blacklist on happens inside one frontier
//! critical section.

use std::sync::Arc;

use url::Url;

use trawl_types::CanonicalUrl;

use crate::Engine;
use crate::filters::{span_refusal, under_a_parent};
use crate::job::{Job, PartHandle, PartSet};

/// How the URL was discovered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddKind {
    /// Seed from the command line or input file.
    Seed,
    /// Link extracted from a document.
    Parsed,
    /// A `Location` redirect target.
    Redirect,
    /// A sitemap reference (from robots.txt or a sitemap index).
    Sitemap,
    /// A metalink mirror or description URL.
    Metalink,
}

/// Add a URL to the frontier. Returns true when a job was enqueued.
pub fn add_url(
    engine: &Engine,
    parent: Option<&Job>,
    raw: &str,
    encoding: Option<&str>,
    base: Option<&Url>,
    kind: AddKind,
) -> bool {
    let config = &engine.config;

    if kind == AddKind::Redirect {
        let level = parent.map_or(0, |j| j.redirection_level);
        if level >= config.max_redirect {
            tracing::warn!(url = raw, level, "redirection limit reached");
            return false;
        }
    }

    let mut url = match CanonicalUrl::parse_with_base(raw, base, encoding) {
        Ok(url) => url,
        Err(e) => {
            tracing::info!("URL '{raw}' not followed ({e})");
            return false;
        }
    };

    if config.cut_url_get_vars {
        url = url.without_query();
    }

    // Plugins may veto or rewrite before any shared state is touched.
    let verdict = crate::plugin::combined_verdict(&engine.plugins, &url);
    if verdict.reject {
        tracing::debug!(url = %url, "URL rejected by plugin");
        return false;
    }
    if let Some(alt) = verdict.alt_url {
        url = alt;
    }

    if config.https_only && url.scheme() != trawl_types::Scheme::Https {
        tracing::info!(url = %url, "URL not followed (https-only requested)");
        return false;
    }

    // HSTS: a known strict host is rewritten to https before anything else
    // sees the URL, so the blacklist key and the connection already agree.
    if config.hsts && url.scheme() == trawl_types::Scheme::Http {
        let lookup_port = if url.port() == 80 { 443 } else { url.port() };
        if engine.hsts.matches(url.host(), lookup_port) {
            tracing::debug!(url = %url, "scheme upgraded to https (HSTS)");
            url = url.into_https();
        }
    }

    let is_seed = kind == AddKind::Seed;

    let enqueued = engine.frontier.with_state(|state| {
        if !state.blacklist.admit(&url) {
            return false;
        }

        if config.recursive && !is_seed {
            if let Some(reason) = span_refusal(config, &url) {
                tracing::info!(url = %url, "URL not followed ({reason})");
                return false;
            }

            if !config.parent && !under_a_parent(&state.parents, &url) {
                tracing::info!(url = %url, "URL not followed (parent ascending not allowed)");
                return false;
            }
        }

        let (_, is_new) = state.host_entry(&url);
        if is_new {
            if config.recursive && config.robots {
                // The robots job goes ahead of everything on this host.
                if let Ok(robots_url) =
                    CanonicalUrl::parse_with_base("/robots.txt", Some(url.url()), None)
                    && state.blacklist.admit(&robots_url)
                {
                    let mut robots_job = Job::new(robots_url);
                    robots_job.robotstxt = true;
                    state.enqueue(robots_job);
                }
            }
        } else if !is_seed
            && let Some(robots) = state.hosts.get(&crate::host::HostKey::of(&url)).and_then(|h| h.robots.as_ref())
            && robots.is_disallowed(url.path())
        {
            tracing::info!(url = %url, "URL not followed (disallowed by robots.txt)");
            return false;
        }

        // URI-phase accept/reject, only when asked for.
        if config.recursive && config.filter_urls && !verdict.accept
            && engine.filters.excluded(url.canonical())
        {
            tracing::debug!(url = %url, "not requesting (excluded by accept/reject rules)");
            return false;
        }

        let mut job = Job::new(url.clone());
        job.requested_by_user = is_seed;
        job.sitemap = kind == AddKind::Sitemap;

        if config.output_document.is_none() {
            job.local_filename = if let Some(alt) = verdict.alt_filename {
                Some(alt)
            } else if kind == AddKind::Redirect && !config.trust_server_names {
                parent.and_then(|p| p.local_filename.clone())
            } else {
                Some(crate::filename::local_filename(config, &url))
            };
        }

        if let Some(parent) = parent {
            if kind == AddKind::Redirect {
                job.redirection_level = parent.redirection_level + 1;
                job.referer = parent.referer.clone();
                job.original_url = parent.original_url.clone();
                // The successor of a redirected robots/sitemap probe still
                // is one.
                job.robotstxt = parent.robotstxt;
                job.sitemap = parent.sitemap;
            } else {
                job.level = parent.level + 1;
                job.referer = Some(parent.url.clone());
            }
        }

        if verdict.accept {
            job.ignore_patterns = true;
        } else if config.recursive
            && engine.filters.is_configured()
            && engine.filters.excluded(url.canonical())
        {
            // The name may still be acceptable after a content-type based
            // extension adjustment; probe with HEAD instead of skipping.
            job.head_first = true;
        }

        if config.spider || config.chunk_size > 0 {
            job.head_first = true;
        }

        state.enqueue(job);
        true
    });

    if enqueued {
        engine.frontier.worker_notify.notify_one();
    }
    enqueued
}

/// Add one seed URL and record its directory for the no-parent rule.
pub fn add_seed(engine: &Engine, raw: &str, base: Option<&Url>) -> bool {
    if let Ok(url) = CanonicalUrl::parse_with_base(raw, base, None) {
        engine.frontier.add_parent(url);
    }
    add_url(engine, None, raw, None, base, AddKind::Seed)
}

/// Run extracted links through the known-URL dedupe and the admission
/// gauntlet. Returns how many jobs were enqueued.
pub fn add_parsed_links<'a>(
    engine: &Engine,
    parent: &Job,
    base: &Url,
    encoding: Option<&str>,
    raws: impl IntoIterator<Item = &'a str>,
    kind: AddKind,
) -> usize {
    let mut added = 0;
    for raw in raws {
        // Raw-string dedupe saves re-parsing the same reference found in
        // thousands of documents.
        let novel = {
            let mut known = engine.known_urls.lock().expect("known urls lock");
            known.insert(format!("{base}\u{0}{raw}"))
        };
        if !novel {
            continue;
        }
        if add_url(engine, Some(parent), raw, encoding, Some(base), kind) {
            added += 1;
        }
    }
    added
}

/// Enqueue the part jobs of a chunked or metalink download.
///
/// Parts skip the admission filters: several jobs for one already-admitted
/// URL are the point. Mirror URLs are still recorded in the blacklist so
/// every queued URI stays covered by it.
pub fn add_part_jobs(engine: &Engine, set: &Arc<PartSet>, referer: Option<CanonicalUrl>) -> usize {
    let count = set.part_count();
    engine.frontier.with_state(|state| {
        for index in 0..count {
            let url = set.mirror_for(index);
            state.blacklist.admit(&url);
            let mut job = Job::new(url);
            job.referer = referer.clone();
            job.local_filename = Some(set.name.clone());
            job.part = Some(PartHandle {
                set: Arc::clone(set),
                index,
            });
            state.enqueue(job);
        }
    });
    engine.frontier.worker_notify.notify_waiters();
    count
}

//! Response dispatch.
//!
//! A worker hands every received response to [`dispatch`], which applies
//! the status-and-flags decision tree: HEAD probes flip to GETs or end the
//! job, 401/407 capture challenges and requeue, 3xx folds back into the
//! queue through the blacklist, metalink answers explode into part jobs,
//! and plain successes stream into the file sink and the content parsers.
//! The returned [`Verdict`] is applied by the worker; dispatch itself
//! never touches worker state.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use futures_util::StreamExt;
use trawl_parse::{RfcLinkRel, parse_link_headers, parse_metalink, parse_robots};
use trawl_types::{CanonicalUrl, decode_to_utf8};

use crate::Engine;
use crate::admission::{AddKind, add_parsed_links, add_part_jobs, add_url};
use crate::auth::{Challenge, parse_challenges};
use crate::client::parse_http_date;
use crate::error::{FetchError, classify_transport_error};
use crate::filename::is_parseable_content_type;
use crate::host::HostKey;
use crate::hsts::parse_hsts_header;
use crate::job::{Job, PartSet, PartState};
use crate::sink::{SaveTarget, SinkRequest};

/// robots.txt bodies larger than this are truncated before parsing.
const MAX_ROBOTS_SIZE: usize = 512 * 1024;

/// What the worker should do with the job after dispatch.
#[derive(Debug)]
pub enum Verdict {
    /// The job is finished (success or recorded failure).
    Done,
    /// Put the job back on its host queue, optionally pacing the host.
    Requeue(Job, Option<Duration>),
    /// Connection-level failure: the worker enters its error state.
    Transport(Job, FetchError),
}

#[derive(Debug)]
pub struct DispatchOutcome {
    pub verdict: Verdict,
    /// The server asked for (or the protocol implies) a fresh connection.
    pub close_connection: bool,
}

/// Headers snapshot taken before the body is consumed.
#[derive(Debug, Default)]
struct ResponseHead {
    status: u16,
    content_type: Option<String>,
    charset: Option<String>,
    content_length: Option<u64>,
    etag: Option<String>,
    last_modified: Option<SystemTime>,
    location: Option<String>,
    link_values: Vec<String>,
    challenges: Vec<Challenge>,
    proxy_challenges: Vec<Challenge>,
    hsts: Option<(Duration, bool)>,
    connection_close: bool,
    content_disposition_name: Option<String>,
}

impl ResponseHead {
    fn from_response(response: &reqwest::Response) -> Self {
        let headers = response.headers();
        let header_str = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string)
        };

        let (content_type, charset) = match header_str("content-type") {
            Some(value) => {
                let mut parts = value.split(';');
                let media = parts.next().unwrap_or("").trim().to_ascii_lowercase();
                let charset = parts.find_map(|p| {
                    let p = p.trim();
                    p.split_once('=').and_then(|(k, v)| {
                        k.trim()
                            .eq_ignore_ascii_case("charset")
                            .then(|| v.trim().trim_matches('"').trim_matches('\'').to_string())
                    })
                });
                ((!media.is_empty()).then_some(media), charset)
            }
            None => (None, None),
        };

        Self {
            status: response.status().as_u16(),
            content_type,
            charset,
            content_length: header_str("content-length").and_then(|v| v.parse().ok()),
            etag: header_str("etag"),
            last_modified: header_str("last-modified").and_then(|v| parse_http_date(&v)),
            location: header_str("location"),
            link_values: headers
                .get_all("link")
                .iter()
                .filter_map(|v| v.to_str().ok().map(str::to_string))
                .collect(),
            challenges: parse_challenges(
                headers
                    .get_all("www-authenticate")
                    .iter()
                    .filter_map(|v| v.to_str().ok()),
            ),
            proxy_challenges: parse_challenges(
                headers
                    .get_all("proxy-authenticate")
                    .iter()
                    .filter_map(|v| v.to_str().ok()),
            ),
            hsts: header_str("strict-transport-security").and_then(|v| parse_hsts_header(&v)),
            connection_close: header_str("connection")
                .is_some_and(|v| v.to_ascii_lowercase().contains("close")),
            content_disposition_name: header_str("content-disposition")
                .and_then(|v| parse_disposition_filename(&v)),
        }
    }
}

/// Dispatch one received response.
pub async fn dispatch(
    engine: &Engine,
    mut job: Job,
    response: reqwest::Response,
    was_head: bool,
) -> DispatchOutcome {
    let head = ResponseHead::from_response(&response);
    let key = HostKey::of(&job.url);
    let close_connection = head.connection_close;

    if head.status < 400 {
        tracing::info!(status = head.status, url = %job.url, "HTTP response");
    } else {
        tracing::info!(status = head.status, url = %job.url, "HTTP ERROR response");
    }

    if head.status < 400 {
        engine.frontier.host_ok(&key);
    }

    // Remote-error exit-status bookkeeping; robots probes are exempt.
    if (400..600).contains(&head.status)
        && head.status != 416
        && !matches!(head.status, 401 | 407)
        && !(job.robotstxt && head.status < 500)
    {
        engine.stats.set_exit_status(trawl_types::ExitStatus::Remote);
    }

    // HSTS observations only count on authenticated https responses.
    if engine.config.hsts
        && job.url.scheme() == trawl_types::Scheme::Https
        && !job.url.is_ip_address()
        && let Some((max_age, subdomains)) = head.hsts
    {
        engine.hsts.add(job.url.host(), job.url.port(), max_age, subdomains);
    }

    // 401: capture challenges, retry once with credentials.
    if head.status == 401 {
        job.auth_failure_count += 1;
        if job.auth_failure_count > 1 || head.challenges.is_empty() {
            tracing::error!(url = %job.url, "authentication failed");
            engine.stats.set_exit_status(trawl_types::ExitStatus::Auth);
            engine.stats.add_error();
            return DispatchOutcome {
                verdict: Verdict::Done,
                close_connection,
            };
        }
        job.challenges = head.challenges;
        return DispatchOutcome {
            verdict: Verdict::Requeue(job, None),
            close_connection,
        };
    }

    // 407: symmetric against the proxy.
    if head.status == 407 {
        if !job.proxy_challenges.is_empty() || head.proxy_challenges.is_empty() {
            tracing::error!(url = %job.url, "proxy authentication failed");
            engine.stats.set_exit_status(trawl_types::ExitStatus::Auth);
            engine.stats.add_error();
            return DispatchOutcome {
                verdict: Verdict::Done,
                close_connection,
            };
        }
        job.proxy_challenges = head.proxy_challenges;
        return DispatchOutcome {
            verdict: Verdict::Requeue(job, None),
            close_connection,
        };
    }

    // A 302 carrying metalink mirror information is a metalink answer, not
    // a redirect to follow.
    let has_metalink_links = engine.config.metalink
        && !head.link_values.is_empty()
        && parse_link_headers(head.link_values.iter().map(String::as_str))
            .iter()
            .any(|l| matches!(l.rel, RfcLinkRel::DescribedBy | RfcLinkRel::Duplicate));

    let is_robots = job.robotstxt;
    let robots_key = HostKey::of(&job.original_url);

    if matches!(head.status, 301 | 302 | 303 | 307 | 308) && !(head.status == 302 && has_metalink_links) {
        let (verdict, followed) = handle_redirect(engine, &job, &head);
        // A followed robots redirect carries the gate with it; an
        // unfollowed one must not wedge the host.
        if is_robots && !followed {
            engine.frontier.robots_done(&robots_key, None);
        }
        return DispatchOutcome {
            verdict,
            close_connection,
        };
    }

    if has_metalink_links
        && let Some(verdict) = handle_metalink_links(engine, &job, &head)
    {
        return DispatchOutcome {
            verdict,
            close_connection,
        };
    }

    let verdict = if was_head {
        handle_head_response(engine, job, &head)
    } else if job.part.is_some() {
        handle_part_response(engine, job, response, &head).await
    } else {
        handle_full_response(engine, job, response, &head).await
    };

    // Whatever ended a robots job clears its gate; a successful parse has
    // already installed the rules and this is a no-op.
    if is_robots && matches!(verdict, Verdict::Done) {
        engine.frontier.robots_done(&robots_key, None);
    }

    DispatchOutcome {
        verdict,
        close_connection,
    }
}

fn handle_redirect(engine: &Engine, job: &Job, head: &ResponseHead) -> (Verdict, bool) {
    let Some(location) = &head.location else {
        tracing::warn!(url = %job.url, "redirect without Location header");
        return (Verdict::Done, false);
    };

    let followed = add_url(
        engine,
        Some(job),
        location,
        None,
        Some(job.url.url()),
        AddKind::Redirect,
    );
    if followed {
        engine.stats.add_redirect();
    }
    (Verdict::Done, followed)
}

/// RFC 6249: prefer a `describedby` metalink description, else the best
/// `duplicate` mirror. Returns None when neither applies.
fn handle_metalink_links(engine: &Engine, job: &Job, head: &ResponseHead) -> Option<Verdict> {
    let links = parse_link_headers(head.link_values.iter().map(String::as_str));

    let description = links.iter().find(|l| {
        l.rel == RfcLinkRel::DescribedBy
            && l.media_type.as_deref().is_some_and(|t| {
                t.eq_ignore_ascii_case("application/metalink4+xml")
                    || t.eq_ignore_ascii_case("application/metalink+xml")
            })
    });

    if let Some(link) = description {
        add_url(engine, Some(job), &link.uri, None, Some(job.url.url()), AddKind::Metalink);
        return Some(Verdict::Done);
    }

    let top = links
        .iter()
        .filter(|l| l.rel == RfcLinkRel::Duplicate)
        .min_by_key(|l| l.pri)?;
    add_url(engine, Some(job), &top.uri, None, Some(job.url.url()), AddKind::Metalink);
    Some(Verdict::Done)
}

/// The HEAD probe: decide between GET, chunked download, and nothing.
fn handle_head_response(engine: &Engine, mut job: Job, head: &ResponseHead) -> Verdict {
    let config = &engine.config;
    job.head_first = false;

    if config.spider || config.chunk_size == 0 {
        if head.status != 200 {
            return Verdict::Done;
        }
        let Some(content_type) = &head.content_type else {
            return Verdict::Done;
        };
        if !is_parseable_content_type(content_type, job.sitemap) {
            // Scenario: accept filters wanted a content check and the type
            // is opaque. The body is never fetched.
            return Verdict::Done;
        }

        // The ETag-seen filter stops re-crawling identical resources.
        if let Some(etag) = &head.etag {
            let mut etags = engine.etags.lock().expect("etag lock");
            if !etags.insert(etag.clone()) {
                tracing::info!(url = %job.url, "not scanning (known ETag)");
                return Verdict::Done;
            }
        }

        if config.spider && !config.recursive {
            return Verdict::Done;
        }

        return Verdict::Requeue(job, None);
    }

    // chunk_size > 0: large bodies become part sets.
    if let Some(length) = head.content_length
        && length > config.chunk_size
    {
        let name = job
            .local_filename
            .clone()
            .or_else(|| config.output_document.as_ref().map(PathBuf::from))
            .unwrap_or_else(|| crate::filename::local_filename(config, &job.url));

        let set = PartSet::synthesize(name, length, config.chunk_size, job.url.clone());
        match set.validate_file() {
            Ok(true) => {
                tracing::info!(file = %set.name.display(), "file already complete");
                return Verdict::Done;
            }
            Ok(false) => {}
            Err(e) => {
                tracing::error!(file = %set.name.display(), "cannot validate: {e}");
                engine.stats.set_exit_status(trawl_types::ExitStatus::Io);
            }
        }
        add_part_jobs(engine, &set, job.referer.clone());
        return Verdict::Done;
    }

    // Small or size-less response: plain GET.
    Verdict::Requeue(job, None)
}

/// One part of a chunked/metalink download.
async fn handle_part_response(
    engine: &Engine,
    job: Job,
    response: reqwest::Response,
    head: &ResponseHead,
) -> Verdict {
    let part = job.part.clone().expect("part job has a part");
    let (position, length) = part.range();

    if !matches!(head.status, 200 | 206) {
        tracing::warn!(part = part.index, status = head.status, "part download error");
        return Verdict::Requeue(job, engine.frontier.retry_delay());
    }

    let mut file = match crate::sink::open_part(&part.set.name, position) {
        Ok(file) => file,
        Err(e) => {
            engine.stats.set_exit_status(e.exit_status());
            tracing::error!(file = %part.set.name.display(), "cannot open: {e}");
            return Verdict::Done;
        }
    };

    let mut written = 0u64;
    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                return Verdict::Transport(job, classify_transport_error(&e));
            }
        };
        // A misbehaving mirror may send more than the range; clamp.
        let take = chunk.len().min((length - written) as usize);
        if take == 0 {
            break;
        }
        if let Err(e) = std::io::Write::write_all(&mut file, &chunk[..take]) {
            engine.stats.set_exit_status(trawl_types::ExitStatus::Io);
            tracing::error!(file = %part.set.name.display(), "write failed: {e}");
            return Verdict::Done;
        }
        written += take as u64;
        engine.stats.add_body_bytes(take as u64);
    }
    drop(file);

    if written != length {
        tracing::warn!(
            part = part.index,
            got = written,
            expected = length,
            "part incomplete"
        );
        return Verdict::Requeue(job, engine.frontier.retry_delay());
    }

    tracing::debug!(part = part.index, "part downloaded");
    engine.stats.add_chunk();

    if part.set.mark_done(part.index) {
        tracing::info!(file = %part.set.name.display(), "checking...");
        match part.set.validate_file() {
            Ok(true) => {
                tracing::debug!("checksum ok");
                engine.stats.add_download();
            }
            Ok(false) => {
                if part.set.reset_for_revalidation() {
                    tracing::warn!(file = %part.set.name.display(), "integrity mismatch, retrying");
                    add_part_jobs(engine, &part.set, job.referer.clone());
                } else {
                    tracing::error!(file = %part.set.name.display(), "integrity mismatch");
                    engine.stats.set_exit_status(trawl_types::ExitStatus::Protocol);
                    engine.stats.add_error();
                }
            }
            Err(e) => {
                tracing::error!(file = %part.set.name.display(), "cannot validate: {e}");
                engine.stats.set_exit_status(trawl_types::ExitStatus::Io);
            }
        }
    }

    Verdict::Done
}

/// Plain GET (or POST-like) response: sink, parsers, recursion.
async fn handle_full_response(
    engine: &Engine,
    job: Job,
    response: reqwest::Response,
    head: &ResponseHead,
) -> Verdict {
    let config = &engine.config;

    match head.status {
        200 | 206 => {}
        304 => {
            engine.stats.add_not_modified();
            reparse_local_copy(engine, &job);
            return Verdict::Done;
        }
        416 => {
            // Range beyond EOF: the local copy already covers the request.
            reparse_local_copy(engine, &job);
            return Verdict::Done;
        }
        _ => {
            engine.stats.add_error();
            if config.content_on_error {
                let _ = save_streaming(engine, &job, response, head, false).await;
            }
            return Verdict::Done;
        }
    }

    // A metalink description body replaces this job with part jobs.
    if config.metalink
        && head.content_type.as_deref().is_some_and(|ct| {
            ct.eq_ignore_ascii_case("application/metalink4+xml")
                || ct.eq_ignore_ascii_case("application/metalink+xml")
        })
    {
        return handle_metalink_body(engine, job, response).await;
    }

    let parse_wanted = job.robotstxt
        || (config.level_allows(job.level)
            && head
                .content_type
                .as_deref()
                .is_some_and(|ct| is_parseable_content_type(ct, job.sitemap)));

    let (saved_path, body) = match save_streaming(engine, &job, response, head, parse_wanted).await
    {
        Ok(pair) => pair,
        Err(Verdict::Transport(job, e)) => return Verdict::Transport(job, e),
        Err(other) => return other,
    };

    engine.stats.add_download();

    // Plugin notification; returned URLs recurse.
    let size = body.as_ref().map_or(0, Vec::len) as u64;
    for plugin in &engine.plugins {
        for extra in plugin.downloaded_file(&job.url, saved_path.as_deref(), size) {
            add_url(engine, Some(&job), &extra, None, Some(job.url.url()), AddKind::Parsed);
        }
    }

    if let Some(body) = body {
        process_parsed_body(engine, &job, head, &body, saved_path);
    }

    if config.delete_after
        && let Some(path) = job.local_filename.as_ref()
    {
        let _ = std::fs::remove_file(path);
    }

    Verdict::Done
}

/// Stream the body into the sink, optionally keeping a copy for parsing.
///
/// Errors come back as a ready-made verdict so callers can return them
/// directly.
async fn save_streaming(
    engine: &Engine,
    job: &Job,
    response: reqwest::Response,
    head: &ResponseHead,
    keep_body: bool,
) -> Result<(Option<PathBuf>, Option<Vec<u8>>), Verdict> {
    let config = &engine.config;

    // robots.txt and sitemap probes are parsed, never saved.
    let parse_only = job.robotstxt || job.sitemap;

    let mut target = if parse_only {
        SaveTarget::Null
    } else {
        let disposition_name = (config.content_disposition)
            .then(|| head.content_disposition_name.clone())
            .flatten()
            .map(|n| {
                config
                    .directory_prefix
                    .join(crate::filename::restrict(&n, &config.restrict_file_names))
            });

        let name = disposition_name
            .or_else(|| job.local_filename.clone())
            .unwrap_or_else(|| crate::filename::local_filename(config, &job.url));

        let request = SinkRequest {
            name: &name,
            content_type: head.content_type.as_deref(),
            append: head.status == 206,
            ignore_patterns: job.ignore_patterns,
        };
        match engine
            .sink
            .prepare(&request, engine.stats.quota_reached(config.quota))
        {
            Ok(target) => target,
            Err(e) => {
                engine.stats.set_exit_status(e.exit_status());
                tracing::error!(url = %job.url, "cannot open sink: {e}");
                return Err(Verdict::Done);
            }
        }
    };

    // --save-headers: the response header block precedes the body.
    if config.save_headers && !parse_only {
        let mut block = format!("HTTP/1.1 {}\r\n", head.status);
        for (name, value) in response.headers() {
            if let Ok(value) = value.to_str() {
                block.push_str(&format!("{name}: {value}\r\n"));
            }
        }
        block.push_str("\r\n");
        if let Err(e) = target.write_all(block.as_bytes()) {
            engine.stats.set_exit_status(trawl_types::ExitStatus::Io);
            tracing::error!(url = %job.url, "write failed: {e}");
            return Err(Verdict::Done);
        }
    }

    let cap = if job.robotstxt { MAX_ROBOTS_SIZE } else { usize::MAX };
    let mut body = keep_body.then(Vec::new);
    let mut stream = response.bytes_stream();

    while let Some(chunk) = stream.next().await {
        let chunk = match chunk {
            Ok(chunk) => chunk,
            Err(e) => {
                // Body already partially consumed: the job retries whole.
                return Err(Verdict::Transport(
                    clone_for_retry(job),
                    classify_transport_error(&e),
                ));
            }
        };

        engine.stats.add_body_bytes(chunk.len() as u64);

        if let Err(e) = target.write_all(&chunk) {
            engine.stats.set_exit_status(trawl_types::ExitStatus::Io);
            tracing::error!(url = %job.url, "write failed: {e}");
            return Err(Verdict::Done);
        }

        if let Some(body) = &mut body
            && body.len() < cap
        {
            let take = chunk.len().min(cap - body.len());
            body.extend_from_slice(&chunk[..take]);
        }
    }

    let saved_path = match engine.sink.finish(target, head.last_modified) {
        Ok(path) => path,
        Err(e) => {
            engine.stats.set_exit_status(e.exit_status());
            return Err(Verdict::Done);
        }
    };

    if let Some(path) = &saved_path {
        tracing::info!(path = %path.display(), "saved");
        engine.sink.write_origin(
            path,
            &crate::sink::FileOrigin {
                origin_url: job.url.canonical(),
                referer: job.referer.as_ref().map(CanonicalUrl::canonical),
                mime_type: head.content_type.as_deref(),
                charset: head.charset.as_deref(),
            },
        );
    }

    Ok((saved_path, body))
}

/// The body was a metalink description: build the part set.
async fn handle_metalink_body(
    engine: &Engine,
    job: Job,
    response: reqwest::Response,
) -> Verdict {
    let bytes = match response.bytes().await {
        Ok(bytes) => bytes,
        Err(e) => return Verdict::Transport(job, classify_transport_error(&e)),
    };
    let text = String::from_utf8_lossy(&bytes);

    let Some(metalink) = parse_metalink(&text) else {
        tracing::error!(url = %job.url, "unusable metalink description");
        engine.stats.set_exit_status(trawl_types::ExitStatus::Protocol);
        return Verdict::Done;
    };

    // The declared name is a bare file name; anything path-like is hostile.
    let file_name = std::path::Path::new(&metalink.name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "download".to_string());
    let name = engine.config.directory_prefix.join(file_name);

    let mirrors: Vec<CanonicalUrl> = metalink
        .mirrors
        .iter()
        .filter_map(|m| CanonicalUrl::parse(&m.url).ok())
        .collect();
    if mirrors.is_empty() {
        tracing::error!(url = %job.url, "no usable download mirrors found");
        return Verdict::Done;
    }

    let parts: Vec<PartState> = if metalink.pieces.is_empty() {
        vec![PartState {
            position: 0,
            length: metalink.size,
            hash: None,
            done: false,
        }]
    } else {
        metalink
            .pieces
            .iter()
            .map(|p| PartState {
                position: p.position,
                length: p.length,
                hash: p.hash.clone(),
                done: false,
            })
            .collect()
    };

    let set = Arc::new(PartSet {
        name,
        size: metalink.size,
        global_hash: metalink.global_hash.clone(),
        mirrors,
        parts: std::sync::Mutex::new(parts),
        piece_type: metalink.piece_type.clone(),
        validation_retries: std::sync::atomic::AtomicU32::new(0),
    });

    match set.validate_file() {
        Ok(true) => {
            tracing::info!(file = %set.name.display(), "file already complete");
            return Verdict::Done;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::error!(file = %set.name.display(), "cannot validate: {e}");
            engine.stats.set_exit_status(trawl_types::ExitStatus::Io);
        }
    }

    add_part_jobs(engine, &set, job.referer.clone());
    Verdict::Done
}

/// Feed a buffered body to the parser matching its content type, admitting
/// what comes out.
fn process_parsed_body(
    engine: &Engine,
    job: &Job,
    head: &ResponseHead,
    body: &[u8],
    saved_path: Option<PathBuf>,
) {
    let config = &engine.config;
    let encoding = head.charset.as_deref();

    if job.robotstxt {
        let text = decode_to_utf8(body, encoding);
        let rules = parse_robots(&text, robots_token(&config.user_agent));
        let sitemaps = rules.sitemaps.clone();
        engine
            .frontier
            .robots_done(&HostKey::of(&job.original_url), Some(rules));

        if !config.page_requisites {
            for sitemap in sitemaps {
                tracing::info!(url = %sitemap, "adding sitemap");
                add_url(engine, Some(job), &sitemap, None, Some(job.url.url()), AddKind::Sitemap);
            }
        }
        return;
    }

    let Some(content_type) = head.content_type.as_deref() else {
        return;
    };
    let base = job.url.url();

    match content_type {
        "text/html" | "application/xhtml+xml" => {
            let doc = trawl_parse::extract_html_links(body, encoding);
            let effective_base = doc
                .base
                .as_deref()
                .and_then(|b| base.join(b).ok())
                .unwrap_or_else(|| base.clone());
            let doc_encoding = doc.encoding.clone().or_else(|| head.charset.clone());

            add_parsed_links(
                engine,
                job,
                &effective_base,
                doc_encoding.as_deref(),
                doc.links.iter().map(|l| l.raw.as_str()),
                AddKind::Parsed,
            );

            if config.convert_links
                && !config.delete_after
                && let Some(path) = saved_path
            {
                engine.record_conversion(path, effective_base, doc_encoding, doc.links);
            }
        }
        "text/css" => {
            let (links, css_encoding) = trawl_parse::extract_css_links(body, encoding);
            add_parsed_links(
                engine,
                job,
                base,
                css_encoding.as_deref().or(encoding),
                links.iter().map(|l| l.raw.as_str()),
                AddKind::Parsed,
            );
        }
        "application/atom+xml" => {
            let text = decode_to_utf8(body, Some("utf-8"));
            let links = trawl_parse::extract_atom_links(&text);
            add_parsed_links(
                engine,
                job,
                base,
                None,
                links.iter().map(|l| l.raw.as_str()),
                AddKind::Parsed,
            );
        }
        "application/rss+xml" => {
            let text = decode_to_utf8(body, Some("utf-8"));
            let links = trawl_parse::extract_rss_links(&text);
            add_parsed_links(
                engine,
                job,
                base,
                None,
                links.iter().map(|l| l.raw.as_str()),
                AddKind::Parsed,
            );
        }
        _ if job.sitemap => {
            let entries = match content_type {
                "application/x-gzip" => trawl_parse::extract_sitemap_links_gz(body).unwrap_or_default(),
                "text/plain" => {
                    trawl_parse::extract_sitemap_links_text(&decode_to_utf8(body, Some("utf-8")))
                }
                _ => trawl_parse::extract_sitemap_links(&decode_to_utf8(body, Some("utf-8"))),
            };
            for entry in entries {
                let kind = if entry.is_sitemap { AddKind::Sitemap } else { AddKind::Parsed };
                add_url(engine, Some(job), &entry.link.raw, None, Some(base), kind);
            }
        }
        _ => {}
    }
}

/// 304/416: the local copy is current; under recursion it still needs to
/// be parsed so the crawl continues through it.
fn reparse_local_copy(engine: &Engine, job: &Job) {
    let config = &engine.config;
    if !config.level_allows(job.level) {
        return;
    }
    let Some(path) = &job.local_filename else {
        return;
    };
    let Ok(body) = std::fs::read(path) else {
        return;
    };

    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase());
    let head = ResponseHead {
        content_type: match ext.as_deref() {
            Some("html" | "htm") => Some("text/html".to_string()),
            Some("css") => Some("text/css".to_string()),
            _ => return,
        },
        ..ResponseHead::default()
    };
    process_parsed_body(engine, job, &head, &body, Some(path.clone()));
}

/// The product token the robots parser matches groups against.
fn robots_token(user_agent: &str) -> &str {
    user_agent
        .split(['/', ' '])
        .next()
        .filter(|t| !t.is_empty())
        .unwrap_or(user_agent)
}

/// Rebuild a job for retry after its response object was consumed.
fn clone_for_retry(job: &Job) -> Job {
    Job {
        url: job.url.clone(),
        original_url: job.original_url.clone(),
        referer: job.referer.clone(),
        redirection_level: job.redirection_level,
        level: job.level,
        head_first: job.head_first,
        sitemap: job.sitemap,
        robotstxt: job.robotstxt,
        requested_by_user: job.requested_by_user,
        ignore_patterns: job.ignore_patterns,
        local_filename: job.local_filename.clone(),
        challenges: job.challenges.clone(),
        proxy_challenges: job.proxy_challenges.clone(),
        auth_failure_count: job.auth_failure_count,
        part: job.part.clone(),
    }
}

fn parse_disposition_filename(value: &str) -> Option<String> {
    for param in value.split(';') {
        let param = param.trim();
        if let Some(rest) = param.strip_prefix("filename=") {
            let name = rest.trim().trim_matches('"').trim_matches('\'');
            if !name.is_empty() {
                // Only the basename; directory parts are never trusted.
                return std::path::Path::new(name)
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned());
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::{parse_disposition_filename, robots_token};

    #[test]
    fn robots_token_is_the_product() {
        assert_eq!(robots_token("trawl/0.2.0"), "trawl");
        assert_eq!(robots_token("MyAgent (like wget)"), "MyAgent");
        assert_eq!(robots_token("bare"), "bare");
    }

    #[test]
    fn disposition_filename_is_basename_only() {
        assert_eq!(
            parse_disposition_filename("attachment; filename=\"report.pdf\""),
            Some("report.pdf".to_string())
        );
        assert_eq!(
            parse_disposition_filename("attachment; filename=\"../../etc/passwd\""),
            Some("passwd".to_string())
        );
        assert_eq!(parse_disposition_filename("inline"), None);
    }
}

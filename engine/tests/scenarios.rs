//! End-to-end scenarios for the retrieval engine.
//!
//! Each test stands up a wiremock server, runs the engine against it and
//! checks the mirrored files plus the counters. Everything rides over
//! plain http on loopback; TLS behavior is covered by unit tests at the
//! transport layer.

use std::path::PathBuf;
use std::sync::Arc;

use trawl_config::Config;
use trawl_engine::Engine;
use trawl_types::ExitStatus;
use wiremock::matchers::{header_exists, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

fn base_config(server: &MockServer, dir: &std::path::Path) -> Config {
    Config {
        urls: vec![format!("{}/", server.uri())],
        directory_prefix: dir.to_path_buf(),
        // Keep ambient proxy variables out of loopback tests.
        proxy: false,
        verbose: false,
        ..Config::default()
    }
}

fn host_dir(server: &MockServer) -> String {
    format!("127.0.0.1+{}", server.address().port())
}

fn mirror_path(server: &MockServer, dir: &std::path::Path, name: &str) -> PathBuf {
    dir.join(host_dir(server)).join(name)
}

async fn mount_robots_404(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(ResponseTemplate::new(404))
        .mount(server)
        .await;
}

fn html(body: &str) -> ResponseTemplate {
    ResponseTemplate::new(200)
        .insert_header("Content-Type", "text/html")
        .set_body_string(body.to_string())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn recursion_stops_at_level_one() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_robots_404(&server).await;
    Mock::given(method("GET"))
        .and(path("/a.html"))
        .respond_with(html(r#"<html><body><a href="b.html">b</a></body></html>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.html"))
        .respond_with(html(r#"<html><body><a href="c.html">c</a></body></html>"#))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/c.html"))
        .respond_with(html("<html>deep</html>"))
        .expect(0)
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/a.html", server.uri())],
        recursive: true,
        level: 1,
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    let status = engine.run().await;

    assert_eq!(status, ExitStatus::Success);
    assert!(mirror_path(&server, dir.path(), "a.html").is_file());
    assert!(mirror_path(&server, dir.path(), "b.html").is_file());
    assert!(!mirror_path(&server, dir.path(), "c.html").exists());
    assert_eq!(engine.stats.downloads(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn redirects_fold_back_through_the_queue() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(
            ResponseTemplate::new(301).insert_header("Location", format!("{}/y", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/y"))
        .respond_with(html("<html>landed</html>"))
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/x", server.uri())],
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    let status = engine.run().await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(engine.stats.redirects(), 1);
    assert_eq!(engine.stats.downloads(), 1);
    // The redirect keeps the name derived from the original URL.
    assert!(mirror_path(&server, dir.path(), "x").is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn max_redirect_zero_stops_at_the_first_hop() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/x"))
        .respond_with(
            ResponseTemplate::new(302).insert_header("Location", format!("{}/y", server.uri())),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/y"))
        .respond_with(html("unreached"))
        .expect(0)
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/x", server.uri())],
        max_redirect: 0,
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    engine.run().await;

    assert_eq!(engine.stats.redirects(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn hsts_upgrades_later_admissions() {
    // No TLS in wiremock: exercise the admission-time rewrite directly.
    let dir = tempfile::tempdir().unwrap();
    let hsts_file = dir.path().join("hsts");
    std::fs::write(
        &hsts_file,
        format!("strict.example 443 {} 1\n", u64::MAX / 2),
    )
    .unwrap();

    let config = Config {
        hsts_file: Some(hsts_file),
        ..Config::default()
    };
    let engine = Engine::new(Arc::new(config)).unwrap();

    trawl_engine::add_seed(&engine, "http://strict.example/page", None);

    engine.frontier.with_state(|state| {
        assert!(
            state.blacklist.contains(
                &trawl_types::CanonicalUrl::parse("https://strict.example/page").unwrap()
            ),
            "http seed should be admitted in its https form"
        );
    });
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn chunked_download_assembles_three_parts() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    let body: Vec<u8> = (0..3000u32).map(|i| (i % 251) as u8).collect();

    Mock::given(method("HEAD"))
        .and(path("/big"))
        .respond_with(ResponseTemplate::new(200).set_body_raw(body.clone(), "application/octet-stream"))
        .mount(&server)
        .await;

    for (range, slice) in [
        ("bytes=0-999", &body[0..1000]),
        ("bytes=1000-1999", &body[1000..2000]),
        ("bytes=2000-2999", &body[2000..3000]),
    ] {
        Mock::given(method("GET"))
            .and(path("/big"))
            .and(wiremock::matchers::header("Range", range))
            .respond_with(
                ResponseTemplate::new(206).set_body_raw(slice.to_vec(), "application/octet-stream"),
            )
            .expect(1)
            .mount(&server)
            .await;
    }

    let config = Config {
        urls: vec![format!("{}/big", server.uri())],
        chunk_size: 1000,
        max_threads: 3,
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    let status = engine.run().await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(engine.stats.chunks(), 3);

    let assembled = std::fs::read(mirror_path(&server, dir.path(), "big")).unwrap();
    assert_eq!(assembled.len(), 3000);
    assert_eq!(assembled, body);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn digest_challenge_is_answered_on_the_second_request() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/p"))
        .and(header_exists("Authorization"))
        .respond_with(html("<html>secret</html>"))
        .with_priority(1)
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/p"))
        .respond_with(ResponseTemplate::new(401).insert_header(
            "WWW-Authenticate",
            r#"Digest realm="wally", nonce="abc123", qop="auth""#,
        ))
        .with_priority(5)
        .expect(1)
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/p", server.uri())],
        http_username: Some("user".to_string()),
        http_password: Some("pass".to_string()),
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    let status = engine.run().await;

    assert_eq!(status, ExitStatus::Success);
    assert_eq!(engine.stats.downloads(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn auth_failure_without_challenges_exits_auth() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/p"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/p", server.uri())],
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    let status = engine.run().await;

    assert_eq!(status, ExitStatus::Auth);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn robots_disallow_is_honored() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/robots.txt"))
        .respond_with(
            ResponseTemplate::new(200).set_body_string("User-agent: *\nDisallow: /private/\n"),
        )
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/"))
        .respond_with(html(
            r#"<a href="/private/secret">s</a> <a href="/public/ok.html">ok</a>"#,
        ))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/public/ok.html"))
        .respond_with(html("<html>ok</html>"))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/private/secret"))
        .respond_with(html("never"))
        .expect(0)
        .mount(&server)
        .await;

    let config = Config {
        recursive: true,
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    let status = engine.run().await;

    assert_eq!(status, ExitStatus::Success);
    assert!(mirror_path(&server, dir.path(), "public/ok.html").is_file());
    assert!(!mirror_path(&server, dir.path(), "private/secret").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn head_probe_rejects_opaque_content_type() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_robots_404(&server).await;
    Mock::given(method("HEAD"))
        .and(path("/a"))
        .respond_with(
            ResponseTemplate::new(200).insert_header("Content-Type", "image/png"),
        )
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/a"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/a", server.uri())],
        recursive: true,
        accept_regex: Some(r".*\.html$".to_string()),
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    let status = engine.run().await;

    assert_eq!(status, ExitStatus::Success);
    assert!(!mirror_path(&server, dir.path(), "a").exists());
    assert_eq!(engine.stats.downloads(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn timestamping_rerun_writes_nothing_new() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/t.html"))
        .and(header_exists("If-Modified-Since"))
        .respond_with(ResponseTemplate::new(304))
        .with_priority(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/t.html"))
        .respond_with(
            html("<html>stable</html>")
                .insert_header("Last-Modified", "Sun, 06 Nov 1994 08:49:37 GMT"),
        )
        .with_priority(5)
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/t.html", server.uri())],
        timestamping: true,
        ..base_config(&server, dir.path())
    };

    let first = Engine::new(Arc::new(config.clone())).unwrap();
    assert_eq!(first.run().await, ExitStatus::Success);
    assert_eq!(first.stats.downloads(), 1);

    let saved = mirror_path(&server, dir.path(), "t.html");
    let mtime_after_first = std::fs::metadata(&saved).unwrap().modified().unwrap();

    let second = Engine::new(Arc::new(config)).unwrap();
    assert_eq!(second.run().await, ExitStatus::Success);
    assert_eq!(second.stats.not_modified(), 1);
    assert_eq!(second.stats.downloads(), 0);
    assert_eq!(
        std::fs::metadata(&saved).unwrap().modified().unwrap(),
        mtime_after_first,
        "an unchanged remote must not touch the local file"
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn convert_links_rewrites_to_local_relative_paths() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_robots_404(&server).await;
    Mock::given(method("GET"))
        .and(path("/a.html"))
        .respond_with(html(&format!(
            r#"<html><a href="{}/b.html">b</a> <a href="{}/missing.html">m</a></html>"#,
            server.uri(),
            server.uri()
        )))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/b.html"))
        .respond_with(html("<html>b</html>"))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/missing.html"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/a.html", server.uri())],
        recursive: true,
        level: 1,
        convert_links: true,
        backup_converted: true,
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    engine.run().await;

    let converted = std::fs::read_to_string(mirror_path(&server, dir.path(), "a.html")).unwrap();
    assert!(
        converted.contains(r#"href="b.html""#),
        "downloaded neighbor should become a relative link: {converted}"
    );
    assert!(
        converted.contains(&format!(r#"href="{}/missing.html""#, server.uri())),
        "missing neighbor should stay absolute: {converted}"
    );

    let mut orig = mirror_path(&server, dir.path(), "a.html").into_os_string();
    orig.push(".orig");
    assert!(PathBuf::from(orig).is_file());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn quota_soft_stops_new_downloads() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    mount_robots_404(&server).await;
    let big = "x".repeat(4096);
    for name in ["/p1.html", "/p2.html", "/p3.html"] {
        Mock::given(method("GET"))
            .and(path(name))
            .respond_with(html(&big))
            .mount(&server)
            .await;
    }
    Mock::given(method("GET"))
        .and(path("/index.html"))
        .respond_with(html(
            r#"<a href="p1.html">1</a><a href="p2.html">2</a><a href="p3.html">3</a>"#,
        ))
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/index.html", server.uri())],
        recursive: true,
        quota: 1,
        max_threads: 1,
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    engine.run().await;

    // The first body blows the quota; the children never start.
    assert!(engine.stats.downloads() <= 1);
    assert!(!mirror_path(&server, dir.path(), "p1.html").exists());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn remote_server_errors_set_the_remote_status() {
    let server = MockServer::start().await;
    let dir = tempfile::tempdir().unwrap();

    Mock::given(method("GET"))
        .and(path("/gone"))
        .respond_with(ResponseTemplate::new(410))
        .mount(&server)
        .await;

    let config = Config {
        urls: vec![format!("{}/gone", server.uri())],
        ..base_config(&server, dir.path())
    };

    let engine = Engine::new(Arc::new(config)).unwrap();
    assert_eq!(engine.run().await, ExitStatus::Remote);
    assert_eq!(engine.stats.errors(), 1);
}

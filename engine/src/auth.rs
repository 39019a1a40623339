//! HTTP authentication: challenge parsing and credential headers.
//!
//! Basic and Digest are supported; Digest wins when a server offers both.
//! Digest implements RFC 7616 with MD5 and SHA-256, `qop=auth` only.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use md5::Md5;
use sha2::{Digest as _, Sha256};

/// One parsed `WWW-Authenticate` / `Proxy-Authenticate` challenge.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Lowercase scheme: `basic` or `digest`.
    pub scheme: String,
    pub params: Vec<(String, String)>,
}

impl Challenge {
    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Parse the challenges out of header values.
///
/// A single header line may carry several comma-separated challenges;
/// commas also separate a challenge's parameters, so a new challenge is
/// recognized by `token SP token=` shape.
#[must_use]
pub fn parse_challenges<'a>(values: impl IntoIterator<Item = &'a str>) -> Vec<Challenge> {
    let mut challenges = Vec::new();

    for value in values {
        let mut rest = value.trim();
        while !rest.is_empty() {
            let scheme_end = rest.find([' ', '\t']).unwrap_or(rest.len());
            let scheme = rest[..scheme_end].trim_end_matches(',').to_ascii_lowercase();
            if scheme.is_empty() {
                break;
            }
            rest = rest[scheme_end..].trim_start();

            let mut params = Vec::new();
            loop {
                let Some(eq) = rest.find('=') else { break };
                let key = rest[..eq].trim().trim_start_matches(',').trim().to_string();
                // A bare token before '=' that contains a space means the
                // next challenge already started.
                if key.contains(' ') || key.is_empty() {
                    break;
                }
                rest = &rest[eq + 1..];

                let value;
                if let Some(stripped) = rest.strip_prefix('"') {
                    let close = stripped.find('"').unwrap_or(stripped.len());
                    value = stripped[..close].to_string();
                    rest = stripped.get(close + 1..).unwrap_or("");
                } else {
                    let end = rest.find(',').unwrap_or(rest.len());
                    value = rest[..end].trim().to_string();
                    rest = rest.get(end..).unwrap_or("");
                }
                params.push((key.to_ascii_lowercase(), value));

                rest = rest.trim_start().trim_start_matches(',').trim_start();

                // Peek: `token token=` (with a space) starts a new challenge.
                if let Some(eq) = rest.find('=') {
                    let head = &rest[..eq];
                    if head.trim().contains(' ') {
                        break;
                    }
                } else {
                    break;
                }
            }

            challenges.push(Challenge { scheme, params });
        }
    }

    challenges
}

/// Pick the strongest usable challenge: Digest over Basic.
#[must_use]
pub fn select_challenge(challenges: &[Challenge]) -> Option<&Challenge> {
    challenges
        .iter()
        .find(|c| c.scheme == "digest")
        .or_else(|| challenges.iter().find(|c| c.scheme == "basic"))
}

/// Build an `Authorization` header value for the selected challenge.
#[must_use]
pub fn authorization_value(
    challenge: &Challenge,
    username: &str,
    password: &str,
    method: &str,
    uri_path: &str,
) -> Option<String> {
    match challenge.scheme.as_str() {
        "basic" => Some(basic_value(username, password)),
        "digest" => digest_value(challenge, username, password, method, uri_path),
        _ => None,
    }
}

/// `Basic` credentials, also used for `--auth-no-challenge`.
#[must_use]
pub fn basic_value(username: &str, password: &str) -> String {
    let raw = format!("{username}:{password}");
    format!("Basic {}", BASE64.encode(raw.as_bytes()))
}

fn digest_value(
    challenge: &Challenge,
    username: &str,
    password: &str,
    method: &str,
    uri_path: &str,
) -> Option<String> {
    let realm = challenge.param("realm").unwrap_or("");
    let nonce = challenge.param("nonce")?;
    let opaque = challenge.param("opaque");
    let algorithm = challenge.param("algorithm").unwrap_or("MD5");
    let qop_offered = challenge
        .param("qop")
        .map(|q| q.split(',').any(|v| v.trim().eq_ignore_ascii_case("auth")))
        .unwrap_or(false);

    let hash: fn(&str) -> String = if algorithm.eq_ignore_ascii_case("sha-256") {
        sha256_hex
    } else if algorithm.eq_ignore_ascii_case("md5") {
        md5_hex
    } else {
        return None;
    };

    let ha1 = hash(&format!("{username}:{realm}:{password}"));
    let ha2 = hash(&format!("{method}:{uri_path}"));

    let mut header = format!(
        "Digest username=\"{username}\", realm=\"{realm}\", nonce=\"{nonce}\", uri=\"{uri_path}\""
    );

    if qop_offered {
        let cnonce = random_cnonce();
        let nc = "00000001";
        let response = hash(&format!("{ha1}:{nonce}:{nc}:{cnonce}:auth:{ha2}"));
        header.push_str(&format!(
            ", qop=auth, nc={nc}, cnonce=\"{cnonce}\", response=\"{response}\""
        ));
    } else {
        let response = hash(&format!("{ha1}:{nonce}:{ha2}"));
        header.push_str(&format!(", response=\"{response}\""));
    }

    if !algorithm.eq_ignore_ascii_case("md5") {
        header.push_str(&format!(", algorithm={algorithm}"));
    }
    if let Some(opaque) = opaque {
        header.push_str(&format!(", opaque=\"{opaque}\""));
    }

    Some(header)
}

fn md5_hex(input: &str) -> String {
    let digest = Md5::digest(input.as_bytes());
    to_hex(&digest)
}

fn sha256_hex(input: &str) -> String {
    let digest = Sha256::digest(input.as_bytes());
    to_hex(&digest)
}

fn to_hex(bytes: &[u8]) -> String {
    use std::fmt::Write as _;
    let mut hex = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(hex, "{byte:02x}");
    }
    hex
}

fn random_cnonce() -> String {
    let bytes: [u8; 8] = rand::random();
    to_hex(&bytes)
}

#[cfg(test)]
mod tests {
    use pretty_assertions::assert_eq;

    use super::{authorization_value, basic_value, parse_challenges, select_challenge};

    #[test]
    fn parses_basic_and_digest() {
        let challenges = parse_challenges([
            r#"Digest realm="wally", nonce="abc123", qop="auth", opaque="xyz""#,
            r#"Basic realm="wally""#,
        ]);
        assert_eq!(challenges.len(), 2);
        assert_eq!(challenges[0].scheme, "digest");
        assert_eq!(challenges[0].param("nonce"), Some("abc123"));
        assert_eq!(challenges[1].scheme, "basic");
        assert_eq!(challenges[1].param("realm"), Some("wally"));
    }

    #[test]
    fn digest_preferred_over_basic() {
        let challenges = parse_challenges([
            r#"Basic realm="r""#,
            r#"Digest realm="r", nonce="n""#,
        ]);
        let selected = select_challenge(&challenges).unwrap();
        assert_eq!(selected.scheme, "digest");
    }

    #[test]
    fn basic_header_value() {
        // RFC 7617's Aladdin example
        assert_eq!(
            basic_value("Aladdin", "open sesame"),
            "Basic QWxhZGRpbjpvcGVuIHNlc2FtZQ=="
        );
    }

    #[test]
    fn digest_without_qop_matches_rfc2069_form() {
        let challenges = parse_challenges([
            r#"Digest realm="testrealm@host.com", nonce="dcd98b7102dd2f0e8b11d0f600bfb0c093""#,
        ]);
        let value = authorization_value(
            &challenges[0],
            "Mufasa",
            "CircleOfLife",
            "GET",
            "/dir/index.html",
        )
        .unwrap();
        assert!(value.starts_with("Digest username=\"Mufasa\""));
        assert!(value.contains("uri=\"/dir/index.html\""));
        assert!(value.contains("response=\""));
        assert!(!value.contains("qop="));
    }

    #[test]
    fn digest_with_qop_includes_cnonce_and_nc() {
        let challenges = parse_challenges([
            r#"Digest realm="r", nonce="n", qop="auth""#,
        ]);
        let value =
            authorization_value(&challenges[0], "user", "pass", "GET", "/p").unwrap();
        assert!(value.contains("qop=auth"));
        assert!(value.contains("nc=00000001"));
        assert!(value.contains("cnonce=\""));
    }

    #[test]
    fn unsupported_algorithm_yields_none() {
        let challenges = parse_challenges([r#"Digest realm="r", nonce="n", algorithm=MD5-sess"#]);
        assert!(authorization_value(&challenges[0], "u", "p", "GET", "/").is_none());
    }
}
